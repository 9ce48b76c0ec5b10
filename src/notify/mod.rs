//! Fallback notification delivery for offline mechanics
//!
//! Online mechanics hear about new requests over their live connection.
//! Everyone else is reached through a delivery relay that fans messages
//! out to push, SMS, or email downstream of this service.

pub mod relay;

pub use relay::RelayNotifier;

use tracing::debug;

use crate::types::Result;

/// Trait for delivering one offline notification (allows mocking in tests)
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `body` to the provider addressed by `to`
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()>;
}

/// Notifier that only logs, for dev mode
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        debug!("Notification to {}: {} / {}", to, subject, body);
        Ok(())
    }
}
