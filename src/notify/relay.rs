//! HTTP delivery relay client

use serde::Serialize;
use tracing::debug;

use super::Notifier;
use crate::types::{CurbsideError, Result};

/// Message shape the relay accepts
#[derive(Debug, Serialize)]
struct RelayMessage<'a> {
    to: &'a str,
    subject: &'a str,
    body: &'a str,
}

/// Notifier that posts messages to a delivery relay
pub struct RelayNotifier {
    client: reqwest::Client,
    relay_url: String,
    secret: Option<String>,
}

impl RelayNotifier {
    pub fn new(relay_url: String, secret: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            relay_url,
            secret,
        }
    }
}

#[async_trait::async_trait]
impl Notifier for RelayNotifier {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        let message = RelayMessage { to, subject, body };

        let mut request = self.client.post(&self.relay_url).json(&message);
        if let Some(secret) = &self.secret {
            request = request.header("X-Relay-Secret", secret);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CurbsideError::Delivery(format!("relay unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(CurbsideError::Delivery(format!(
                "relay rejected message for {}: {}",
                to,
                response.status()
            )));
        }

        debug!("Relayed notification to {}", to);
        Ok(())
    }
}
