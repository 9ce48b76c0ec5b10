//! Mechanic presence tracking
//!
//! Maps provider ids to live connections so dispatch can tell who gets a
//! push and who gets a fallback notification.

pub mod registry;

pub use registry::{PresenceRegistry, PresenceSnapshot};
