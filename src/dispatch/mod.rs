//! Candidate notification fan-out
//!
//! The coordinator turns a pending request into notifications: it asks the
//! matching index for ranked candidates, splits them by presence, pushes a
//! structured offer over each live connection, and sends a fallback message
//! to everyone else. Nothing is reserved at this stage. The accept race is
//! settled later by the request store's conditional status write, so a
//! notification reaching a candidate too late to win is normal.

pub mod coordinator;

pub use coordinator::{DispatchConfig, DispatchCoordinator, DispatchReport, FailedDelivery};
