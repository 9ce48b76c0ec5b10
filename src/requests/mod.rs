//! Service request lifecycle and persistence

pub mod lifecycle;
pub mod store;

pub use lifecycle::RequestStatus;
pub use store::{AcceptOutcome, NearbyRequest, RequestStore};
