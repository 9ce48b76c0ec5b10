//! Geospatial candidate selection for service requests
//!
//! Keeps an in-memory mirror of the provider directory and answers
//! "which available providers offer this service within this radius,
//! best ones first".

pub mod index;

pub use index::{Candidate, MatchingIndex};
