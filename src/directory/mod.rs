//! Provider directory
//!
//! Persistent registration and rollups for service providers, mirrored
//! into the in-memory matching index.

pub mod registry;

pub use registry::ProviderDirectory;
