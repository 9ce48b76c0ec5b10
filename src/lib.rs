//! Curbside - dispatch and matching engine for roadside assistance
//!
//! Curbside connects stranded drivers with nearby service providers. A new
//! request is matched against the provider directory by service type and
//! distance, fanned out to every ranked candidate at once, and settled by
//! whichever provider accepts first.
//!
//! ## Services
//!
//! - **Matching**: haversine radius search over an in-memory provider index
//! - **Dispatch**: presence-aware fan-out with bounded fallback deliveries
//! - **Lifecycle**: request state machine with compare-and-set acceptance
//! - **Live**: WebSocket presence and event streaming for providers
//! - **Directory**: provider records, availability, and review rollups

pub mod auth;
pub mod config;
pub mod db;
pub mod directory;
pub mod dispatch;
pub mod geo;
pub mod live;
pub mod matching;
pub mod notify;
pub mod presence;
pub mod requests;
pub mod routes;
pub mod server;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{CurbsideError, Result};
