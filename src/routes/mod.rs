//! HTTP route handlers
//!
//! Each submodule owns one slice of the API surface and exposes a single
//! `handle_*_request` entry point that returns `None` when the path does
//! not belong to it, so the server can chain them.

pub mod auth_routes;
pub mod health;
pub mod live_ws;
pub mod providers;
pub mod requests;
pub mod respond;

pub use auth_routes::handle_auth_request;
pub use health::{health_check, readiness_check, version_info};
pub use live_ws::handle_live_ws;
pub use providers::handle_provider_request;
pub use requests::handle_request_api;
