//! Configuration for Curbside
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use uuid::Uuid;

/// Curbside - dispatch and matching engine for roadside assistance
#[derive(Parser, Debug, Clone)]
#[command(name = "curbside")]
#[command(about = "Service request dispatch and matching engine")]
pub struct Args {
    /// Unique node identifier for this instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Enable development mode (in-memory fallback, token minting endpoint)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "curbside")]
    pub mongodb_db: String,

    /// JWT secret for token signing (required in production)
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// JWT token expiry in seconds
    #[arg(long, env = "JWT_EXPIRY_SECONDS", default_value = "3600")]
    pub jwt_expiry_seconds: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Candidate search radius in kilometers
    ///
    /// Used both for dispatch fan-out and as the default for nearby queries.
    #[arg(long, env = "SEARCH_RADIUS_KM", default_value = "10")]
    pub search_radius_km: f64,

    /// How far back the provider feed reaches, in hours
    #[arg(long, env = "CATCHUP_WINDOW_HOURS", default_value = "24")]
    pub catchup_window_hours: i64,

    /// Per-delivery timeout for fallback notifications, in milliseconds
    #[arg(long, env = "DISPATCH_SEND_TIMEOUT_MS", default_value = "5000")]
    pub dispatch_send_timeout_ms: u64,

    /// Maximum concurrent fallback deliveries per dispatch
    #[arg(long, env = "DISPATCH_CONCURRENCY", default_value = "16")]
    pub dispatch_concurrency: usize,

    /// URL of the notification relay for offline providers
    ///
    /// When unset, fallback deliveries are logged instead of sent.
    #[arg(long, env = "RELAY_URL")]
    pub relay_url: Option<String>,

    /// Shared secret sent to the notification relay
    #[arg(long, env = "RELAY_SECRET")]
    pub relay_secret: Option<String>,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode && self.jwt_secret.is_none() {
            return Err("JWT_SECRET is required in production mode".to_string());
        }

        if !(self.search_radius_km > 0.0) || !self.search_radius_km.is_finite() {
            return Err("SEARCH_RADIUS_KM must be a positive number".to_string());
        }

        if self.catchup_window_hours < 1 {
            return Err("CATCHUP_WINDOW_HOURS must be at least 1".to_string());
        }

        if self.dispatch_send_timeout_ms == 0 {
            return Err("DISPATCH_SEND_TIMEOUT_MS must be greater than zero".to_string());
        }

        if self.relay_secret.is_some() && self.relay_url.is_none() {
            return Err("RELAY_SECRET is set but RELAY_URL is not".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
impl Args {
    /// Development-mode defaults for unit tests, bypassing env lookups
    pub fn for_tests() -> Self {
        Self {
            node_id: Uuid::new_v4(),
            listen: "127.0.0.1:0".parse().unwrap(),
            dev_mode: true,
            mongodb_uri: "mongodb://localhost:27017".to_string(),
            mongodb_db: "curbside-test".to_string(),
            jwt_secret: None,
            jwt_expiry_seconds: 3600,
            log_level: "debug".to_string(),
            search_radius_km: 10.0,
            catchup_window_hours: 24,
            dispatch_send_timeout_ms: 5000,
            dispatch_concurrency: 16,
            relay_url: None,
            relay_secret: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dev_mode_needs_no_secret() {
        let args = Args::for_tests();
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_production_requires_secret() {
        let mut args = Args::for_tests();
        args.dev_mode = false;
        assert!(args.validate().is_err());

        args.jwt_secret = Some("0123456789abcdef0123456789abcdef".to_string());
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_rejects_nonsense_radius() {
        let mut args = Args::for_tests();
        args.search_radius_km = 0.0;
        assert!(args.validate().is_err());

        args.search_radius_km = f64::NAN;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_relay_secret_without_url_rejected() {
        let mut args = Args::for_tests();
        args.relay_secret = Some("hunter2".to_string());
        assert!(args.validate().is_err());
    }
}
