//! Wire-format event types for the live feed

use serde::{Deserialize, Serialize};

use crate::db::schemas::ServiceType;
use crate::requests::RequestStatus;

/// Event sent from server to client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveEvent {
    /// Identification accepted
    Identified {
        provider_id: String,
        timestamp: String,
    },
    /// A mechanic came online
    ProviderOnline {
        provider_id: String,
        timestamp: String,
    },
    /// A mechanic went offline
    ProviderOffline {
        provider_id: String,
        timestamp: String,
    },
    /// A new request within range of the receiving mechanic
    RequestNew {
        request_id: String,
        service_type: ServiceType,
        description: String,
        latitude: f64,
        longitude: f64,
        distance_km: f64,
        timestamp: String,
    },
    /// A request changed lifecycle state
    RequestUpdate {
        request_id: String,
        status: RequestStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        accepted_by: Option<String>,
        timestamp: String,
    },
    /// Reply to a client ping
    Pong { timestamp: String },
    /// Error message
    Error { message: String },
}

/// Event received from client
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Present a mechanic token to go online
    Identify { token: String },
    /// Keep-alive ping
    Ping,
}
