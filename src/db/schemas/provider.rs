use std::collections::HashMap;
use std::fmt;

use bson::{doc, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use super::geo_point::GeoPoint;
use super::metadata::Metadata;
use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::geo::LatLng;

pub const PROVIDER_COLLECTION: &str = "providers";

/// Service categories a provider can offer and a request can ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceType {
    EngineRepair,
    BrakeService,
    OilChange,
    TireRepair,
    BatteryService,
    Transmission,
    Electrical,
    AcHeating,
    #[default]
    Other,
}

impl ServiceType {
    pub fn as_str(&self) -> &str {
        match self {
            ServiceType::EngineRepair => "engine-repair",
            ServiceType::BrakeService => "brake-service",
            ServiceType::OilChange => "oil-change",
            ServiceType::TireRepair => "tire-repair",
            ServiceType::BatteryService => "battery-service",
            ServiceType::Transmission => "transmission",
            ServiceType::Electrical => "electrical",
            ServiceType::AcHeating => "ac-heating",
            ServiceType::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "engine-repair" => Some(ServiceType::EngineRepair),
            "brake-service" => Some(ServiceType::BrakeService),
            "oil-change" => Some(ServiceType::OilChange),
            "tire-repair" => Some(ServiceType::TireRepair),
            "battery-service" => Some(ServiceType::BatteryService),
            "transmission" => Some(ServiceType::Transmission),
            "electrical" => Some(ServiceType::Electrical),
            "ac-heating" => Some(ServiceType::AcHeating),
            "other" => Some(ServiceType::Other),
            _ => None,
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Opening hours for one weekday, advisory only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayHours {
    pub open: String,
    pub close: String,
}

/// Registered service provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<bson::oid::ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    /// Stable external id, matches the subject of mechanic tokens
    pub provider_id: String,

    /// Account that owns this provider record
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_ref: Option<String>,

    pub business_name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_address: Option<String>,

    pub location: GeoPoint,

    #[serde(default)]
    pub services_offered: Vec<ServiceType>,

    #[serde(default = "default_true")]
    pub is_available: bool,

    /// Rolling average over submitted reviews
    #[serde(default)]
    pub rating: f64,

    #[serde(default)]
    pub review_count: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub weekly_hours: Option<HashMap<String, DayHours>>,
}

fn default_true() -> bool {
    true
}

impl ProviderDoc {
    pub fn new(
        provider_id: String,
        business_name: String,
        location: LatLng,
        services_offered: Vec<ServiceType>,
    ) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            provider_id,
            owner_ref: None,
            business_name,
            contact_address: None,
            location: GeoPoint::new(location),
            services_offered,
            is_available: true,
            rating: 0.0,
            review_count: 0,
            weekly_hours: None,
        }
    }

    pub fn latlng(&self) -> LatLng {
        self.location.to_latlng()
    }

    pub fn offers(&self, service: ServiceType) -> bool {
        self.services_offered.contains(&service)
    }
}

impl IntoIndexes for ProviderDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Unique index on the external id
            (
                doc! { "provider_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("provider_id_unique".to_string())
                        .build(),
                ),
            ),
            // Geospatial index for nearby lookups
            (
                doc! { "location": "2dsphere" },
                Some(
                    IndexOptions::builder()
                        .name("provider_location_index".to_string())
                        .build(),
                ),
            ),
            // Compound index matching the candidate filter
            (
                doc! { "is_available": 1, "services_offered": 1 },
                Some(
                    IndexOptions::builder()
                        .name("provider_availability_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for ProviderDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

pub fn provider_filter(provider_id: &str) -> Document {
    doc! { "provider_id": provider_id }
}
