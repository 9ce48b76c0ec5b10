use bson::{doc, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::geo_point::GeoPoint;
use super::metadata::Metadata;
use super::provider::ServiceType;
use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::geo::LatLng;
use crate::requests::lifecycle::RequestStatus;

pub const SERVICE_REQUEST_COLLECTION: &str = "service_requests";

/// Longest accepted description or review text
pub const MAX_TEXT_LEN: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteAuthor {
    Customer,
    Mechanic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestNote {
    pub message: String,
    pub author: NoteAuthor,
    pub timestamp: bson::DateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleInfo {
    pub make: String,
    pub model: String,
    pub year: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_plate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vin: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerContact {
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// One roadside assistance request through its whole lifecycle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceRequestDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<bson::oid::ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    /// Stable external id used in routes and events
    pub request_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer: Option<CustomerContact>,

    pub location: GeoPoint,

    pub service_type: ServiceType,

    pub description: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub vehicle: Option<VehicleInfo>,

    #[serde(default)]
    pub status: RequestStatus,

    /// Set exactly once, by the accept winner
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted_by: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_cost: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_cost: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted_at: Option<bson::DateTime>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<bson::DateTime>,

    #[serde(default)]
    pub notes: Vec<RequestNote>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub review: Option<String>,
}

impl ServiceRequestDoc {
    pub fn new(location: LatLng, service_type: ServiceType, description: String) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            request_id: Uuid::new_v4().to_string(),
            customer: None,
            location: GeoPoint::new(location),
            service_type,
            description,
            vehicle: None,
            status: RequestStatus::Pending,
            accepted_by: None,
            estimated_cost: None,
            actual_cost: None,
            accepted_at: None,
            completed_at: None,
            notes: vec![],
            rating: None,
            review: None,
        }
    }

    pub fn latlng(&self) -> LatLng {
        self.location.to_latlng()
    }
}

impl IntoIndexes for ServiceRequestDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Unique index on the external id
            (
                doc! { "request_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("request_id_unique".to_string())
                        .build(),
                ),
            ),
            // Geospatial index for the catch-up feed
            (
                doc! { "location": "2dsphere" },
                Some(
                    IndexOptions::builder()
                        .name("request_location_index".to_string())
                        .build(),
                ),
            ),
            // Status plus recency, the feed query shape
            (
                doc! { "status": 1, "metadata.created_at": -1 },
                Some(
                    IndexOptions::builder()
                        .name("request_status_index".to_string())
                        .build(),
                ),
            ),
            // Per-mechanic job list
            (
                doc! { "accepted_by": 1 },
                Some(
                    IndexOptions::builder()
                        .name("request_accepted_by_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for ServiceRequestDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

pub fn request_filter(request_id: &str) -> Document {
    doc! { "request_id": request_id }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_request_starts_pending() {
        let request = ServiceRequestDoc::new(
            LatLng::new(19.0760, 72.8777),
            ServiceType::TireRepair,
            "flat rear tire".to_string(),
        );
        assert_eq!(request.status, RequestStatus::Pending);
        assert!(request.accepted_by.is_none());
        assert!(request.notes.is_empty());
        assert!(!request.request_id.is_empty());
    }

    #[test]
    fn test_optional_fields_skipped_in_bson() {
        let request = ServiceRequestDoc::new(
            LatLng::new(0.0, 0.0),
            ServiceType::Other,
            "n/a".to_string(),
        );
        let doc = bson::to_document(&request).unwrap();
        assert!(!doc.contains_key("accepted_by"));
        assert!(!doc.contains_key("rating"));
        assert!(!doc.contains_key("vehicle"));
        assert_eq!(doc.get_str("status").unwrap(), "pending");
    }

    #[test]
    fn test_request_indices() {
        let indices = ServiceRequestDoc::into_indices();
        assert_eq!(indices.len(), 4);
        assert_eq!(indices[0].0, doc! { "request_id": 1 });
    }
}
