//! GeoJSON point wrapper for 2dsphere-indexed fields
//!
//! MongoDB geospatial queries want `{ type: "Point", coordinates: [lon, lat] }`
//! with the axis order flipped relative to the API's latitude-first shape.

use serde::{Deserialize, Serialize};

use crate::geo::LatLng;

/// GeoJSON Point as stored in location fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    #[serde(rename = "type")]
    pub kind: String,

    /// [longitude, latitude]
    pub coordinates: [f64; 2],
}

impl GeoPoint {
    pub fn new(point: LatLng) -> Self {
        Self {
            kind: "Point".to_string(),
            coordinates: [point.longitude, point.latitude],
        }
    }

    /// Back to the latitude-first API shape
    pub fn to_latlng(&self) -> LatLng {
        LatLng::new(self.coordinates[1], self.coordinates[0])
    }
}

impl Default for GeoPoint {
    fn default() -> Self {
        Self::new(LatLng::new(0.0, 0.0))
    }
}

impl From<LatLng> for GeoPoint {
    fn from(point: LatLng) -> Self {
        Self::new(point)
    }
}
