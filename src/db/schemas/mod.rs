pub mod geo_point;
pub mod metadata;
pub mod provider;
pub mod request;

pub use geo_point::GeoPoint;
pub use metadata::Metadata;
pub use provider::{DayHours, ProviderDoc, ServiceType, PROVIDER_COLLECTION};
pub use request::{
    CustomerContact, NoteAuthor, RequestNote, ServiceRequestDoc, VehicleInfo, MAX_TEXT_LEN,
    SERVICE_REQUEST_COLLECTION,
};
