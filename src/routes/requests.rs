//! HTTP routes for service requests
//!
//! - `POST /api/v1/requests`                - Create a request and dispatch it
//! - `GET  /api/v1/requests/{id}`           - Fetch one request
//! - `POST /api/v1/requests/{id}/dispatch`  - Re-run candidate dispatch
//! - `POST /api/v1/requests/{id}/accept`    - Claim the request (mechanic token)
//! - `PUT  /api/v1/requests/{id}/status`    - Move the lifecycle forward
//! - `POST /api/v1/requests/{id}/cancel`    - Cancel a pending or accepted request
//! - `POST /api/v1/requests/{id}/notes`     - Append a note
//! - `POST /api/v1/requests/{id}/review`    - Rate a completed request
//!
//! Creation and cancellation are unauthenticated: a customer stranded on the
//! roadside has no account, and the request id is an unguessable UUID that
//! acts as the capability for follow-up calls.

use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::{extract_token_from_header, Claims, Role};
use crate::db::schemas::{
    CustomerContact, NoteAuthor, RequestNote, ServiceRequestDoc, ServiceType, VehicleInfo,
    MAX_TEXT_LEN,
};
use crate::dispatch::DispatchReport;
use crate::geo::LatLng;
use crate::live::{now_iso, LiveEvent};
use crate::requests::{AcceptOutcome, RequestStatus};
use crate::routes::respond::{
    cors_preflight, error_response, get_auth_header, json_response, method_not_allowed,
    parse_json_body, BoxBody, ErrorResponse,
};
use crate::server::AppState;
use crate::types::CurbsideError;

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequestBody {
    pub latitude: f64,
    pub longitude: f64,
    pub service_type: ServiceType,
    pub description: String,
    #[serde(default)]
    pub vehicle: Option<VehicleBody>,
    #[serde(default)]
    pub customer: Option<ContactBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleBody {
    pub make: String,
    pub model: String,
    pub year: i32,
    #[serde(default)]
    pub license_plate: Option<String>,
    #[serde(default)]
    pub vin: Option<String>,
}

impl From<VehicleBody> for VehicleInfo {
    fn from(body: VehicleBody) -> Self {
        Self {
            make: body.make,
            model: body.model,
            year: body.year,
            license_plate: body.license_plate,
            vin: body.vin,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactBody {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
}

impl From<ContactBody> for CustomerContact {
    fn from(body: ContactBody) -> Self {
        Self {
            name: body.name,
            email: body.email,
            phone: body.phone,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptBody {
    #[serde(default)]
    pub estimated_cost: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusBody {
    pub status: RequestStatus,
    #[serde(default)]
    pub actual_cost: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct NoteBody {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ReviewBody {
    pub rating: i32,
    #[serde(default)]
    pub review: Option<String>,
}

/// API projection of a stored request
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestView {
    pub request_id: String,
    pub status: RequestStatus,
    pub service_type: ServiceType,
    pub description: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer: Option<ContactView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vehicle: Option<VehicleView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    pub notes: Vec<NoteView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleView {
    pub make: String,
    pub model: String,
    pub year: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_plate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vin: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactView {
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteView {
    pub message: String,
    pub author: NoteAuthor,
    pub timestamp: String,
}

impl From<&ServiceRequestDoc> for RequestView {
    fn from(doc: &ServiceRequestDoc) -> Self {
        let location = doc.latlng();
        Self {
            request_id: doc.request_id.clone(),
            status: doc.status,
            service_type: doc.service_type,
            description: doc.description.clone(),
            latitude: location.latitude,
            longitude: location.longitude,
            customer: doc.customer.as_ref().map(|c| ContactView {
                name: c.name.clone(),
                email: c.email.clone(),
                phone: c.phone.clone(),
            }),
            vehicle: doc.vehicle.as_ref().map(|v| VehicleView {
                make: v.make.clone(),
                model: v.model.clone(),
                year: v.year,
                license_plate: v.license_plate.clone(),
                vin: v.vin.clone(),
            }),
            accepted_by: doc.accepted_by.clone(),
            estimated_cost: doc.estimated_cost,
            actual_cost: doc.actual_cost,
            accepted_at: doc.accepted_at.map(to_rfc3339),
            completed_at: doc.completed_at.map(to_rfc3339),
            notes: doc
                .notes
                .iter()
                .map(|n| NoteView {
                    message: n.message.clone(),
                    author: n.author,
                    timestamp: to_rfc3339(n.timestamp),
                })
                .collect(),
            rating: doc.rating,
            review: doc.review.clone(),
            created_at: doc.metadata.created_at.map(to_rfc3339),
        }
    }
}

fn to_rfc3339(dt: bson::DateTime) -> String {
    dt.to_chrono().to_rfc3339()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequestResponse {
    pub request: RequestView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatch: Option<DispatchReport>,
}

/// Conflict payload for a lost accept race, carrying the current state
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictResponse {
    pub error: String,
    pub code: String,
    pub status: RequestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted_by: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewResponse {
    pub request: RequestView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_rating: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_review_count: Option<i64>,
}

// =============================================================================
// Shared Helpers
// =============================================================================

/// Verify the Authorization header against the mechanic gate.
/// Admin tokens pass every gate.
pub fn mechanic_claims(
    req: &Request<Incoming>,
    state: &AppState,
) -> Result<Claims, CurbsideError> {
    let token = extract_token_from_header(get_auth_header(req)).ok_or_else(|| {
        CurbsideError::InvalidIdentity("Missing or malformed Authorization header".into())
    })?;
    state.validator.verify_role(token, Role::Mechanic)
}

/// Best-effort customer notification, off the request path
fn notify_customer(state: &Arc<AppState>, request: &ServiceRequestDoc, subject: &str, body: String) {
    let Some(customer) = &request.customer else {
        return;
    };
    let email = customer.email.clone();
    let subject = subject.to_string();
    let notifier = Arc::clone(&state.notifier);
    tokio::spawn(async move {
        if let Err(err) = notifier.send(&email, &subject, &body).await {
            warn!("Customer notification to {} failed: {}", email, err);
        }
    });
}

fn broadcast_update(state: &AppState, request: &ServiceRequestDoc) {
    state.hub.broadcast(LiveEvent::RequestUpdate {
        request_id: request.request_id.clone(),
        status: request.status,
        accepted_by: request.accepted_by.clone(),
        timestamp: now_iso(),
    });
}

fn validate_create(body: &CreateRequestBody) -> Result<(), CurbsideError> {
    let mut problems = Vec::new();

    let location = LatLng {
        latitude: body.latitude,
        longitude: body.longitude,
    };
    if !location.is_valid() {
        problems.push("latitude/longitude out of range".to_string());
    }
    if body.description.trim().is_empty() {
        problems.push("description is required".to_string());
    }
    if body.description.len() > MAX_TEXT_LEN {
        problems.push(format!("description exceeds {} characters", MAX_TEXT_LEN));
    }
    if let Some(customer) = &body.customer {
        if customer.email.trim().is_empty() {
            problems.push("customer email is required when customer info is given".to_string());
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(CurbsideError::Validation(problems))
    }
}

// =============================================================================
// Route Handlers
// =============================================================================

/// POST /api/v1/requests
///
/// Create the request, then dispatch it to nearby candidates. The response
/// carries the dispatch report; delivery itself is best-effort.
async fn handle_create(req: Request<Incoming>, state: Arc<AppState>) -> Response<BoxBody> {
    let body: CreateRequestBody = match parse_json_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(&e),
    };
    if let Err(e) = validate_create(&body) {
        return error_response(&e);
    }

    let location = LatLng {
        latitude: body.latitude,
        longitude: body.longitude,
    };
    let mut request = ServiceRequestDoc::new(
        location,
        body.service_type,
        body.description.trim().to_string(),
    );
    request.vehicle = body.vehicle.map(Into::into);
    request.customer = body.customer.map(Into::into);

    let request = match state.requests.create(request).await {
        Ok(r) => r,
        Err(e) => return error_response(&e),
    };

    let dispatch = match state.dispatcher.dispatch(&request.request_id).await {
        Ok(report) => Some(report),
        Err(e) => {
            // The request exists regardless; the caller can re-dispatch
            warn!("Dispatch after create failed for {}: {}", request.request_id, e);
            None
        }
    };

    json_response(
        StatusCode::CREATED,
        &CreateRequestResponse {
            request: RequestView::from(&request),
            dispatch,
        },
    )
}

/// GET /api/v1/requests/{id}
async fn handle_get(state: Arc<AppState>, request_id: &str) -> Response<BoxBody> {
    match state.requests.get(request_id).await {
        Ok(doc) => json_response(StatusCode::OK, &RequestView::from(&doc)),
        Err(e) => error_response(&e),
    }
}

/// POST /api/v1/requests/{id}/dispatch
async fn handle_dispatch(state: Arc<AppState>, request_id: &str) -> Response<BoxBody> {
    match state.dispatcher.dispatch(request_id).await {
        Ok(report) => json_response(StatusCode::OK, &report),
        Err(e) => error_response(&e),
    }
}

/// POST /api/v1/requests/{id}/accept
///
/// First caller wins; everyone else gets 409 with the current state.
async fn handle_accept(
    req: Request<Incoming>,
    state: Arc<AppState>,
    request_id: &str,
) -> Response<BoxBody> {
    let claims = match mechanic_claims(&req, &state) {
        Ok(c) => c,
        Err(e) => return error_response(&e),
    };
    let body: AcceptBody = match parse_json_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(&e),
    };

    match state
        .requests
        .accept(request_id, &claims.sub, body.estimated_cost)
        .await
    {
        Ok(AcceptOutcome::Accepted(doc)) => {
            info!("Request {} accepted by {}", doc.request_id, claims.sub);
            broadcast_update(&state, &doc);

            let mechanic_name = state
                .directory
                .get(&claims.sub)
                .map(|p| p.business_name)
                .unwrap_or_else(|| claims.sub.clone());
            let cost_line = doc
                .estimated_cost
                .map(|c| format!(" Estimated cost: ${:.2}.", c))
                .unwrap_or_default();
            notify_customer(
                &state,
                &doc,
                "Service request accepted - Curbside",
                format!(
                    "Your {} request has been accepted by {}.{}",
                    doc.service_type, mechanic_name, cost_line
                ),
            );

            json_response(StatusCode::OK, &RequestView::from(&doc))
        }
        Ok(AcceptOutcome::AlreadyResolved(doc)) => json_response(
            StatusCode::CONFLICT,
            &ConflictResponse {
                error: "request already resolved".to_string(),
                code: "ALREADY_RESOLVED".to_string(),
                status: doc.status,
                accepted_by: doc.accepted_by,
            },
        ),
        Err(e) => error_response(&e),
    }
}

/// PUT /api/v1/requests/{id}/status
///
/// Only the accepting mechanic (or an admin) may move the lifecycle.
async fn handle_update_status(
    req: Request<Incoming>,
    state: Arc<AppState>,
    request_id: &str,
) -> Response<BoxBody> {
    let claims = match mechanic_claims(&req, &state) {
        Ok(c) => c,
        Err(e) => return error_response(&e),
    };
    let body: UpdateStatusBody = match parse_json_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(&e),
    };

    if claims.role != Role::Admin {
        match state.requests.get(request_id).await {
            Ok(current) if current.accepted_by.as_deref() == Some(claims.sub.as_str()) => {}
            Ok(_) => {
                return json_response(
                    StatusCode::FORBIDDEN,
                    &ErrorResponse {
                        error: "Only the accepting mechanic can update this request".into(),
                        code: None,
                    },
                )
            }
            Err(e) => return error_response(&e),
        }
    }

    match state
        .requests
        .update_status(request_id, body.status, body.actual_cost)
        .await
    {
        Ok(doc) => {
            broadcast_update(&state, &doc);
            notify_customer(
                &state,
                &doc,
                "Service request update - Curbside",
                format!("Your {} request is now {}.", doc.service_type, doc.status),
            );
            json_response(StatusCode::OK, &RequestView::from(&doc))
        }
        Err(e) => error_response(&e),
    }
}

/// POST /api/v1/requests/{id}/cancel
async fn handle_cancel(state: Arc<AppState>, request_id: &str) -> Response<BoxBody> {
    match state
        .requests
        .update_status(request_id, RequestStatus::Cancelled, None)
        .await
    {
        Ok(doc) => {
            info!("Request {} cancelled", doc.request_id);
            broadcast_update(&state, &doc);
            json_response(StatusCode::OK, &RequestView::from(&doc))
        }
        Err(e) => error_response(&e),
    }
}

/// POST /api/v1/requests/{id}/notes
///
/// A valid mechanic token marks the note as the mechanic's; otherwise it is
/// the customer speaking.
async fn handle_add_note(
    req: Request<Incoming>,
    state: Arc<AppState>,
    request_id: &str,
) -> Response<BoxBody> {
    let author = match mechanic_claims(&req, &state) {
        Ok(_) => NoteAuthor::Mechanic,
        Err(_) => NoteAuthor::Customer,
    };
    let body: NoteBody = match parse_json_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(&e),
    };

    let message = body.message.trim().to_string();
    if message.is_empty() {
        return error_response(&CurbsideError::invalid("note message is required"));
    }
    if message.len() > MAX_TEXT_LEN {
        return error_response(&CurbsideError::invalid(format!(
            "note message exceeds {} characters",
            MAX_TEXT_LEN
        )));
    }

    let note = RequestNote {
        message,
        author,
        timestamp: bson::DateTime::now(),
    };
    match state.requests.add_note(request_id, note).await {
        Ok(doc) => json_response(StatusCode::OK, &RequestView::from(&doc)),
        Err(e) => error_response(&e),
    }
}

/// POST /api/v1/requests/{id}/review
///
/// One review per completed request. The provider's rating rollup moves
/// with it.
async fn handle_review(
    req: Request<Incoming>,
    state: Arc<AppState>,
    request_id: &str,
) -> Response<BoxBody> {
    let body: ReviewBody = match parse_json_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(&e),
    };

    if !(1..=5).contains(&body.rating) {
        return error_response(&CurbsideError::invalid("rating must be between 1 and 5"));
    }
    if let Some(review) = &body.review {
        if review.len() > MAX_TEXT_LEN {
            return error_response(&CurbsideError::invalid(format!(
                "review exceeds {} characters",
                MAX_TEXT_LEN
            )));
        }
    }

    let doc = match state
        .requests
        .submit_review(request_id, body.rating, body.review)
        .await
    {
        Ok(d) => d,
        Err(e) => return error_response(&e),
    };

    // The review is stored either way; a rollup failure only delays the
    // provider's aggregate.
    let rollup = match &doc.accepted_by {
        Some(provider_id) => match state.directory.record_review(provider_id, body.rating).await {
            Ok(r) => Some(r),
            Err(err) => {
                warn!("Rating rollup for {} failed: {}", provider_id, err);
                None
            }
        },
        None => None,
    };

    json_response(
        StatusCode::OK,
        &ReviewResponse {
            request: RequestView::from(&doc),
            provider_rating: rollup.map(|(rating, _)| rating),
            provider_review_count: rollup.map(|(_, count)| count),
        },
    )
}

// =============================================================================
// Router
// =============================================================================

/// Parsed request route components
#[derive(Debug)]
struct RequestRoute<'a> {
    request_id: &'a str,
    action: Option<&'a str>,
}

impl<'a> RequestRoute<'a> {
    /// Parse "/api/v1/requests/{id}" or "/api/v1/requests/{id}/{action}"
    fn parse(path: &'a str) -> Option<Self> {
        let stripped = path.strip_prefix("/api/v1/requests/")?;
        let mut parts = stripped.splitn(2, '/');
        let request_id = parts.next().filter(|s| !s.is_empty())?;
        Some(Self {
            request_id,
            action: parts.next().filter(|s| !s.is_empty()),
        })
    }
}

/// Handle request-related HTTP calls.
///
/// Returns Some(response) if the request was handled, None if the path is
/// not a requests route.
pub async fn handle_request_api(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Option<Response<BoxBody>> {
    if !req.uri().path().starts_with("/api/v1/requests") {
        return None;
    }

    if req.method() == Method::OPTIONS {
        return Some(cors_preflight());
    }

    let method = req.method().clone();
    let path = req
        .uri()
        .path()
        .split('?')
        .next()
        .unwrap_or("")
        .to_string();

    let response = match RequestRoute::parse(&path) {
        None => match (method, path.as_str()) {
            (Method::POST, "/api/v1/requests") => handle_create(req, state).await,
            (_, "/api/v1/requests") => method_not_allowed(),
            _ => json_response(
                StatusCode::NOT_FOUND,
                &ErrorResponse {
                    error: "Unknown requests endpoint".into(),
                    code: None,
                },
            ),
        },
        Some(route) => {
            let request_id = route.request_id.to_string();
            match (method, route.action) {
                (Method::GET, None) => handle_get(state, &request_id).await,
                (Method::POST, Some("dispatch")) => handle_dispatch(state, &request_id).await,
                (Method::POST, Some("accept")) => handle_accept(req, state, &request_id).await,
                (Method::PUT, Some("status")) => {
                    handle_update_status(req, state, &request_id).await
                }
                (Method::POST, Some("cancel")) => handle_cancel(state, &request_id).await,
                (Method::POST, Some("notes")) => handle_add_note(req, state, &request_id).await,
                (Method::POST, Some("review")) => handle_review(req, state, &request_id).await,
                _ => method_not_allowed(),
            }
        }
    };

    Some(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_parsing() {
        let route = RequestRoute::parse("/api/v1/requests/abc-123").unwrap();
        assert_eq!(route.request_id, "abc-123");
        assert!(route.action.is_none());

        let route = RequestRoute::parse("/api/v1/requests/abc-123/accept").unwrap();
        assert_eq!(route.request_id, "abc-123");
        assert_eq!(route.action, Some("accept"));

        assert!(RequestRoute::parse("/api/v1/requests/").is_none());
        assert!(RequestRoute::parse("/api/v1/providers/x").is_none());
    }

    #[test]
    fn test_create_validation_collects_problems() {
        let body = CreateRequestBody {
            latitude: 95.0,
            longitude: 0.0,
            service_type: ServiceType::TireRepair,
            description: String::new(),
            vehicle: None,
            customer: None,
        };
        let err = validate_create(&body).unwrap_err();
        match err {
            CurbsideError::Validation(problems) => {
                assert_eq!(problems.len(), 2);
                assert!(problems[0].contains("latitude"));
                assert!(problems[1].contains("description"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_request_view_projection() {
        let mut doc = ServiceRequestDoc::new(
            LatLng {
                latitude: 19.0760,
                longitude: 72.8777,
            },
            ServiceType::BatteryService,
            "dead battery".to_string(),
        );
        doc.vehicle = Some(VehicleInfo {
            make: "Toyota".into(),
            model: "Corolla".into(),
            year: 2018,
            license_plate: Some("MH01AB1234".into()),
            vin: None,
        });

        let view = RequestView::from(&doc);
        let json = serde_json::to_string(&view).unwrap();
        assert!(json.contains("\"serviceType\":\"battery-service\""));
        assert!(json.contains("\"status\":\"pending\""));
        assert!(json.contains("\"licensePlate\":\"MH01AB1234\""));
        assert!(!json.contains("\"acceptedBy\""));
    }
}
