//! HTTP routes for providers
//!
//! - `POST /api/v1/providers`                   - Register or update a provider (mechanic token)
//! - `GET  /api/v1/providers/online`            - Currently connected providers
//! - `POST /api/v1/providers/nearby`            - Ranked candidate search
//! - `GET  /api/v1/providers/{id}`              - Fetch one provider
//! - `PUT  /api/v1/providers/{id}/availability` - Toggle availability
//! - `PUT  /api/v1/providers/{id}/location`     - Move the provider
//! - `GET  /api/v1/providers/{id}/feed`         - Pending requests nearby (catch-up view)
//! - `GET  /api/v1/providers/{id}/requests`     - Requests this provider accepted

use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::auth::{Claims, Role};
use crate::db::schemas::{DayHours, ProviderDoc, ServiceType};
use crate::geo::LatLng;
use crate::presence::PresenceSnapshot;
use crate::routes::requests::{mechanic_claims, RequestView};
use crate::routes::respond::{
    cors_preflight, error_response, json_response, method_not_allowed, parse_json_body, BoxBody,
    ErrorResponse,
};
use crate::server::AppState;
use crate::types::CurbsideError;

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterProviderBody {
    /// Explicit provider id; admin-only, everyone else registers as themselves
    #[serde(default)]
    pub provider_id: Option<String>,
    pub business_name: String,
    #[serde(default)]
    pub contact_address: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub services_offered: Vec<ServiceType>,
    #[serde(default)]
    pub is_available: Option<bool>,
    #[serde(default)]
    pub weekly_hours: Option<HashMap<String, DayHours>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityBody {
    pub is_available: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationBody {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyBody {
    pub latitude: f64,
    pub longitude: f64,
    pub service_type: ServiceType,
    #[serde(default)]
    pub radius_km: Option<f64>,
}

/// API projection of a stored provider
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderView {
    pub provider_id: String,
    pub business_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_address: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub services_offered: Vec<ServiceType>,
    pub is_available: bool,
    pub rating: f64,
    pub review_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weekly_hours: Option<HashMap<String, DayHours>>,
}

impl From<&ProviderDoc> for ProviderView {
    fn from(doc: &ProviderDoc) -> Self {
        let location = doc.latlng();
        Self {
            provider_id: doc.provider_id.clone(),
            business_name: doc.business_name.clone(),
            contact_address: doc.contact_address.clone(),
            latitude: location.latitude,
            longitude: location.longitude,
            services_offered: doc.services_offered.clone(),
            is_available: doc.is_available,
            rating: doc.rating,
            review_count: doc.review_count,
            weekly_hours: doc.weekly_hours.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateView {
    pub provider: ProviderView,
    pub distance_km: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyResponse {
    pub candidates: Vec<CandidateView>,
    pub count: usize,
    pub radius_km: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineResponse {
    pub providers: Vec<PresenceSnapshot>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedItemView {
    pub request: RequestView,
    pub distance_km: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedResponse {
    pub requests: Vec<FeedItemView>,
    pub count: usize,
    pub within_hours: i64,
    pub radius_km: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRequestsResponse {
    pub requests: Vec<RequestView>,
    pub count: usize,
}

// =============================================================================
// Shared Helpers
// =============================================================================

/// Mechanics act on their own record; admins on any
fn authorize_provider(claims: &Claims, provider_id: &str) -> Option<Response<BoxBody>> {
    if claims.role == Role::Admin || claims.sub == provider_id {
        None
    } else {
        Some(json_response(
            StatusCode::FORBIDDEN,
            &ErrorResponse {
                error: "Token does not match this provider".into(),
                code: None,
            },
        ))
    }
}

fn validate_register(body: &RegisterProviderBody) -> Result<(), CurbsideError> {
    let mut problems = Vec::new();

    if body.business_name.trim().is_empty() {
        problems.push("businessName is required".to_string());
    }
    let location = LatLng {
        latitude: body.latitude,
        longitude: body.longitude,
    };
    if !location.is_valid() {
        problems.push("latitude/longitude out of range".to_string());
    }
    if body.services_offered.is_empty() {
        problems.push("servicesOffered must list at least one service".to_string());
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(CurbsideError::Validation(problems))
    }
}

/// Parse query string into key-value map
fn parse_query_params(query: &str) -> HashMap<String, String> {
    if query.is_empty() {
        return HashMap::new();
    }

    query
        .split('&')
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?;
            let value = parts.next().unwrap_or("");
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

// =============================================================================
// Route Handlers
// =============================================================================

/// POST /api/v1/providers
///
/// Registration is an upsert keyed by provider id; rating rollups survive
/// re-registration.
async fn handle_register(req: Request<Incoming>, state: Arc<AppState>) -> Response<BoxBody> {
    let claims = match mechanic_claims(&req, &state) {
        Ok(c) => c,
        Err(e) => return error_response(&e),
    };
    let body: RegisterProviderBody = match parse_json_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(&e),
    };
    if let Err(e) = validate_register(&body) {
        return error_response(&e);
    }

    let provider_id = match body.provider_id {
        Some(explicit) if explicit != claims.sub => {
            if claims.role != Role::Admin {
                return json_response(
                    StatusCode::FORBIDDEN,
                    &ErrorResponse {
                        error: "Only admins can register another provider id".into(),
                        code: None,
                    },
                );
            }
            explicit
        }
        _ => claims.sub.clone(),
    };

    let location = LatLng {
        latitude: body.latitude,
        longitude: body.longitude,
    };
    let mut provider = ProviderDoc::new(
        provider_id,
        body.business_name.trim().to_string(),
        location,
        body.services_offered,
    );
    provider.owner_ref = Some(claims.sub.clone());
    provider.contact_address = body.contact_address;
    provider.weekly_hours = body.weekly_hours;
    if let Some(is_available) = body.is_available {
        provider.is_available = is_available;
    }

    match state.directory.register(provider).await {
        Ok(stored) => {
            info!("Provider {} registered", stored.provider_id);
            json_response(StatusCode::CREATED, &ProviderView::from(&stored))
        }
        Err(e) => error_response(&e),
    }
}

/// GET /api/v1/providers/{id}
async fn handle_get(state: Arc<AppState>, provider_id: &str) -> Response<BoxBody> {
    match state.directory.get(provider_id) {
        Some(doc) => json_response(StatusCode::OK, &ProviderView::from(&doc)),
        None => error_response(&CurbsideError::NotFound(format!("provider {provider_id}"))),
    }
}

/// PUT /api/v1/providers/{id}/availability
async fn handle_availability(
    req: Request<Incoming>,
    state: Arc<AppState>,
    provider_id: &str,
) -> Response<BoxBody> {
    let claims = match mechanic_claims(&req, &state) {
        Ok(c) => c,
        Err(e) => return error_response(&e),
    };
    if let Some(denied) = authorize_provider(&claims, provider_id) {
        return denied;
    }
    let body: AvailabilityBody = match parse_json_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(&e),
    };

    match state
        .directory
        .set_availability(provider_id, body.is_available)
        .await
    {
        Ok(()) => match state.directory.get(provider_id) {
            Some(doc) => json_response(StatusCode::OK, &ProviderView::from(&doc)),
            None => error_response(&CurbsideError::NotFound(format!("provider {provider_id}"))),
        },
        Err(e) => error_response(&e),
    }
}

/// PUT /api/v1/providers/{id}/location
async fn handle_location(
    req: Request<Incoming>,
    state: Arc<AppState>,
    provider_id: &str,
) -> Response<BoxBody> {
    let claims = match mechanic_claims(&req, &state) {
        Ok(c) => c,
        Err(e) => return error_response(&e),
    };
    if let Some(denied) = authorize_provider(&claims, provider_id) {
        return denied;
    }
    let body: LocationBody = match parse_json_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(&e),
    };

    let location = LatLng {
        latitude: body.latitude,
        longitude: body.longitude,
    };
    if !location.is_valid() {
        return error_response(&CurbsideError::invalid("latitude/longitude out of range"));
    }

    match state.directory.set_location(provider_id, location).await {
        Ok(()) => match state.directory.get(provider_id) {
            Some(doc) => json_response(StatusCode::OK, &ProviderView::from(&doc)),
            None => error_response(&CurbsideError::NotFound(format!("provider {provider_id}"))),
        },
        Err(e) => error_response(&e),
    }
}

/// POST /api/v1/providers/nearby
///
/// Public candidate search, same ranking the dispatcher uses.
async fn handle_nearby(req: Request<Incoming>, state: Arc<AppState>) -> Response<BoxBody> {
    let body: NearbyBody = match parse_json_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(&e),
    };

    let center = LatLng {
        latitude: body.latitude,
        longitude: body.longitude,
    };
    if !center.is_valid() {
        return error_response(&CurbsideError::invalid("latitude/longitude out of range"));
    }
    let radius_km = body.radius_km.unwrap_or(state.args.search_radius_km);
    if !(radius_km > 0.0) {
        return error_response(&CurbsideError::invalid("radiusKm must be positive"));
    }

    let candidates = state
        .directory
        .find_candidates(center, radius_km, body.service_type);
    let views: Vec<CandidateView> = candidates
        .iter()
        .map(|c| CandidateView {
            provider: ProviderView::from(&c.provider),
            distance_km: c.distance_km,
        })
        .collect();

    json_response(
        StatusCode::OK,
        &NearbyResponse {
            count: views.len(),
            candidates: views,
            radius_km,
        },
    )
}

/// GET /api/v1/providers/online
async fn handle_online(state: Arc<AppState>) -> Response<BoxBody> {
    let providers = state.presence.online_snapshot();
    json_response(
        StatusCode::OK,
        &OnlineResponse {
            count: providers.len(),
            providers,
        },
    )
}

/// GET /api/v1/providers/{id}/feed?hours=N
///
/// Catch-up view: pending requests near the provider, matching its services,
/// created inside the window. Mirrors what dispatch would have delivered
/// while the provider was offline.
async fn handle_feed(
    req: Request<Incoming>,
    state: Arc<AppState>,
    provider_id: &str,
) -> Response<BoxBody> {
    let claims = match mechanic_claims(&req, &state) {
        Ok(c) => c,
        Err(e) => return error_response(&e),
    };
    if let Some(denied) = authorize_provider(&claims, provider_id) {
        return denied;
    }

    let provider = match state.directory.get(provider_id) {
        Some(doc) => doc,
        None => {
            return error_response(&CurbsideError::NotFound(format!("provider {provider_id}")))
        }
    };

    let params = parse_query_params(req.uri().query().unwrap_or(""));
    let window = state.args.catchup_window_hours;
    let hours = params
        .get("hours")
        .and_then(|h| h.parse::<i64>().ok())
        .unwrap_or(window)
        .clamp(1, window);

    let cutoff = chrono::Utc::now() - chrono::Duration::hours(hours);
    let radius_km = state.args.search_radius_km;

    match state
        .requests
        .list_pending_near(
            provider.latlng(),
            radius_km,
            &provider.services_offered,
            bson::DateTime::from_chrono(cutoff),
        )
        .await
    {
        Ok(nearby) => {
            let requests: Vec<FeedItemView> = nearby
                .iter()
                .map(|n| FeedItemView {
                    request: RequestView::from(&n.request),
                    distance_km: n.distance_km,
                })
                .collect();
            json_response(
                StatusCode::OK,
                &FeedResponse {
                    count: requests.len(),
                    requests,
                    within_hours: hours,
                    radius_km,
                },
            )
        }
        Err(e) => error_response(&e),
    }
}

/// GET /api/v1/providers/{id}/requests
async fn handle_provider_requests(
    req: Request<Incoming>,
    state: Arc<AppState>,
    provider_id: &str,
) -> Response<BoxBody> {
    let claims = match mechanic_claims(&req, &state) {
        Ok(c) => c,
        Err(e) => return error_response(&e),
    };
    if let Some(denied) = authorize_provider(&claims, provider_id) {
        return denied;
    }

    match state.requests.list_for_provider(provider_id).await {
        Ok(docs) => {
            let requests: Vec<RequestView> = docs.iter().map(RequestView::from).collect();
            json_response(
                StatusCode::OK,
                &ProviderRequestsResponse {
                    count: requests.len(),
                    requests,
                },
            )
        }
        Err(e) => error_response(&e),
    }
}

// =============================================================================
// Router
// =============================================================================

/// Parsed provider route components
#[derive(Debug)]
struct ProviderRoute<'a> {
    provider_id: &'a str,
    action: Option<&'a str>,
}

impl<'a> ProviderRoute<'a> {
    /// Parse "/api/v1/providers/{id}" or "/api/v1/providers/{id}/{action}"
    fn parse(path: &'a str) -> Option<Self> {
        let stripped = path.strip_prefix("/api/v1/providers/")?;
        let mut parts = stripped.splitn(2, '/');
        let provider_id = parts.next().filter(|s| !s.is_empty())?;
        Some(Self {
            provider_id,
            action: parts.next().filter(|s| !s.is_empty()),
        })
    }
}

/// Handle provider-related HTTP calls.
///
/// Returns Some(response) if the request was handled, None if the path is
/// not a providers route.
pub async fn handle_provider_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Option<Response<BoxBody>> {
    if !req.uri().path().starts_with("/api/v1/providers") {
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

    let response = match path.as_str() {
        "/api/v1/providers" => match method {
            Method::POST => handle_register(req, state).await,
            _ => method_not_allowed(),
        },
        "/api/v1/providers/online" => match method {
            Method::GET => handle_online(state).await,
            _ => method_not_allowed(),
        },
        "/api/v1/providers/nearby" => match method {
            Method::POST => handle_nearby(req, state).await,
            _ => method_not_allowed(),
        },
        _ => match ProviderRoute::parse(&path) {
            Some(route) => {
                let provider_id = route.provider_id.to_string();
                match (method, route.action) {
                    (Method::GET, None) => handle_get(state, &provider_id).await,
                    (Method::PUT, Some("availability")) => {
                        handle_availability(req, state, &provider_id).await
                    }
                    (Method::PUT, Some("location")) => {
                        handle_location(req, state, &provider_id).await
                    }
                    (Method::GET, Some("feed")) => handle_feed(req, state, &provider_id).await,
                    (Method::GET, Some("requests")) => {
                        handle_provider_requests(req, state, &provider_id).await
                    }
                    _ => method_not_allowed(),
                }
            }
            None => json_response(
                StatusCode::NOT_FOUND,
                &ErrorResponse {
                    error: "Unknown providers endpoint".into(),
                    code: None,
                },
            ),
        },
    };

    Some(response)
}
