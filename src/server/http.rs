//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling. Requests are routed by
//! path prefix to the route modules; the WebSocket endpoint upgrades in place.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::auth::JwtValidator;
use crate::config::Args;
use crate::db::MongoClient;
use crate::directory::ProviderDirectory;
use crate::dispatch::{DispatchConfig, DispatchCoordinator};
use crate::live::LiveHub;
use crate::notify::{LogNotifier, Notifier, RelayNotifier};
use crate::presence::PresenceRegistry;
use crate::requests::RequestStore;
use crate::routes;
use crate::types::{CurbsideError, Result};

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub mongo: Option<MongoClient>,
    /// Request lifecycle store (CAS accept lives here)
    pub requests: Arc<RequestStore>,
    /// Provider records plus the in-memory matching index
    pub directory: Arc<ProviderDirectory>,
    /// Live connection registry, keyed by provider id
    pub presence: Arc<PresenceRegistry>,
    /// Broadcast hub feeding every live connection
    pub hub: Arc<LiveHub>,
    /// Fan-out coordinator for new requests
    pub dispatcher: Arc<DispatchCoordinator>,
    /// Fallback delivery channel for offline providers
    pub notifier: Arc<dyn Notifier>,
    pub validator: Arc<JwtValidator>,
    pub started_at: Instant,
}

impl AppState {
    /// Create AppState backed by MongoDB
    pub async fn with_mongo(args: Args, mongo: MongoClient) -> Result<Self> {
        let requests = Arc::new(RequestStore::new(&mongo).await?);
        let directory = Arc::new(ProviderDirectory::new(&mongo).await?);
        Self::assemble(args, Some(mongo), requests, directory)
    }

    /// Create AppState with in-memory stores only (development, tests)
    pub fn memory_only(args: Args) -> Result<Self> {
        let requests = Arc::new(RequestStore::memory_only());
        let directory = Arc::new(ProviderDirectory::memory_only());
        Self::assemble(args, None, requests, directory)
    }

    fn assemble(
        args: Args,
        mongo: Option<MongoClient>,
        requests: Arc<RequestStore>,
        directory: Arc<ProviderDirectory>,
    ) -> Result<Self> {
        let validator = build_validator(&args)?;
        let hub = Arc::new(LiveHub::new());
        let presence = Arc::new(PresenceRegistry::new(
            Arc::clone(&validator),
            Arc::clone(&hub),
        ));
        let notifier = build_notifier(&args);
        let dispatcher = Arc::new(DispatchCoordinator::new(
            Arc::clone(&requests),
            Arc::clone(&directory),
            Arc::clone(&presence),
            Arc::clone(&notifier),
            DispatchConfig {
                radius_km: args.search_radius_km,
                send_timeout_ms: args.dispatch_send_timeout_ms,
                max_in_flight: args.dispatch_concurrency,
            },
        ));

        Ok(Self {
            args,
            mongo,
            requests,
            directory,
            presence,
            hub,
            dispatcher,
            notifier,
            validator,
            started_at: Instant::now(),
        })
    }
}

fn build_validator(args: &Args) -> Result<Arc<JwtValidator>> {
    if let Some(ref secret) = args.jwt_secret {
        return Ok(Arc::new(JwtValidator::new(
            secret.clone(),
            args.jwt_expiry_seconds,
        )?));
    }
    if args.dev_mode {
        warn!("No JWT secret configured - using development signing key");
        return Ok(Arc::new(JwtValidator::new_dev()));
    }
    Err(CurbsideError::Config(
        "JWT secret is required outside development mode".to_string(),
    ))
}

fn build_notifier(args: &Args) -> Arc<dyn Notifier> {
    match args.relay_url {
        Some(ref url) => Arc::new(RelayNotifier::new(url.clone(), args.relay_secret.clone())),
        None => Arc::new(LogNotifier),
    }
}

/// Run the HTTP server
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "Curbside listening on {} as node {}",
        state.args.listen, state.args.node_id
    );

    if state.args.dev_mode {
        warn!("Development mode enabled - token minting endpoint active");
    }

    match state.args.relay_url {
        Some(ref url) => info!("Notification relay configured at {}", url),
        None => info!("No notification relay configured - fallback deliveries log only"),
    }

    if state.mongo.is_none() {
        warn!("Running with in-memory stores - data will not survive a restart");
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .preserve_header_case(true)
                        .title_case_headers(true)
                        .serve_connection(io, service)
                        .with_upgrades()
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    info!("[{}] {} {}", addr, method, path);

    // Request routes (/api/v1/requests/*) - these consume the request
    if path.starts_with("/api/v1/requests") {
        if let Some(response) = routes::handle_request_api(req, Arc::clone(&state)).await {
            return Ok(response);
        }
        return Ok(to_boxed(not_found_response(&path)));
    }

    // Provider routes (/api/v1/providers/*)
    if path.starts_with("/api/v1/providers") {
        if let Some(response) = routes::handle_provider_request(req, Arc::clone(&state)).await {
            return Ok(response);
        }
        return Ok(to_boxed(not_found_response(&path)));
    }

    // Auth routes (/api/v1/auth/*)
    if path.starts_with("/api/v1/auth") {
        if let Some(response) = routes::handle_auth_request(req, Arc::clone(&state)).await {
            return Ok(response);
        }
        return Ok(to_boxed(not_found_response(&path)));
    }

    let response = match (method, path.as_str()) {
        // Liveness probe - returns 200 if the server is running
        (Method::GET, "/health") | (Method::GET, "/healthz") => {
            to_boxed(routes::health_check(Arc::clone(&state)))
        }

        // Readiness probe - returns 200 only once backing stores are reachable
        (Method::GET, "/ready") | (Method::GET, "/readyz") => {
            to_boxed(routes::readiness_check(Arc::clone(&state)))
        }

        // Version info for deployment verification
        (Method::GET, "/version") => to_boxed(routes::version_info()),

        // Live event stream for providers and dashboards
        (Method::GET, "/ws") => {
            return Ok(to_boxed(
                routes::handle_live_ws(Arc::clone(&state), req).await,
            ));
        }

        // CORS preflight
        (Method::OPTIONS, _) => to_boxed(preflight_response()),

        _ => to_boxed(not_found_response(&path)),
    };

    Ok(response)
}

fn to_boxed(response: Response<Full<Bytes>>) -> Response<BoxBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed())
}

/// CORS preflight response
fn preflight_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Headers", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, PUT, OPTIONS")
        .body(Full::new(Bytes::new()))
        .unwrap()
}

/// Not found response
fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": "Not Found",
        "path": path,
        "hint": "API endpoints live under /api/v1, live events at /ws"
    });

    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}
