//! HTTP routes for authentication
//!
//! - `POST /api/v1/auth/token` - Mint a token (development mode only)
//! - `GET  /api/v1/auth/me`    - Introspect the caller's token
//!
//! Production deployments are expected to issue tokens from an external
//! identity provider sharing the same signing secret. The mint endpoint
//! exists so local setups and integration tests can produce mechanic and
//! customer tokens without standing up that provider, and it disappears
//! entirely (404) outside development mode.

use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::auth::{extract_token_from_header, Role, TokenInput};
use crate::routes::respond::{
    cors_preflight, get_auth_header, json_response, method_not_allowed, parse_json_body, BoxBody,
    ErrorResponse,
};
use crate::server::AppState;

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintTokenBody {
    /// Subject for the token; defaults to a fresh UUID
    #[serde(default)]
    pub subject: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MintTokenResponse {
    pub token: String,
    pub subject: String,
    pub role: Role,
    pub expires_at: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WhoAmIResponse {
    pub subject: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub expires_at: u64,
}

// =============================================================================
// Handlers
// =============================================================================

async fn handle_mint_token(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Response<BoxBody> {
    if !state.args.dev_mode {
        return json_response(
            StatusCode::NOT_FOUND,
            &ErrorResponse {
                error: "Token minting is only available in development mode".into(),
                code: None,
            },
        );
    }

    let body: MintTokenBody = match parse_json_body(req).await {
        Ok(body) => body,
        Err(e) => {
            return json_response(
                StatusCode::BAD_REQUEST,
                &ErrorResponse {
                    error: format!("Invalid request body: {}", e),
                    code: None,
                },
            )
        }
    };

    let subject = body
        .subject
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let token = match state.validator.generate_token(TokenInput {
        subject: subject.clone(),
        role: body.role,
        name: body.name,
    }) {
        Ok(token) => token,
        Err(e) => {
            return json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &ErrorResponse {
                    error: format!("Failed to mint token: {}", e),
                    code: None,
                },
            )
        }
    };

    // Read the expiry back off the token we just signed
    let expires_at = state
        .validator
        .verify_token(&token)
        .claims
        .map(|claims| claims.exp)
        .unwrap_or(0);

    info!("Minted development token for {} ({:?})", subject, body.role);

    json_response(
        StatusCode::OK,
        &MintTokenResponse {
            token,
            subject,
            role: body.role,
            expires_at,
        },
    )
}

async fn handle_whoami(req: Request<Incoming>, state: Arc<AppState>) -> Response<BoxBody> {
    let token = match extract_token_from_header(get_auth_header(&req)) {
        Some(token) => token,
        None => {
            return json_response(
                StatusCode::UNAUTHORIZED,
                &ErrorResponse {
                    error: "Missing Authorization header".into(),
                    code: Some("UNAUTHORIZED".into()),
                },
            )
        }
    };

    let validation = state.validator.verify_token(token);
    match validation.claims {
        Some(claims) => json_response(
            StatusCode::OK,
            &WhoAmIResponse {
                subject: claims.sub,
                role: claims.role,
                name: claims.name,
                expires_at: claims.exp,
            },
        ),
        None => json_response(
            StatusCode::UNAUTHORIZED,
            &ErrorResponse {
                error: validation
                    .error
                    .unwrap_or_else(|| "Invalid token".to_string()),
                code: Some("UNAUTHORIZED".into()),
            },
        ),
    }
}

// =============================================================================
// Router
// =============================================================================

/// Handle auth API requests
///
/// Returns Some(response) if the request was handled, None if the path is
/// not an auth route.
pub async fn handle_auth_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Option<Response<BoxBody>> {
    if !req.uri().path().starts_with("/api/v1/auth") {
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

    let response = match (method, path.as_str()) {
        (Method::POST, "/api/v1/auth/token") => handle_mint_token(req, state).await,
        (Method::GET, "/api/v1/auth/me") => handle_whoami(req, state).await,
        (_, "/api/v1/auth/token") | (_, "/api/v1/auth/me") => method_not_allowed(),
        _ => json_response(
            StatusCode::NOT_FOUND,
            &ErrorResponse {
                error: "Unknown auth endpoint".into(),
                code: None,
            },
        ),
    };

    Some(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mint_body_defaults() {
        let body: MintTokenBody = serde_json::from_str(r#"{"role": "mechanic"}"#).unwrap();
        assert!(body.subject.is_none());
        assert!(body.name.is_none());
        assert_eq!(body.role, Role::Mechanic);
    }

    #[test]
    fn test_mint_response_shape() {
        let response = MintTokenResponse {
            token: "abc".into(),
            subject: "prov-1".into(),
            role: Role::Mechanic,
            expires_at: 1_700_000_000,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"expiresAt\":1700000000"));
        assert!(json.contains("\"role\":\"mechanic\""));
    }
}
