//! Response and body helpers shared by the route handlers

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::types::CurbsideError;

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Error payload returned by every handler
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<BoxBody> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, PUT, OPTIONS")
        .header("Access-Control-Allow-Headers", "Content-Type, Authorization")
        .body(full_body(json))
        .unwrap()
}

pub fn cors_preflight() -> Response<BoxBody> {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, PUT, OPTIONS")
        .header("Access-Control-Allow-Headers", "Content-Type, Authorization")
        .header("Access-Control-Max-Age", "86400")
        .body(empty_body())
        .unwrap()
}

pub fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

pub fn empty_body() -> BoxBody {
    Full::new(Bytes::new())
        .map_err(|never| match never {})
        .boxed()
}

/// Map a crate error onto its HTTP shape
pub fn error_response(err: &CurbsideError) -> Response<BoxBody> {
    let code = match err {
        CurbsideError::Validation(_) => Some("VALIDATION".to_string()),
        CurbsideError::InvalidTransition { .. } => Some("INVALID_TRANSITION".to_string()),
        CurbsideError::InvalidIdentity(_) => Some("UNAUTHORIZED".to_string()),
        _ => None,
    };
    json_response(
        err.status_code(),
        &ErrorResponse {
            error: err.to_string(),
            code,
        },
    )
}

pub fn method_not_allowed() -> Response<BoxBody> {
    json_response(
        StatusCode::METHOD_NOT_ALLOWED,
        &ErrorResponse {
            error: "Method not allowed".into(),
            code: None,
        },
    )
}

pub async fn parse_json_body<T: for<'de> Deserialize<'de>>(
    req: Request<hyper::body::Incoming>,
) -> Result<T, CurbsideError> {
    let body = req
        .collect()
        .await
        .map_err(|e| CurbsideError::Http(format!("Failed to read body: {}", e)))?;

    let bytes = body.to_bytes();
    if bytes.len() > 10240 {
        return Err(CurbsideError::Http("Request body too large".into()));
    }

    serde_json::from_slice(&bytes)
        .map_err(|e| CurbsideError::Http(format!("Invalid JSON: {}", e)))
}

pub fn get_auth_header(req: &Request<hyper::body::Incoming>) -> Option<&str> {
    req.headers()
        .get(hyper::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::requests::RequestStatus;

    #[test]
    fn test_error_response_codes() {
        let err = CurbsideError::InvalidTransition {
            from: RequestStatus::Completed,
            to: RequestStatus::Pending,
        };
        let response = error_response(&err);
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let err = CurbsideError::NotFound("request abc".into());
        assert_eq!(error_response(&err).status(), StatusCode::NOT_FOUND);
    }
}
