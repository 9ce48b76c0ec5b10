//! Common error and result types for curbside

use hyper::StatusCode;
use thiserror::Error;

use crate::requests::RequestStatus;

/// Errors surfaced by gateway operations
#[derive(Debug, Error)]
pub enum CurbsideError {
    /// Input rejected before any state change; lists every offending field
    #[error("validation failed: {}", .0.join(", "))]
    Validation(Vec<String>),

    /// Referenced entity does not exist
    #[error("{0} not found")]
    NotFound(String),

    /// Lifecycle change the transition table does not permit
    #[error("cannot move request from {from} to {to}")]
    InvalidTransition {
        from: RequestStatus,
        to: RequestStatus,
    },

    /// Identity token failed verification or lacks the required role
    #[error("identity rejected: {0}")]
    InvalidIdentity(String),

    /// A single notification could not be delivered
    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CurbsideError {
    /// Shorthand for a single-field validation failure
    pub fn invalid(field: impl Into<String>) -> Self {
        CurbsideError::Validation(vec![field.into()])
    }

    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidTransition { .. } => StatusCode::CONFLICT,
            Self::InvalidIdentity(_) => StatusCode::UNAUTHORIZED,
            Self::Delivery(_) => StatusCode::BAD_GATEWAY,
            Self::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Http(_) => StatusCode::BAD_REQUEST,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Convert to status code and body tuple for HTTP response
    pub fn into_status_code_and_body(self) -> (StatusCode, String) {
        let status = self.status_code();
        let body = self.to_string();
        (status, body)
    }
}

// Implement From conversions for common error types

impl From<std::io::Error> for CurbsideError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for CurbsideError {
    fn from(err: serde_json::Error) -> Self {
        Self::Http(format!("JSON error: {}", err))
    }
}

impl From<hyper::Error> for CurbsideError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for CurbsideError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Delivery(err.to_string())
    }
}

impl From<mongodb::error::Error> for CurbsideError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<bson::ser::Error> for CurbsideError {
    fn from(err: bson::ser::Error) -> Self {
        Self::Database(format!("BSON encode error: {}", err))
    }
}

impl From<bson::de::Error> for CurbsideError {
    fn from(err: bson::de::Error) -> Self {
        Self::Database(format!("BSON decode error: {}", err))
    }
}

impl From<jsonwebtoken::errors::Error> for CurbsideError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::InvalidIdentity(format!("JWT error: {}", err))
    }
}

/// Result type alias for curbside operations
pub type Result<T> = std::result::Result<T, CurbsideError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            CurbsideError::invalid("latitude").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            CurbsideError::NotFound("request req-1".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            CurbsideError::InvalidTransition {
                from: RequestStatus::Completed,
                to: RequestStatus::Pending,
            }
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            CurbsideError::InvalidIdentity("bad token".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn test_validation_message_lists_fields() {
        let err = CurbsideError::Validation(vec!["latitude".into(), "description".into()]);
        assert_eq!(err.to_string(), "validation failed: latitude, description");
    }

    #[test]
    fn test_transition_message() {
        let err = CurbsideError::InvalidTransition {
            from: RequestStatus::Pending,
            to: RequestStatus::Completed,
        };
        assert_eq!(
            err.to_string(),
            "cannot move request from pending to completed"
        );
    }
}
