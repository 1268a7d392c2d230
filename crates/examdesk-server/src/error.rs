//! HTTP error responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use examdesk_accounts::AccountError;
use examdesk_storage::Interrupted;
use serde_json::json;

/// Error returned by handlers, rendered as `{"error": "<message>"}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    ServiceUnavailable(String),
    #[error("{0}")]
    GatewayTimeout(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<AccountError> for ApiError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::NotFound { entity, .. } => Self::NotFound(format!("{entity} not found")),
            AccountError::AlreadyExists { .. } => Self::Conflict(err.to_string()),
            AccountError::InvalidCredentials => Self::Unauthorized(err.to_string()),
            AccountError::WeakPassword { .. } | AccountError::InvalidInput { .. } => {
                Self::BadRequest(err.to_string())
            }
            AccountError::Interrupted(Interrupted::DeadlineExceeded) => {
                Self::GatewayTimeout("request timed out".into())
            }
            AccountError::Storage(ref e) if e.is_connection_error() => {
                tracing::error!(error = %e, "document store unavailable");
                Self::ServiceUnavailable("service temporarily unavailable".into())
            }
            other => {
                tracing::error!(error = %other, "request failed");
                Self::Internal("internal server error".into())
            }
        }
    }
}
