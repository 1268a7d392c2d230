use axum::{
    body::Body,
    extract::State,
    http::{Request, header::AUTHORIZATION},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::ApiError;
use crate::server::AppState;

/// Validates the `Authorization: Bearer <token>` header and stores the decoded
/// [`Claims`](crate::auth::Claims) in the request extensions.
pub async fn require_bearer(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let auth_header = match req.headers().get(AUTHORIZATION).and_then(|h| h.to_str().ok()) {
        Some(header) => header,
        None => {
            tracing::debug!(path = %req.uri().path(), "No Authorization header");
            return ApiError::Unauthorized("Authentication required".into()).into_response();
        }
    };

    let token = match auth_header.strip_prefix("Bearer ") {
        Some(t) if !t.is_empty() => t,
        _ => {
            return ApiError::Unauthorized("Invalid Authorization header format".into())
                .into_response();
        }
    };

    match state.jwt.decode(token) {
        Ok(claims) => {
            tracing::debug!(student_id = %claims.student_id, "Token validated");
            req.extensions_mut().insert(claims);
            next.run(req).await
        }
        Err(e) => {
            tracing::debug!(error = %e, "Token validation failed");
            let message = if e.is_expired() { "Token expired" } else { "Invalid token" };
            ApiError::Unauthorized(message.into()).into_response()
        }
    }
}
