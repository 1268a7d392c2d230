use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use examdesk_accounts::{NewStudent, StudentProfile, UserProfile};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::auth::Claims;
use crate::error::ApiError;
use crate::server::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

pub async fn ping() -> impl IntoResponse {
    Json(json!({ "msg": "pong" }))
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// Ready when the document store answers. A failing cache only marks the
/// service degraded, since reads fall back to the store.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let (ctx, _guard) = state.request_context();
    let store_ok = match ctx.run(state.store.ping()).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "document store ping failed");
            false
        }
        Err(e) => {
            tracing::warn!(error = %e, "document store ping interrupted");
            false
        }
    };

    let cache = match &state.cache {
        None => "disabled",
        Some(cache) => match cache.store().health_check().await {
            Ok(()) => "ok",
            Err(e) => {
                tracing::warn!(error = %e, "cache health check failed");
                "unavailable"
            }
        },
    };

    let (code, status) = match (store_ok, cache) {
        (false, _) => (StatusCode::SERVICE_UNAVAILABLE, "unready"),
        (true, "unavailable") => (StatusCode::OK, "degraded"),
        (true, _) => (StatusCode::OK, "ready"),
    };
    (
        code,
        Json(json!({
            "status": status,
            "document_store": state.store.backend_name(),
            "cache": cache,
        })),
    )
}

#[derive(Serialize)]
pub struct SessionResponse {
    pub token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub student: StudentProfile,
}

pub async fn signup(
    State(state): State<AppState>,
    Json(body): Json<NewStudent>,
) -> Result<impl IntoResponse, ApiError> {
    let (ctx, _guard) = state.request_context();
    let created = state.students.create(&ctx, body).await?;
    let student = created.value;

    let token = state
        .jwt
        .issue_for(&student)
        .map_err(|e| {
            tracing::error!(error = %e, "failed to issue token");
            ApiError::Internal("internal server error".into())
        })?;
    Ok((
        StatusCode::CREATED,
        Json(SessionResponse {
            token,
            token_type: "Bearer",
            expires_in: state.jwt.ttl_secs(),
            student: StudentProfile::from(&student),
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub student_id: String,
    pub password: String,
}

pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    if body.student_id.trim().is_empty() || body.password.is_empty() {
        return Err(ApiError::BadRequest(
            "student_id and password are required".into(),
        ));
    }
    let (ctx, _guard) = state.request_context();
    let student = state
        .students
        .verify_password(&ctx, &body.student_id, &body.password)
        .await?;

    if let Err(e) = state.students.record_login(&ctx, &student.student_id).await {
        tracing::warn!(student_id = %student.student_id, error = %e, "failed to record login");
    }

    let token = state
        .jwt
        .issue_for(&student)
        .map_err(|e| {
            tracing::error!(error = %e, "failed to issue token");
            ApiError::Internal("internal server error".into())
        })?;
    tracing::info!(student_id = %student.student_id, "student logged in");
    Ok(Json(SessionResponse {
        token,
        token_type: "Bearer",
        expires_in: state.jwt.ttl_secs(),
        student: StudentProfile::from(&student),
    }))
}

pub async fn get_student(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<Json<StudentProfile>, ApiError> {
    let (ctx, _guard) = state.request_context();
    let outcome = state.students.get(&ctx, &id).await?;
    tracing::debug!(
        requested_by = %claims.student_id,
        source = ?outcome.source,
        degraded = outcome.is_degraded(),
        "student profile read"
    );
    Ok(Json(StudentProfile::from(&outcome.value)))
}

pub async fn get_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<Json<UserProfile>, ApiError> {
    let (ctx, _guard) = state.request_context();
    let outcome = state.users.get(&ctx, &id).await?;
    tracing::debug!(
        requested_by = %claims.student_id,
        source = ?outcome.source,
        degraded = outcome.is_degraded(),
        "staff profile read"
    );
    Ok(Json(UserProfile::from(&outcome.value)))
}
