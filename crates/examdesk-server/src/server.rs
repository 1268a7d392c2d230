use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use examdesk_accounts::{AccountCache, StudentRepository, UserRepository};
use examdesk_storage::{DynDocumentStore, RequestContext};
use tokio_util::sync::{CancellationToken, DropGuard};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{auth::JwtService, handlers, middleware as app_middleware};

/// Shared handles injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: DynDocumentStore,
    pub cache: AccountCache,
    pub students: StudentRepository,
    pub users: UserRepository,
    pub jwt: Arc<JwtService>,
    pub request_timeout: Duration,
}

impl AppState {
    /// Request-scoped context. Dropping the guard (for example because the client
    /// went away and the handler future was dropped) cancels the context.
    pub fn request_context(&self) -> (RequestContext, DropGuard) {
        let token = CancellationToken::new();
        let ctx = RequestContext::with_cancel(self.request_timeout, token.clone());
        (ctx, token.drop_guard())
    }
}

pub fn build_app(state: AppState, body_limit: usize) -> Router {
    let protected = Router::new()
        .route("/api/v1/student/{id}", get(handlers::get_student))
        .route("/api/v1/users/{id}", get(handlers::get_user))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            app_middleware::require_bearer,
        ));

    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .route("/api/v1/ping", get(handlers::ping))
        .route("/api/v1/signup", post(handlers::signup))
        .route("/api/v1/login", post(handlers::login))
        .merge(protected)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                        http.status_code = Empty,
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, span: &tracing::Span| {
                        span.record("http.status_code", tracing::field::display(res.status().as_u16()));
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

pub struct ExamdeskServer {
    addr: SocketAddr,
    app: Router,
}

impl ExamdeskServer {
    pub fn new(addr: SocketAddr, app: Router) -> Self {
        Self { addr, app }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
