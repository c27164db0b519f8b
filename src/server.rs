//! HTTP server: operational endpoints plus routes guarded by the security layer

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::context::SecurityContext;
use crate::middleware::{
    security_layer, CsrfError, CsrfToken, SecurityLayerState, SESSION_HEADER,
};
use crate::monitor::{AuditFilter, EventFilter, MonitorError};
use crate::shutdown::ShutdownNotifier;

/// Build the complete router
pub fn build_router(context: SecurityContext) -> Router {
    let body_limit = context.config.server.max_body_size_mb * 1024 * 1024;

    // Operational routes (not guarded)
    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/csrf/token", post(csrf_token_handler))
        .route("/security/stats", get(stats_handler))
        .route("/security/events", get(events_handler))
        .route("/security/alerts", get(alerts_handler))
        .route("/security/alerts/:id/resolve", post(resolve_alert_handler))
        .route("/security/audit", get(audit_handler))
        .with_state(context.clone());

    // Guarded routes
    let guarded_routes = Router::new()
        .route("/api/echo", get(echo_handler).post(echo_handler))
        .route("/auth/login", post(echo_handler))
        .route("/upload", post(echo_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn_with_state(
                    SecurityLayerState::new(context.middleware.clone(), body_limit),
                    security_layer,
                )),
        );

    public_routes.merge(guarded_routes)
}

/// Serve until `shutdown` fires
pub async fn serve(context: SecurityContext, mut shutdown: ShutdownNotifier) -> anyhow::Result<()> {
    let addr = format!("{}:{}", context.config.server.host, context.config.server.port);
    let app = build_router(context);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Security gateway listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.wait().await })
    .await?;

    info!("Server shutdown complete");
    Ok(())
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "status": "ok"
    }))
}

/// Prometheus text
async fn metrics_handler(State(context): State<SecurityContext>) -> String {
    context.metrics.export_prometheus()
}

async fn csrf_token_handler(
    State(context): State<SecurityContext>,
    headers: HeaderMap,
) -> Result<Json<CsrfToken>, AppError> {
    let session_id = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::new(StatusCode::BAD_REQUEST, CsrfError::MissingSession))?;

    let token = context
        .csrf
        .generate_token(session_id)
        .await
        .map_err(|e| AppError::new(StatusCode::BAD_REQUEST, e))?;
    Ok(Json(token))
}

async fn stats_handler(State(context): State<SecurityContext>) -> impl IntoResponse {
    let mut limiters = serde_json::Map::new();
    for limiter in context.limiters.all() {
        let stats = limiter.get_stats().await;
        limiters.insert(
            stats.config.scope.clone(),
            json!({
                "strategy": stats.config.strategy,
                "max_requests": stats.config.max_requests,
                "window_secs": stats.config.window_duration.as_secs(),
                "tracked_keys": stats.tracked_keys,
                "allowed_total": stats.allowed_total,
                "denied_total": stats.denied_total,
            }),
        );
    }

    Json(json!({
        "monitor": context.monitor.get_stats().await,
        "rate_limits": limiters,
        "pipeline": context.metrics.snapshot(),
        "csrf_sessions": context.csrf.active_sessions(),
    }))
}

async fn events_handler(
    State(context): State<SecurityContext>,
    Query(filter): Query<EventFilter>,
) -> impl IntoResponse {
    Json(context.monitor.get_events(&filter).await)
}

#[derive(Debug, Default, Deserialize)]
struct AlertQuery {
    #[serde(default)]
    unresolved: bool,
}

async fn alerts_handler(
    State(context): State<SecurityContext>,
    Query(query): Query<AlertQuery>,
) -> impl IntoResponse {
    Json(context.monitor.get_alerts(query.unresolved).await)
}

async fn resolve_alert_handler(
    State(context): State<SecurityContext>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let alert = context.monitor.resolve_alert(id).await.map_err(|e| match e {
        MonitorError::AlertNotFound { .. } => AppError::new(StatusCode::NOT_FOUND, e),
    })?;
    Ok(Json(alert))
}

async fn audit_handler(
    State(context): State<SecurityContext>,
    Query(filter): Query<AuditFilter>,
) -> impl IntoResponse {
    Json(context.monitor.get_audit_logs(&filter).await)
}

/// Returns the (sanitized) request body
async fn echo_handler(headers: HeaderMap, body: Bytes) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| header::HeaderValue::from_static("text/plain"));
    ([(header::CONTENT_TYPE, content_type)], body).into_response()
}

/// Application error wrapper
struct AppError {
    status: StatusCode,
    error: anyhow::Error,
}

impl AppError {
    fn new(status: StatusCode, error: impl Into<anyhow::Error>) -> Self {
        Self {
            status,
            error: error.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.error.to_string() }))).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, err)
    }
}
