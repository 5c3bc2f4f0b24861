//! HTTP surface of the master
//!
//! - `POST /rpc`: the master protocol, one [`MasterRequest`] per call
//! - `GET /health`, `/health/live`, `/health/ready`: probes
//! - `GET /admin/status`: chunkservers and chunk counts
//! - `POST /admin/repair`: run a maintenance cycle now
//! - `GET /metrics`: Prometheus text format

use crate::common::tracing_middleware::request_tracing_middleware;
use crate::common::{Error, MasterRequest, METRICS};
use crate::master::chunkserver_client::ChunkServerClient;
use crate::master::coordinator::Coordinator;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// Heartbeats of servers holding many chunks are the largest bodies
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (self.to_http_status(), Json(self.to_body())).into_response()
    }
}

pub fn create_router<C: ChunkServerClient>(coordinator: Arc<Coordinator<C>>) -> Router {
    Router::new()
        .route("/rpc", post(rpc::<C>))
        .route("/health", get(health::<C>))
        .route("/health/live", get(health_live))
        .route("/health/ready", get(health_ready::<C>))
        .route("/admin/status", get(admin_status::<C>))
        .route("/admin/repair", post(admin_repair::<C>))
        .route("/metrics", get(metrics))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(request_tracing_middleware)),
        )
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(coordinator)
}

async fn rpc<C: ChunkServerClient>(
    State(coordinator): State<Arc<Coordinator<C>>>,
    body: Bytes,
) -> Response {
    let request: MasterRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            METRICS.record_rpc("invalid", std::time::Duration::ZERO, false);
            return Error::InvalidRequest(format!("malformed request: {}", e)).into_response();
        }
    };

    let method = request.method();
    let start = Instant::now();
    let result = coordinator.dispatch(request).await;
    METRICS.record_rpc(method, start.elapsed(), result.is_ok());

    match result {
        Ok(response) => Json(response).into_response(),
        Err(e) => {
            tracing::debug!(method, error = %e, "rpc failed");
            e.into_response()
        }
    }
}

async fn health<C: ChunkServerClient>(
    State(coordinator): State<Arc<Coordinator<C>>>,
) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "live_servers": coordinator.server_manager().live_servers().len(),
        "chunks": coordinator.chunk_manager().chunk_count(),
        "heartbeat_interval_ms": coordinator.config().heartbeat_interval_ms,
    }))
}

/// Liveness probe: answering at all is enough
async fn health_live() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "alive": true,
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_seconds": METRICS.uptime_seconds(),
        })),
    )
}

/// Readiness probe: enough live chunkservers to place a new chunk
async fn health_ready<C: ChunkServerClient>(
    State(coordinator): State<Arc<Coordinator<C>>>,
) -> impl IntoResponse {
    let live = coordinator.server_manager().live_servers().len();
    let needed = coordinator.config().replicas;
    let ready = live >= needed;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "ready": ready,
            "live_servers": live,
            "replicas": needed,
        })),
    )
}

async fn admin_status<C: ChunkServerClient>(
    State(coordinator): State<Arc<Coordinator<C>>>,
) -> impl IntoResponse {
    let servers = coordinator.server_manager();
    let live = servers.live_servers();
    // chunks under repair are locked; report the rest rather than wait on them
    let needlist = coordinator.chunk_manager().peek_needlist(&live);
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "replicas": coordinator.config().replicas,
        "servers": servers.snapshot(),
        "live_servers": live.len(),
        "chunks": coordinator.chunk_manager().chunk_count(),
        "under_replicated": needlist.len(),
    }))
}

async fn admin_repair<C: ChunkServerClient>(
    State(coordinator): State<Arc<Coordinator<C>>>,
) -> Response {
    match coordinator.run_maintenance_cycle().await {
        Some(report) => Json(json!({ "status": "ok", "report": report })).into_response(),
        None => (
            StatusCode::CONFLICT,
            Json(json!({ "status": "busy" })),
        )
            .into_response(),
    }
}

async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        METRICS.to_prometheus(),
    )
}
