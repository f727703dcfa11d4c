//! HTTP + WebSocket management surface (spec §6): metrics, provider health,
//! cache stats, and audit log endpoints consumed by the dashboard.

use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::audit::{AuditFilter, AuditLevel};
use crate::cache::CacheSystem;
use crate::metrics::MetricsSystem;
use crate::provider::ProviderHealthTracker;

/// Shared application state handed to every route handler.
#[derive(Clone)]
pub struct ApiState {
    /// Real-time tracker, historical windows, hub, and persistence.
    pub metrics: Arc<MetricsSystem>,
    /// Multi-tier cache facade.
    pub cache: Arc<CacheSystem>,
    /// Request/response audit ring.
    pub audit: Arc<crate::audit::AuditRing>,
    /// Per-provider health counters.
    pub provider_health: Arc<ProviderHealthTracker>,
}

/// Build the management router (spec §6).
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/v0/management/metrics/live", get(metrics_live))
        .route("/v0/management/metrics/historical", get(metrics_historical))
        .route("/v0/management/metrics/tps", get(metrics_tps))
        .route("/v0/management/metrics/tpm", get(metrics_tpm))
        .route("/v0/management/metrics/tph", get(metrics_tph))
        .route("/v0/management/metrics/tpd", get(metrics_tpd))
        .route("/v0/management/cache/stats", get(cache_stats))
        .route("/v0/management/providers/health", get(providers_health))
        .route("/v0/management/audit/logs", get(audit_logs).delete(audit_clear))
        .route("/v0/management/audit/stats", get(audit_stats))
        .route("/v0/management/audit/export", get(audit_export))
        .route("/ws/metrics", get(ws_metrics))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct ApiError {
    error: String,
}

fn bad_request(message: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, Json(ApiError { error: message.into() })).into_response()
}

async fn metrics_live(State(state): State<ApiState>) -> impl IntoResponse {
    let snapshot = state.metrics.tracker.snapshot();
    let uptime_seconds = state.metrics.tracker.uptime_seconds();
    Json(serde_json::json!({
        "rpm": snapshot.rpm,
        "tpm": snapshot.tpm,
        "tps": snapshot.tps,
        "total_requests": snapshot.total_requests,
        "total_tokens": snapshot.total_tokens,
        "total_success": snapshot.total_success,
        "total_failed": snapshot.total_failed,
        "success_rate": snapshot.success_rate,
        "avg_latency_ms": snapshot.avg_latency_ms,
        "p50_latency_ms": snapshot.p50_latency_ms,
        "p95_latency_ms": snapshot.p95_latency_ms,
        "p99_latency_ms": snapshot.p99_latency_ms,
        "uptime_seconds": uptime_seconds,
        "model_stats": snapshot.model_stats,
        "timestamp": chrono::Utc::now(),
    }))
}

#[derive(Debug, Deserialize)]
struct HistoricalQuery {
    range: Option<String>,
}

async fn metrics_historical(State(state): State<ApiState>, Query(query): Query<HistoricalQuery>) -> Response {
    let range = query.range.as_deref().unwrap_or("1h");
    let (seconds, minutes, hours, days) = match range {
        "1m" => (true, false, false, false),
        "1h" => (false, true, false, false),
        "24h" => (false, false, true, false),
        "7d" | "30d" => (false, false, false, true),
        _ => return bad_request(format!("unsupported range '{range}'")),
    };
    let snapshot = state.metrics.historical.snapshot(seconds, minutes, hours, days);
    Json(serde_json::json!({
        "range": range,
        "data": snapshot,
        "summary": {
            "requested_range": range,
        },
    }))
    .into_response()
}

#[derive(Debug, Clone, Copy)]
enum ThroughputGranularity {
    Second,
    Minute,
    Hour,
    Day,
}

async fn throughput_response(state: &ApiState, granularity: ThroughputGranularity) -> Response {
    let store = match &state.metrics.store {
        Some(store) => store,
        None => return Json(serde_json::json!({ "data": [], "source": "memory" })).into_response(),
    };

    let result = match granularity {
        ThroughputGranularity::Second => store.tps().await,
        ThroughputGranularity::Minute => store.tpm().await,
        ThroughputGranularity::Hour => store.tph().await,
        ThroughputGranularity::Day => store.tpd().await,
    };

    match result {
        Ok(data) => Json(serde_json::json!({ "data": data, "source": "database" })).into_response(),
        Err(err) => {
            tracing::error!(%err, "throughput query failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(ApiError { error: err.to_string() })).into_response()
        }
    }
}

async fn metrics_tps(State(state): State<ApiState>) -> Response {
    throughput_response(&state, ThroughputGranularity::Second).await
}

async fn metrics_tpm(State(state): State<ApiState>) -> Response {
    throughput_response(&state, ThroughputGranularity::Minute).await
}

async fn metrics_tph(State(state): State<ApiState>) -> Response {
    throughput_response(&state, ThroughputGranularity::Hour).await
}

async fn metrics_tpd(State(state): State<ApiState>) -> Response {
    throughput_response(&state, ThroughputGranularity::Day).await
}

async fn cache_stats(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.cache.stats().await)
}

async fn providers_health(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.provider_health.snapshot())
}

#[derive(Debug, Deserialize)]
struct AuditLogsQuery {
    level: Option<AuditLevel>,
    provider: Option<String>,
    model: Option<String>,
    auth_id: Option<String>,
    since: Option<chrono::DateTime<chrono::Utc>>,
    until: Option<chrono::DateTime<chrono::Utc>>,
    errors_only: Option<bool>,
    min_latency_ms: Option<u64>,
    limit: Option<usize>,
}

impl From<AuditLogsQuery> for AuditFilter {
    fn from(query: AuditLogsQuery) -> Self {
        AuditFilter {
            level: query.level,
            provider: query.provider,
            model: query.model,
            auth_id: query.auth_id,
            since: query.since,
            until: query.until,
            errors_only: query.errors_only.unwrap_or(false),
            min_latency_ms: query.min_latency_ms,
            limit: query.limit.unwrap_or(0),
        }
    }
}

async fn audit_logs(State(state): State<ApiState>, Query(query): Query<AuditLogsQuery>) -> impl IntoResponse {
    let filter: AuditFilter = query.into();
    let entries = state.audit.get_entries(&filter);
    Json(serde_json::json!({
        "count": entries.len(),
        "entries": entries,
        "filter": filter,
    }))
}

async fn audit_clear(State(state): State<ApiState>) -> impl IntoResponse {
    state.audit.clear();
    StatusCode::NO_CONTENT
}

async fn audit_stats(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.audit.stats())
}

async fn audit_export(State(state): State<ApiState>) -> Response {
    match state.audit.export() {
        Ok(bytes) => (
            [
                (header::CONTENT_TYPE, "application/json"),
                (header::CONTENT_DISPOSITION, "attachment; filename=audit-logs.json"),
            ],
            bytes,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, Json(ApiError { error: err.to_string() })).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    #[allow(dead_code)]
    key: Option<String>,
}

async fn ws_metrics(ws: WebSocketUpgrade, State(state): State<ApiState>, Query(_query): Query<WsQuery>) -> Response {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

/// Drive one WebSocket client through its register -> push -> pong-tracked
/// read loop -> unregister lifecycle (spec §4.12, §6).
async fn handle_ws(socket: WebSocket, state: ApiState) {
    let (mut sender, mut receiver) = socket.split();
    let handle = state.metrics.hub.register().await;
    let id = handle.id;
    let mut receiver_rx = handle.receiver;

    let mut ping_ticker = tokio::time::interval(std::time::Duration::from_secs(30));
    let read_deadline = std::time::Duration::from_secs(60);
    let mut deadline_ticker = tokio::time::interval(std::time::Duration::from_secs(5));
    let mut last_client_activity = std::time::Instant::now();

    loop {
        tokio::select! {
            payload = receiver_rx.recv() => {
                match payload {
                    Some(bytes) => {
                        if sender.send(WsMessage::Text(String::from_utf8_lossy(&bytes).to_string())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = ping_ticker.tick() => {
                if sender.send(WsMessage::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
            _ = deadline_ticker.tick() => {
                if last_client_activity.elapsed() >= read_deadline {
                    break; // no client message or pong within the read deadline
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    Some(Ok(_)) => last_client_activity = std::time::Instant::now(),
                }
            }
        }
    }

    state.metrics.hub.unregister(id).await;
}
