//! Thin HTTP surface (ambient stack addition, `# 6`'s request surface over
//! transport) built on `axum`, the teacher's web framework of choice.
//! Handlers do no business logic themselves — they deserialize, call the
//! `Facade`, and serialize the result.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use occ_utils::OccupantId;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::directory::OccupantDirectory;
use crate::error::ScanError;
use crate::facade::{Facade, OccupancyAdjustment};
use crate::notifications::NotificationHub;

/// Tracks consecutive persistence failures to drive `/healthz`'s
/// fail-fast condition (`# 5`: "if persistence errors for longer than a
/// configured threshold ... subsequent scans fail fast"). Goes unhealthy
/// only once a run of failures has lasted at least `threshold`, not on the
/// first error — a single blip never flips `/healthz` to 503.
pub struct HealthState {
    threshold_secs: u64,
    persistence_healthy: AtomicBool,
    last_ok_unix: AtomicU64,
    /// Unix time of the start of the current failure run; 0 means healthy.
    first_failure_unix: AtomicU64,
}

impl HealthState {
    pub fn new(threshold: std::time::Duration) -> Self {
        Self {
            threshold_secs: threshold.as_secs(),
            persistence_healthy: AtomicBool::new(true),
            last_ok_unix: AtomicU64::new(0),
            first_failure_unix: AtomicU64::new(0),
        }
    }

    /// Called after every persistence-store operation with its outcome.
    pub fn record_result(&self, ok: bool, now_unix: u64) {
        if ok {
            self.last_ok_unix.store(now_unix, Ordering::SeqCst);
            self.first_failure_unix.store(0, Ordering::SeqCst);
            self.persistence_healthy.store(true, Ordering::SeqCst);
            return;
        }
        let first = match self.first_failure_unix.compare_exchange(
            0,
            now_unix,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => now_unix,
            Err(existing) => existing,
        };
        if now_unix.saturating_sub(first) >= self.threshold_secs {
            self.persistence_healthy.store(false, Ordering::SeqCst);
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.persistence_healthy.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub facade: Arc<Facade>,
    pub directory: Arc<dyn OccupantDirectory>,
    pub notifications: Arc<NotificationHub>,
    pub health: Arc<HealthState>,
    /// Rendering handle for the `metrics` facade's process-wide recorder,
    /// installed once at startup (`occ_server::main`). `ADDITION G`.
    pub prometheus_handle: PrometheusHandle,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/scan", post(scan))
        .route("/occupancy", get(occupancy))
        .route("/session/:occupant_id", get(get_session))
        .route("/capacity", post(set_max_capacity))
        .route("/occupancy/adjust", post(adjust_occupancy))
        .route("/status", post(set_status))
        .route("/forecast", get(forecast))
        .route("/scored", get(list_scored))
        .route("/remove-top", post(remove_top))
        .route("/history", post(ingest_history))
        .route("/ws", get(websocket_upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz(State(state): State<AppState>) -> Response {
    if state.health.is_healthy() {
        (axum::http::StatusCode::OK, "ok").into_response()
    } else {
        (axum::http::StatusCode::SERVICE_UNAVAILABLE, "persistence unavailable").into_response()
    }
}

/// Renders the counters/gauges recorded through the `metrics` facade crate
/// (`occ_admissions_total`, `occ_evictions_total`, `occ_rejections_total`,
/// `occ_current_occupancy` — see `admission.rs`) in Prometheus exposition
/// format, via the handle installed at startup (`ADDITION G`).
async fn metrics(State(state): State<AppState>) -> Response {
    (axum::http::StatusCode::OK, state.prometheus_handle.render()).into_response()
}

fn scan_error_status(err: &ScanError) -> axum::http::StatusCode {
    use axum::http::StatusCode;
    match err {
        ScanError::InvalidToken => StatusCode::UNAUTHORIZED,
        ScanError::RejectedClosed { .. } | ScanError::RejectedFullAndUnremovable => StatusCode::CONFLICT,
        ScanError::AlreadyInside | ScanError::NotInside => StatusCode::CONFLICT,
        ScanError::OutOfRange(_) | ScanError::InvalidStatus | ScanError::InvalidTimeFormat => StatusCode::BAD_REQUEST,
        ScanError::PersistenceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for ScanError {
    fn into_response(self) -> Response {
        let status = scan_error_status(&self);
        (status, Json(serde_json::json!({"error": self.to_string()}))).into_response()
    }
}

#[derive(Deserialize)]
struct ScanRequest {
    token: String,
}

async fn scan(State(state): State<AppState>, Json(req): Json<ScanRequest>) -> Result<Response, ScanError> {
    let outcome = state.facade.scan(&req.token).await?;
    Ok(Json(outcome_view(outcome)).into_response())
}

#[derive(Serialize)]
#[serde(tag = "kind")]
enum ScanOutcomeView {
    Admitted { occupant_id: OccupantId },
    Exited { occupant_id: OccupantId },
}

fn outcome_view(outcome: crate::admission::ScanOutcome) -> ScanOutcomeView {
    match outcome {
        crate::admission::ScanOutcome::Admitted(session) => ScanOutcomeView::Admitted { occupant_id: session.occupant_id },
        crate::admission::ScanOutcome::Exited(session) => ScanOutcomeView::Exited { occupant_id: session.occupant_id },
    }
}

async fn occupancy(State(state): State<AppState>) -> Json<crate::facade::OccupancyView> {
    Json(state.facade.get_occupancy().await)
}

async fn get_session(State(state): State<AppState>, Path(occupant_id): Path<uuid::Uuid>) -> Response {
    match state.facade.get_session(OccupantId(occupant_id)).await {
        Some(view) => Json(view).into_response(),
        None => axum::http::StatusCode::NOT_FOUND.into_response(),
    }
}

#[derive(Deserialize)]
struct SetMaxCapacityRequest {
    max_capacity: u32,
}

async fn set_max_capacity(
    State(state): State<AppState>,
    Json(req): Json<SetMaxCapacityRequest>,
) -> Result<Response, ScanError> {
    state.facade.set_max_capacity(req.max_capacity).await?;
    Ok(axum::http::StatusCode::NO_CONTENT.into_response())
}

async fn adjust_occupancy(
    State(state): State<AppState>,
    Json(req): Json<OccupancyAdjustment>,
) -> Result<Response, ScanError> {
    state.facade.adjust_occupancy(req).await?;
    Ok(axum::http::StatusCode::NO_CONTENT.into_response())
}

#[derive(Deserialize)]
struct SetStatusRequest {
    status: String,
    message: Option<String>,
    auto_open: Option<String>,
    auto_close: Option<String>,
    auto_schedule_enabled: bool,
}

async fn set_status(State(state): State<AppState>, Json(req): Json<SetStatusRequest>) -> Result<Response, ScanError> {
    let status = state
        .facade
        .set_status(&req.status, req.message, req.auto_open.as_deref(), req.auto_close.as_deref(), req.auto_schedule_enabled)
        .await?;
    Ok(Json(status).into_response())
}

#[derive(Deserialize)]
struct ForecastQuery {
    k: u32,
}

async fn forecast(State(state): State<AppState>, Query(query): Query<ForecastQuery>) -> Result<Response, ScanError> {
    let result = state.facade.forecast(query.k).await?;
    Ok(Json(result).into_response())
}

async fn list_scored(State(state): State<AppState>) -> Json<Vec<crate::facade::ScoredSessionView>> {
    Json(state.facade.list_scored().await)
}

#[derive(Deserialize)]
struct RemoveTopRequest {
    n: usize,
}

async fn remove_top(State(state): State<AppState>, Json(req): Json<RemoveTopRequest>) -> Result<Response, ScanError> {
    let removed = state.facade.remove_top_n(req.n).await?;
    Ok(Json(removed).into_response())
}

#[derive(Deserialize)]
struct HistoryPoint {
    timestamp: occ_utils::Timestamp,
    occupancy: f64,
    entry_rate: f64,
    exit_rate: f64,
}

async fn ingest_history(State(state): State<AppState>, Json(batch): Json<Vec<HistoryPoint>>) -> Json<usize> {
    let observations = batch.into_iter().map(|p| (p.timestamp, p.occupancy, p.entry_rate, p.exit_rate)).collect();
    Json(state.facade.ingest_history(observations).await)
}

#[derive(Deserialize)]
struct WsQuery {
    occupant_id: Option<uuid::Uuid>,
    broadcast: Option<bool>,
}

async fn websocket_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.occupant_id.map(OccupantId), query.broadcast.unwrap_or(false)))
}

/// Bridges one `NotificationHub` mailbox to one WebSocket connection. The
/// hub stays transport-agnostic (`# 4.G`); this is the only place that
/// knows about frames.
async fn handle_socket(mut socket: WebSocket, state: AppState, occupant_id: Option<OccupantId>, broadcast_subscribed: bool) {
    let (connection_id, mut rx) = state.notifications.register(occupant_id, broadcast_subscribed);

    loop {
        tokio::select! {
            notification = rx.recv() => {
                match notification {
                    Some(n) => {
                        let payload = serde_json::to_string(&n).unwrap_or_default();
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    state.notifications.unregister(connection_id);
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = router(state);
    tracing::info!(%addr, "listening");
    axum::Server::bind(&addr).serve(app.into_make_service()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_failure_below_threshold_stays_healthy() {
        let health = HealthState::new(std::time::Duration::from_secs(30));
        health.record_result(false, 1_000);
        assert!(health.is_healthy());
    }

    #[test]
    fn sustained_failure_past_threshold_goes_unhealthy() {
        let health = HealthState::new(std::time::Duration::from_secs(30));
        health.record_result(false, 1_000);
        health.record_result(false, 1_031);
        assert!(!health.is_healthy());
    }

    #[test]
    fn a_later_success_clears_the_failure_run() {
        let health = HealthState::new(std::time::Duration::from_secs(30));
        health.record_result(false, 1_000);
        health.record_result(true, 1_010);
        health.record_result(false, 1_020);
        assert!(health.is_healthy());
    }
}
