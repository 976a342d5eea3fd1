//! Metrics/progress surface (spec §1 "ambient stack" addition): a minimal
//! HTTP status endpoint for supervisors that cannot hold a live
//! `Controller::subscribe()` channel, following the teacher's
//! router-construction style (`axum::Router` + `tower_http::cors`).

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};

use crate::controller::ControllerEvent;

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub status: String,
    pub fraction: f64,
    pub eta_seconds: f64,
    pub last_error: Option<String>,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            status: "Idle".to_string(),
            fraction: 0.0,
            eta_seconds: 0.0,
            last_error: None,
        }
    }
}

/// `/healthz` response, following the teacher's `HttpState`: a fixed
/// startup timestamp plus a derived uptime, rather than re-deriving
/// "how long has this process been running" at every request.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_seconds: i64,
}

struct HttpState {
    snapshot: RwLock<StatusSnapshot>,
    started_at: chrono::DateTime<chrono::Utc>,
}

/// Spawns a background task that folds `Controller` events into a shared
/// snapshot, and returns a router exposing it. The caller mounts the
/// router on whatever listener the daemon binds.
pub fn create_http_router(mut events: tokio::sync::broadcast::Receiver<ControllerEvent>) -> Router {
    let state = Arc::new(HttpState {
        snapshot: RwLock::new(StatusSnapshot::default()),
        started_at: chrono::Utc::now(),
    });

    let updater_state = state.clone();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ControllerEvent::Progress {
                    status,
                    fraction,
                    eta_seconds,
                }) => {
                    let mut snapshot = updater_state.snapshot.write().await;
                    snapshot.status = status;
                    snapshot.fraction = fraction;
                    snapshot.eta_seconds = eta_seconds;
                }
                Ok(ControllerEvent::Finished) => {
                    let mut snapshot = updater_state.snapshot.write().await;
                    snapshot.status = "Finished".to_string();
                    snapshot.fraction = 1.0;
                    snapshot.eta_seconds = 0.0;
                }
                Ok(ControllerEvent::RaiseError { file, message, .. }) => {
                    let mut snapshot = updater_state.snapshot.write().await;
                    snapshot.last_error = Some(format!("{file}: {message}"));
                }
                Ok(ControllerEvent::ItemsAvailable) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    Router::new()
        .route("/status", get(status_handler))
        .route("/healthz", get(healthz_handler))
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}

async fn status_handler(State(state): State<Arc<HttpState>>) -> Json<StatusSnapshot> {
    Json(state.snapshot.read().await.clone())
}

async fn healthz_handler(State(state): State<Arc<HttpState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_seconds: (chrono::Utc::now() - state.started_at).num_seconds(),
    })
}
