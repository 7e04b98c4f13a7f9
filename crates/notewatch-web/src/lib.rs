//! Small admin surface over a running watcher: health, current status and a
//! manual trigger.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use notewatch_sync::{MonitorHandle, Phase};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::info;

pub const CRATE_NAME: &str = "notewatch-web";

#[derive(Clone)]
pub struct AppState {
    pub monitor: MonitorHandle,
}

impl AppState {
    pub fn new(monitor: MonitorHandle) -> Self {
        Self { monitor }
    }
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    phase: Phase,
    consecutive_failures: u32,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_handler))
        .route("/status", get(status_handler))
        .route("/trigger", post(trigger_handler))
        .with_state(Arc::new(state))
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    addr: SocketAddr,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "admin server listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    let view = state.monitor.status();
    let stopped = view.phase == Phase::Stopped;
    let body = Json(Health {
        status: if stopped { "stopped" } else { "ok" },
        phase: view.phase,
        consecutive_failures: view.consecutive_failures,
    });
    if stopped {
        (StatusCode::SERVICE_UNAVAILABLE, body).into_response()
    } else {
        body.into_response()
    }
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(state.monitor.status()).into_response()
}

async fn trigger_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.monitor.trigger().await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "error": err.to_string() })),
        )
            .into_response(),
    }
}
