use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use state_store::{StateStore, StateValue, CONNECTION_STATE};

#[derive(Clone)]
pub struct StatusState {
    pub store: Arc<dyn StateStore>,
    pub metrics: Option<PrometheusHandle>,
}

pub fn router(state: StatusState) -> Router {
    Router::new()
        .route("/metrics", get(render_metrics))
        .route("/state", get(state_snapshot))
        .route("/healthz", get(healthz))
        .with_state(state)
}

/// Serves the status routes until `shutdown` turns true.
pub async fn serve(
    addr: SocketAddr,
    state: StatusState,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "status endpoint listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            while shutdown.changed().await.is_ok() {
                if *shutdown.borrow() {
                    break;
                }
            }
        })
        .await
}

async fn render_metrics(State(state): State<StatusState>) -> Response {
    match state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

async fn state_snapshot(State(state): State<StatusState>) -> Response {
    match state.store.snapshot().await {
        Ok(entries) => Json(entries).into_response(),
        Err(err) => {
            warn!(error = %err, "state snapshot failed");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

/// 200 while the controller answered the last tick, 503 otherwise.
async fn healthz(State(state): State<StatusState>) -> Response {
    let connected = match state.store.snapshot().await {
        Ok(entries) => entries
            .iter()
            .any(|entry| entry.name == CONNECTION_STATE && entry.value == StateValue::Bool(true)),
        Err(err) => {
            warn!(error = %err, "state snapshot failed");
            false
        }
    };

    if connected {
        (StatusCode::OK, "ok").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "disconnected").into_response()
    }
}
