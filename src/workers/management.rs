// src/workers/management.rs

//! Management HTTP surface consumed by the load balancer: readiness and
//! the current role.

use super::periodic::StopSignal;
use crate::core::state::ControlState;
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::routing::get;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

pub fn router(state: Arc<ControlState>) -> Router {
    Router::new()
        .route("/controller/ready", get(ready))
        .route("/controller/role", get(role))
        .fallback(not_found)
        .with_state(state)
}

async fn ready(State(state): State<Arc<ControlState>>) -> StatusCode {
    if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn role(State(state): State<Arc<ControlState>>) -> String {
    state.role().to_string()
}

async fn not_found(uri: Uri) -> (StatusCode, &'static str) {
    debug!("unknown management path requested: {uri}");
    (StatusCode::NOT_FOUND, "Endpoint not found!")
}

/// Serves the management API until stopped, then drains gracefully.
pub async fn serve(listener: TcpListener, state: Arc<ControlState>, mut stop: StopSignal) {
    match listener.local_addr() {
        Ok(addr) => info!("management API listening on {addr}"),
        Err(e) => debug!("management listener address unavailable: {e}"),
    }

    let app = router(state);
    let shutdown = async move {
        stop.stopped().await;
        info!("management server shutting down");
    };
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!("management server error: {e}");
    }
}
