//! HTTP status endpoints.
//!
//! - `GET /health` - liveness, current state and master flag
//! - `GET /status` - the full node snapshot
//!
//! The protocol loop publishes a fresh [`NodeStatus`] after every iteration
//! through a [`watch`] channel; the handlers only ever read the latest one.

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use meshturn::{NodeId, NodeStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Latest snapshot published by the protocol loop.
pub type StatusRx = watch::Receiver<NodeStatus>;

/// Health status response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Whether the protocol loop is running.
    pub healthy: bool,
    /// This node's radio address.
    pub node: NodeId,
    /// Current protocol state.
    pub state: String,
    /// Whether this node currently holds the token.
    pub master: bool,
}

/// Health endpoint handler.
pub async fn health_handler(State(status): State<StatusRx>) -> impl IntoResponse {
    let healthy = status.has_changed().is_ok();
    let status = status.borrow();
    let health = HealthStatus {
        healthy,
        node: status.node,
        state: status.state.to_string(),
        master: status.master_node,
    };
    let code = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

    (code, Json(health))
}

/// Status endpoint handler.
pub async fn status_handler(State(status): State<StatusRx>) -> impl IntoResponse {
    let snapshot = status.borrow().clone();
    (StatusCode::OK, Json(snapshot))
}

/// Creates the status router.
pub fn create_router(status: StatusRx) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .with_state(status)
}
