//! Operator HTTP surface: liveness and outbox backlog.

use crate::event::EventType;
use crate::outbox::{OutboxBacklog, OutboxStore};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

/// Ops HTTP configuration
#[derive(Clone, Debug, Deserialize)]
pub struct OpsConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_enabled() -> bool {
    true
}

fn default_bind() -> String {
    "0.0.0.0:3000".to_string()
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            bind: default_bind(),
        }
    }
}

#[derive(Clone)]
pub struct OpsAppState {
    pub outbox: OutboxStore,
}

#[derive(Serialize)]
pub struct OutboxStatus {
    #[serde(flatten)]
    pub backlog: OutboxBacklog,
    /// Pending event types no relay can publish; these rows stay unsent
    pub unrecognized_types: Vec<String>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn create_ops_router(state: OpsAppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ops/outbox", get(outbox_status))
        .with_state(Arc::new(state))
}

async fn health() -> Response {
    Json(serde_json::json!({ "status": "ok" })).into_response()
}

/// GET /ops/outbox
async fn outbox_status(State(state): State<Arc<OpsAppState>>) -> Response {
    match state.outbox.backlog() {
        Ok(backlog) => {
            let unrecognized_types = backlog
                .pending_by_type
                .iter()
                .filter(|(t, _)| t.parse::<EventType>().is_err())
                .map(|(t, _)| t.clone())
                .collect();
            Json(OutboxStatus {
                backlog,
                unrecognized_types,
            })
            .into_response()
        }
        Err(e) => {
            error!(error = %e, "Failed to read outbox backlog");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "Failed to read outbox backlog".to_string(),
                }),
            )
                .into_response()
        }
    }
}
