//! Health check endpoint

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use crate::server::CallFlowServer;

/// Health check handler
///
/// Reports the server version and whether the state store answers.
pub async fn health_check(State(server): State<Arc<CallFlowServer>>) -> impl IntoResponse {
    debug!("Health check requested");

    let state_store_status = match server.check_state_store_health().await {
        Ok(true) => "UP",
        Ok(false) => "DEGRADED",
        Err(_) => "DOWN",
    };

    let response = json!({
        "status": if state_store_status == "DOWN" { "DOWN" } else { "UP" },
        "version": env!("CARGO_PKG_VERSION"),
        "dependencies": {
            "stateStore": {
                "status": state_store_status,
                "kind": server.store_kind(),
            }
        },
    });

    let status = if state_store_status == "DOWN" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (status, Json(response))
}
