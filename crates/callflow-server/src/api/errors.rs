//! Error handling for the operator API
//!
//! Webhook endpoints never use this: they answer with a hangup instead.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{error, warn};

use callflow_core::CallFlowError;

use crate::error::ServerError;

impl ServerError {
    /// HTTP status and stable error code
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, "ERR_NOT_FOUND"),
            ServerError::ValidationError(_) => (StatusCode::BAD_REQUEST, "ERR_VALIDATION_ERROR"),
            ServerError::ConfigError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "ERR_CONFIG_ERROR"),
            ServerError::Engine(CallFlowError::InvalidState(_)) => {
                (StatusCode::CONFLICT, "ERR_INVALID_STATE")
            }
            ServerError::Engine(CallFlowError::MalformedStep { .. }) => {
                (StatusCode::BAD_REQUEST, "ERR_MALFORMED_STEP")
            }
            ServerError::Engine(CallFlowError::Carrier(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "ERR_CARRIER_ERROR")
            }
            ServerError::Engine(CallFlowError::Storage(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "ERR_STATE_STORE_ERROR")
            }
            ServerError::Engine(_) | ServerError::InternalError(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "ERR_INTERNAL_SERVER_ERROR")
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, error_code) = self.status_and_code();
        let message = self.to_string();

        if status.is_server_error() {
            error!(error_code, %message, "API request failed");
        } else {
            warn!(error_code, %message, "API request rejected");
        }

        let body = Json(json!({
            "error": message,
            "errorDetails": {
                "errorCode": error_code,
                "errorMessage": message,
            }
        }));

        (status, body).into_response()
    }
}
