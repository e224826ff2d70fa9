//! Error types for the call flow server

use thiserror::Error;

use callflow_core::CallFlowError;

/// Server error types
#[derive(Error, Debug)]
pub enum ServerError {
    /// Resource not found
    #[error("{0} not found")]
    NotFound(String),

    /// Validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Error raised by the engine or its collaborators
    #[error(transparent)]
    Engine(CallFlowError),

    /// Internal server error
    #[error("Internal server error: {0}")]
    InternalError(String),
}

/// Result type for server operations
pub type ServerResult<T> = Result<T, ServerError>;

impl From<CallFlowError> for ServerError {
    fn from(err: CallFlowError) -> Self {
        match err {
            CallFlowError::NotFound(what) => ServerError::NotFound(what),
            CallFlowError::Validation(msg) => ServerError::ValidationError(msg),
            CallFlowError::Configuration(msg) => ServerError::ConfigError(msg),
            other => ServerError::Engine(other),
        }
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        ServerError::ValidationError(format!("JSON error: {}", err))
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        ServerError::InternalError(format!("IO error: {}", err))
    }
}

impl From<reqwest::Error> for ServerError {
    fn from(err: reqwest::Error) -> Self {
        ServerError::InternalError(format!("HTTP client error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_errors_map_to_server_errors() {
        let err: ServerError = CallFlowError::call_not_found("CA1").into();
        assert!(matches!(err, ServerError::NotFound(ref what) if what == "call CA1"));
        assert_eq!(err.to_string(), "call CA1 not found");

        let err: ServerError = CallFlowError::Validation("empty target".into()).into();
        assert!(matches!(err, ServerError::ValidationError(_)));

        let err: ServerError = CallFlowError::InvalidState("not bridged".into()).into();
        assert_eq!(err.to_string(), "Invalid state: not bridged");
    }
}
