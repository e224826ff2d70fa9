use thiserror::Error;

/// Core error type for the call flow engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallFlowError {
    /// Call, flow or segment not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation not allowed in the call's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Step whose type or configuration cannot be executed
    #[error("Malformed step {step_id}: {reason}")]
    MalformedStep {
        /// Identifier of the offending step
        step_id: String,
        /// What was wrong with it
        reason: String,
    },

    /// State store error
    #[error("State store error: {0}")]
    Storage(String),

    /// Carrier REST API error
    #[error("Carrier error: {0}")]
    Carrier(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl CallFlowError {
    /// Shorthand for a missing call record
    pub fn call_not_found(call_id: impl std::fmt::Display) -> Self {
        CallFlowError::NotFound(format!("call {}", call_id))
    }

    /// Whether this error means the referenced entity does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, CallFlowError::NotFound(_))
    }
}

impl From<serde_json::Error> for CallFlowError {
    fn from(err: serde_json::Error) -> Self {
        CallFlowError::Serialization(err.to_string())
    }
}

/// Result alias used throughout the engine
pub type CallFlowResult<T> = Result<T, CallFlowError>;
