//! Application services - the engine and its collaborators

/// Engine settings and time source
pub mod settings;

/// Carrier REST client contract
pub mod carrier;

/// Per-call advisory locking
pub mod guard;

/// Conference naming, target dispatch and leg outcomes
pub mod conference;

/// Step execution
pub mod interpreter;

/// Webhook entry points
pub mod engine;

/// Transfers between segments
pub mod transfer;

/// Transcript re-segmentation
pub mod transcription;
