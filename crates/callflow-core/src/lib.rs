//!
//! Callflow Core - stateless call flow execution for carrier webhooks
//!
//! This crate holds the flow model, the call record and its merge-patch, the
//! callback URL contract, and the services that turn carrier callbacks into
//! control documents. Storage, HTTP and the carrier REST API live behind the
//! traits defined here.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Domain layer - flows, call records and carrier-facing contracts
pub mod domain;

/// Application services - interpreter, conferences, transfers, transcripts
pub mod application;

/// Error types
pub mod error;

pub use error::{CallFlowError, CallFlowResult};

pub use domain::arena::{BlockId, BranchKey, Cursor, FlowArena};
pub use domain::call_record::{
    CallContext, CallDirection, CallId, CallRecord, CallRecordPatch, CallSegment, CallStatus,
    CallTranscript, PendingTarget, Resumption, TranscriptEntry, Voicemail,
};
pub use domain::control::{ControlDocument, Verb};
pub use domain::flow_definition::{CallFlow, CallFlowStep, FlowId, Prompt, StepAction, TenantId};
pub use domain::repository::{
    AccountDirectory, CallFlowRepository, CallRecordRepository, NumberRoute, NumberRouting,
};
pub use domain::resumption::{CallbackAction, CallbackUrls, ResumptionToken};
pub use domain::webhook::{DialOutcome, WebhookParams};

pub use application::carrier::{CarrierClient, DialLegRequest, LogOnlyCarrier};
pub use application::conference::{ConferenceEvent, ConferenceEventKind, ConferenceOrchestrator};
pub use application::engine::{CallFlowEngine, EngineDependencies};
pub use application::guard::CallGuard;
pub use application::settings::{Clock, EngineSettings, FixedClock, SharedClock, SystemClock};
pub use application::transcription::{ResegmentError, ResegmentSummary, TranscriptionSegmenter};
pub use application::transfer::{TransferCoordinator, TransferRequest, TransferResult};
