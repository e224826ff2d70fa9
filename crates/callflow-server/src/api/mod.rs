//! API module for the call flow server
//!
//! Carrier webhooks live under `/voice`, operator endpoints under `/calls`
//! and `/tenants`.

use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use callflow_core::CallbackAction;

pub mod calls;
pub mod errors;
pub mod health;
pub mod voice;

use crate::server::CallFlowServer;

/// Build the router for all endpoints
pub fn build_router(server: Arc<CallFlowServer>) -> Router {
    use CallbackAction::*;

    Router::new()
        // Call creation and carrier status
        .route("/voice/inbound", post(voice::inbound))
        .route("/voice/outbound", post(voice::outbound))
        .route("/voice/status", post(voice::call_status))
        // Flow callbacks
        .route(Next.route(), post(voice::next_step))
        .route(Menu.route(), post(voice::menu))
        .route(DialStatus.route(), post(voice::dial_status))
        .route(NestedDialStatus.route(), post(voice::nested_dial_status))
        .route(RoundRobin.route(), post(voice::round_robin))
        .route(Keypad.route(), post(voice::keypad))
        .route(VoicemailComplete.route(), post(voice::voicemail_complete))
        .route(Transcription.route(), post(voice::transcription))
        // Conference and leg callbacks
        .route(ConferenceStatus.route(), post(voice::conference_status))
        .route(LegStatus.route(), post(voice::leg_status))
        .route(Join.route(), post(voice::join))
        .route(TransferJoin.route(), post(voice::transfer_join))
        .route(TransferStatus.route(), post(voice::transfer_status))
        .route(RecordingStatus.route(), post(voice::recording_status))
        // Operator API
        .route("/calls/:call_id", get(calls::get_call))
        .route("/calls/:call_id/transfer", post(calls::transfer_call))
        .route("/calls/:call_id/transcript", put(calls::put_transcript))
        .route("/calls/:call_id/resegment", post(calls::resegment_call))
        .route("/tenants/:tenant_id/resegment", post(calls::resegment_tenant))
        // Health check
        .route("/health", get(health::health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(server)
}
