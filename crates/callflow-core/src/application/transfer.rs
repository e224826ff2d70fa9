//! Warm transfers of bridged calls
//!
//! A transfer never reuses the live conference. It closes the current segment,
//! opens the next one with its own conference, stores the new target and
//! redirects the caller leg; the old conference tears itself down once the
//! caller has left it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::conference::{conference_name_for, ConferenceOrchestrator};
use super::engine::EngineDependencies;
use super::guard::CallGuard;
use super::settings::EngineSettings;
use crate::domain::call_record::{
    CallId, CallRecord, CallRecordPatch, CallSegment, CallStatus, PendingTarget,
};
use crate::domain::control::{ControlDocument, Verb};
use crate::domain::resumption::{CallbackAction, ResumptionToken};
use crate::domain::webhook::DialOutcome;
use crate::{CallFlowError, CallFlowResult};

/// Operator request to move a bridged call to a new destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Destination of the new segment
    pub target: String,
    /// Operator performing the transfer
    pub initiated_by: String,
    /// Free-form reason
    #[serde(default)]
    pub reason: Option<String>,
}

/// Segment bookkeeping after a transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    /// Transferred call
    pub call_id: CallId,
    /// Segment that was closed
    pub previous_segment: u32,
    /// Segment that was opened
    pub segment: u32,
    /// Conference of the new segment
    pub conference_name: String,
}

/// Recording flag of the target stored for `segment`, else the route's flag
fn recording_policy(record: &CallRecord, segment: u32) -> bool {
    record
        .execution
        .pending_target
        .as_ref()
        .filter(|target| target.segment == segment)
        .map_or(record.record_calls, |target| target.record || record.record_calls)
}

/// Moves bridged calls between segments
pub struct TransferCoordinator {
    deps: EngineDependencies,
    conference: Arc<ConferenceOrchestrator>,
    settings: Arc<EngineSettings>,
    guard: CallGuard,
}

impl TransferCoordinator {
    /// Create a coordinator sharing the engine's collaborators
    pub fn new(
        deps: EngineDependencies,
        conference: Arc<ConferenceOrchestrator>,
        settings: Arc<EngineSettings>,
        guard: CallGuard,
    ) -> Self {
        Self {
            deps,
            conference,
            settings,
            guard,
        }
    }

    /// Transfer a bridged call to `request.target`
    pub async fn transfer(
        &self,
        call_id: &CallId,
        request: &TransferRequest,
    ) -> CallFlowResult<TransferResult> {
        let target = request.target.trim();
        if target.is_empty() {
            return Err(CallFlowError::Validation("transfer target is empty".to_string()));
        }
        if request.initiated_by.trim().is_empty() {
            return Err(CallFlowError::Validation(
                "transfer needs the initiating operator".to_string(),
            ));
        }

        let _lock = self.guard.lock(call_id).await;
        let record = self
            .deps
            .records
            .find_by_call_id(call_id)
            .await?
            .ok_or_else(|| CallFlowError::call_not_found(call_id))?;
        if record.status != CallStatus::Bridged {
            return Err(CallFlowError::InvalidState(format!(
                "call {} is {} and cannot be transferred",
                call_id,
                record.status.as_str()
            )));
        }

        let previous_segment = record.segment;
        let segment = previous_segment + 1;
        let conference_name = conference_name_for(call_id, segment);
        let now = self.deps.clock.now();

        let opened = CallSegment::open(segment, conference_name.clone(), now)
            .with_target(target)
            .initiated_by(request.initiated_by.clone(), request.reason.clone());
        let pending = PendingTarget::new(conference_name.clone(), segment, vec![target.to_string()])
            .record(recording_policy(&record, previous_segment));
        let mut patch = CallRecordPatch::new(now)
            .status(CallStatus::InProgress)
            .advance_segment(previous_segment, opened)
            .pending_target(pending);
        patch.resumption = Some(None);
        self.deps.records.update(call_id, patch).await?;

        let url = self.settings.callbacks.url(
            &ResumptionToken::new(CallbackAction::TransferJoin)
                .with_call(call_id)
                .with_segment(segment),
        );
        if let Err(err) = self.deps.carrier.redirect_call(call_id, &url).await {
            warn!(%call_id, previous_segment, error = %err, "Transfer redirect failed, restoring segment");
            let mut restore = CallRecordPatch::new(self.deps.clock.now())
                .status(CallStatus::Bridged)
                .rewind_to(previous_segment);
            restore.pending_target = Some(record.execution.pending_target.clone());
            restore.resumption = Some(record.execution.resumption.clone());
            if let Err(restore_err) = self.deps.records.update(call_id, restore).await {
                error!(%call_id, error = %restore_err, "Failed to restore call after transfer failure");
            }
            return Err(err);
        }

        info!(
            %call_id,
            previous_segment,
            segment,
            conference = %conference_name,
            initiated_by = %request.initiated_by,
            "Call transferred"
        );
        Ok(TransferResult {
            call_id: call_id.clone(),
            previous_segment,
            segment,
            conference_name,
        })
    }

    /// Document for the caller leg arriving from a transfer redirect
    pub async fn transfer_join_document(
        &self,
        call_id: &CallId,
        token: &ResumptionToken,
    ) -> CallFlowResult<ControlDocument> {
        let record = self
            .deps
            .records
            .find_by_call_id(call_id)
            .await?
            .ok_or_else(|| CallFlowError::call_not_found(call_id))?;
        if let Some(requested) = token.segment {
            if requested != record.segment {
                warn!(%call_id, requested, current = record.segment, "Transfer join for an old segment");
            }
        }
        let segment = record.segment;
        let action = self.settings.callbacks.url(
            &ResumptionToken::new(CallbackAction::TransferStatus).with_segment(segment),
        );
        let mut doc = ControlDocument::new();
        doc.push(Verb::Conference(self.conference.caller_join(
            call_id,
            segment,
            action,
            recording_policy(&record, segment),
        )));
        Ok(doc)
    }

    /// The caller left a transferred segment's conference
    pub async fn handle_transfer_status(
        &self,
        call_id: &CallId,
        token: &ResumptionToken,
        dial_status: Option<&str>,
    ) -> CallFlowResult<ControlDocument> {
        let outcome = DialOutcome::parse(dial_status);
        info!(%call_id, segment = ?token.segment, ?outcome, "Transferred segment finished");
        let now = self.deps.clock.now();
        if outcome == DialOutcome::Completed {
            let patch = CallRecordPatch::new(now)
                .status(CallStatus::Completed)
                .clear_execution();
            self.deps.records.update(call_id, patch).await?;
            return Ok(ControlDocument::hangup_only());
        }
        let patch = CallRecordPatch::new(now).clear_execution();
        self.deps.records.update(call_id, patch).await?;
        Ok(ControlDocument::goodbye(&self.settings.transfer_failed_message))
    }
}
