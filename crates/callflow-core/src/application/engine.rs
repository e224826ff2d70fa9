//! Call flow engine
//!
//! Entry point for every flow-related carrier webhook. Each handler loads the
//! call record and a fresh copy of the flow, resumes the interpreter where the
//! callback URL says, and always returns a control document: failures are
//! logged and answered with a hangup.

use std::sync::Arc;

use tracing::{error, info, warn};

use super::carrier::CarrierClient;
use super::conference::{conference_name_for, ConferenceOrchestrator};
use super::guard::CallGuard;
use super::interpreter::StepInterpreter;
use super::settings::{EngineSettings, SharedClock};
use super::transcription::{ResegmentSummary, TranscriptionSegmenter};
use super::transfer::{TransferCoordinator, TransferRequest, TransferResult};
use crate::domain::arena::{BranchKey, Cursor, FlowArena};
use crate::domain::call_record::{
    CallContext, CallDirection, CallId, CallRecord, CallRecordPatch, CallStatus, CallTranscript,
    Resumption, Voicemail,
};
use crate::domain::control::ControlDocument;
use crate::domain::flow_definition::{CallFlow, FlowId, StepAction, TenantId};
use crate::domain::repository::{
    AccountDirectory, CallFlowRepository, CallRecordRepository, NumberRouting,
};
use crate::domain::resumption::ResumptionToken;
use crate::domain::webhook::{DialOutcome, WebhookParams};
use crate::{CallFlowError, CallFlowResult};

/// Collaborators shared by the engine, transfers and segmentation
#[derive(Clone)]
pub struct EngineDependencies {
    /// Flow definitions
    pub flows: Arc<dyn CallFlowRepository>,
    /// Call records
    pub records: Arc<dyn CallRecordRepository>,
    /// Number to tenant routing
    pub routing: Arc<dyn NumberRouting>,
    /// Account id lookups
    pub accounts: Arc<dyn AccountDirectory>,
    /// Carrier REST client
    pub carrier: Arc<dyn CarrierClient>,
    /// Time source
    pub clock: SharedClock,
}

/// Drives call flows from carrier webhooks
pub struct CallFlowEngine {
    deps: EngineDependencies,
    settings: Arc<EngineSettings>,
    conference: Arc<ConferenceOrchestrator>,
    interpreter: StepInterpreter,
    transfers: TransferCoordinator,
    segmenter: TranscriptionSegmenter,
}

impl CallFlowEngine {
    /// Create a new engine
    pub fn new(deps: EngineDependencies, settings: Arc<EngineSettings>) -> Self {
        let conference = Arc::new(ConferenceOrchestrator::new(
            deps.records.clone(),
            deps.accounts.clone(),
            deps.carrier.clone(),
            settings.clone(),
            deps.clock.clone(),
        ));
        let interpreter = StepInterpreter::new(
            deps.records.clone(),
            conference.clone(),
            settings.clone(),
            deps.clock.clone(),
        );
        let guard = CallGuard::new();
        let transfers = TransferCoordinator::new(
            deps.clone(),
            conference.clone(),
            settings.clone(),
            guard.clone(),
        );
        let segmenter = TranscriptionSegmenter::new(deps.records.clone(), guard, deps.clock.clone());
        Self {
            deps,
            settings,
            conference,
            interpreter,
            transfers,
            segmenter,
        }
    }

    /// Conference orchestrator shared with the webhook layer
    pub fn conference(&self) -> Arc<ConferenceOrchestrator> {
        self.conference.clone()
    }

    /// Step interpreter
    pub fn interpreter(&self) -> &StepInterpreter {
        &self.interpreter
    }

    /// Engine settings
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// New inbound call: route the dialled number and start its flow
    pub async fn handle_inbound(&self, params: &WebhookParams) -> ControlDocument {
        let call_id = params.call_id();
        let result = self.inbound(params).await;
        self.or_hangup(&call_id, "inbound", result)
    }

    /// New outbound call: run `flow_id`, or bridge straight to `To` without one
    pub async fn handle_outbound(
        &self,
        params: &WebhookParams,
        tenant_id: TenantId,
        flow_id: Option<FlowId>,
    ) -> ControlDocument {
        let call_id = params.call_id();
        let result = self.outbound(params, tenant_id, flow_id).await;
        self.or_hangup(&call_id, "outbound", result)
    }

    /// Run a flow from its first step
    pub async fn start_call_flow(&self, flow: &CallFlow, ctx: &CallContext) -> ControlDocument {
        info!(call_id = %ctx.call_id, flow_id = %flow.id, steps = flow.steps.len(), "Starting call flow");
        let patch = CallRecordPatch::new(self.deps.clock.now()).flow_revision(flow.revision());
        if let Err(err) = self.deps.records.update(&ctx.call_id, patch).await {
            warn!(call_id = %ctx.call_id, error = %err, "Failed to stamp flow revision");
        }
        self.interpreter.execute_step(flow, Cursor::root(0), ctx).await
    }

    /// Continue at the step named by the callback
    pub async fn continue_flow(&self, call_id: &CallId, token: &ResumptionToken) -> ControlDocument {
        let result: CallFlowResult<ControlDocument> = async {
            let (record, flow) = self.load(call_id).await?;
            let cursor = require_cursor(token)?;
            Ok::<_, CallFlowError>(
                self.interpreter.execute_step(&flow, cursor, &record.context()).await,
            )
        }
        .await;
        self.or_hangup(call_id, "continue", result)
    }

    /// Route a menu selection to its option, the invalid branch, or a hangup
    pub async fn handle_menu_selection(
        &self,
        call_id: &CallId,
        token: &ResumptionToken,
        digits: Option<&str>,
    ) -> ControlDocument {
        let result = self.menu_selection(call_id, token, digits).await;
        self.or_hangup(call_id, "menu", result)
    }

    /// Outcome of a top-level dial or simulcall
    pub async fn handle_dial_status(
        &self,
        call_id: &CallId,
        token: &ResumptionToken,
        dial_status: Option<&str>,
    ) -> ControlDocument {
        let result: CallFlowResult<ControlDocument> = async {
            let (record, flow) = self.load(call_id).await?;
            let cursor = require_cursor(token)?;
            self.check_revision(&record, &flow);
            let outcome = DialOutcome::parse(dial_status);
            info!(%call_id, ?outcome, step = cursor.index, "Dial finished");
            if outcome == DialOutcome::Completed {
                return Ok(self.finish(call_id).await);
            }
            self.clear_execution(call_id).await;
            Ok::<_, CallFlowError>(self
                .interpreter
                .execute_step(&flow, cursor.next(), &record.context())
                .await)
        }
        .await;
        self.or_hangup(call_id, "dial status", result)
    }

    /// Outcome of a dial placed inside a nested block
    pub async fn handle_nested_dial_status(
        &self,
        call_id: &CallId,
        dial_status: Option<&str>,
    ) -> ControlDocument {
        let result: CallFlowResult<ControlDocument> = async {
            let (record, flow) = self.load(call_id).await?;
            self.check_revision(&record, &flow);
            let outcome = DialOutcome::parse(dial_status);
            info!(%call_id, ?outcome, "Nested dial finished");
            if outcome == DialOutcome::Completed {
                return Ok(self.finish(call_id).await);
            }
            let cursor = match &record.execution.resumption {
                Some(Resumption::PendingNestedSteps { cursor }) => *cursor,
                other => {
                    warn!(%call_id, resumption = ?other, "No nested continuation stored, hanging up");
                    return Ok(ControlDocument::hangup_only());
                }
            };
            self.clear_execution(call_id).await;
            Ok::<_, CallFlowError>(self
                .interpreter
                .execute_nested_steps(&flow, cursor, &record.context())
                .await)
        }
        .await;
        self.or_hangup(call_id, "nested dial status", result)
    }

    /// Outcome of a round-robin attempt: advance, or move past the step
    pub async fn handle_round_robin_status(
        &self,
        call_id: &CallId,
        token: &ResumptionToken,
        dial_status: Option<&str>,
    ) -> ControlDocument {
        let result = self.round_robin_status(call_id, token, dial_status).await;
        self.or_hangup(call_id, "round robin", result)
    }

    /// Store keypad digits in the step's variable and continue
    pub async fn handle_keypad_entry(
        &self,
        call_id: &CallId,
        token: &ResumptionToken,
        digits: Option<&str>,
    ) -> ControlDocument {
        let result: CallFlowResult<ControlDocument> = async {
            let (record, flow) = self.load(call_id).await?;
            let cursor = require_cursor(token)?;
            match (&token.var, digits) {
                (Some(variable), Some(digits)) => {
                    let patch = CallRecordPatch::new(self.deps.clock.now()).variable(variable, digits);
                    if let Err(err) = self.deps.records.update(call_id, patch).await {
                        warn!(%call_id, %variable, error = %err, "Failed to store keypad entry");
                    } else {
                        info!(%call_id, %variable, "Stored keypad entry");
                    }
                }
                (None, Some(_)) => warn!(%call_id, "Keypad callback without a variable name"),
                (_, None) => info!(%call_id, "No keypad input"),
            }
            Ok::<_, CallFlowError>(self
                .interpreter
                .execute_step(&flow, cursor.next(), &record.context())
                .await)
        }
        .await;
        self.or_hangup(call_id, "keypad", result)
    }

    /// Voicemail recorded: store it and end the call
    pub async fn handle_voicemail_complete(
        &self,
        call_id: &CallId,
        recording_url: Option<&str>,
    ) -> ControlDocument {
        let now = self.deps.clock.now();
        let mut patch = CallRecordPatch::new(now)
            .status(CallStatus::Voicemail)
            .clear_execution();
        match recording_url.filter(|url| !url.is_empty()) {
            Some(url) => {
                patch.voicemail = Some(Voicemail {
                    recording_url: url.to_string(),
                    transcription: None,
                    recorded_at: now,
                });
            }
            None => warn!(%call_id, "Voicemail completed without a recording"),
        }
        if let Err(err) = self.deps.records.update(call_id, patch).await {
            error!(%call_id, error = %err, "Failed to store voicemail");
        }
        ControlDocument::hangup_only()
    }

    /// Attach the carrier's transcription to the stored voicemail
    pub async fn handle_voicemail_transcription(
        &self,
        call_id: &CallId,
        text: &str,
    ) -> CallFlowResult<()> {
        let mut patch = CallRecordPatch::new(self.deps.clock.now());
        patch.voicemail_transcription = Some(text.to_string());
        self.deps.records.update(call_id, patch).await?;
        Ok(())
    }

    /// Attach a finished conference recording to its segment
    pub async fn handle_recording_status(
        &self,
        token: &ResumptionToken,
        recording_url: &str,
    ) -> CallFlowResult<()> {
        let (call_id, segment) = match (&token.call, token.segment) {
            (Some(call_id), Some(segment)) => (call_id, segment),
            _ => {
                return Err(CallFlowError::Validation(
                    "recording callback without call and segment".to_string(),
                ))
            }
        };
        let mut patch = CallRecordPatch::new(self.deps.clock.now());
        patch.segment_recording = Some((segment, recording_url.to_string()));
        self.deps.records.update(call_id, patch).await?;
        info!(%call_id, segment, "Stored segment recording");
        Ok(())
    }

    /// Carrier status callback for the caller leg
    pub async fn handle_call_status(&self, call_id: &CallId, status: &str) -> CallFlowResult<()> {
        let terminal = match status.trim().to_ascii_lowercase().as_str() {
            "completed" => CallStatus::Completed,
            "busy" | "failed" | "no-answer" | "canceled" => CallStatus::Failed,
            _ => return Ok(()),
        };
        let record = match self.deps.records.find_by_call_id(call_id).await? {
            Some(record) => record,
            None => {
                info!(%call_id, %status, "Status for unknown call");
                return Ok(());
            }
        };
        let mut patch = CallRecordPatch::new(self.deps.clock.now()).clear_execution();
        if !record.status.is_terminal() {
            patch.status = Some(terminal);
        }
        patch.close_segment = Some(record.segment);
        self.deps.records.update(call_id, patch).await?;
        info!(%call_id, %status, "Call ended");
        Ok(())
    }

    /// Move a bridged call to a new target in a new segment
    pub async fn transfer_call(
        &self,
        call_id: &CallId,
        request: &TransferRequest,
    ) -> CallFlowResult<TransferResult> {
        self.transfers.transfer(call_id, request).await
    }

    /// Caller leg arriving from a transfer redirect
    pub async fn handle_transfer_join(
        &self,
        call_id: &CallId,
        token: &ResumptionToken,
    ) -> ControlDocument {
        let result = self.transfers.transfer_join_document(call_id, token).await;
        self.or_hangup(call_id, "transfer join", result)
    }

    /// End of a transferred segment
    pub async fn handle_transfer_status(
        &self,
        call_id: &CallId,
        token: &ResumptionToken,
        dial_status: Option<&str>,
    ) -> ControlDocument {
        let result = self
            .transfers
            .handle_transfer_status(call_id, token, dial_status)
            .await;
        self.or_hangup(call_id, "transfer status", result)
    }

    /// Split a call's transcript across its segments
    pub async fn resegment_transcription(&self, call_id: &CallId) -> CallFlowResult<usize> {
        self.segmenter.resegment(call_id).await
    }

    /// Re-segment every transferred call of a tenant
    pub async fn resegment_all_transcriptions(
        &self,
        tenant_id: &TenantId,
    ) -> CallFlowResult<ResegmentSummary> {
        self.segmenter.resegment_all(tenant_id).await
    }

    /// Current record of a call
    pub async fn call_record(&self, call_id: &CallId) -> CallFlowResult<CallRecord> {
        self.deps
            .records
            .find_by_call_id(call_id)
            .await?
            .ok_or_else(|| CallFlowError::call_not_found(call_id))
    }

    /// Store the full-call transcript
    pub async fn store_transcript(
        &self,
        call_id: &CallId,
        transcript: CallTranscript,
    ) -> CallFlowResult<CallRecord> {
        let mut patch = CallRecordPatch::new(self.deps.clock.now());
        patch.transcript = Some(transcript);
        self.deps.records.update(call_id, patch).await
    }

    async fn inbound(&self, params: &WebhookParams) -> CallFlowResult<ControlDocument> {
        let call_id = require_call_id(params)?;
        let route = match self.deps.routing.resolve_number(&params.to).await? {
            Some(route) => route,
            None => {
                warn!(%call_id, to = %params.to, "Dialled number is not routed");
                return Ok(ControlDocument::goodbye(&self.settings.not_in_service_message));
            }
        };

        let mut record = CallRecord::new(
            call_id.clone(),
            route.tenant_id,
            CallDirection::Inbound,
            params.from.clone(),
            params.to.clone(),
            conference_name_for(&call_id, 0),
            self.deps.clock.now(),
        );
        record.phone_number_id = Some(route.phone_number_id);
        record.flow_id = route.flow_id;
        record.record_calls = route.record_calls;
        let record = self.deps.records.create(record).await?;
        info!(%call_id, tenant_id = %record.tenant_id, from = %record.from, "Inbound call");

        let flow = self.load_flow(&record).await?;
        Ok(self.start_call_flow(&flow, &record.context()).await)
    }

    async fn outbound(
        &self,
        params: &WebhookParams,
        tenant_id: TenantId,
        flow_id: Option<FlowId>,
    ) -> CallFlowResult<ControlDocument> {
        let call_id = require_call_id(params)?;
        let mut record = CallRecord::new(
            call_id.clone(),
            tenant_id,
            CallDirection::Outbound,
            params.from.clone(),
            params.to.clone(),
            conference_name_for(&call_id, 0),
            self.deps.clock.now(),
        );
        record.flow_id = flow_id;
        let record = self.deps.records.create(record).await?;
        info!(%call_id, tenant_id = %record.tenant_id, to = %record.to, "Outbound call");

        if record.flow_id.is_some() {
            let flow = self.load_flow(&record).await?;
            return Ok(self.start_call_flow(&flow, &record.context()).await);
        }
        if record.to.trim().is_empty() {
            return Err(CallFlowError::Validation(
                "outbound call without a destination".to_string(),
            ));
        }
        Ok(self.interpreter.dial_direct(&record.context(), &record.to).await)
    }

    async fn menu_selection(
        &self,
        call_id: &CallId,
        token: &ResumptionToken,
        digits: Option<&str>,
    ) -> CallFlowResult<ControlDocument> {
        let (record, flow) = self.load(call_id).await?;
        let cursor = require_cursor(token)?;
        let arena = FlowArena::new(&flow.steps);
        match arena.step(cursor).map(|step| &step.action) {
            Some(StepAction::Menu(_)) => {}
            _ => {
                return Err(CallFlowError::InvalidState(format!(
                    "no menu at block {} step {}",
                    cursor.block.0, cursor.index
                )))
            }
        }

        let option = digits.and_then(|d| arena.child(cursor, &BranchKey::MenuOption(d.to_string())));
        let branch = match option {
            Some(block) => {
                info!(%call_id, digits = digits.unwrap_or_default(), "Menu option selected");
                Some(block)
            }
            None => {
                info!(%call_id, digits = digits.unwrap_or_default(), "Invalid or missing menu input");
                arena.child(cursor, &BranchKey::MenuInvalid)
            }
        };
        match branch {
            Some(block) => Ok(self
                .interpreter
                .execute_nested_steps(&flow, Cursor::start_of(block), &record.context())
                .await),
            None => Ok(ControlDocument::hangup_only()),
        }
    }

    async fn round_robin_status(
        &self,
        call_id: &CallId,
        token: &ResumptionToken,
        dial_status: Option<&str>,
    ) -> CallFlowResult<ControlDocument> {
        let (record, flow) = self.load(call_id).await?;
        let cursor = require_cursor(token)?;
        let attempt = token.attempt.unwrap_or(0);
        self.check_revision(&record, &flow);

        let outcome = DialOutcome::parse(dial_status);
        info!(%call_id, attempt, ?outcome, "Round robin attempt finished");
        if outcome == DialOutcome::Completed {
            return Ok(self.finish(call_id).await);
        }

        let stored = match &record.execution.resumption {
            Some(Resumption::PendingRoundRobin {
                cursor: stored_cursor,
                attempt: stored_attempt,
                destinations,
            }) if *stored_cursor == cursor => Some((*stored_attempt, destinations.clone())),
            _ => None,
        };
        if let Some((stored_attempt, _)) = &stored {
            if *stored_attempt > attempt {
                // Duplicate callback for an attempt that already advanced.
                warn!(%call_id, attempt, current = stored_attempt, "Stale round robin callback");
                let record_conference = record
                    .execution
                    .pending_target
                    .as_ref()
                    .map_or(record.record_calls, |t| t.record);
                return Ok(self.interpreter.rejoin_round_robin(
                    &record.context(),
                    cursor,
                    *stored_attempt,
                    record_conference,
                ));
            }
        }

        let destinations = match stored {
            Some((_, destinations)) => destinations,
            None => {
                let arena = FlowArena::new(&flow.steps);
                match arena.step(cursor).map(|step| &step.action) {
                    Some(StepAction::RoundRobin(config)) => config.destinations.clone(),
                    _ => {
                        return Err(CallFlowError::InvalidState(format!(
                            "no round robin at block {} step {}",
                            cursor.block.0, cursor.index
                        )))
                    }
                }
            }
        };

        let next = attempt + 1;
        if next < destinations.len() {
            info!(%call_id, attempt = next, destination = %destinations[next], "Trying next round robin destination");
            return Ok(self
                .interpreter
                .ring_round_robin(&flow, cursor, &record.context(), next, destinations)
                .await);
        }
        info!(%call_id, "Round robin exhausted");
        self.clear_execution(call_id).await;
        Ok(self
            .interpreter
            .execute_step(&flow, cursor.next(), &record.context())
            .await)
    }

    async fn load(&self, call_id: &CallId) -> CallFlowResult<(CallRecord, CallFlow)> {
        let record = self
            .deps
            .records
            .find_by_call_id(call_id)
            .await?
            .ok_or_else(|| CallFlowError::call_not_found(call_id))?;
        let flow = self.load_flow(&record).await?;
        Ok((record, flow))
    }

    /// Fresh copy of the call's flow; a missing flow behaves as an empty one
    async fn load_flow(&self, record: &CallRecord) -> CallFlowResult<CallFlow> {
        if let Some(flow_id) = &record.flow_id {
            if let Some(flow) = self.deps.flows.get_flow(&record.tenant_id, flow_id).await? {
                return Ok(flow);
            }
            warn!(call_id = %record.call_id, %flow_id, "Flow not found for call");
        }
        Ok(CallFlow::new("", &record.tenant_id.0, "", Vec::new()))
    }

    fn check_revision(&self, record: &CallRecord, flow: &CallFlow) {
        if let Some(stored) = &record.execution.flow_revision {
            if *stored != flow.revision() {
                warn!(call_id = %record.call_id, flow_id = %flow.id, "Flow changed while the call was waiting");
            }
        }
    }

    async fn clear_execution(&self, call_id: &CallId) {
        let patch = CallRecordPatch::new(self.deps.clock.now()).clear_execution();
        if let Err(err) = self.deps.records.update(call_id, patch).await {
            warn!(%call_id, error = %err, "Failed to clear execution state");
        }
    }

    async fn finish(&self, call_id: &CallId) -> ControlDocument {
        let patch = CallRecordPatch::new(self.deps.clock.now())
            .status(CallStatus::Completed)
            .clear_execution();
        if let Err(err) = self.deps.records.update(call_id, patch).await {
            warn!(%call_id, error = %err, "Failed to mark call completed");
        }
        ControlDocument::hangup_only()
    }

    fn or_hangup(
        &self,
        call_id: &CallId,
        operation: &str,
        result: CallFlowResult<ControlDocument>,
    ) -> ControlDocument {
        result.unwrap_or_else(|err| {
            error!(%call_id, operation, error = %err, "Webhook failed, hanging up");
            ControlDocument::hangup_only()
        })
    }
}

fn require_call_id(params: &WebhookParams) -> CallFlowResult<CallId> {
    if params.call_sid.trim().is_empty() {
        return Err(CallFlowError::Validation("webhook without CallSid".to_string()));
    }
    Ok(params.call_id())
}

fn require_cursor(token: &ResumptionToken) -> CallFlowResult<Cursor> {
    token.cursor().ok_or_else(|| {
        CallFlowError::Validation(format!("{} callback without a step", token.action))
    })
}
