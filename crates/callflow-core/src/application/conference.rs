//! Conference orchestration
//!
//! Every dial, simulcall, round-robin attempt and transfer bridges parties
//! through a conference named after the caller leg and the segment number.
//! The caller joins first; the destinations stored on the call record are
//! dialled when the carrier reports the conference has started, and their
//! outcomes are folded back into the caller's flow.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::carrier::{CarrierClient, DialLegRequest};
use super::settings::{EngineSettings, SharedClock};
use crate::domain::call_record::{
    CallId, CallRecord, CallRecordPatch, CallStatus, PendingTarget, Resumption,
};
use crate::domain::control::{ConferenceJoin, ControlDocument, Verb};
use crate::domain::flow_definition::TenantId;
use crate::domain::repository::{AccountDirectory, CallRecordRepository};
use crate::domain::resumption::{CallbackAction, ResumptionToken};
use crate::domain::webhook::DialOutcome;
use crate::{CallFlowError, CallFlowResult};

const CONFERENCE_PREFIX: &str = "call_";
const SEGMENT_SEPARATOR: &str = "_seg_";

/// Conference name for a call segment
pub fn conference_name_for(call_id: &CallId, segment: u32) -> String {
    format!("{}{}{}{}", CONFERENCE_PREFIX, call_id.0, SEGMENT_SEPARATOR, segment)
}

/// Recover the call and segment from a conference name
pub fn parse_conference_name(name: &str) -> Option<(CallId, u32)> {
    let rest = name.strip_prefix(CONFERENCE_PREFIX)?;
    let (call_id, segment) = rest.rsplit_once(SEGMENT_SEPARATOR)?;
    if call_id.is_empty() {
        return None;
    }
    Some((CallId(call_id.to_string()), segment.parse().ok()?))
}

/// A destination the carrier can ring
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dialable {
    /// Softphone or app identity
    Client(String),
    /// PSTN number
    Number(String),
}

impl Dialable {
    /// Address in the carrier's dial syntax
    pub fn address(&self) -> String {
        match self {
            Dialable::Client(identity) => format!("client:{}", identity),
            Dialable::Number(number) => number.clone(),
        }
    }
}

/// Conference lifecycle event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConferenceEventKind {
    /// First participant started the conference
    Start,
    /// Conference ended
    End,
    /// A participant joined
    ParticipantJoin,
    /// A participant left
    ParticipantLeave,
    /// Anything else the carrier reports
    Other,
}

impl ConferenceEventKind {
    /// Parse the carrier's event name
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "conference-start" | "start" => ConferenceEventKind::Start,
            "conference-end" | "end" => ConferenceEventKind::End,
            "participant-join" | "join" => ConferenceEventKind::ParticipantJoin,
            "participant-leave" | "leave" => ConferenceEventKind::ParticipantLeave,
            _ => ConferenceEventKind::Other,
        }
    }
}

/// A conference status callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConferenceEvent {
    /// What happened
    pub kind: ConferenceEventKind,
    /// Conference name
    pub conference: String,
    /// Leg the event is about, for participant events
    pub participant: Option<CallId>,
}

/// Bridges callers to destinations through per-segment conferences
pub struct ConferenceOrchestrator {
    records: Arc<dyn CallRecordRepository>,
    accounts: Arc<dyn AccountDirectory>,
    carrier: Arc<dyn CarrierClient>,
    settings: Arc<EngineSettings>,
    clock: SharedClock,
}

impl ConferenceOrchestrator {
    /// Create a new orchestrator
    pub fn new(
        records: Arc<dyn CallRecordRepository>,
        accounts: Arc<dyn AccountDirectory>,
        carrier: Arc<dyn CarrierClient>,
        settings: Arc<EngineSettings>,
        clock: SharedClock,
    ) -> Self {
        Self {
            records,
            accounts,
            carrier,
            settings,
            clock,
        }
    }

    /// Persist the destinations to dial once the conference starts
    pub async fn store_target(
        &self,
        call_id: &CallId,
        target: PendingTarget,
        resumption: Option<Resumption>,
        flow_revision: Option<&str>,
    ) -> CallFlowResult<CallRecord> {
        let conference = target.conference.clone();
        let mut patch = CallRecordPatch::new(self.clock.now()).pending_target(target);
        patch.conference_name = Some(conference);
        patch.resumption = Some(resumption);
        patch.flow_revision = flow_revision.map(str::to_string);
        self.records.update(call_id, patch).await
    }

    /// Caller-side join for a segment's conference
    pub fn caller_join(
        &self,
        call_id: &CallId,
        segment: u32,
        action_url: String,
        record: bool,
    ) -> ConferenceJoin {
        let callbacks = &self.settings.callbacks;
        let mut join = ConferenceJoin::named(conference_name_for(call_id, segment));
        join.action = Some(action_url);
        join.record = record;
        if record {
            join.recording_status_callback = Some(
                callbacks.url(
                    &ResumptionToken::new(CallbackAction::RecordingStatus)
                        .with_call(call_id)
                        .with_segment(segment),
                ),
            );
        }
        join.status_callback = Some(callbacks.action(CallbackAction::ConferenceStatus));
        join.wait_url = self.settings.hold_music_url.clone();
        join.end_on_exit = true;
        join
    }

    /// Document for an answered outbound leg: join the caller's conference
    pub fn callee_document(&self, token: &ResumptionToken) -> CallFlowResult<ControlDocument> {
        let (call_id, segment) = match (&token.call, token.segment) {
            (Some(call_id), Some(segment)) => (call_id, segment),
            _ => {
                return Err(CallFlowError::Validation(
                    "join callback without call and segment".to_string(),
                ))
            }
        };
        let mut join = ConferenceJoin::named(conference_name_for(call_id, segment));
        join.end_on_exit = true;
        let mut doc = ControlDocument::new();
        doc.push(Verb::Conference(join));
        Ok(doc)
    }

    /// Turn a flow destination into something the carrier can ring.
    ///
    /// Identities containing `@` are clients, UUIDs are account ids resolved
    /// to `{tenant}:{email}`, anything else is a phone number. An account id
    /// without an email resolves to `None`.
    pub async fn resolve_destination(
        &self,
        tenant_id: &TenantId,
        destination: &str,
    ) -> CallFlowResult<Option<Dialable>> {
        let destination = destination.trim();
        if destination.is_empty() {
            return Ok(None);
        }
        if destination.contains('@') {
            return Ok(Some(Dialable::Client(destination.to_string())));
        }
        if Uuid::parse_str(destination).is_ok() {
            return match self.accounts.lookup_account_email(destination).await? {
                Some(email) => Ok(Some(Dialable::Client(format!("{}:{}", tenant_id, email)))),
                None => {
                    warn!(%tenant_id, account_id = %destination, "Account has no email, skipping destination");
                    Ok(None)
                }
            };
        }
        Ok(Some(Dialable::Number(destination.to_string())))
    }

    /// React to a conference status callback
    pub async fn handle_conference_event(&self, event: ConferenceEvent) -> CallFlowResult<()> {
        let (call_id, segment) = parse_conference_name(&event.conference).ok_or_else(|| {
            CallFlowError::Validation(format!("unrecognised conference '{}'", event.conference))
        })?;
        let record = self
            .records
            .find_by_call_id(&call_id)
            .await?
            .ok_or_else(|| CallFlowError::call_not_found(&call_id))?;

        match event.kind {
            ConferenceEventKind::Start => {
                let dialled = self.dispatch_pending(record, &event.conference).await?;
                debug!(%call_id, segment, dialled, "Conference started");
            }
            ConferenceEventKind::ParticipantJoin => {
                let participant = match event.participant {
                    Some(participant) if participant != call_id => participant,
                    _ => return Ok(()),
                };
                self.mark_bridged(record, &event.conference, &participant).await?;
            }
            ConferenceEventKind::End => {
                let current = record.conference_name.as_deref() == Some(event.conference.as_str());
                if current && record.status == CallStatus::Bridged {
                    let patch =
                        CallRecordPatch::new(self.clock.now()).status(CallStatus::InProgress);
                    self.records.update(&call_id, patch).await?;
                    info!(%call_id, segment, "Conference ended, call no longer bridged");
                }
            }
            ConferenceEventKind::ParticipantLeave | ConferenceEventKind::Other => {
                debug!(%call_id, segment, kind = ?event.kind, "Ignoring conference event");
            }
        }
        Ok(())
    }

    /// Dial the pending target of a conference, at most once.
    ///
    /// Returns the number of legs placed; zero when the target was already
    /// dispatched, belongs to another conference, or was never stored.
    pub async fn dispatch_pending(&self, record: CallRecord, conference: &str) -> CallFlowResult<usize> {
        let call_id = record.call_id.clone();
        let claimable = record
            .execution
            .pending_target
            .as_ref()
            .map_or(false, |t| t.conference == conference && t.dispatch_claim.is_none());
        if !claimable || record.status.is_terminal() {
            debug!(%call_id, %conference, "No pending target to dispatch");
            return Ok(0);
        }

        let claim = Uuid::new_v4().to_string();
        let mut patch = CallRecordPatch::new(self.clock.now());
        patch.dispatch_claim = Some((conference.to_string(), claim.clone()));
        let record = self.records.update(&call_id, patch).await?;
        let target = match record.execution.pending_target.clone() {
            Some(target) if target.dispatch_claim.as_deref() == Some(claim.as_str()) => target,
            _ => {
                debug!(%call_id, %conference, "Pending target claimed by another dispatcher");
                return Ok(0);
            }
        };

        let callbacks = &self.settings.callbacks;
        let answer_url = callbacks.url(
            &ResumptionToken::new(CallbackAction::Join)
                .with_call(&call_id)
                .with_segment(target.segment),
        );
        let mut status_token = ResumptionToken::new(CallbackAction::LegStatus)
            .with_call(&call_id)
            .with_segment(target.segment);
        status_token.attempt = target.attempt;
        let status_callback = callbacks.url(&status_token);
        let caller_id = self
            .settings
            .caller_id
            .clone()
            .unwrap_or_else(|| record.from.clone());

        let mut legs = Vec::new();
        let mut failed = 0;
        for destination in &target.destinations {
            let dialable = match self.resolve_destination(&record.tenant_id, destination).await {
                Ok(Some(dialable)) => dialable,
                Ok(None) => {
                    failed += 1;
                    continue;
                }
                Err(err) => {
                    warn!(%call_id, %destination, error = %err, "Failed to resolve destination");
                    failed += 1;
                    continue;
                }
            };
            let request = DialLegRequest {
                to: dialable.address(),
                from: caller_id.clone(),
                answer_url: answer_url.clone(),
                status_callback: status_callback.clone(),
                timeout_secs: target.timeout_secs,
            };
            match self.carrier.dial_leg(request).await {
                Ok(leg) => {
                    info!(%call_id, %conference, %leg, to = %dialable.address(), "Dialled leg");
                    legs.push(leg);
                }
                Err(err) => {
                    warn!(%call_id, %destination, error = %err, "Failed to dial leg");
                    failed += 1;
                }
            }
        }

        if !legs.is_empty() {
            let mut patch = CallRecordPatch::new(self.clock.now());
            patch.dispatched_legs = Some((conference.to_string(), legs.clone()));
            if let Err(err) = self.records.update(&call_id, patch).await {
                warn!(%call_id, error = %err, "Failed to record dialled legs");
            }
        }
        for _ in 0..failed {
            self.register_unanswered(&call_id, conference, target.attempt)
                .await?;
        }
        Ok(legs.len())
    }

    /// React to the status callback of an outbound leg
    pub async fn handle_leg_status(
        &self,
        token: &ResumptionToken,
        leg: &CallId,
        status: Option<&str>,
    ) -> CallFlowResult<()> {
        let outcome = DialOutcome::parse(status);
        let (call_id, segment) = match (&token.call, token.segment) {
            (Some(call_id), Some(segment)) => (call_id.clone(), segment),
            _ => {
                return Err(CallFlowError::Validation(
                    "leg status callback without call and segment".to_string(),
                ))
            }
        };
        if !outcome.is_unanswered() {
            debug!(%call_id, %leg, ?outcome, "Leg status");
            return Ok(());
        }
        info!(%call_id, %leg, ?outcome, attempt = ?token.attempt, "Leg ended unanswered");
        self.register_unanswered(&call_id, &conference_name_for(&call_id, segment), token.attempt)
            .await
    }

    /// Count an unanswered leg against the target of `conference` and
    /// round-robin `attempt`; legs of an earlier attempt are ignored
    async fn register_unanswered(
        &self,
        call_id: &CallId,
        conference: &str,
        attempt: Option<usize>,
    ) -> CallFlowResult<()> {
        let record = self
            .records
            .find_by_call_id(call_id)
            .await?
            .ok_or_else(|| CallFlowError::call_not_found(call_id))?;
        let current = record
            .execution
            .pending_target
            .as_ref()
            .map_or(false, |t| t.is_for(conference, attempt));
        if !current || record.status.is_terminal() || record.status == CallStatus::Bridged {
            debug!(%call_id, %conference, ?attempt, "Ignoring unanswered leg for inactive target");
            return Ok(());
        }

        let mut patch = CallRecordPatch::new(self.clock.now());
        patch.unanswered_leg = Some((conference.to_string(), attempt));
        let before = record
            .execution
            .pending_target
            .as_ref()
            .map_or(0, |t| t.unanswered_legs);
        let record = self.records.update(call_id, patch).await?;
        // Only the leg that completes the count redirects the caller.
        let exhausted = record
            .execution
            .pending_target
            .as_ref()
            .filter(|t| t.is_for(conference, attempt))
            .map_or(false, |t| t.all_unanswered() && t.unanswered_legs > before);
        if !exhausted {
            return Ok(());
        }

        let url = self.resume_url(&record);
        info!(%call_id, %conference, %url, "No destination answered, resuming caller");
        self.carrier.redirect_call(call_id, &url).await
    }

    /// Where to send the caller once every leg went unanswered
    fn resume_url(&self, record: &CallRecord) -> String {
        let callbacks = &self.settings.callbacks;
        let token = match &record.execution.resumption {
            Some(Resumption::PendingDial { cursor }) => {
                ResumptionToken::at(CallbackAction::DialStatus, *cursor)
            }
            Some(Resumption::PendingRoundRobin { cursor, attempt, .. }) => {
                ResumptionToken::at(CallbackAction::RoundRobin, *cursor).with_attempt(*attempt)
            }
            Some(Resumption::PendingNestedSteps { .. }) => {
                ResumptionToken::new(CallbackAction::NestedDialStatus)
            }
            None => ResumptionToken::new(CallbackAction::TransferStatus).with_segment(record.segment),
        };
        callbacks.url(&token)
    }

    async fn mark_bridged(
        &self,
        record: CallRecord,
        conference: &str,
        participant: &CallId,
    ) -> CallFlowResult<()> {
        let call_id = &record.call_id;
        if record.conference_name.as_deref() != Some(conference) || record.status.is_terminal() {
            return Ok(());
        }
        let patch = CallRecordPatch::new(self.clock.now()).status(CallStatus::Bridged);
        self.records.update(call_id, patch).await?;
        info!(%call_id, %conference, %participant, "Call bridged");

        // First answer wins: stop the other legs still ringing.
        let others: Vec<CallId> = record
            .execution
            .pending_target
            .iter()
            .filter(|t| t.conference == conference)
            .flat_map(|t| t.legs.iter())
            .filter(|leg| *leg != participant)
            .cloned()
            .collect();
        for leg in others {
            if let Err(err) = self.carrier.hangup_call(&leg).await {
                warn!(%call_id, %leg, error = %err, "Failed to cancel ringing leg");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conference_name_is_deterministic() {
        let call = CallId::new("CA0123");
        assert_eq!(conference_name_for(&call, 0), "call_CA0123_seg_0");
        assert_eq!(conference_name_for(&call, 0), conference_name_for(&call, 0));
        assert_ne!(conference_name_for(&call, 0), conference_name_for(&call, 1));
    }

    #[test]
    fn test_conference_name_parses_back() {
        let call = CallId::new("CA_with_seg_inside");
        let name = conference_name_for(&call, 12);
        assert_eq!(parse_conference_name(&name), Some((call, 12)));
        assert_eq!(parse_conference_name("room-42"), None);
        assert_eq!(parse_conference_name("call__seg_1"), None);
        assert_eq!(parse_conference_name("call_CA1_seg_x"), None);
    }

    #[test]
    fn test_dialable_address() {
        assert_eq!(Dialable::Client("acme:ann@example.com".into()).address(), "client:acme:ann@example.com");
        assert_eq!(Dialable::Number("+15551230000".into()).address(), "+15551230000");
    }

    #[test]
    fn test_event_kind_parsing() {
        assert_eq!(ConferenceEventKind::parse("conference-start"), ConferenceEventKind::Start);
        assert_eq!(ConferenceEventKind::parse("participant-join"), ConferenceEventKind::ParticipantJoin);
        assert_eq!(ConferenceEventKind::parse("conference-end"), ConferenceEventKind::End);
        assert_eq!(ConferenceEventKind::parse("announcement-end"), ConferenceEventKind::Other);
    }
}
