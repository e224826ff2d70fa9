//! Step interpreter
//!
//! Executes flow steps starting at a cursor and produces the control document
//! for the current webhook. Steps that finish without talking to the carrier
//! (tags, schedules) run inline and the walk continues; steps that need the
//! caller or the carrier (greetings, menus, dials, voicemail) end the document
//! with a verb that brings the carrier back through a callback URL.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::conference::{conference_name_for, ConferenceOrchestrator};
use super::settings::{EngineSettings, SharedClock};
use crate::domain::arena::{BranchKey, Cursor, FlowArena};
use crate::domain::call_record::{
    CallContext, CallRecordPatch, CallStatus, PendingTarget, Resumption,
};
use crate::domain::control::{prompt_verb, ControlDocument, Gather, Record, Verb};
use crate::domain::flow_definition::{CallFlow, CallFlowStep, Prompt, StepAction};
use crate::domain::repository::CallRecordRepository;
use crate::domain::resumption::{CallbackAction, ResumptionToken};
use crate::domain::schedule::{evaluate_schedule, parse_timezone};
use crate::{CallFlowError, CallFlowResult};

/// How control leaves a step
enum Transition {
    /// Keep executing at another step in the same webhook
    Continue(Cursor),
    /// The document is complete
    Yield,
}

/// Destinations to bridge the caller to
struct BridgePlan {
    destinations: Vec<String>,
    timeout_secs: u32,
    record: bool,
    round_robin: Option<RoundRobinAttempt>,
}

struct RoundRobinAttempt {
    attempt: usize,
    destinations: Vec<String>,
}

/// Turns flow steps into control documents
pub struct StepInterpreter {
    records: Arc<dyn CallRecordRepository>,
    conference: Arc<ConferenceOrchestrator>,
    settings: Arc<EngineSettings>,
    clock: SharedClock,
}

impl StepInterpreter {
    /// Create a new interpreter
    pub fn new(
        records: Arc<dyn CallRecordRepository>,
        conference: Arc<ConferenceOrchestrator>,
        settings: Arc<EngineSettings>,
        clock: SharedClock,
    ) -> Self {
        Self {
            records,
            conference,
            settings,
            clock,
        }
    }

    /// Execute steps from `cursor` until one needs a carrier round trip.
    ///
    /// Never fails: a step that cannot be executed ends the document with a
    /// hangup, and running off the end of a block says goodbye.
    pub async fn execute_step(
        &self,
        flow: &CallFlow,
        cursor: Cursor,
        ctx: &CallContext,
    ) -> ControlDocument {
        let arena = FlowArena::new(&flow.steps);
        let mut ctx = ctx.clone();
        let mut doc = ControlDocument::new();
        let mut cursor = cursor;

        // Inline steps only move forward or into a deeper block.
        for _ in 0..=arena.step_count() {
            let step = match arena.step(cursor) {
                Some(step) => step,
                None => {
                    debug!(call_id = %ctx.call_id, block = cursor.block.0, index = cursor.index, "End of steps");
                    self.say_goodbye(&mut doc);
                    return doc;
                }
            };
            debug!(
                call_id = %ctx.call_id,
                step_id = %step.id,
                step_type = step.action.type_name(),
                block = cursor.block.0,
                index = cursor.index,
                "Executing step"
            );
            match self.run_step(flow, &arena, step, cursor, &mut ctx, &mut doc).await {
                Ok(Transition::Continue(next)) => cursor = next,
                Ok(Transition::Yield) => return doc,
                Err(err) => {
                    error!(call_id = %ctx.call_id, step_id = %step.id, error = %err, "Step failed, hanging up");
                    doc.hangup();
                    return doc;
                }
            }
        }

        error!(call_id = %ctx.call_id, "Step walk did not terminate, hanging up");
        doc.hangup();
        doc
    }

    /// Execute the remainder of a nested block.
    ///
    /// Dials reached from here resume through the nested dial-status callback.
    pub async fn execute_nested_steps(
        &self,
        flow: &CallFlow,
        cursor: Cursor,
        ctx: &CallContext,
    ) -> ControlDocument {
        self.execute_step(flow, cursor, ctx).await
    }

    /// Bridge the caller straight to one destination, outside any flow
    pub async fn dial_direct(&self, ctx: &CallContext, destination: &str) -> ControlDocument {
        let mut doc = ControlDocument::new();
        let plan = BridgePlan {
            destinations: vec![destination.to_string()],
            timeout_secs: 30,
            record: ctx.record_calls,
            round_robin: None,
        };
        self.bridge(None, Cursor::root(0), ctx, plan, &mut doc).await;
        doc
    }

    /// Ring attempt `attempt` of a round-robin step
    pub async fn ring_round_robin(
        &self,
        flow: &CallFlow,
        cursor: Cursor,
        ctx: &CallContext,
        attempt: usize,
        destinations: Vec<String>,
    ) -> ControlDocument {
        let arena = FlowArena::new(&flow.steps);
        let (timeout_secs, record) = match arena.step(cursor).map(|step| &step.action) {
            Some(StepAction::RoundRobin(config)) => (config.timeout_secs, config.record),
            _ => (20, false),
        };
        let mut doc = ControlDocument::new();
        match destinations.get(attempt).cloned() {
            Some(destination) => {
                let plan = BridgePlan {
                    destinations: vec![destination],
                    timeout_secs,
                    record: record || ctx.record_calls || flow.record_calls,
                    round_robin: Some(RoundRobinAttempt {
                        attempt,
                        destinations,
                    }),
                };
                self.bridge(Some(flow), cursor, ctx, plan, &mut doc).await;
            }
            None => {
                warn!(call_id = %ctx.call_id, attempt, "Round robin attempt out of range");
                doc.hangup();
            }
        }
        doc
    }

    /// Put the caller back into the conference of an attempt already dispatched
    pub fn rejoin_round_robin(
        &self,
        ctx: &CallContext,
        cursor: Cursor,
        attempt: usize,
        record: bool,
    ) -> ControlDocument {
        let url = self.settings.callbacks.url(
            &ResumptionToken::at(CallbackAction::RoundRobin, cursor).with_attempt(attempt),
        );
        let mut doc = ControlDocument::new();
        doc.push(Verb::Conference(self.conference.caller_join(
            &ctx.call_id,
            ctx.segment,
            url,
            record,
        )));
        doc
    }

    async fn run_step(
        &self,
        flow: &CallFlow,
        arena: &FlowArena<'_>,
        step: &CallFlowStep,
        cursor: Cursor,
        ctx: &mut CallContext,
        doc: &mut ControlDocument,
    ) -> CallFlowResult<Transition> {
        let callbacks = &self.settings.callbacks;

        match &step.action {
            StepAction::Greeting(greeting) => {
                doc.prompt(&greeting.message);
                doc.redirect(callbacks.url(&ResumptionToken::at(CallbackAction::Next, cursor.next())));
                Ok(Transition::Yield)
            }
            StepAction::Dial(dial) => {
                let plan = BridgePlan {
                    destinations: vec![dial.destination.clone()],
                    timeout_secs: dial.timeout_secs,
                    record: dial.record || ctx.record_calls || flow.record_calls,
                    round_robin: None,
                };
                self.bridge(Some(flow), cursor, ctx, plan, doc).await;
                Ok(Transition::Yield)
            }
            StepAction::Simulcall(simulcall) => {
                let plan = BridgePlan {
                    destinations: simulcall.destinations.clone(),
                    timeout_secs: simulcall.timeout_secs,
                    record: simulcall.record || ctx.record_calls || flow.record_calls,
                    round_robin: None,
                };
                self.bridge(Some(flow), cursor, ctx, plan, doc).await;
                Ok(Transition::Yield)
            }
            StepAction::RoundRobin(round_robin) => {
                let first = round_robin.destinations.first().cloned().ok_or_else(|| {
                    CallFlowError::MalformedStep {
                        step_id: step.id.clone(),
                        reason: "round robin without destinations".to_string(),
                    }
                })?;
                let plan = BridgePlan {
                    destinations: vec![first],
                    timeout_secs: round_robin.timeout_secs,
                    record: round_robin.record || ctx.record_calls || flow.record_calls,
                    round_robin: Some(RoundRobinAttempt {
                        attempt: 0,
                        destinations: round_robin.destinations.clone(),
                    }),
                };
                self.bridge(Some(flow), cursor, ctx, plan, doc).await;
                Ok(Transition::Yield)
            }
            StepAction::Menu(menu) => {
                let url = callbacks.url(&ResumptionToken::at(CallbackAction::Menu, cursor));
                doc.push(Verb::Gather(Gather {
                    action: url.clone(),
                    num_digits: Some(menu.num_digits),
                    timeout_secs: menu.timeout_secs,
                    finish_on_key: None,
                    prompt: prompt_verb(&menu.prompt).into_iter().collect(),
                }));
                // No input falls through the gather to the same handler without digits.
                doc.redirect(url);
                Ok(Transition::Yield)
            }
            StepAction::Schedule(schedule) => {
                let tz_name = schedule
                    .timezone
                    .as_deref()
                    .or(flow.timezone.as_deref())
                    .unwrap_or(&self.settings.default_timezone);
                let tz = parse_timezone(tz_name).map_err(|err| CallFlowError::MalformedStep {
                    step_id: step.id.clone(),
                    reason: err.to_string(),
                })?;
                let branch = match evaluate_schedule(self.clock.now(), tz, &schedule.branches) {
                    Some(position) => {
                        info!(call_id = %ctx.call_id, step_id = %step.id, branch = %schedule.branches[position].name, "Schedule matched");
                        arena.child(cursor, &BranchKey::ScheduleBranch(position))
                    }
                    None => {
                        info!(call_id = %ctx.call_id, step_id = %step.id, "No schedule branch matched");
                        arena.child(cursor, &BranchKey::ScheduleFallback)
                    }
                };
                Ok(Transition::Continue(
                    branch.map(Cursor::start_of).unwrap_or_else(|| cursor.next()),
                ))
            }
            StepAction::KeypadEntry(keypad) => {
                let url = callbacks.url(
                    &ResumptionToken::at(CallbackAction::Keypad, cursor).with_var(&keypad.variable),
                );
                doc.push(Verb::Gather(Gather {
                    action: url.clone(),
                    num_digits: Some(keypad.max_digits),
                    timeout_secs: keypad.timeout_secs,
                    finish_on_key: Some('#'),
                    prompt: prompt_verb(&keypad.prompt).into_iter().collect(),
                }));
                doc.redirect(url);
                Ok(Transition::Yield)
            }
            StepAction::Tag(tag) => {
                let patch = CallRecordPatch::new(self.clock.now()).add_tag(&tag.label);
                if let Err(err) = self.records.update(&ctx.call_id, patch).await {
                    warn!(call_id = %ctx.call_id, tag = %tag.label, error = %err, "Failed to tag call");
                }
                if !ctx.tags.contains(&tag.label) {
                    ctx.tags.push(tag.label.clone());
                }
                Ok(Transition::Continue(cursor.next()))
            }
            StepAction::Voicemail(voicemail) => {
                let greeting = voicemail
                    .greeting
                    .clone()
                    .filter(|greeting| !greeting.is_empty())
                    .unwrap_or_else(|| Prompt::text(self.settings.voicemail_greeting.clone()));
                doc.prompt(&greeting);
                doc.push(Verb::Record(Record {
                    action: callbacks.action(CallbackAction::VoicemailComplete),
                    max_length_secs: voicemail
                        .max_length_secs
                        .min(self.settings.voicemail_max_secs)
                        .max(1),
                    transcribe: voicemail.transcribe,
                    transcribe_callback: voicemail
                        .transcribe
                        .then(|| callbacks.action(CallbackAction::Transcription)),
                    play_beep: true,
                }));
                doc.hangup();
                Ok(Transition::Yield)
            }
            StepAction::Hangup(hangup) => {
                if let Some(message) = &hangup.message {
                    doc.prompt(message);
                }
                doc.hangup();
                let patch = CallRecordPatch::new(self.clock.now())
                    .status(CallStatus::Completed)
                    .clear_execution();
                if let Err(err) = self.records.update(&ctx.call_id, patch).await {
                    warn!(call_id = %ctx.call_id, error = %err, "Failed to mark call completed");
                }
                Ok(Transition::Yield)
            }
            StepAction::Malformed { reason, .. } => Err(CallFlowError::MalformedStep {
                step_id: step.id.clone(),
                reason: reason.clone(),
            }),
        }
    }

    /// Store the target and join the caller to the segment's conference
    async fn bridge(
        &self,
        flow: Option<&CallFlow>,
        cursor: Cursor,
        ctx: &CallContext,
        plan: BridgePlan,
        doc: &mut ControlDocument,
    ) {
        let callbacks = &self.settings.callbacks;
        let conference = conference_name_for(&ctx.call_id, ctx.segment);

        let mut target = PendingTarget::new(conference.clone(), ctx.segment, plan.destinations)
            .at(cursor)
            .timeout(plan.timeout_secs)
            .record(plan.record);
        let (action, resumption) = match plan.round_robin {
            Some(RoundRobinAttempt {
                attempt,
                destinations,
            }) => {
                target = target.attempt(attempt);
                (
                    ResumptionToken::at(CallbackAction::RoundRobin, cursor).with_attempt(attempt),
                    Resumption::PendingRoundRobin {
                        cursor,
                        attempt,
                        destinations,
                    },
                )
            }
            None if cursor.is_root() => (
                ResumptionToken::at(CallbackAction::DialStatus, cursor),
                Resumption::PendingDial { cursor },
            ),
            None => (
                ResumptionToken::new(CallbackAction::NestedDialStatus),
                Resumption::PendingNestedSteps {
                    cursor: cursor.next(),
                },
            ),
        };

        let revision = flow.map(CallFlow::revision);
        if let Err(err) = self
            .conference
            .store_target(&ctx.call_id, target, Some(resumption), revision.as_deref())
            .await
        {
            warn!(call_id = %ctx.call_id, %conference, error = %err, "Failed to store conference target");
        }

        info!(call_id = %ctx.call_id, %conference, "Joining caller to conference");
        doc.push(Verb::Conference(self.conference.caller_join(
            &ctx.call_id,
            ctx.segment,
            callbacks.url(&action),
            plan.record,
        )));
    }

    fn say_goodbye(&self, doc: &mut ControlDocument) {
        doc.say(self.settings.goodbye_message.clone()).hangup();
    }
}
