//! Call records
//!
//! The call record is the only state that survives between carrier callbacks.
//! It is never overwritten wholesale: every change is a [`CallRecordPatch`]
//! applied by the repository under its own atomicity guarantees.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::arena::Cursor;
use super::flow_definition::{FlowId, TenantId};

/// Carrier call identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallId(pub String);

impl CallId {
    /// Create from anything string-like
    pub fn new(id: impl Into<String>) -> Self {
        CallId(id.into())
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side started the call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallDirection {
    /// Caller dialled one of the tenant's numbers
    Inbound,
    /// Call placed on behalf of the tenant
    Outbound,
}

/// Lifecycle status of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    /// Running the flow or ringing a target
    InProgress,
    /// Caller and callee are in the same conference
    Bridged,
    /// Call ended normally
    Completed,
    /// Caller left a voicemail
    Voicemail,
    /// Call could not be completed
    Failed,
}

impl CallStatus {
    /// No further callbacks are expected
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CallStatus::Completed | CallStatus::Voicemail | CallStatus::Failed
        )
    }

    /// Storage representation
    pub fn as_str(self) -> &'static str {
        match self {
            CallStatus::InProgress => "in_progress",
            CallStatus::Bridged => "bridged",
            CallStatus::Completed => "completed",
            CallStatus::Voicemail => "voicemail",
            CallStatus::Failed => "failed",
        }
    }
}

/// One conference-bounded portion of a call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSegment {
    /// Segment number, starting at 0
    pub number: u32,
    /// Conference hosting the segment
    pub conference: String,
    /// Destination bridged in this segment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// When the segment began
    pub started_at: DateTime<Utc>,
    /// When the segment ended, open while `None`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Operator that created the segment through a transfer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiated_by: Option<String>,
    /// Transfer reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Conference recording for the segment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording_url: Option<String>,
    /// Transcript text covering the segment's time window
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

impl CallSegment {
    /// Open a segment
    pub fn open(number: u32, conference: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            number,
            conference: conference.into(),
            target: None,
            started_at,
            ended_at: None,
            initiated_by: None,
            reason: None,
            recording_url: None,
            transcript: None,
        }
    }

    /// Set the bridged destination
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Record who created the segment and why
    pub fn initiated_by(mut self, operator: impl Into<String>, reason: Option<String>) -> Self {
        self.initiated_by = Some(operator.into());
        self.reason = reason;
        self
    }
}

/// One utterance of a call transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    /// Seconds since the transcript start
    pub offset_secs: f64,
    /// Speaker label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    /// Spoken text
    pub text: String,
}

/// Full-call transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallTranscript {
    /// Wall-clock time of offset zero
    pub started_at: DateTime<Utc>,
    /// Utterances in any order
    #[serde(default)]
    pub entries: Vec<TranscriptEntry>,
}

impl CallTranscript {
    /// Absolute time of an entry
    pub fn entry_time(&self, entry: &TranscriptEntry) -> DateTime<Utc> {
        let millis = (entry.offset_secs * 1000.0).round() as i64;
        self.started_at + Duration::milliseconds(millis)
    }
}

/// Recorded voicemail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voicemail {
    /// Recording location
    pub recording_url: String,
    /// Transcription, filled in by a later callback
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcription: Option<String>,
    /// When the recording completed
    pub recorded_at: DateTime<Utc>,
}

/// Current layout version of [`ExecutionState`]
pub const EXECUTION_STATE_VERSION: u32 = 1;

fn execution_state_version() -> u32 {
    EXECUTION_STATE_VERSION
}

/// Destinations waiting to be dialled into a conference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTarget {
    /// Conference the destinations join
    pub conference: String,
    /// Segment the conference belongs to
    pub segment: u32,
    /// Destinations to ring when the conference starts
    pub destinations: Vec<String>,
    /// Step that stored the target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
    /// Round-robin attempt index
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<usize>,
    /// Ring timeout in seconds
    pub timeout_secs: u32,
    /// Record the conference
    #[serde(default)]
    pub record: bool,
    /// Claim taken by the dispatcher that dialled the destinations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatch_claim: Option<String>,
    /// When the destinations were dialled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatched_at: Option<DateTime<Utc>>,
    /// Outbound legs placed for the target
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub legs: Vec<CallId>,
    /// Legs that ended without answering
    #[serde(default)]
    pub unanswered_legs: u32,
}

impl PendingTarget {
    /// Target for a conference
    pub fn new(conference: impl Into<String>, segment: u32, destinations: Vec<String>) -> Self {
        Self {
            conference: conference.into(),
            segment,
            destinations,
            cursor: None,
            attempt: None,
            timeout_secs: 30,
            record: false,
            dispatch_claim: None,
            dispatched_at: None,
            legs: Vec::new(),
            unanswered_legs: 0,
        }
    }

    /// Step that stored the target
    pub fn at(mut self, cursor: Cursor) -> Self {
        self.cursor = Some(cursor);
        self
    }

    /// Round-robin attempt index
    pub fn attempt(mut self, attempt: usize) -> Self {
        self.attempt = Some(attempt);
        self
    }

    /// Ring timeout
    pub fn timeout(mut self, timeout_secs: u32) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Recording flag
    pub fn record(mut self, record: bool) -> Self {
        self.record = record;
        self
    }

    /// Whether the target was stored for `conference` and round-robin `attempt`
    pub fn is_for(&self, conference: &str, attempt: Option<usize>) -> bool {
        self.conference == conference && self.attempt == attempt
    }

    /// Whether every dialled leg ended unanswered
    pub fn all_unanswered(&self) -> bool {
        self.unanswered_legs as usize >= self.destinations.len().max(1)
    }
}

/// Where a suspended flow picks up again
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resumption {
    /// Waiting on a top-level dial or simulcall placed at `cursor`
    PendingDial {
        /// Dial step
        cursor: Cursor,
    },
    /// Waiting on a round-robin attempt
    PendingRoundRobin {
        /// Round-robin step
        cursor: Cursor,
        /// Attempt currently ringing
        attempt: usize,
        /// Full destination list captured when the step started
        destinations: Vec<String>,
    },
    /// Waiting on a dial inside a nested block; `cursor` is the next step to run
    PendingNestedSteps {
        /// First step after the dial
        cursor: Cursor,
    },
}

/// Interpreter bookkeeping persisted between callbacks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionState {
    /// Layout version
    #[serde(default = "execution_state_version")]
    pub schema_version: u32,
    /// Revision of the flow that wrote the state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_revision: Option<String>,
    /// Destinations to dial when the conference starts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_target: Option<PendingTarget>,
    /// Where to resume after the pending dial
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resumption: Option<Resumption>,
}

impl Default for ExecutionState {
    fn default() -> Self {
        Self {
            schema_version: EXECUTION_STATE_VERSION,
            flow_revision: None,
            pending_target: None,
            resumption: None,
        }
    }
}

/// Persistent record of one call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    /// Carrier call id of the caller leg
    pub call_id: CallId,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Tenant phone number that routed the call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number_id: Option<String>,
    /// Flow the call runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_id: Option<FlowId>,
    /// Inbound or outbound
    pub direction: CallDirection,
    /// Caller number
    pub from: String,
    /// Called number
    pub to: String,
    /// Lifecycle status
    pub status: CallStatus,
    /// Current segment number
    pub segment: u32,
    /// Conference of the current segment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conference_name: Option<String>,
    /// Recording policy
    #[serde(default)]
    pub record_calls: bool,
    /// Tags added by the flow
    #[serde(default)]
    pub tags: Vec<String>,
    /// Variables collected by keypad entry
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    /// Interpreter state
    #[serde(default)]
    pub execution: ExecutionState,
    /// Segments in order
    #[serde(default)]
    pub segments: Vec<CallSegment>,
    /// Full-call transcript
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<CallTranscript>,
    /// Voicemail left by the caller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voicemail: Option<Voicemail>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

impl CallRecord {
    /// New in-progress record with segment 0 open
    pub fn new(
        call_id: CallId,
        tenant_id: TenantId,
        direction: CallDirection,
        from: impl Into<String>,
        to: impl Into<String>,
        conference: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let conference = conference.into();
        Self {
            call_id,
            tenant_id,
            phone_number_id: None,
            flow_id: None,
            direction,
            from: from.into(),
            to: to.into(),
            status: CallStatus::InProgress,
            segment: 0,
            conference_name: Some(conference.clone()),
            record_calls: false,
            tags: Vec::new(),
            variables: BTreeMap::new(),
            execution: ExecutionState::default(),
            segments: vec![CallSegment::open(0, conference, now)],
            transcript: None,
            voicemail: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Number of transfers the call went through
    pub fn transfer_count(&self) -> usize {
        self.segments.len().saturating_sub(1)
    }

    /// Snapshot handed to the interpreter
    pub fn context(&self) -> CallContext {
        CallContext {
            call_id: self.call_id.clone(),
            tenant_id: self.tenant_id.clone(),
            phone_number_id: self.phone_number_id.clone(),
            flow_id: self.flow_id.clone(),
            from: self.from.clone(),
            to: self.to.clone(),
            direction: self.direction,
            tags: self.tags.clone(),
            record_calls: self.record_calls,
            segment: self.segment,
        }
    }
}

/// Call facts needed while executing steps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    /// Caller leg id
    pub call_id: CallId,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Tenant phone number
    pub phone_number_id: Option<String>,
    /// Flow being executed
    pub flow_id: Option<FlowId>,
    /// Caller number
    pub from: String,
    /// Called number
    pub to: String,
    /// Inbound or outbound
    pub direction: CallDirection,
    /// Tags so far
    pub tags: Vec<String>,
    /// Recording policy
    pub record_calls: bool,
    /// Current segment
    pub segment: u32,
}

/// Merge-patch for a call record
///
/// Unset fields leave the stored value alone. `Option<Option<_>>` fields
/// distinguish "leave" (`None`) from "clear" (`Some(None)`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallRecordPatch {
    /// New status
    pub status: Option<CallStatus>,
    /// New flow
    pub flow_id: Option<FlowId>,
    /// New segment number
    pub segment: Option<u32>,
    /// New conference name
    pub conference_name: Option<String>,
    /// Tags to add
    pub add_tags: Vec<String>,
    /// Variables to set
    pub variables: Vec<(String, String)>,
    /// Flow revision stamp
    pub flow_revision: Option<String>,
    /// Replace or clear the pending target
    pub pending_target: Option<Option<PendingTarget>>,
    /// Replace or clear the resumption state
    pub resumption: Option<Option<Resumption>>,
    /// Claim dispatch of the pending target for a conference
    pub dispatch_claim: Option<(String, String)>,
    /// Remember legs placed for the pending target of a conference
    pub dispatched_legs: Option<(String, Vec<CallId>)>,
    /// Count an unanswered leg against the pending target of a conference
    /// and round-robin attempt
    pub unanswered_leg: Option<(String, Option<usize>)>,
    /// Close a segment
    pub close_segment: Option<u32>,
    /// Append a segment
    pub open_segment: Option<CallSegment>,
    /// Drop later segments and make this one current and open again
    pub rewind_segment: Option<u32>,
    /// Attach a recording to a segment
    pub segment_recording: Option<(u32, String)>,
    /// Overwrite segment transcripts
    pub segment_transcripts: Vec<(u32, String)>,
    /// Store the full-call transcript
    pub transcript: Option<CallTranscript>,
    /// Store a voicemail
    pub voicemail: Option<Voicemail>,
    /// Attach a transcription to the stored voicemail
    pub voicemail_transcription: Option<String>,
    /// Time of the change
    pub at: Option<DateTime<Utc>>,
}

impl CallRecordPatch {
    /// Empty patch stamped with `at`
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            at: Some(at),
            ..Default::default()
        }
    }

    /// Set the status
    pub fn status(mut self, status: CallStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Add a tag
    pub fn add_tag(mut self, tag: impl Into<String>) -> Self {
        self.add_tags.push(tag.into());
        self
    }

    /// Set a variable
    pub fn variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.push((name.into(), value.into()));
        self
    }

    /// Stamp the flow revision
    pub fn flow_revision(mut self, revision: impl Into<String>) -> Self {
        self.flow_revision = Some(revision.into());
        self
    }

    /// Replace the pending target
    pub fn pending_target(mut self, target: PendingTarget) -> Self {
        self.pending_target = Some(Some(target));
        self
    }

    /// Replace the resumption state
    pub fn resumption(mut self, resumption: Resumption) -> Self {
        self.resumption = Some(Some(resumption));
        self
    }

    /// Drop the pending target and resumption state
    pub fn clear_execution(mut self) -> Self {
        self.pending_target = Some(None);
        self.resumption = Some(None);
        self
    }

    /// Move the call to a new segment, closing the current one
    pub fn advance_segment(mut self, previous: u32, segment: CallSegment) -> Self {
        self.close_segment = Some(previous);
        self.segment = Some(segment.number);
        self.conference_name = Some(segment.conference.clone());
        self.open_segment = Some(segment);
        self
    }

    /// Undo `advance_segment`: back to `segment`, later segments dropped
    pub fn rewind_to(mut self, segment: u32) -> Self {
        self.rewind_segment = Some(segment);
        self
    }

    /// Merge the patch into a record
    pub fn apply(self, record: &mut CallRecord) {
        let now = self.at.unwrap_or_else(Utc::now);

        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(flow_id) = self.flow_id {
            record.flow_id = Some(flow_id);
        }
        for tag in self.add_tags {
            if !record.tags.contains(&tag) {
                record.tags.push(tag);
            }
        }
        for (name, value) in self.variables {
            record.variables.insert(name, value);
        }
        if let Some(revision) = self.flow_revision {
            record.execution.flow_revision = Some(revision);
        }
        if let Some(target) = self.pending_target {
            record.execution.pending_target = target;
        }
        if let Some(resumption) = self.resumption {
            record.execution.resumption = resumption;
        }
        if let Some((conference, claim)) = self.dispatch_claim {
            if let Some(target) = record.execution.pending_target.as_mut() {
                if target.conference == conference && target.dispatch_claim.is_none() {
                    target.dispatch_claim = Some(claim);
                    target.dispatched_at = Some(now);
                }
            }
        }
        if let Some((conference, legs)) = self.dispatched_legs {
            if let Some(target) = record.execution.pending_target.as_mut() {
                if target.conference == conference {
                    target.legs.extend(legs);
                }
            }
        }
        if let Some((conference, attempt)) = self.unanswered_leg {
            if let Some(target) = record.execution.pending_target.as_mut() {
                if target.is_for(&conference, attempt) && !target.all_unanswered() {
                    target.unanswered_legs += 1;
                }
            }
        }
        if let Some(number) = self.close_segment {
            if let Some(segment) = record.segments.iter_mut().find(|s| s.number == number) {
                segment.ended_at.get_or_insert(now);
            }
        }
        if let Some(segment) = self.open_segment {
            if !record.segments.iter().any(|s| s.number == segment.number) {
                record.segments.push(segment);
            }
        }
        if let Some(number) = self.rewind_segment {
            record.segments.retain(|s| s.number <= number);
            if let Some(segment) = record.segments.iter_mut().find(|s| s.number == number) {
                segment.ended_at = None;
                record.conference_name = Some(segment.conference.clone());
            }
            record.segment = number;
        }
        if let Some(segment) = self.segment {
            record.segment = segment;
        }
        if let Some(conference) = self.conference_name {
            record.conference_name = Some(conference);
        }
        if let Some((number, url)) = self.segment_recording {
            if let Some(segment) = record.segments.iter_mut().find(|s| s.number == number) {
                segment.recording_url = Some(url);
            }
        }
        for (number, text) in self.segment_transcripts {
            if let Some(segment) = record.segments.iter_mut().find(|s| s.number == number) {
                segment.transcript = Some(text);
            }
        }
        if let Some(transcript) = self.transcript {
            record.transcript = Some(transcript);
        }
        if let Some(voicemail) = self.voicemail {
            record.voicemail = Some(voicemail);
        }
        if let Some(text) = self.voicemail_transcription {
            if let Some(voicemail) = record.voicemail.as_mut() {
                voicemail.transcription = Some(text);
            }
        }
        record.updated_at = now;
    }
}
