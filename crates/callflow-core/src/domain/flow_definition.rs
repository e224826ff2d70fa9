//! Call flow definitions
//!
//! A flow is an ordered list of typed steps. Menus and schedules own nested
//! step lists. Steps are stored as `{ id, type, config }`; a step whose type is
//! unknown or whose config does not decode is kept as [`StepAction::Malformed`]
//! so the rest of the flow still loads and the interpreter can fail closed when
//! it reaches it.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::schedule::TimeSlot;
use crate::{CallFlowError, CallFlowResult};

/// Tenant identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Call flow identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowId(pub String);

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A tenant-defined call routing program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallFlow {
    /// Flow identifier
    pub id: FlowId,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Display name
    pub name: String,
    /// IANA timezone used by schedule steps without their own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    /// Record bridged conferences for every call running this flow
    #[serde(default)]
    pub record_calls: bool,
    /// Top-level steps
    #[serde(default)]
    pub steps: Vec<CallFlowStep>,
}

impl CallFlow {
    /// Create a flow with default settings
    pub fn new(id: &str, tenant_id: &str, name: &str, steps: Vec<CallFlowStep>) -> Self {
        Self {
            id: FlowId(id.to_string()),
            tenant_id: TenantId(tenant_id.to_string()),
            name: name.to_string(),
            timezone: None,
            record_calls: false,
            steps,
        }
    }

    /// Content hash of the step tree, used to detect edits between callbacks
    pub fn revision(&self) -> String {
        let bytes = serde_json::to_vec(&self.steps).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }

    /// Check step ids are unique and every step decoded
    pub fn validate(&self) -> CallFlowResult<()> {
        let mut seen = HashSet::new();
        let mut pending: Vec<&CallFlowStep> = self.steps.iter().collect();
        while let Some(step) = pending.pop() {
            if step.id.is_empty() {
                return Err(CallFlowError::Validation(format!(
                    "flow {} has a step without an id",
                    self.id
                )));
            }
            if !seen.insert(step.id.as_str()) {
                return Err(CallFlowError::Validation(format!(
                    "flow {} has duplicate step id '{}'",
                    self.id, step.id
                )));
            }
            if let StepAction::Malformed { reason, .. } = &step.action {
                return Err(CallFlowError::MalformedStep {
                    step_id: step.id.clone(),
                    reason: reason.clone(),
                });
            }
            pending.extend(step.action.child_steps());
        }
        Ok(())
    }
}

/// Something to say or play to the caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    /// Text rendered with text-to-speech
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Pre-recorded audio, preferred over text when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
}

impl Prompt {
    /// Text-to-speech prompt
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            audio_url: None,
        }
    }

    /// Whether there is nothing to render
    pub fn is_empty(&self) -> bool {
        self.text.as_deref().map_or(true, |t| t.trim().is_empty())
            && self.audio_url.as_deref().map_or(true, |u| u.trim().is_empty())
    }
}

fn default_ring_timeout() -> u32 {
    30
}

fn default_round_robin_timeout() -> u32 {
    20
}

fn default_num_digits() -> u32 {
    1
}

fn default_gather_timeout() -> u32 {
    5
}

fn default_max_digits() -> u32 {
    10
}

fn default_voicemail_length() -> u32 {
    60
}

fn default_true() -> bool {
    true
}

/// Plays a message then moves on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GreetingConfig {
    /// Message to play
    pub message: Prompt,
}

/// Rings a single destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialConfig {
    /// Phone number, client identity or account id
    pub destination: String,
    /// Ring timeout in seconds
    #[serde(default = "default_ring_timeout")]
    pub timeout_secs: u32,
    /// Record the bridged conference
    #[serde(default)]
    pub record: bool,
}

/// Rings several destinations at once, first answer wins
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulcallConfig {
    /// Destinations rung in parallel
    pub destinations: Vec<String>,
    /// Ring timeout in seconds
    #[serde(default = "default_ring_timeout")]
    pub timeout_secs: u32,
    /// Record the bridged conference
    #[serde(default)]
    pub record: bool,
}

/// Rings destinations one at a time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundRobinConfig {
    /// Destinations tried in order
    pub destinations: Vec<String>,
    /// Per-destination ring timeout in seconds
    #[serde(default = "default_round_robin_timeout")]
    pub timeout_secs: u32,
    /// Record the bridged conference
    #[serde(default)]
    pub record: bool,
}

/// One keypad choice of a menu
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuOption {
    /// Human readable label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Steps run when the digit is pressed
    #[serde(default)]
    pub steps: Vec<CallFlowStep>,
}

/// Keypad menu
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuConfig {
    /// Prompt played while collecting
    #[serde(default)]
    pub prompt: Prompt,
    /// Options keyed by digit
    #[serde(default)]
    pub options: BTreeMap<String, MenuOption>,
    /// Steps run on an invalid or missing selection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_steps: Option<Vec<CallFlowStep>>,
    /// Digits to collect
    #[serde(default = "default_num_digits")]
    pub num_digits: u32,
    /// Seconds to wait for input
    #[serde(default = "default_gather_timeout")]
    pub timeout_secs: u32,
}

/// A named set of time windows with its own steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleBranch {
    /// Branch name, used in logs
    pub name: String,
    /// Windows during which the branch applies
    #[serde(default)]
    pub slots: Vec<TimeSlot>,
    /// Steps run when the branch matches
    #[serde(default)]
    pub steps: Vec<CallFlowStep>,
}

/// Time-of-day routing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Overrides the flow timezone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    /// Branches evaluated in order
    #[serde(default)]
    pub branches: Vec<ScheduleBranch>,
    /// Steps run when no branch matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_steps: Option<Vec<CallFlowStep>>,
}

/// Collects digits into a call variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeypadEntryConfig {
    /// Prompt played while collecting
    #[serde(default)]
    pub prompt: Prompt,
    /// Name of the variable that receives the digits
    pub variable: String,
    /// Maximum digits to collect
    #[serde(default = "default_max_digits")]
    pub max_digits: u32,
    /// Seconds to wait for input
    #[serde(default = "default_gather_timeout")]
    pub timeout_secs: u32,
}

/// Labels the call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagConfig {
    /// Tag added to the call record
    pub label: String,
}

/// Records a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoicemailConfig {
    /// Greeting played before the beep
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub greeting: Option<Prompt>,
    /// Maximum message length in seconds
    #[serde(default = "default_voicemail_length")]
    pub max_length_secs: u32,
    /// Ask the carrier for a transcription
    #[serde(default = "default_true")]
    pub transcribe: bool,
}

/// Ends the call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HangupConfig {
    /// Message played before hanging up
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Prompt>,
}

/// What a step does
#[derive(Debug, Clone, PartialEq)]
pub enum StepAction {
    /// Play a message
    Greeting(GreetingConfig),
    /// Ring one destination
    Dial(DialConfig),
    /// Ring several destinations in parallel
    Simulcall(SimulcallConfig),
    /// Ring destinations in sequence
    RoundRobin(RoundRobinConfig),
    /// Keypad menu
    Menu(MenuConfig),
    /// Time-of-day branch
    Schedule(ScheduleConfig),
    /// Digit collection
    KeypadEntry(KeypadEntryConfig),
    /// Tag the call
    Tag(TagConfig),
    /// Record a voicemail
    Voicemail(VoicemailConfig),
    /// End the call
    Hangup(HangupConfig),
    /// Step that could not be decoded
    Malformed {
        /// Type as written in the definition
        step_type: String,
        /// Raw configuration
        config: Value,
        /// Why decoding failed
        reason: String,
    },
}

impl StepAction {
    /// Canonical type name
    pub fn type_name(&self) -> &str {
        match self {
            StepAction::Greeting(_) => "greeting",
            StepAction::Dial(_) => "dial",
            StepAction::Simulcall(_) => "simulcall",
            StepAction::RoundRobin(_) => "round_robin",
            StepAction::Menu(_) => "menu",
            StepAction::Schedule(_) => "schedule",
            StepAction::KeypadEntry(_) => "keypad_entry",
            StepAction::Tag(_) => "tag",
            StepAction::Voicemail(_) => "voicemail",
            StepAction::Hangup(_) => "hangup",
            StepAction::Malformed { step_type, .. } => step_type,
        }
    }

    /// Nested step lists owned by this step, in declaration order
    pub fn child_steps(&self) -> Vec<&CallFlowStep> {
        match self {
            StepAction::Menu(menu) => menu
                .options
                .values()
                .flat_map(|option| option.steps.iter())
                .chain(menu.invalid_steps.iter().flatten())
                .collect(),
            StepAction::Schedule(schedule) => schedule
                .branches
                .iter()
                .flat_map(|branch| branch.steps.iter())
                .chain(schedule.fallback_steps.iter().flatten())
                .collect(),
            _ => Vec::new(),
        }
    }

    fn decode(step_type: &str, config: Value) -> Result<StepAction, String> {
        fn config_of<T: DeserializeOwned>(config: Value) -> Result<T, String> {
            serde_json::from_value(config).map_err(|e| e.to_string())
        }

        let config = if config.is_null() {
            Value::Object(Default::default())
        } else {
            config
        };
        let normalized: String = step_type
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();

        let action = match normalized.as_str() {
            "greeting" => StepAction::Greeting(config_of(config)?),
            "dial" => {
                let dial: DialConfig = config_of(config)?;
                if dial.destination.trim().is_empty() {
                    return Err("dial requires a destination".to_string());
                }
                StepAction::Dial(dial)
            }
            "simulcall" => {
                let simulcall: SimulcallConfig = config_of(config)?;
                if simulcall.destinations.is_empty() {
                    return Err("simulcall requires at least one destination".to_string());
                }
                StepAction::Simulcall(simulcall)
            }
            "roundrobin" => {
                let round_robin: RoundRobinConfig = config_of(config)?;
                if round_robin.destinations.is_empty() {
                    return Err("round robin requires at least one destination".to_string());
                }
                StepAction::RoundRobin(round_robin)
            }
            "menu" => StepAction::Menu(config_of(config)?),
            "schedule" => StepAction::Schedule(config_of(config)?),
            "keypadentry" => {
                let keypad: KeypadEntryConfig = config_of(config)?;
                if keypad.variable.trim().is_empty() {
                    return Err("keypad entry requires a variable name".to_string());
                }
                StepAction::KeypadEntry(keypad)
            }
            "tag" => {
                let tag: TagConfig = config_of(config)?;
                if tag.label.trim().is_empty() {
                    return Err("tag requires a label".to_string());
                }
                StepAction::Tag(tag)
            }
            "voicemail" => StepAction::Voicemail(config_of(config)?),
            "hangup" => StepAction::Hangup(config_of(config)?),
            _ => return Err(format!("unknown step type '{}'", step_type)),
        };
        Ok(action)
    }

    fn encode(&self) -> (String, Value) {
        fn value_of<T: Serialize>(config: &T) -> Value {
            serde_json::to_value(config).unwrap_or(Value::Null)
        }

        let config = match self {
            StepAction::Greeting(c) => value_of(c),
            StepAction::Dial(c) => value_of(c),
            StepAction::Simulcall(c) => value_of(c),
            StepAction::RoundRobin(c) => value_of(c),
            StepAction::Menu(c) => value_of(c),
            StepAction::Schedule(c) => value_of(c),
            StepAction::KeypadEntry(c) => value_of(c),
            StepAction::Tag(c) => value_of(c),
            StepAction::Voicemail(c) => value_of(c),
            StepAction::Hangup(c) => value_of(c),
            StepAction::Malformed { config, .. } => config.clone(),
        };
        (self.type_name().to_string(), config)
    }
}

/// Storage shape of a step
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawStep {
    id: String,
    #[serde(rename = "type")]
    step_type: String,
    #[serde(default)]
    config: Value,
}

/// One step of a call flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawStep", into = "RawStep")]
pub struct CallFlowStep {
    /// Step identifier, unique within the flow
    pub id: String,
    /// What the step does
    pub action: StepAction,
}

impl CallFlowStep {
    /// Create a step
    pub fn new(id: &str, action: StepAction) -> Self {
        Self {
            id: id.to_string(),
            action,
        }
    }

    /// Whether the step could not be decoded
    pub fn is_malformed(&self) -> bool {
        matches!(self.action, StepAction::Malformed { .. })
    }
}

impl From<RawStep> for CallFlowStep {
    fn from(raw: RawStep) -> Self {
        let action = match StepAction::decode(&raw.step_type, raw.config.clone()) {
            Ok(action) => action,
            Err(reason) => StepAction::Malformed {
                step_type: raw.step_type,
                config: raw.config,
                reason,
            },
        };
        Self { id: raw.id, action }
    }
}

impl From<CallFlowStep> for RawStep {
    fn from(step: CallFlowStep) -> Self {
        let (step_type, config) = step.action.encode();
        RawStep {
            id: step.id,
            step_type,
            config,
        }
    }
}
