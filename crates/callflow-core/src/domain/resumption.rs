//! Callback URL contract
//!
//! Everything the engine needs to resume after a carrier round trip is either
//! in the call record or in the query string of the callback URL. The query
//! string is produced and parsed only through [`ResumptionToken`], so the
//! producer and the consumer cannot drift apart.

use std::fmt;

use url::form_urlencoded;

use super::arena::{BlockId, Cursor};
use super::call_record::CallId;
use crate::{CallFlowError, CallFlowResult};

/// What a callback resumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackAction {
    /// Continue at a step
    Next,
    /// Menu digits collected
    Menu,
    /// Top-level dial finished
    DialStatus,
    /// Dial inside a nested block finished
    NestedDialStatus,
    /// Round-robin attempt finished
    RoundRobin,
    /// Keypad digits collected
    Keypad,
    /// Voicemail recorded
    VoicemailComplete,
    /// Voicemail transcribed
    Transcription,
    /// Conference lifecycle event
    ConferenceStatus,
    /// Outbound leg status change
    LegStatus,
    /// Outbound leg answered, needs its join document
    Join,
    /// Caller leg moved by a transfer
    TransferJoin,
    /// Transferred segment finished
    TransferStatus,
    /// Conference recording available
    RecordingStatus,
}

impl CallbackAction {
    /// Every action, in route table order
    pub const ALL: [CallbackAction; 14] = [
        CallbackAction::Next,
        CallbackAction::Menu,
        CallbackAction::DialStatus,
        CallbackAction::NestedDialStatus,
        CallbackAction::RoundRobin,
        CallbackAction::Keypad,
        CallbackAction::VoicemailComplete,
        CallbackAction::Transcription,
        CallbackAction::ConferenceStatus,
        CallbackAction::LegStatus,
        CallbackAction::Join,
        CallbackAction::TransferJoin,
        CallbackAction::TransferStatus,
        CallbackAction::RecordingStatus,
    ];

    /// Value of the `action` query parameter
    pub fn as_str(self) -> &'static str {
        match self {
            CallbackAction::Next => "next",
            CallbackAction::Menu => "menu",
            CallbackAction::DialStatus => "dial_status",
            CallbackAction::NestedDialStatus => "nested_dial_status",
            CallbackAction::RoundRobin => "round_robin",
            CallbackAction::Keypad => "keypad",
            CallbackAction::VoicemailComplete => "voicemail_complete",
            CallbackAction::Transcription => "transcription",
            CallbackAction::ConferenceStatus => "conference_status",
            CallbackAction::LegStatus => "leg_status",
            CallbackAction::Join => "join",
            CallbackAction::TransferJoin => "transfer_join",
            CallbackAction::TransferStatus => "transfer_status",
            CallbackAction::RecordingStatus => "recording_status",
        }
    }

    /// Path the callback is served on
    pub fn route(self) -> &'static str {
        match self {
            CallbackAction::Next => "/voice/step",
            CallbackAction::Menu => "/voice/menu",
            CallbackAction::DialStatus => "/voice/dial-status",
            CallbackAction::NestedDialStatus => "/voice/nested-dial-status",
            CallbackAction::RoundRobin => "/voice/round-robin",
            CallbackAction::Keypad => "/voice/keypad",
            CallbackAction::VoicemailComplete => "/voice/voicemail-complete",
            CallbackAction::Transcription => "/voice/transcription",
            CallbackAction::ConferenceStatus => "/voice/conference-status",
            CallbackAction::LegStatus => "/voice/leg-status",
            CallbackAction::Join => "/voice/join",
            CallbackAction::TransferJoin => "/voice/transfer-join",
            CallbackAction::TransferStatus => "/voice/transfer-status",
            CallbackAction::RecordingStatus => "/voice/recording-status",
        }
    }

    /// Parse the `action` query parameter
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|action| action.as_str() == raw)
    }
}

impl fmt::Display for CallbackAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed query string of a callback URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumptionToken {
    /// What the callback resumes
    pub action: CallbackAction,
    /// Step index within the block
    pub step: Option<usize>,
    /// Block of the step, omitted for the top level
    pub block: Option<usize>,
    /// Round-robin attempt
    pub attempt: Option<usize>,
    /// Keypad variable name
    pub var: Option<String>,
    /// Segment the callback belongs to
    pub segment: Option<u32>,
    /// Caller leg id, for callbacks raised by other legs or conferences
    pub call: Option<CallId>,
}

impl ResumptionToken {
    /// Token without a position
    pub fn new(action: CallbackAction) -> Self {
        Self {
            action,
            step: None,
            block: None,
            attempt: None,
            var: None,
            segment: None,
            call: None,
        }
    }

    /// Token pointing at a step
    pub fn at(action: CallbackAction, cursor: Cursor) -> Self {
        let mut token = Self::new(action);
        token.step = Some(cursor.index);
        token.block = (!cursor.is_root()).then_some(cursor.block.0);
        token
    }

    /// Set the round-robin attempt
    pub fn with_attempt(mut self, attempt: usize) -> Self {
        self.attempt = Some(attempt);
        self
    }

    /// Set the keypad variable
    pub fn with_var(mut self, var: impl Into<String>) -> Self {
        self.var = Some(var.into());
        self
    }

    /// Set the segment
    pub fn with_segment(mut self, segment: u32) -> Self {
        self.segment = Some(segment);
        self
    }

    /// Set the caller leg
    pub fn with_call(mut self, call_id: &CallId) -> Self {
        self.call = Some(call_id.clone());
        self
    }

    /// Step position, if the token carries one
    pub fn cursor(&self) -> Option<Cursor> {
        self.step.map(|index| Cursor {
            block: BlockId(self.block.unwrap_or(0)),
            index,
        })
    }

    /// Encode as a query string
    pub fn to_query(&self) -> String {
        let mut query = form_urlencoded::Serializer::new(String::new());
        query.append_pair("action", self.action.as_str());
        if let Some(step) = self.step {
            query.append_pair("step", &step.to_string());
        }
        if let Some(block) = self.block.filter(|block| *block != 0) {
            query.append_pair("block", &block.to_string());
        }
        if let Some(attempt) = self.attempt {
            query.append_pair("attempt", &attempt.to_string());
        }
        if let Some(var) = &self.var {
            query.append_pair("var", var);
        }
        if let Some(segment) = self.segment {
            query.append_pair("segment", &segment.to_string());
        }
        if let Some(call) = &self.call {
            query.append_pair("call", &call.0);
        }
        query.finish()
    }

    /// Parse the query string of a callback served on `expected`'s route.
    ///
    /// A missing `action` is taken from the route; a different one is rejected.
    /// Unknown parameters are ignored.
    pub fn from_query(expected: CallbackAction, query: &str) -> CallFlowResult<Self> {
        fn number<T: std::str::FromStr>(name: &str, raw: &str) -> CallFlowResult<T> {
            raw.parse().map_err(|_| {
                CallFlowError::Validation(format!("invalid callback parameter {}={}", name, raw))
            })
        }

        let mut token = Self::new(expected);
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "action" => {
                    if CallbackAction::parse(&value) != Some(expected) {
                        return Err(CallFlowError::Validation(format!(
                            "callback action '{}' does not match route {}",
                            value,
                            expected.route()
                        )));
                    }
                }
                "step" => token.step = Some(number("step", &value)?),
                "block" => token.block = Some(number("block", &value)?),
                "attempt" => token.attempt = Some(number("attempt", &value)?),
                "segment" => token.segment = Some(number("segment", &value)?),
                "var" if !value.is_empty() => token.var = Some(value.into_owned()),
                "call" if !value.is_empty() => token.call = Some(CallId(value.into_owned())),
                _ => {}
            }
        }
        Ok(token)
    }
}

/// Builds absolute callback URLs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackUrls {
    base: String,
}

impl CallbackUrls {
    /// Base is the externally reachable origin of the server
    pub fn new(base: impl Into<String>) -> Self {
        let base: String = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    /// Externally reachable origin
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Absolute URL for a token
    pub fn url(&self, token: &ResumptionToken) -> String {
        format!("{}{}?{}", self.base, token.action.route(), token.to_query())
    }

    /// Absolute URL for an action with no parameters
    pub fn action(&self, action: CallbackAction) -> String {
        self.url(&ResumptionToken::new(action))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_root_cursor_omits_block() {
        let urls = CallbackUrls::new("https://voice.example.com/");
        let token = ResumptionToken::at(CallbackAction::DialStatus, Cursor::root(3));
        assert_eq!(
            urls.url(&token),
            "https://voice.example.com/voice/dial-status?action=dial_status&step=3"
        );
    }

    #[test]
    fn test_query_roundtrip_with_nested_cursor() {
        let cursor = Cursor {
            block: BlockId(4),
            index: 2,
        };
        let token = ResumptionToken::at(CallbackAction::Keypad, cursor)
            .with_var("account number")
            .with_segment(1);
        let query = token.to_query();
        assert_eq!(query, "action=keypad&step=2&block=4&var=account+number&segment=1");

        let parsed = ResumptionToken::from_query(CallbackAction::Keypad, &query).unwrap();
        assert_eq!(parsed, token);
        assert_eq!(parsed.cursor(), Some(cursor));
    }

    #[test]
    fn test_action_mismatch_is_rejected() {
        let err = ResumptionToken::from_query(CallbackAction::Menu, "action=dial_status&step=1")
            .unwrap_err();
        assert!(matches!(err, CallFlowError::Validation(_)));
    }

    #[test]
    fn test_missing_action_defaults_to_route() {
        let token = ResumptionToken::from_query(CallbackAction::RoundRobin, "step=0&attempt=2")
            .unwrap();
        assert_eq!(token.action, CallbackAction::RoundRobin);
        assert_eq!(token.attempt, Some(2));
        assert_eq!(token.cursor(), Some(Cursor::root(0)));
    }

    #[test]
    fn test_bad_numbers_are_rejected() {
        assert!(ResumptionToken::from_query(CallbackAction::Next, "step=two").is_err());
        assert!(ResumptionToken::from_query(CallbackAction::Next, "step=-1").is_err());
    }

    #[test]
    fn test_every_action_parses_back() {
        for action in CallbackAction::ALL {
            assert_eq!(CallbackAction::parse(action.as_str()), Some(action));
            assert!(action.route().starts_with("/voice/"));
        }
    }
}
