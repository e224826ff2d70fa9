//! Carrier webhook payloads

use serde::{Deserialize, Serialize};

use super::call_record::CallId;

/// Form fields posted by the carrier on every voice webhook
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WebhookParams {
    /// Leg the webhook is about
    #[serde(default)]
    pub call_sid: String,
    /// Caller number
    #[serde(default)]
    pub from: String,
    /// Called number
    #[serde(default)]
    pub to: String,
    /// Digits collected by a gather
    #[serde(default)]
    pub digits: Option<String>,
    /// Outcome of a dial
    #[serde(default)]
    pub dial_call_status: Option<String>,
    /// Status of the leg
    #[serde(default)]
    pub call_status: Option<String>,
    /// Recording location
    #[serde(default)]
    pub recording_url: Option<String>,
    /// Transcribed text
    #[serde(default)]
    pub transcription_text: Option<String>,
    /// Conference lifecycle event name
    #[serde(default)]
    pub status_callback_event: Option<String>,
    /// Conference name
    #[serde(default)]
    pub friendly_name: Option<String>,
}

impl WebhookParams {
    /// Id of the leg the webhook is about
    pub fn call_id(&self) -> CallId {
        CallId(self.call_sid.clone())
    }

    /// Collected digits, trimmed, `None` when nothing was entered
    pub fn digits(&self) -> Option<&str> {
        self.digits
            .as_deref()
            .map(str::trim)
            .filter(|digits| !digits.is_empty())
    }
}

/// Outcome of a dial or leg as reported by the carrier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialOutcome {
    /// Callee answered and the call finished
    Completed,
    /// Leg is still being set up or talking
    Active,
    /// Callee did not pick up
    NoAnswer,
    /// Callee was busy
    Busy,
    /// Leg could not be placed
    Failed,
    /// Leg was cancelled before answer
    Canceled,
}

impl DialOutcome {
    /// Parse a carrier status; a missing status counts as no answer
    pub fn parse(status: Option<&str>) -> Self {
        match status.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("completed") | Some("answered") => DialOutcome::Completed,
            Some("queued") | Some("initiated") | Some("ringing") | Some("in-progress") => {
                DialOutcome::Active
            }
            Some("busy") => DialOutcome::Busy,
            Some("failed") => DialOutcome::Failed,
            Some("canceled") => DialOutcome::Canceled,
            _ => DialOutcome::NoAnswer,
        }
    }

    /// The leg ended without reaching anyone
    pub fn is_unanswered(self) -> bool {
        matches!(
            self,
            DialOutcome::NoAnswer | DialOutcome::Busy | DialOutcome::Failed | DialOutcome::Canceled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dial_outcome_parsing() {
        assert_eq!(DialOutcome::parse(Some("completed")), DialOutcome::Completed);
        assert_eq!(DialOutcome::parse(Some("No-Answer")), DialOutcome::NoAnswer);
        assert_eq!(DialOutcome::parse(Some("busy")), DialOutcome::Busy);
        assert_eq!(DialOutcome::parse(Some("ringing")), DialOutcome::Active);
        assert_eq!(DialOutcome::parse(None), DialOutcome::NoAnswer);
        assert!(DialOutcome::parse(Some("canceled")).is_unanswered());
        assert!(!DialOutcome::parse(Some("in-progress")).is_unanswered());
    }

    #[test]
    fn test_digits_are_trimmed() {
        let params = WebhookParams {
            digits: Some(" 2 ".into()),
            ..Default::default()
        };
        assert_eq!(params.digits(), Some("2"));
        let params = WebhookParams {
            digits: Some("".into()),
            ..Default::default()
        };
        assert_eq!(params.digits(), None);
    }
}
