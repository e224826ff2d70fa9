//! Control documents returned to the carrier
//!
//! Every webhook answers with a `<Response>` made of verbs. Documents are
//! built with [`ControlDocument`] and rendered to XML at the edge.

use std::borrow::Cow;
use std::fmt::{self, Write as _};

use super::flow_definition::Prompt;

/// Digit collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gather {
    /// URL that receives the digits
    pub action: String,
    /// Stop after this many digits
    pub num_digits: Option<u32>,
    /// Seconds to wait for input
    pub timeout_secs: u32,
    /// Key that ends input early
    pub finish_on_key: Option<char>,
    /// Say/Play verbs played while waiting
    pub prompt: Vec<Verb>,
}

/// Join the caller leg to a conference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConferenceJoin {
    /// Conference name
    pub name: String,
    /// URL the carrier posts to when the leg leaves the conference
    pub action: Option<String>,
    /// Record the conference from the start
    pub record: bool,
    /// Recording completion callback
    pub recording_status_callback: Option<String>,
    /// Conference lifecycle callback
    pub status_callback: Option<String>,
    /// Hold music while alone
    pub wait_url: Option<String>,
    /// Start the conference when this leg enters
    pub start_on_enter: bool,
    /// End the conference when this leg leaves
    pub end_on_exit: bool,
}

impl ConferenceJoin {
    /// Join with carrier defaults
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            action: None,
            record: false,
            recording_status_callback: None,
            status_callback: None,
            wait_url: None,
            start_on_enter: true,
            end_on_exit: false,
        }
    }
}

/// Message recording
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// URL that receives the recording
    pub action: String,
    /// Maximum length in seconds
    pub max_length_secs: u32,
    /// Request a transcription
    pub transcribe: bool,
    /// URL that receives the transcription
    pub transcribe_callback: Option<String>,
    /// Play a beep before recording
    pub play_beep: bool,
}

/// One instruction of a control document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verb {
    /// Text-to-speech
    Say(String),
    /// Play audio from a URL
    Play(String),
    /// Silence
    Pause(u32),
    /// Collect digits
    Gather(Gather),
    /// Dial into a conference
    Conference(ConferenceJoin),
    /// Record a message
    Record(Record),
    /// Fetch the next document from a URL
    Redirect(String),
    /// End the call
    Hangup,
}

/// Ordered list of verbs answering one webhook
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlDocument {
    verbs: Vec<Verb>,
}

impl ControlDocument {
    /// Empty document
    pub fn new() -> Self {
        Self::default()
    }

    /// Document that only hangs up
    pub fn hangup_only() -> Self {
        let mut doc = Self::new();
        doc.hangup();
        doc
    }

    /// Say a message then hang up
    pub fn goodbye(message: &str) -> Self {
        let mut doc = Self::new();
        doc.say(message).hangup();
        doc
    }

    /// Append any verb
    pub fn push(&mut self, verb: Verb) -> &mut Self {
        self.verbs.push(verb);
        self
    }

    /// Append text-to-speech
    pub fn say(&mut self, text: impl Into<String>) -> &mut Self {
        self.push(Verb::Say(text.into()))
    }

    /// Append audio playback
    pub fn play(&mut self, url: impl Into<String>) -> &mut Self {
        self.push(Verb::Play(url.into()))
    }

    /// Append a prompt; audio wins over text and empty prompts add nothing
    pub fn prompt(&mut self, prompt: &Prompt) -> &mut Self {
        if let Some(verb) = prompt_verb(prompt) {
            self.push(verb);
        }
        self
    }

    /// Append a redirect
    pub fn redirect(&mut self, url: impl Into<String>) -> &mut Self {
        self.push(Verb::Redirect(url.into()))
    }

    /// Append a hangup
    pub fn hangup(&mut self) -> &mut Self {
        self.push(Verb::Hangup)
    }

    /// Verbs in order
    pub fn verbs(&self) -> &[Verb] {
        &self.verbs
    }

    /// Whether the document ends the call
    pub fn ends_call(&self) -> bool {
        matches!(self.verbs.last(), Some(Verb::Hangup))
    }

    /// Whether no verbs were added
    pub fn is_empty(&self) -> bool {
        self.verbs.is_empty()
    }

    /// Render as carrier XML
    pub fn render(&self) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response>");
        if self.verbs.is_empty() {
            out.push_str("<Hangup/>");
        }
        for verb in &self.verbs {
            render_verb(&mut out, verb);
        }
        out.push_str("</Response>");
        out
    }
}

impl fmt::Display for ControlDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Say/Play verb for a prompt
pub fn prompt_verb(prompt: &Prompt) -> Option<Verb> {
    let non_empty = |s: &Option<String>| s.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
    non_empty(&prompt.audio_url)
        .map(Verb::Play)
        .or_else(|| non_empty(&prompt.text).map(Verb::Say))
}

fn escape(raw: &str) -> Cow<'_, str> {
    if !raw.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(raw);
    }
    let mut escaped = String::with_capacity(raw.len() + 8);
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    Cow::Owned(escaped)
}

fn attr(out: &mut String, name: &str, value: impl fmt::Display) {
    let value = value.to_string();
    let _ = write!(out, " {}=\"{}\"", name, escape(&value));
}

fn render_verb(out: &mut String, verb: &Verb) {
    match verb {
        Verb::Say(text) => {
            let _ = write!(out, "<Say>{}</Say>", escape(text));
        }
        Verb::Play(url) => {
            let _ = write!(out, "<Play>{}</Play>", escape(url));
        }
        Verb::Pause(seconds) => {
            let _ = write!(out, "<Pause length=\"{}\"/>", seconds);
        }
        Verb::Gather(gather) => {
            out.push_str("<Gather");
            attr(out, "action", &gather.action);
            attr(out, "method", "POST");
            attr(out, "timeout", gather.timeout_secs);
            if let Some(num_digits) = gather.num_digits {
                attr(out, "numDigits", num_digits);
            }
            if let Some(key) = gather.finish_on_key {
                attr(out, "finishOnKey", key);
            }
            out.push('>');
            for verb in &gather.prompt {
                render_verb(out, verb);
            }
            out.push_str("</Gather>");
        }
        Verb::Conference(join) => {
            out.push_str("<Dial");
            if let Some(action) = &join.action {
                attr(out, "action", action);
                attr(out, "method", "POST");
            }
            out.push_str("><Conference");
            attr(out, "startConferenceOnEnter", join.start_on_enter);
            attr(out, "endConferenceOnExit", join.end_on_exit);
            if join.record {
                attr(out, "record", "record-from-start");
            }
            if let Some(callback) = &join.recording_status_callback {
                attr(out, "recordingStatusCallback", callback);
            }
            if let Some(callback) = &join.status_callback {
                attr(out, "statusCallback", callback);
                attr(out, "statusCallbackEvent", "start end join leave");
            }
            if let Some(wait_url) = &join.wait_url {
                attr(out, "waitUrl", wait_url);
            }
            let _ = write!(out, ">{}</Conference></Dial>", escape(&join.name));
        }
        Verb::Record(record) => {
            out.push_str("<Record");
            attr(out, "action", &record.action);
            attr(out, "method", "POST");
            attr(out, "maxLength", record.max_length_secs);
            attr(out, "playBeep", record.play_beep);
            if record.transcribe {
                attr(out, "transcribe", true);
                if let Some(callback) = &record.transcribe_callback {
                    attr(out, "transcribeCallback", callback);
                }
            }
            out.push_str("/>");
        }
        Verb::Redirect(url) => {
            let _ = write!(out, "<Redirect method=\"POST\">{}</Redirect>", escape(url));
        }
        Verb::Hangup => out.push_str("<Hangup/>"),
    }
}
