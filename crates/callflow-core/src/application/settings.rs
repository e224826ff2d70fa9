//! Engine settings and time source

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::resumption::CallbackUrls;

/// Source of the current instant
pub trait Clock: Send + Sync {
    /// Current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at one instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Shared clock handle
pub type SharedClock = Arc<dyn Clock>;

/// Settings the engine needs from configuration
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Callback URL builder
    pub callbacks: CallbackUrls,
    /// Timezone for schedules when neither step nor flow names one
    pub default_timezone: String,
    /// Hard cap on voicemail length
    pub voicemail_max_secs: u32,
    /// Hold music played to a caller waiting in a conference
    pub hold_music_url: Option<String>,
    /// Said before hanging up when a flow runs out of steps
    pub goodbye_message: String,
    /// Said when the dialled number is not routed
    pub not_in_service_message: String,
    /// Greeting before a voicemail recording when the step has none
    pub voicemail_greeting: String,
    /// Said when a transferred caller could not be connected
    pub transfer_failed_message: String,
    /// Caller id for outbound legs, falls back to the called number
    pub caller_id: Option<String>,
}

impl EngineSettings {
    /// Settings with defaults for everything but the public base URL
    pub fn new(public_base_url: impl Into<String>) -> Self {
        Self {
            callbacks: CallbackUrls::new(public_base_url),
            default_timezone: "UTC".to_string(),
            voicemail_max_secs: 120,
            hold_music_url: None,
            goodbye_message: "Thank you for calling. Goodbye.".to_string(),
            not_in_service_message: "The number you have dialed is not in service.".to_string(),
            voicemail_greeting: "Please leave a message after the tone.".to_string(),
            transfer_failed_message: "We could not complete your transfer. Goodbye.".to_string(),
            caller_id: None,
        }
    }
}
