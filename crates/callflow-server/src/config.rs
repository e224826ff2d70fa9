//! Configuration for the call flow server
//!
//! Everything is read from environment variables; see [`ServerConfig::load`].

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use callflow_core::EngineSettings;

use crate::error::{ServerError, ServerResult};

/// How outbound carrier operations are performed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CarrierMode {
    /// Real REST calls
    Http,
    /// Log only, for local development
    Log,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable
    Pretty,
    /// One JSON object per line
    Json,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Host to bind to
    #[serde(default = "default_host")]
    pub bind_address: String,

    /// Externally reachable base URL for callbacks
    pub public_base_url: String,

    /// Carrier REST base URL
    #[serde(default)]
    pub carrier_api_url: Option<String>,

    /// Carrier account, used as the basic-auth user
    #[serde(default)]
    pub carrier_account_sid: Option<String>,

    /// Carrier secret, used as the basic-auth password
    #[serde(default)]
    pub carrier_auth_token: Option<String>,

    /// Default caller id for outbound legs
    #[serde(default)]
    pub carrier_caller_id: Option<String>,

    /// Carrier mode
    #[serde(default = "default_carrier_mode")]
    pub carrier_mode: CarrierMode,

    /// URL of the state store
    #[serde(default = "default_state_store_url")]
    pub state_store_url: String,

    /// Timezone for flows without one
    #[serde(default = "default_timezone")]
    pub default_timezone: String,

    /// Hard cap on voicemail length
    #[serde(default = "default_voicemail_max_secs")]
    pub voicemail_max_secs: u32,

    /// Conference wait music
    #[serde(default)]
    pub hold_music_url: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,

    /// Seed file for the in-memory store
    #[serde(default)]
    pub seed_file: Option<PathBuf>,
}

fn default_port() -> u16 {
    8080
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_carrier_mode() -> CarrierMode {
    CarrierMode::Http
}

fn default_state_store_url() -> String {
    "memory://local".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_voicemail_max_secs() -> u32 {
    120
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn load() -> ServerResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any variable source
    pub fn from_lookup<F>(lookup: F) -> ServerResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(port) = lookup("SERVER_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                config.port = port;
            } else {
                warn!("Invalid SERVER_PORT value: {}", port);
            }
        }

        if let Some(host) = lookup("SERVER_HOST") {
            config.bind_address = host;
        }

        if let Some(url) = lookup("PUBLIC_BASE_URL") {
            config.public_base_url = url.trim_end_matches('/').to_string();
        }

        config.carrier_api_url = lookup("CARRIER_API_URL");
        config.carrier_account_sid = lookup("CARRIER_ACCOUNT_SID");
        config.carrier_auth_token = lookup("CARRIER_AUTH_TOKEN");
        config.carrier_caller_id = lookup("CARRIER_CALLER_ID");

        if let Some(mode) = lookup("CARRIER_MODE") {
            config.carrier_mode = match mode.to_lowercase().as_str() {
                "http" => CarrierMode::Http,
                "log" => CarrierMode::Log,
                _ => {
                    return Err(ServerError::ConfigError(format!(
                        "Invalid CARRIER_MODE value: {}",
                        mode
                    )))
                }
            };
        }

        if let Some(url) = lookup("STATE_STORE_URL") {
            config.state_store_url = url;
        }

        if let Some(tz) = lookup("DEFAULT_TIMEZONE") {
            config.default_timezone = tz;
        }

        if let Some(max) = lookup("VOICEMAIL_MAX_SECONDS") {
            if let Ok(max) = max.parse::<u32>() {
                config.voicemail_max_secs = max;
            } else {
                warn!("Invalid VOICEMAIL_MAX_SECONDS value: {}", max);
            }
        }

        config.hold_music_url = lookup("HOLD_MUSIC_URL");

        if let Some(log_level) = lookup("LOG_LEVEL") {
            config.log_level = log_level;
        }

        if let Some(format) = lookup("LOG_FORMAT") {
            config.log_format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                _ => {
                    warn!("Invalid LOG_FORMAT value: {}, using pretty", format);
                    LogFormat::Pretty
                }
            };
        }

        config.seed_file = lookup("SEED_FILE").map(PathBuf::from);

        config.validate()?;
        info!("Loaded server configuration");
        Ok(config)
    }

    /// Check required fields and warn about risky settings
    pub fn validate(&self) -> ServerResult<()> {
        if self.public_base_url.is_empty() {
            return Err(ServerError::ConfigError(
                "PUBLIC_BASE_URL is required".to_string(),
            ));
        }

        if self.default_timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(ServerError::ConfigError(format!(
                "Unknown DEFAULT_TIMEZONE: {}",
                self.default_timezone
            )));
        }

        if self.carrier_mode == CarrierMode::Http {
            if self.carrier_api_url.is_none() {
                return Err(ServerError::ConfigError(
                    "CARRIER_API_URL is required unless CARRIER_MODE=log".to_string(),
                ));
            }
            if self.carrier_account_sid.is_none() {
                return Err(ServerError::ConfigError(
                    "CARRIER_ACCOUNT_SID is required unless CARRIER_MODE=log".to_string(),
                ));
            }
            if self.carrier_auth_token.is_none() {
                warn!("No CARRIER_AUTH_TOKEN provided - carrier requests will be unauthenticated!");
            }
        }

        if !self.public_base_url.starts_with("https://") {
            warn!(url = %self.public_base_url, "PUBLIC_BASE_URL is not https - carriers may refuse callbacks");
        }

        if self.seed_file.is_some() && !self.state_store_url.starts_with("memory://") {
            warn!("SEED_FILE is only loaded into the in-memory state store");
        }

        Ok(())
    }

    /// Engine settings derived from this configuration
    pub fn engine_settings(&self) -> Arc<EngineSettings> {
        let mut settings = EngineSettings::new(self.public_base_url.clone());
        settings.default_timezone = self.default_timezone.clone();
        settings.voicemail_max_secs = self.voicemail_max_secs;
        settings.hold_music_url = self.hold_music_url.clone();
        settings.caller_id = self.carrier_caller_id.clone();
        Arc::new(settings)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_host(),
            public_base_url: String::new(),
            carrier_api_url: None,
            carrier_account_sid: None,
            carrier_auth_token: None,
            carrier_caller_id: None,
            carrier_mode: default_carrier_mode(),
            state_store_url: default_state_store_url(),
            default_timezone: default_timezone(),
            voicemail_max_secs: default_voicemail_max_secs(),
            hold_music_url: None,
            log_level: default_log_level(),
            log_format: default_log_format(),
            seed_file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_with_log_carrier() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("PUBLIC_BASE_URL", "https://cf.example.com/"),
            ("CARRIER_MODE", "log"),
        ]))
        .unwrap();
        assert_eq!(config.public_base_url, "https://cf.example.com");
        assert_eq!(config.port, 8080);
        assert_eq!(config.state_store_url, "memory://local");
        assert_eq!(config.voicemail_max_secs, 120);
        assert_eq!(config.log_format, LogFormat::Pretty);

        let settings = config.engine_settings();
        assert_eq!(settings.callbacks.base(), "https://cf.example.com");
        assert_eq!(settings.default_timezone, "UTC");
    }

    #[test]
    fn test_http_carrier_requires_api_url() {
        let err = ServerConfig::from_lookup(lookup(&[("PUBLIC_BASE_URL", "https://cf.example.com")]))
            .unwrap_err();
        assert!(matches!(err, ServerError::ConfigError(_)));

        let config = ServerConfig::from_lookup(lookup(&[
            ("PUBLIC_BASE_URL", "https://cf.example.com"),
            ("CARRIER_API_URL", "https://api.carrier.test/2010-04-01"),
            ("CARRIER_ACCOUNT_SID", "AC1"),
            ("CARRIER_AUTH_TOKEN", "secret"),
            ("VOICEMAIL_MAX_SECONDS", "90"),
            ("LOG_FORMAT", "JSON"),
        ]))
        .unwrap();
        assert_eq!(config.carrier_mode, CarrierMode::Http);
        assert_eq!(config.voicemail_max_secs, 90);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_rejects_missing_base_url_and_bad_values() {
        assert!(ServerConfig::from_lookup(lookup(&[("CARRIER_MODE", "log")])).is_err());
        assert!(ServerConfig::from_lookup(lookup(&[
            ("PUBLIC_BASE_URL", "https://cf.example.com"),
            ("CARRIER_MODE", "pigeon"),
        ]))
        .is_err());
        assert!(ServerConfig::from_lookup(lookup(&[
            ("PUBLIC_BASE_URL", "https://cf.example.com"),
            ("CARRIER_MODE", "log"),
            ("DEFAULT_TIMEZONE", "Mars/Olympus"),
        ]))
        .is_err());
    }
}
