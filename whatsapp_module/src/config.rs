use std::env;
use std::time::Duration;

use thiserror::Error;

/// Default Meta Graph API base URL.
pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.facebook.com";

/// Default transcription provider base URL.
pub const DEFAULT_SPEECH_BASE_URL: &str = "https://api.sarvam.ai";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    MissingEnv(&'static str),
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Runtime configuration for the worker binary, resolved once at startup.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Transport access token for the Graph API.
    pub access_token: String,
    /// Graph API version segment, e.g. `v22.0`.
    pub graph_api_version: String,
    /// The bot's phone number id.
    pub phone_number_id: String,
    pub graph_base_url: String,
    /// Base URL of the internal backend API.
    pub backend_base_url: String,
    /// Transcription provider key; voice notes are rejected without it.
    pub speech_api_key: Option<String>,
    pub speech_base_url: String,
    /// How many prior turns of history the orchestrator sees.
    pub history_limit: usize,
    /// Upper bound on concurrent background audio jobs.
    pub audio_max_concurrency: usize,
    /// Pause after an unexpected queue error before polling again.
    pub queue_error_cooldown: Duration,
    /// Pause between polls when the queue is empty.
    pub queue_idle_wait: Duration,
    pub reminder_check_interval: Duration,
    pub reminder_warning_minutes: i64,
    pub reminder_imminent_minutes: i64,
    pub daily_report_hour: u32,
    pub daily_report_minute: u32,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let access_token = require_env("ACCESS_TOKEN")?;
        let phone_number_id = require_env("PHONE_NUMBER_ID")?;

        let daily_report_hour = resolve_u32_env("DAILY_REPORT_HOUR", 17);
        if daily_report_hour > 23 {
            return Err(ConfigError::InvalidValue {
                key: "DAILY_REPORT_HOUR",
                value: daily_report_hour.to_string(),
            });
        }
        let daily_report_minute = resolve_u32_env("DAILY_REPORT_MINUTE", 0);
        if daily_report_minute > 59 {
            return Err(ConfigError::InvalidValue {
                key: "DAILY_REPORT_MINUTE",
                value: daily_report_minute.to_string(),
            });
        }

        Ok(Self {
            access_token,
            graph_api_version: resolve_str_env("GRAPH_API_VERSION", "v22.0"),
            phone_number_id,
            graph_base_url: resolve_str_env("GRAPH_BASE_URL", DEFAULT_GRAPH_BASE_URL),
            backend_base_url: resolve_str_env("BACKEND_BASE_URL", "http://localhost:8000"),
            speech_api_key: env::var("SPEECH_API_KEY")
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            speech_base_url: resolve_str_env("SPEECH_BASE_URL", DEFAULT_SPEECH_BASE_URL),
            history_limit: resolve_usize_env("CHAT_HISTORY_LIMIT", 15),
            audio_max_concurrency: resolve_usize_env("AUDIO_MAX_CONCURRENCY", 4),
            queue_error_cooldown: Duration::from_secs(resolve_u64_env(
                "QUEUE_ERROR_COOLDOWN_SECS",
                5,
            )),
            queue_idle_wait: Duration::from_secs(resolve_u64_env("QUEUE_IDLE_WAIT_SECS", 1)),
            reminder_check_interval: Duration::from_secs(resolve_u64_env(
                "REMINDER_CHECK_INTERVAL_SECS",
                60,
            )),
            reminder_warning_minutes: resolve_i64_env("REMINDER_WARNING_MINUTES", 60),
            reminder_imminent_minutes: resolve_i64_env("REMINDER_IMMINENT_MINUTES", 10),
            daily_report_hour,
            daily_report_minute,
        })
    }
}

fn require_env(key: &'static str) -> Result<String, ConfigError> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or(ConfigError::MissingEnv(key))
}

pub(crate) fn resolve_str_env(key: &str, default_value: &str) -> String {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default_value.to_string())
}

pub(crate) fn resolve_u64_env(key: &str, default_value: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default_value)
}

fn resolve_u32_env(key: &str, default_value: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .unwrap_or(default_value)
}

fn resolve_i64_env(key: &str, default_value: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default_value)
}

fn resolve_usize_env(key: &str, default_value: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default_value)
}
