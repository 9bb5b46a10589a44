//! Configuration management for the session client.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default auth backend URL (can be overridden at compile time via STOREFRONT_DEFAULT_API_URL).
pub const DEFAULT_API_URL: &str = match option_env!("STOREFRONT_DEFAULT_API_URL") {
    Some(url) => url,
    None => "http://localhost:3000/api/v1",
};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default per-request timeout for the auth backend.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

/// Timer cadences, windows, and retry policy for the session supervisor.
///
/// Every field has a serde default so a config file may name only the values
/// it wants to change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionTimings {
    /// How often the expiry watch reads the ground-truth remaining time.
    pub expiry_watch_interval_secs: u64,
    /// How often the proactive renewal check runs.
    pub proactive_interval_secs: u64,
    /// Proactive renewal fires when the token expires within this window.
    pub proactive_window_secs: u64,
    /// Lower (exclusive) bound of the expiry-watch refresh window.
    pub refresh_window_min_secs: u64,
    /// Upper (inclusive) bound of the expiry-watch refresh window.
    pub refresh_window_max_secs: u64,
    /// Tokens are treated as expired this long before their real deadline.
    pub expiry_grace_ms: u64,
    /// Cadence of the remaining-time countdown published to subscribers.
    pub countdown_tick_ms: u64,
    /// Published remaining-time values change by at least this much.
    pub debounce_ms: u64,
    /// Attempts per refresh before giving up.
    pub refresh_max_attempts: u32,
    /// Backoff base; attempt `n >= 2` waits `base * 2^(n-1)`.
    pub refresh_base_delay_ms: u64,
    /// Backoff cap.
    pub refresh_max_delay_ms: u64,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            expiry_watch_interval_secs: 60,
            proactive_interval_secs: 15 * 60,
            proactive_window_secs: 15 * 60,
            refresh_window_min_secs: 30,
            refresh_window_max_secs: 120,
            expiry_grace_ms: 60_000,
            countdown_tick_ms: 1_000,
            debounce_ms: 5_000,
            refresh_max_attempts: 3,
            refresh_base_delay_ms: 100,
            refresh_max_delay_ms: 5_000,
        }
    }
}

impl SessionTimings {
    pub fn expiry_watch_interval(&self) -> Duration {
        Duration::from_secs(self.expiry_watch_interval_secs)
    }

    pub fn proactive_interval(&self) -> Duration {
        Duration::from_secs(self.proactive_interval_secs)
    }

    pub fn countdown_tick(&self) -> Duration {
        Duration::from_millis(self.countdown_tick_ms)
    }

    /// Reject values that would make the watchers spin or never fire.
    pub fn validate(&self) -> CoreResult<()> {
        if self.expiry_watch_interval_secs == 0
            || self.proactive_interval_secs == 0
            || self.countdown_tick_ms == 0
        {
            return Err(CoreError::Config(
                "session timer intervals must be non-zero".to_string(),
            ));
        }
        if self.refresh_window_min_secs >= self.refresh_window_max_secs {
            return Err(CoreError::Config(format!(
                "refresh window is empty: min {}s >= max {}s",
                self.refresh_window_min_secs, self.refresh_window_max_secs
            )));
        }
        if self.refresh_max_attempts == 0 {
            return Err(CoreError::Config(
                "refresh_max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Main client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Auth backend base URL; endpoints are resolved beneath it.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Per-request timeout for backend calls.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Write JSONL logs to `Paths::log_file()` in addition to stderr.
    #[serde(default)]
    pub log_to_file: bool,
    #[serde(default)]
    pub session: SessionTimings,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            log_to_file: false,
            session: SessionTimings::default(),
        }
    }
}

impl Config {
    /// Load configuration from the config file, falling back to defaults,
    /// then apply environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.session.validate()?;
        config.api_url()?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    fn load_from_env(&mut self) {
        if let Some(log_level) = non_empty_env("STOREFRONT_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Some(api_url) = non_empty_env("STOREFRONT_API_URL") {
            self.api_url = api_url;
        }
    }

    /// The backend URL, parsed.
    pub fn api_url(&self) -> CoreResult<Url> {
        Url::parse(&self.api_url).map_err(CoreError::from)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|value| !value.is_empty())
}
