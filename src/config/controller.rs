//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use crate::constants::{
    DEFAULT_GITHUB_API_URL, DEFAULT_GITHUB_TIMEOUT_SECS, DEFAULT_JITTER_PERCENT,
    DEFAULT_METRICS_PORT, DEFAULT_REQUEUE_INTERVAL_SECS,
};
use crate::github::GithubClientConfig;
use crate::requeue::{jitter, DefaultRequeue, OnHoursError, OnHoursRequeue, RequeuePolicy};
use std::sync::Arc;
use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment
/// variables, which in turn are overridden by command line flags.
#[derive(Clone)]
pub struct ControllerConfig {
    /// Regular interval between two checks of a repository (seconds)
    pub requeue_interval_secs: u64,
    /// Jitter applied to the regular interval, in percent
    pub jitter_percent: f64,
    /// First UTC hour of the window requeues are moved into
    pub requeue_on_hours_from: Option<u32>,
    /// UTC hour the requeue window ends (exclusive)
    pub requeue_on_hours_to: Option<u32>,
    /// Token for the GitHub API, anonymous requests when unset
    pub github_token: Option<String>,
    pub github_api_url: String,
    /// Timeout of a single GitHub request (seconds)
    pub github_timeout_secs: u64,
    pub metrics_port: u16,
    /// Namespace to watch, all namespaces when unset
    pub watch_namespace: Option<String>,
    /// Log format (json, text)
    pub log_format: String,
}

impl std::fmt::Debug for ControllerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerConfig")
            .field("requeue_interval_secs", &self.requeue_interval_secs)
            .field("jitter_percent", &self.jitter_percent)
            .field("requeue_on_hours_from", &self.requeue_on_hours_from)
            .field("requeue_on_hours_to", &self.requeue_on_hours_to)
            .field("github_token", &self.github_token.as_ref().map(|_| "***"))
            .field("github_api_url", &self.github_api_url)
            .field("github_timeout_secs", &self.github_timeout_secs)
            .field("metrics_port", &self.metrics_port)
            .field("watch_namespace", &self.watch_namespace)
            .field("log_format", &self.log_format)
            .finish()
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            requeue_interval_secs: DEFAULT_REQUEUE_INTERVAL_SECS,
            jitter_percent: DEFAULT_JITTER_PERCENT,
            requeue_on_hours_from: None,
            requeue_on_hours_to: None,
            github_token: None,
            github_api_url: DEFAULT_GITHUB_API_URL.to_string(),
            github_timeout_secs: DEFAULT_GITHUB_TIMEOUT_SECS,
            metrics_port: DEFAULT_METRICS_PORT,
            watch_namespace: None,
            log_format: "text".to_string(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var_or_default = |key: &str, default: &str| -> String {
            lookup(key)
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        Self {
            requeue_interval_secs: parse_or_default(
                lookup("REQUEUE_INTERVAL_SECS"),
                DEFAULT_REQUEUE_INTERVAL_SECS,
            ),
            jitter_percent: lookup("JITTER_PERCENT")
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|percent| jitter::is_valid_percentage(*percent))
                .unwrap_or(DEFAULT_JITTER_PERCENT),
            requeue_on_hours_from: lookup("REQUEUE_ON_HOURS_FROM").and_then(|v| v.parse().ok()),
            requeue_on_hours_to: lookup("REQUEUE_ON_HOURS_TO").and_then(|v| v.parse().ok()),
            github_token: lookup("GITHUB_TOKEN").filter(|token| !token.is_empty()),
            github_api_url: var_or_default("GITHUB_API_URL", DEFAULT_GITHUB_API_URL),
            github_timeout_secs: parse_or_default(
                lookup("GITHUB_TIMEOUT_SECS"),
                DEFAULT_GITHUB_TIMEOUT_SECS,
            ),
            metrics_port: parse_or_default(lookup("METRICS_PORT"), DEFAULT_METRICS_PORT),
            watch_namespace: lookup("WATCH_NAMESPACE").filter(|ns| !ns.is_empty()),
            log_format: var_or_default("LOG_FORMAT", "text"),
        }
    }

    #[must_use]
    pub fn requeue_interval(&self) -> Duration {
        Duration::from_secs(self.requeue_interval_secs)
    }

    #[must_use]
    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }

    /// Requeue policy selected by the on-hours settings
    ///
    /// # Errors
    ///
    /// Returns an error if only one bound is set or the window is invalid.
    pub fn requeue_policy(&self) -> Result<Arc<dyn RequeuePolicy>, OnHoursError> {
        match (self.requeue_on_hours_from, self.requeue_on_hours_to) {
            (None, None) => Ok(Arc::new(DefaultRequeue)),
            (Some(from), Some(to)) => Ok(Arc::new(OnHoursRequeue::new(from, to)?)),
            (Some(hour), None) | (None, Some(hour)) => Err(OnHoursError::Incomplete(hour)),
        }
    }

    #[must_use]
    pub fn github_client_config(&self) -> GithubClientConfig {
        GithubClientConfig {
            base_url: self.github_api_url.clone(),
            token: self.github_token.clone(),
            timeout: Duration::from_secs(self.github_timeout_secs),
        }
    }
}

fn parse_or_default<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}
