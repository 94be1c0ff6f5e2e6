//! Automation configuration.
//!
//! Loaded via the `config` crate from `CASEWRIGHT__`-prefixed environment
//! variables, e.g. `CASEWRIGHT__FAILURE_RATE_THRESHOLD=0.25`.

use chrono::Duration;
use serde::Deserialize;

/// Longest failure window or stale threshold accepted: one leap year.
const MAX_WINDOW_HOURS: i64 = 24 * 366;

/// Operator-tunable settings for an [`Automation`](crate::Automation).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AutomationConfig {
    /// Minutes after which a Running Run raises a stale alarm.
    /// Unset disables stale alarms.
    #[serde(default)]
    pub stale_run_threshold_minutes: Option<i64>,

    /// Failure rate above which a definition moves to Error.
    #[serde(default = "default_failure_rate_threshold")]
    pub failure_rate_threshold: f64,

    /// Trailing window, in hours, the failure rate is computed over.
    #[serde(default = "default_failure_window_hours")]
    pub failure_window_hours: i64,

    /// Terminal Runs required in the window before the failure rate counts.
    #[serde(default = "default_failure_min_runs")]
    pub failure_min_runs: usize,

    /// Days before a step's due date at which its case becomes AtRisk.
    #[serde(default = "default_case_at_risk_days")]
    pub case_at_risk_days: i64,

    /// Seconds between ticks in a long-running process.
    #[serde(default = "default_tick_interval_seconds")]
    pub tick_interval_seconds: u64,
}

fn default_failure_rate_threshold() -> f64 {
    0.5
}

fn default_failure_window_hours() -> i64 {
    24
}

fn default_failure_min_runs() -> usize {
    3
}

fn default_case_at_risk_days() -> i64 {
    3
}

fn default_tick_interval_seconds() -> u64 {
    60
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            stale_run_threshold_minutes: None,
            failure_rate_threshold: default_failure_rate_threshold(),
            failure_window_hours: default_failure_window_hours(),
            failure_min_runs: default_failure_min_runs(),
            case_at_risk_days: default_case_at_risk_days(),
            tick_interval_seconds: default_tick_interval_seconds(),
        }
    }
}

impl AutomationConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is malformed or out of range.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let config: Self = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("CASEWRIGHT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values that deserialize but make no sense as durations or
    /// rates.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Message` naming the offending setting.
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        let invalid = |setting: &str, reason: String| {
            Err(config::ConfigError::Message(format!("{setting}: {reason}")))
        };

        if let Some(minutes) = self.stale_run_threshold_minutes {
            if !(1..=MAX_WINDOW_HOURS * 60).contains(&minutes) {
                return invalid(
                    "stale_run_threshold_minutes",
                    format!("{minutes} is outside 1..={}", MAX_WINDOW_HOURS * 60),
                );
            }
        }
        if !(1..=MAX_WINDOW_HOURS).contains(&self.failure_window_hours) {
            return invalid(
                "failure_window_hours",
                format!("{} is outside 1..={MAX_WINDOW_HOURS}", self.failure_window_hours),
            );
        }
        if !(0.0..=1.0).contains(&self.failure_rate_threshold) {
            return invalid(
                "failure_rate_threshold",
                format!("{} is outside 0..=1", self.failure_rate_threshold),
            );
        }
        if self.case_at_risk_days < 0 {
            return invalid(
                "case_at_risk_days",
                format!("{} is negative", self.case_at_risk_days),
            );
        }
        if self.tick_interval_seconds == 0 {
            return invalid("tick_interval_seconds", "must be positive".to_string());
        }
        Ok(())
    }

    /// The stale-run threshold, if configured and in range.
    #[must_use]
    pub fn stale_run_threshold(&self) -> Option<Duration> {
        self.stale_run_threshold_minutes
            .filter(|minutes| (1..=MAX_WINDOW_HOURS * 60).contains(minutes))
            .and_then(Duration::try_minutes)
    }

    /// The failure window; out-of-range values fall back to the default.
    #[must_use]
    pub fn failure_window(&self) -> Duration {
        Some(self.failure_window_hours)
            .filter(|hours| (1..=MAX_WINDOW_HOURS).contains(hours))
            .and_then(Duration::try_hours)
            .unwrap_or_else(|| Duration::hours(default_failure_window_hours()))
    }
}
