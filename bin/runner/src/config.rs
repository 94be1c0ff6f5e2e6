//! Runner configuration.
//!
//! Composes the automation settings with runner-only options, loaded via
//! the `config` crate from `CASEWRIGHT__`-prefixed environment variables:
//!
//! - `CASEWRIGHT__SEED_PATH=/etc/casewright/seed.json`
//! - `CASEWRIGHT__AUTOMATION__TICK_INTERVAL_SECONDS=30`

use casewright_runtime::AutomationConfig;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunnerConfig {
    /// JSON file of workflow drafts and reminders loaded at startup.
    #[serde(default)]
    pub seed_path: Option<PathBuf>,

    /// Settings passed through to the automation.
    #[serde(default)]
    pub automation: AutomationConfig,
}

impl RunnerConfig {
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
        config.automation.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runner_config_defaults() {
        let config = RunnerConfig::default();
        assert!(config.seed_path.is_none());
        assert_eq!(config.automation.tick_interval_seconds, 60);
    }
}
