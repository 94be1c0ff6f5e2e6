//! Startup errors for the runner.

use crate::seed::SeedError;
use std::fmt;

#[derive(Debug)]
pub enum RunnerError {
    /// The environment configuration is malformed.
    Config { reason: String },
    /// The seed file could not be loaded.
    Seed(SeedError),
}

impl fmt::Display for RunnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { reason } => write!(f, "invalid configuration: {reason}"),
            Self::Seed(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for RunnerError {}

impl From<config::ConfigError> for RunnerError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config {
            reason: e.to_string(),
        }
    }
}

impl From<SeedError> for RunnerError {
    fn from(e: SeedError) -> Self {
        Self::Seed(e)
    }
}
