//! Workflow automation runtime for casewright.
//!
//! Wires the trigger registry, execution engine, run history, case tracker
//! and deadline scheduler behind one [`Automation`] facade, with the
//! failure-rate policy that moves misbehaving definitions to Error.

pub mod automation;
pub mod config;
pub mod error;
pub mod health;

pub use automation::{Automation, DefinitionListing, Launched, LaunchedRun, Launches, TickReport};
pub use config::AutomationConfig;
pub use error::AutomationError;
pub use health::{FailurePolicy, HealthMonitor};
