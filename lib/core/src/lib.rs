//! Core identifiers and error handling for casewright.
//!
//! This crate provides the strongly-typed identifiers and the shared
//! `Result` alias used by every other casewright crate.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{CaseId, ParseIdError, ReminderId, TriggerId, WorkflowId, WorkflowRunId};
