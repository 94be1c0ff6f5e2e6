//! Per-subject case tracking for casewright.
//!
//! A case follows one subject (an employee, a filing) through a linear
//! workflow, step by step, with due dates, required manual actions and an
//! overall OnTrack/AtRisk/Overdue/Completed status.

pub mod case;
pub mod error;
pub mod store;
pub mod tracker;

pub use case::{Case, CaseStatus, StepState, StepStatus};
pub use error::{CaseError, CaseStoreError};
pub use store::{CaseFilter, CaseStore, InMemoryCaseStore};
pub use tracker::{CaseTracker, DEFAULT_AT_RISK_DAYS};
