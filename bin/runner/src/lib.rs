//! Long-running casewright process.
//!
//! Loads configuration and seed data, then drives the automation's `tick`
//! on a fixed cadence until interrupted.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod seed;
