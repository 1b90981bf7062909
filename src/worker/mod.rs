//! Action execution.
//!
//! The orchestrator never touches a browser itself. Every action goes
//! through an [`ActionExecutor`]:
//! - [`DriverExecutor`]: launches an external driver program per action
//! - test code supplies in-process mocks
//!
//! # Execution Flow
//!
//! 1. A worker holds a pool permit, the account lock and a rate-limit slot
//! 2. [`ActionExecutor::execute`] performs the action
//! 3. The returned [`ActionOutcome`] or [`ExecutorError`] becomes the job's
//!    terminal status

pub mod executor;

pub use executor::{ActionExecutor, ActionOutcome, DriverExecutor, ExecutorError};
