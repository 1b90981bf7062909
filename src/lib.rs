pub mod accounts;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod scheduler;
pub mod shutdown;
pub mod status;
pub mod worker;

pub use orchestrator::{BatchSummary, Orchestrator, Rejection, SubmitReceipt};
