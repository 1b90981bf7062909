use thiserror::Error;
use uuid::Uuid;

use crate::scheduler::JobStatus;
use crate::worker::ExecutorError;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Login failed: {0}")]
    LoginFailure(String),

    #[error("Action timed out: {0}")]
    ActionTimeout(String),

    #[error("Action target not found: {0}")]
    ActionNotFound(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Action failed: {0}")]
    ActionFailed(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Submission queue is full")]
    QueueFull,

    #[error("Job ledger is full: {0} records are still queued, running or awaited")]
    LedgerFull(usize),

    #[error("Account {0} already has a running job")]
    AccountBusy(String),

    #[error("Orchestrator is shutting down")]
    ShuttingDown,

    #[error("Cancelled")]
    Cancelled,

    #[error("Invalid status transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ExecutorError> for FleetError {
    fn from(err: ExecutorError) -> Self {
        match err {
            ExecutorError::LoginFailure(msg) => FleetError::LoginFailure(msg),
            ExecutorError::ActionNotFound(msg) => FleetError::ActionNotFound(msg),
            ExecutorError::ActionTimeout(msg) => FleetError::ActionTimeout(msg),
            ExecutorError::Transport(msg) => FleetError::Transport(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, FleetError>;
