use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::accounts::AccountId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    Login,
    Like,
    Comment,
    Follow,
    Share,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionKind::Login => write!(f, "login"),
            ActionKind::Like => write!(f, "like"),
            ActionKind::Comment => write!(f, "comment"),
            ActionKind::Follow => write!(f, "follow"),
            ActionKind::Share => write!(f, "share"),
        }
    }
}

impl std::str::FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "login" => Ok(ActionKind::Login),
            "like" => Ok(ActionKind::Like),
            "comment" => Ok(ActionKind::Comment),
            "follow" => Ok(ActionKind::Follow),
            "share" => Ok(ActionKind::Share),
            other => Err(format!("unknown action kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    /// Allowed edges: `Queued -> Running`, `Running -> Succeeded|Failed`,
    /// and `Queued -> Failed` for jobs that never started.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Running)
                | (JobStatus::Queued, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Succeeded)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Succeeded => write!(f, "succeeded"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One requested action for one account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub account: AccountId,
    pub action: ActionKind,
    pub target: String,
    pub payload: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(account: impl Into<AccountId>, action: ActionKind, target: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            account: account.into(),
            action,
            target: target.into(),
            payload: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// Structural checks that need no account table.
    pub fn validate_request(&self) -> Result<(), String> {
        if self.action != ActionKind::Login && self.target.trim().is_empty() {
            return Err(format!("{} job for {} has an empty target", self.action, self.account));
        }
        if self.action == ActionKind::Comment
            && self.payload.as_deref().map_or(true, |p| p.trim().is_empty())
        {
            return Err(format!("comment job for {} has no comment text", self.account));
        }
        Ok(())
    }
}

/// Final state of one job as recorded in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job: Job,
    pub status: JobStatus,
    pub message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn new(job: Job) -> Self {
        Self {
            job,
            status: JobStatus::Queued,
            message: None,
            started_at: None,
            finished_at: None,
        }
    }
}
