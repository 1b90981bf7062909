use std::collections::{HashMap, HashSet};

use chrono::Utc;
use uuid::Uuid;

use crate::error::{FleetError, Result};
use crate::scheduler::job::{Job, JobRecord, JobStatus};

const DEFAULT_MAX_JOBS: usize = 10_000;

/// Ledger of submitted jobs and their current status.
///
/// Every status change goes through [`JobQueue::transition`], which only
/// accepts forward edges, so a job's recorded history is always a prefix of
/// `Queued, Running, Succeeded|Failed`.
#[derive(Debug)]
pub struct JobQueue {
    jobs: HashMap<Uuid, JobRecord>,
    max_jobs: usize,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_JOBS)
    }

    pub fn with_capacity(max_jobs: usize) -> Self {
        Self {
            jobs: HashMap::new(),
            max_jobs,
        }
    }

    /// Add a new job in `Queued` state. Returns false if the ledger is at capacity.
    pub fn add_job(&mut self, job: Job) -> bool {
        if self.jobs.len() >= self.max_jobs {
            return false;
        }
        self.jobs.insert(job.id, JobRecord::new(job));
        true
    }

    pub fn get_job(&self, id: &Uuid) -> Option<&JobRecord> {
        self.jobs.get(id)
    }

    /// Move a job to `status`, recording the message and timestamps.
    pub fn transition(
        &mut self,
        id: &Uuid,
        status: JobStatus,
        message: Option<String>,
    ) -> Result<()> {
        let record = self.jobs.get_mut(id).ok_or(FleetError::JobNotFound(*id))?;
        if !record.status.can_transition_to(status) {
            return Err(FleetError::InvalidTransition {
                job_id: *id,
                from: record.status,
                to: status,
            });
        }

        record.status = status;
        if message.is_some() {
            record.message = message;
        }
        let now = Utc::now();
        match status {
            JobStatus::Running => record.started_at = Some(now),
            JobStatus::Succeeded | JobStatus::Failed => record.finished_at = Some(now),
            JobStatus::Queued => {}
        }
        Ok(())
    }

    /// Jobs not yet in a terminal state
    pub fn active_jobs(&self) -> Vec<&JobRecord> {
        self.jobs
            .values()
            .filter(|r| !r.status.is_terminal())
            .collect()
    }

    /// Get all jobs sorted chronologically by creation time
    pub fn all_jobs(&self) -> Vec<&JobRecord> {
        let mut jobs: Vec<&JobRecord> = self.jobs.values().collect();
        jobs.sort_by_key(|r| r.job.created_at);
        jobs
    }

    /// Jobs submitted for one account, oldest first
    pub fn jobs_for_account(&self, account: &str) -> Vec<&JobRecord> {
        let mut jobs: Vec<&JobRecord> = self
            .jobs
            .values()
            .filter(|r| r.job.account == account)
            .collect();
        jobs.sort_by_key(|r| r.job.created_at);
        jobs
    }

    /// True once every listed job is terminal (unknown ids count as finished).
    pub fn all_terminal(&self, ids: &[Uuid]) -> bool {
        ids.iter().all(|id| {
            self.jobs
                .get(id)
                .map_or(true, |record| record.status.is_terminal())
        })
    }

    /// Remove succeeded and failed jobs. Returns the number of jobs removed.
    pub fn cleanup_finished_jobs(&mut self) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|_, record| !record.status.is_terminal());
        before - self.jobs.len()
    }

    /// Remove finished jobs except those listed in `keep`. Returns the number removed.
    pub fn prune_finished_except(&mut self, keep: &HashSet<Uuid>) -> usize {
        let before = self.jobs.len();
        self.jobs
            .retain(|id, record| !record.status.is_terminal() || keep.contains(id));
        before - self.jobs.len()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.jobs.len() >= self.max_jobs
    }
}
