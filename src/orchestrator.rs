use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify, OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::accounts::{Account, AccountId, AccountTable};
use crate::config::{BusyPolicy, RuntimeConfig};
use crate::error::{FleetError, Result};
use crate::scheduler::job::JobRecord;
use crate::scheduler::{AccountLocks, ActionKind, Job, JobQueue, JobStatus, RateLimits};
use crate::status::{StatusEvent, StatusReporter, StatusSubscription};
use crate::worker::ActionExecutor;

/// A job refused at submission time, before any resource was acquired.
#[derive(Debug)]
pub struct Rejection {
    pub job: Job,
    pub error: FleetError,
}

/// Outcome of one `submit` call.
#[derive(Debug, Default)]
pub struct SubmitReceipt {
    pub accepted: Vec<Uuid>,
    pub rejected: Vec<Rejection>,
}

/// Final state of a set of jobs.
#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub records: Vec<JobRecord>,
}

impl BatchSummary {
    fn collect(queue: &JobQueue, ids: &[Uuid]) -> Self {
        let records: Vec<JobRecord> = ids
            .iter()
            .filter_map(|id| queue.get_job(id).cloned())
            .collect();
        Self {
            succeeded: records
                .iter()
                .filter(|r| r.status == JobStatus::Succeeded)
                .count(),
            failed: records
                .iter()
                .filter(|r| r.status == JobStatus::Failed)
                .count(),
            records,
        }
    }
}

/// State shared by the dispatcher and every worker task.
struct Shared {
    config: RuntimeConfig,
    accounts: RwLock<AccountTable>,
    jobs: RwLock<JobQueue>,
    /// Ids some `wait_for` call is watching, with a count per call
    awaited: StdMutex<HashMap<Uuid, usize>>,
    job_finished: Notify,
    pool: Arc<Semaphore>,
    locks: AccountLocks,
    rate: RateLimits,
    reporter: StatusReporter,
    executor: Arc<dyn ActionExecutor>,
    cancel: CancellationToken,
}

/// Runs account-scoped jobs in parallel.
///
/// Each job acquires, in this order:
/// 1. a worker-pool permit (bounds total parallelism to `max_workers`)
/// 2. its account's lock (one running job per account)
/// 3. a rate-limiter slot (minimum spacing between dispatches)
///
/// and releases them in reverse order on every exit path. Statuses are
/// published on the [`StatusReporter`] as `Queued`, `Running`, then
/// `Succeeded` or `Failed`.
pub struct Orchestrator {
    shared: Arc<Shared>,
    submit_tx: mpsc::Sender<Job>,
    tracker: TaskTracker,
    dispatcher: StdMutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.shared.config)
            .field("cancelled", &self.shared.cancel.is_cancelled())
            .field("workers", &self.tracker.len())
            .finish()
    }
}

impl Orchestrator {
    /// Build the orchestrator and spawn its dispatcher loop.
    ///
    /// # Errors
    ///
    /// Returns `FleetError::Config` if `config` fails validation.
    pub fn start(
        config: RuntimeConfig,
        accounts: AccountTable,
        executor: Arc<dyn ActionExecutor>,
    ) -> Result<Self> {
        config.validate()?;

        let (submit_tx, submit_rx) = mpsc::channel(config.queue_capacity);
        let shared = Arc::new(Shared {
            pool: Arc::new(Semaphore::new(config.max_workers)),
            rate: RateLimits::new(config.rate_scope, config.min_interval()),
            reporter: StatusReporter::new(config.status_buffer),
            accounts: RwLock::new(accounts),
            jobs: RwLock::new(JobQueue::with_capacity(config.ledger_capacity)),
            awaited: StdMutex::new(HashMap::new()),
            job_finished: Notify::new(),
            locks: AccountLocks::new(),
            executor,
            cancel: CancellationToken::new(),
            config,
        });
        let tracker = TaskTracker::new();

        tracing::info!(
            max_workers = shared.config.max_workers,
            min_interval_ms = shared.config.min_interval_ms,
            rate_scope = ?shared.config.rate_scope,
            busy_policy = ?shared.config.busy_policy,
            "Starting orchestrator"
        );

        let dispatcher = tokio::spawn(Self::dispatch_loop(
            shared.clone(),
            submit_rx,
            tracker.clone(),
        ));

        Ok(Self {
            shared,
            submit_tx,
            tracker,
            dispatcher: StdMutex::new(Some(dispatcher)),
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.shared.config
    }

    pub fn subscribe(&self) -> StatusSubscription {
        self.shared.reporter.subscribe()
    }

    /// Token that, once cancelled, stops dispatching. See [`Orchestrator::shutdown`].
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    /// Swap in a new account snapshot. Jobs already dispatched keep the
    /// credentials they started with.
    pub async fn replace_accounts(&self, accounts: AccountTable) {
        *self.shared.accounts.write().await = accounts;
    }

    /// Submit a batch. Invalid jobs are rejected up front and never appear
    /// on the status stream; accepted jobs are published as `Queued`.
    pub async fn submit(&self, jobs: Vec<Job>) -> SubmitReceipt {
        let mut receipt = SubmitReceipt::default();
        for job in jobs {
            match self.enqueue(&job).await {
                Ok(()) => receipt.accepted.push(job.id),
                Err(error) => {
                    tracing::warn!(
                        job_id = %job.id,
                        account = %job.account,
                        error = %error,
                        "Job rejected"
                    );
                    receipt.rejected.push(Rejection { job, error });
                }
            }
        }
        receipt
    }

    /// One job per known account, in account-table order.
    pub async fn submit_all(
        &self,
        action: ActionKind,
        target: &str,
        payload: Option<&str>,
    ) -> SubmitReceipt {
        let ids = self.shared.accounts.read().await.ids();
        self.submit_selected(&ids, action, target, payload).await
    }

    pub async fn submit_selected(
        &self,
        account_ids: &[AccountId],
        action: ActionKind,
        target: &str,
        payload: Option<&str>,
    ) -> SubmitReceipt {
        let jobs = account_ids
            .iter()
            .map(|id| {
                let job = Job::new(id.clone(), action, target);
                match payload {
                    Some(text) => job.with_payload(text),
                    None => job,
                }
            })
            .collect();
        self.submit(jobs).await
    }

    async fn enqueue(&self, job: &Job) -> Result<()> {
        if self.shared.cancel.is_cancelled() {
            return Err(FleetError::ShuttingDown);
        }
        job.validate_request().map_err(FleetError::Validation)?;
        if !self.shared.accounts.read().await.contains(&job.account) {
            return Err(FleetError::Validation(format!(
                "unknown account {}",
                job.account
            )));
        }

        // Reserve the queue slot first so a full queue rejects the job
        // before it is recorded or announced.
        let permit = self.submit_tx.try_reserve().map_err(|e| match e {
            TrySendError::Full(()) => FleetError::QueueFull,
            TrySendError::Closed(()) => FleetError::ShuttingDown,
        })?;

        {
            let mut jobs = self.shared.jobs.write().await;
            if jobs.is_full() {
                let keep = self.shared.awaited_ids();
                let pruned = jobs.prune_finished_except(&keep);
                tracing::debug!(pruned, "Pruned finished jobs from full ledger");
            }
            if !jobs.add_job(job.clone()) {
                return Err(FleetError::LedgerFull(jobs.len()));
            }
            self.shared.reporter.publish(StatusEvent::for_job(
                job,
                JobStatus::Queued,
                None,
                Utc::now(),
            ));
        }

        permit.send(job.clone());
        tracing::debug!(job_id = %job.id, account = %job.account, action = %job.action, "Job queued");
        Ok(())
    }

    /// Wait until every listed job is terminal and summarize them.
    ///
    /// Listed jobs are kept in the ledger while the call is pending. Once it
    /// returns, their records may be pruned to make room for new submissions.
    pub async fn wait_for(&self, ids: &[Uuid]) -> BatchSummary {
        let _awaiting = Awaiting::register(&self.shared.awaited, ids);
        loop {
            let finished = self.shared.job_finished.notified();
            {
                let jobs = self.shared.jobs.read().await;
                if jobs.all_terminal(ids) {
                    return BatchSummary::collect(&jobs, ids);
                }
            }
            finished.await;
        }
    }

    pub async fn job(&self, id: &Uuid) -> Option<JobRecord> {
        self.shared.jobs.read().await.get_job(id).cloned()
    }

    /// All recorded jobs, oldest first
    pub async fn jobs(&self) -> Vec<JobRecord> {
        self.shared
            .jobs
            .read()
            .await
            .all_jobs()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Forget finished jobs. Returns how many records were removed.
    pub async fn prune_finished(&self) -> usize {
        self.shared.jobs.write().await.cleanup_finished_jobs()
    }

    /// Stop dispatching and wind down.
    ///
    /// Jobs that have not started fail with `Cancelled`. Running actions get
    /// `shutdown_grace_ms` to finish before they are dropped and failed.
    /// Returns once every worker has exited and released its resources.
    pub async fn shutdown(&self) {
        tracing::info!("Orchestrator shutting down");
        self.shared.cancel.cancel();

        let dispatcher = self
            .dispatcher
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(handle) = dispatcher {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Dispatcher task failed");
            }
        }

        self.tracker.close();
        self.tracker.wait().await;

        // A submission racing the cancel may have been queued after the
        // dispatcher stopped reading; nothing will ever run it.
        let orphans: Vec<Job> = {
            let jobs = self.shared.jobs.read().await;
            jobs.active_jobs().into_iter().map(|r| r.job.clone()).collect()
        };
        for job in orphans {
            self.shared
                .report(&job, JobStatus::Failed, Some(FleetError::Cancelled.to_string()), None)
                .await;
        }
        tracing::info!("Orchestrator stopped");
    }

    /// Dispatcher loop: hands each queued job to its own worker task.
    ///
    /// On cancellation, jobs still sitting in the submission queue are
    /// failed without being started.
    async fn dispatch_loop(
        shared: Arc<Shared>,
        mut submit_rx: mpsc::Receiver<Job>,
        tracker: TaskTracker,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = shared.cancel.cancelled() => break,
                next = submit_rx.recv() => match next {
                    Some(job) => {
                        let worker = shared.clone();
                        tracker.spawn(async move { worker.supervise(job).await });
                    }
                    None => break,
                },
            }
        }

        submit_rx.close();
        while let Ok(job) = submit_rx.try_recv() {
            shared
                .report(&job, JobStatus::Failed, Some(FleetError::Cancelled.to_string()), None)
                .await;
        }
        tracing::debug!("Dispatcher stopped");
    }
}

/// Registration of ids in `Shared::awaited` for the lifetime of one `wait_for`.
struct Awaiting<'a> {
    awaited: &'a StdMutex<HashMap<Uuid, usize>>,
    ids: Vec<Uuid>,
}

impl<'a> Awaiting<'a> {
    fn register(awaited: &'a StdMutex<HashMap<Uuid, usize>>, ids: &[Uuid]) -> Self {
        let mut map = awaited.lock().unwrap_or_else(|p| p.into_inner());
        for id in ids {
            *map.entry(*id).or_insert(0) += 1;
        }
        Self {
            awaited,
            ids: ids.to_vec(),
        }
    }
}

impl Drop for Awaiting<'_> {
    fn drop(&mut self) {
        let mut map = self.awaited.lock().unwrap_or_else(|p| p.into_inner());
        for id in &self.ids {
            if let Some(count) = map.get_mut(id) {
                *count -= 1;
                if *count == 0 {
                    map.remove(id);
                }
            }
        }
    }
}

impl Shared {
    fn awaited_ids(&self) -> HashSet<Uuid> {
        self.awaited
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .keys()
            .copied()
            .collect()
    }

    /// Record a transition in the ledger and publish it.
    ///
    /// The ledger write lock is held while publishing so the stream order
    /// matches the ledger order.
    async fn report(
        &self,
        job: &Job,
        status: JobStatus,
        message: Option<String>,
        at: Option<DateTime<Utc>>,
    ) {
        let mut jobs = self.jobs.write().await;
        match jobs.transition(&job.id, status, message.clone()) {
            Ok(()) => {
                self.reporter.publish(StatusEvent::for_job(
                    job,
                    status,
                    message,
                    at.unwrap_or_else(Utc::now),
                ));
                if status.is_terminal() {
                    self.job_finished.notify_waiters();
                }
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Status update refused");
            }
        }
    }

    async fn fail(&self, job: &Job, error: FleetError) {
        tracing::warn!(job_id = %job.id, account = %job.account, error = %error, "Job failed");
        self.report(job, JobStatus::Failed, Some(error.to_string()), None)
            .await;
    }

    /// Run the job in its own task so a panicking executor still ends in `Failed`.
    async fn supervise(self: Arc<Self>, job: Job) {
        let worker = tokio::spawn(self.clone().run_job(job.clone()));
        if let Err(e) = worker.await {
            tracing::error!(job_id = %job.id, error = %e, "Worker task aborted");
            self.fail(&job, FleetError::Internal(format!("worker aborted: {}", e)))
                .await;
        }
    }

    async fn run_job(self: Arc<Self>, job: Job) {
        let account = self.accounts.read().await.get(&job.account);
        let account = match account {
            Some(account) => account,
            None => {
                let error = FleetError::Validation(format!("unknown account {}", job.account));
                self.fail(&job, error).await;
                return;
            }
        };

        // Guards are declared in acquisition order and dropped in reverse.
        let _permit = match self.acquire_permit().await {
            Ok(permit) => permit,
            Err(e) => return self.fail(&job, e).await,
        };

        let _account_guard = match self.config.busy_policy {
            BusyPolicy::Queue => {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return self.fail(&job, FleetError::Cancelled).await,
                    guard = self.locks.lock(&job.account) => guard,
                }
            }
            BusyPolicy::Reject => match self.locks.try_lock(&job.account) {
                Some(guard) => guard,
                None => {
                    return self
                        .fail(&job, FleetError::AccountBusy(job.account.clone()))
                        .await
                }
            },
        };

        let dispatched_at = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return self.fail(&job, FleetError::Cancelled).await,
            at = self.rate.wait(&job.account) => at,
        };

        self.report(&job, JobStatus::Running, None, Some(dispatched_at))
            .await;
        tracing::info!(job_id = %job.id, account = %job.account, action = %job.action, "Job running");

        match self.execute_with_grace(&account, &job).await {
            Ok(message) => {
                tracing::info!(job_id = %job.id, account = %job.account, "Job succeeded");
                self.report(&job, JobStatus::Succeeded, Some(message), None)
                    .await;
            }
            Err(e) => self.fail(&job, e).await,
        }

        self.cooldown().await;
    }

    async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(FleetError::Cancelled),
            permit = self.pool.clone().acquire_owned() => permit.map_err(|_| {
                tracing::error!("Worker pool semaphore closed");
                FleetError::Internal("worker pool closed".into())
            }),
        }
    }

    /// Run the action; after cancellation it gets the grace period to finish.
    async fn execute_with_grace(&self, account: &Account, job: &Job) -> Result<String> {
        let work = self.perform(account, job);
        tokio::pin!(work);

        tokio::select! {
            result = &mut work => result,
            _ = self.cancel.cancelled() => {
                let grace = self.config.shutdown_grace();
                match tokio::time::timeout(grace, &mut work).await {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::warn!(job_id = %job.id, ?grace, "Action interrupted after grace period");
                        Err(FleetError::Cancelled)
                    }
                }
            }
        }
    }

    async fn perform(&self, account: &Account, job: &Job) -> Result<String> {
        if self.config.login_before_action && job.action != ActionKind::Login {
            self.call(account, ActionKind::Login, "", None).await?;
        }
        self.call(account, job.action, &job.target, job.payload.as_deref())
            .await
    }

    async fn call(
        &self,
        account: &Account,
        action: ActionKind,
        target: &str,
        payload: Option<&str>,
    ) -> Result<String> {
        let call = self.executor.execute(account, action, target, payload);
        let outcome = match self.config.action_timeout() {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                FleetError::ActionTimeout(format!("{} exceeded {:?}", action, limit))
            })??,
            None => call.await?,
        };

        match (outcome.success, action) {
            (true, _) => Ok(outcome.message),
            (false, ActionKind::Login) => Err(FleetError::LoginFailure(outcome.message)),
            (false, _) => Err(FleetError::ActionFailed(outcome.message)),
        }
    }

    /// Random pause after an action, still holding the account lock.
    async fn cooldown(&self) {
        let Some((min, max)) = self.config.cooldown_range() else {
            return;
        };
        let pause = rand::thread_rng().gen_range(min..=max);
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(pause) => {}
        }
    }
}
