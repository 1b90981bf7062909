//! Shared helpers for orchestrator integration tests.
//!
//! Provides an in-process executor that records concurrency, plus helpers
//! to build accounts, configs and to analyse the status stream.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use fleet_lite::accounts::{Account, AccountTable};
use fleet_lite::config::RuntimeConfig;
use fleet_lite::scheduler::{ActionKind, JobStatus};
use fleet_lite::status::{StatusEvent, StatusSubscription};
use fleet_lite::worker::{ActionExecutor, ActionOutcome, ExecutorError};

/// How the mock responds for a given account
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed,
    Unsuccessful(String),
    Error(ExecutorError),
    RejectLogin,
    Panic,
}

/// Executor that sleeps for `delay` and tracks how many calls overlap.
#[derive(Debug)]
pub struct MockExecutor {
    delay: Duration,
    behaviors: HashMap<String, Behavior>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    per_account: Mutex<HashMap<String, usize>>,
    max_per_account: AtomicUsize,
    calls: Mutex<Vec<(String, ActionKind)>>,
    completed: AtomicUsize,
}

impl MockExecutor {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            behaviors: HashMap::new(),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            per_account: Mutex::new(HashMap::new()),
            max_per_account: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            completed: AtomicUsize::new(0),
        }
    }

    pub fn with_behavior(mut self, account: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(account.to_string(), behavior);
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn max_per_account(&self) -> usize {
        self.max_per_account.load(Ordering::SeqCst)
    }

    /// Calls that ran to the end of their delay
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<(String, ActionKind)> {
        self.calls.lock().unwrap().clone()
    }

    fn enter(&self, account: &str) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let mut per_account = self.per_account.lock().unwrap();
        let count = per_account.entry(account.to_string()).or_insert(0);
        *count += 1;
        self.max_per_account.fetch_max(*count, Ordering::SeqCst);
    }

    fn leave(&self, account: &str) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if let Some(count) = self.per_account.lock().unwrap().get_mut(account) {
            *count -= 1;
        }
    }
}

/// Decrements the overlap counters even when the call future is dropped.
struct InFlight<'a> {
    executor: &'a MockExecutor,
    account: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.executor.leave(&self.account);
    }
}

#[async_trait]
impl ActionExecutor for MockExecutor {
    async fn execute(
        &self,
        account: &Account,
        action: ActionKind,
        target: &str,
        _payload: Option<&str>,
    ) -> Result<ActionOutcome, ExecutorError> {
        self.calls
            .lock()
            .unwrap()
            .push((account.username.clone(), action));
        self.enter(&account.username);
        let _in_flight = InFlight {
            executor: self,
            account: account.username.clone(),
        };

        tokio::time::sleep(self.delay).await;
        self.completed.fetch_add(1, Ordering::SeqCst);

        match self.behaviors.get(&account.username) {
            None | Some(Behavior::Succeed) => {
                Ok(ActionOutcome::succeeded(format!("{} {}", action, target)))
            }
            Some(Behavior::Unsuccessful(msg)) => Ok(ActionOutcome::failed(msg.clone())),
            Some(Behavior::Error(err)) => Err(err.clone()),
            Some(Behavior::RejectLogin) if action == ActionKind::Login => {
                Ok(ActionOutcome::failed("wrong password"))
            }
            Some(Behavior::RejectLogin) => {
                Ok(ActionOutcome::succeeded(format!("{} {}", action, target)))
            }
            Some(Behavior::Panic) => panic!("driver crashed for {}", account.username),
        }
    }
}

/// Accounts named `acct-0`, `acct-1`, ...
pub fn accounts(n: usize) -> AccountTable {
    AccountTable::new((0..n).map(|i| Account::new(format!("acct-{i}"), "secret")))
}

pub fn named_accounts(names: &[&str]) -> AccountTable {
    AccountTable::new(names.iter().map(|name| Account::new(*name, "secret")))
}

/// Config tuned for fast tests: no login step, no throttling, short grace.
pub fn test_config(max_workers: usize) -> RuntimeConfig {
    RuntimeConfig {
        max_workers,
        min_interval_ms: 0,
        login_before_action: false,
        shutdown_grace_ms: 500,
        ..RuntimeConfig::default()
    }
}

/// Everything already buffered on the subscription.
pub fn drain(sub: &mut StatusSubscription) -> Vec<StatusEvent> {
    let mut events = Vec::new();
    while let Some(event) = sub.try_recv() {
        events.push(event);
    }
    events
}

/// Status sequence per job, in stream order.
pub fn sequences(events: &[StatusEvent]) -> HashMap<Uuid, Vec<JobStatus>> {
    let mut map: HashMap<Uuid, Vec<JobStatus>> = HashMap::new();
    for event in events {
        map.entry(event.job_id).or_default().push(event.status);
    }
    map
}

/// Largest number of jobs simultaneously `Running` according to the stream.
pub fn max_running(events: &[StatusEvent]) -> usize {
    let mut running: HashSet<Uuid> = HashSet::new();
    let mut max = 0;
    for event in events {
        match event.status {
            JobStatus::Running => {
                running.insert(event.job_id);
                max = max.max(running.len());
            }
            JobStatus::Succeeded | JobStatus::Failed => {
                running.remove(&event.job_id);
            }
            JobStatus::Queued => {}
        }
    }
    max
}

/// Largest number of jobs for any one account simultaneously `Running`.
pub fn max_running_per_account(events: &[StatusEvent]) -> usize {
    let mut by_account: HashMap<&str, Vec<StatusEvent>> = HashMap::new();
    for event in events {
        by_account
            .entry(event.account.as_str())
            .or_default()
            .push(event.clone());
    }
    by_account
        .values()
        .map(|events| max_running(events))
        .max()
        .unwrap_or(0)
}

/// Final status of a job according to the stream.
pub fn final_status(events: &[StatusEvent], job_id: Uuid) -> Option<JobStatus> {
    events
        .iter()
        .filter(|e| e.job_id == job_id)
        .map(|e| e.status)
        .last()
}

pub fn is_valid_sequence(seq: &[JobStatus]) -> bool {
    matches!(
        seq,
        [JobStatus::Queued]
            | [JobStatus::Queued, JobStatus::Running]
            | [JobStatus::Queued, JobStatus::Running, JobStatus::Succeeded]
            | [JobStatus::Queued, JobStatus::Running, JobStatus::Failed]
            | [JobStatus::Queued, JobStatus::Failed]
    )
}

/// Wrap an executor for `Orchestrator::start`.
pub fn shared(executor: MockExecutor) -> (Arc<MockExecutor>, Arc<dyn ActionExecutor>) {
    let executor = Arc::new(executor);
    let dyn_executor: Arc<dyn ActionExecutor> = executor.clone();
    (executor, dyn_executor)
}
