use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::accounts::AccountId;

/// Registry of per-account locks.
///
/// Locks are created on first request and never removed, so two jobs for the
/// same account always contend on the same mutex. Waiters are granted the
/// lock in arrival order (tokio's mutex is fair).
#[derive(Debug, Default)]
pub struct AccountLocks {
    locks: Mutex<HashMap<AccountId, Arc<AsyncMutex<()>>>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, account: &str) -> Arc<AsyncMutex<()>> {
        // The map guard is never held across an await.
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(account.to_string())
            .or_insert_with(|| {
                tracing::debug!(account, "Creating account lock");
                Arc::new(AsyncMutex::new(()))
            })
            .clone()
    }

    /// Wait for exclusive access to `account`.
    pub async fn lock(&self, account: &str) -> OwnedMutexGuard<()> {
        self.handle(account).lock_owned().await
    }

    /// Take the account lock only if no other job holds it.
    pub fn try_lock(&self, account: &str) -> Option<OwnedMutexGuard<()>> {
        self.handle(account).try_lock_owned().ok()
    }

    /// Number of distinct accounts seen so far
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
