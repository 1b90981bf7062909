use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;

use crate::accounts::AccountId;
use crate::config::RateScope;

/// Enforces a minimum interval between consecutive dispatches.
///
/// The read-sleep-write sequence runs under the limiter's own mutex, so
/// concurrent callers are admitted one at a time and each admission is at
/// least `min_interval` after the previous one. Dropping a pending `wait`
/// leaves the recorded dispatch time untouched.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_dispatch: AsyncMutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_dispatch: AsyncMutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Block until the next dispatch slot and return its wall-clock time.
    pub async fn wait(&self) -> DateTime<Utc> {
        let mut last = self.last_dispatch.lock().await;
        if let Some(prev) = *last {
            let ready_at = prev + self.min_interval;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
        Utc::now()
    }
}

/// Rate limiters for the configured scope: one shared gate, or one per account.
#[derive(Debug)]
pub enum RateLimits {
    Global(RateLimiter),
    PerAccount {
        min_interval: Duration,
        limiters: Mutex<HashMap<AccountId, Arc<RateLimiter>>>,
    },
}

impl RateLimits {
    pub fn new(scope: RateScope, min_interval: Duration) -> Self {
        match scope {
            RateScope::Global => RateLimits::Global(RateLimiter::new(min_interval)),
            RateScope::PerAccount => RateLimits::PerAccount {
                min_interval,
                limiters: Mutex::new(HashMap::new()),
            },
        }
    }

    /// Wait for the dispatch slot that governs `account`.
    pub async fn wait(&self, account: &str) -> DateTime<Utc> {
        match self {
            RateLimits::Global(limiter) => limiter.wait().await,
            RateLimits::PerAccount {
                min_interval,
                limiters,
            } => {
                let limiter = {
                    let mut map = limiters.lock().unwrap_or_else(|p| p.into_inner());
                    map.entry(account.to_string())
                        .or_insert_with(|| Arc::new(RateLimiter::new(*min_interval)))
                        .clone()
                };
                limiter.wait().await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_wait_is_immediate() {
        let limiter = RateLimiter::new(Duration::from_secs(10));
        let start = Instant::now();
        limiter.wait().await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn zero_interval_never_sleeps() {
        let limiter = RateLimiter::new(Duration::ZERO);
        let start = Instant::now();
        for _ in 0..50 {
            limiter.wait().await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn concurrent_waits_are_spaced() {
        let interval = Duration::from_millis(80);
        let limiter = Arc::new(RateLimiter::new(interval));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move { limiter.wait().await }));
        }

        let mut admitted = Vec::new();
        for handle in handles {
            admitted.push(handle.await.unwrap());
        }
        admitted.sort();

        let floor = chrono::Duration::from_std(interval - Duration::from_millis(5)).unwrap();
        for pair in admitted.windows(2) {
            assert!(
                pair[1] - pair[0] >= floor,
                "admissions too close: {}",
                pair[1] - pair[0]
            );
        }
    }

    #[tokio::test]
    async fn abandoned_wait_does_not_move_the_slot() {
        let interval = Duration::from_millis(100);
        let limiter = RateLimiter::new(interval);
        let first = limiter.wait().await;

        let abandoned = tokio::time::timeout(Duration::from_millis(20), limiter.wait()).await;
        assert!(abandoned.is_err());

        let next = limiter.wait().await;
        let gap = next - first;
        assert!(gap >= chrono::Duration::milliseconds(95), "gap {gap}");
        assert!(gap < chrono::Duration::milliseconds(160), "gap {gap}");
    }

    #[tokio::test]
    async fn per_account_scope_is_independent() {
        let limits = RateLimits::new(RateScope::PerAccount, Duration::from_secs(5));
        let start = Instant::now();
        limits.wait("alice").await;
        limits.wait("bob").await;
        assert!(start.elapsed() < Duration::from_millis(100));

        let again = tokio::time::timeout(Duration::from_millis(100), limits.wait("alice")).await;
        assert!(again.is_err(), "second alice dispatch should be throttled");
    }

    #[tokio::test]
    async fn global_scope_spans_accounts() {
        let limits = RateLimits::new(RateScope::Global, Duration::from_secs(5));
        limits.wait("alice").await;
        let next = tokio::time::timeout(Duration::from_millis(100), limits.wait("bob")).await;
        assert!(next.is_err(), "bob should wait behind alice's dispatch");
    }
}
