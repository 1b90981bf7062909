//! Job status bus.
//!
//! Workers publish [`StatusEvent`]s without blocking; any number of
//! subscribers consume them at their own pace. The bus is a bounded ring
//! (`tokio::sync::broadcast`) with a **drop-oldest** overflow policy: a
//! subscriber that falls more than `capacity` events behind skips the oldest
//! ones and the gap is counted in [`StatusSubscription::dropped`]. Events are
//! delivered in publish order, which keeps every account's events in the
//! order its worker produced them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use uuid::Uuid;

use crate::accounts::AccountId;
use crate::scheduler::{ActionKind, Job, JobStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEvent {
    pub job_id: Uuid,
    pub account: AccountId,
    pub action: ActionKind,
    pub status: JobStatus,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl StatusEvent {
    pub fn for_job(
        job: &Job,
        status: JobStatus,
        message: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id: job.id,
            account: job.account.clone(),
            action: job.action,
            status,
            message,
            timestamp,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatusReporter {
    tx: broadcast::Sender<StatusEvent>,
}

impl StatusReporter {
    /// `capacity` is rounded up to a power of two by the underlying channel.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Never blocks; with no subscribers the event is discarded.
    pub fn publish(&self, event: StatusEvent) {
        tracing::debug!(
            job_id = %event.job_id,
            account = %event.account,
            status = %event.status,
            "Status published"
        );
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> StatusSubscription {
        StatusSubscription {
            rx: self.tx.subscribe(),
            dropped: 0,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// One subscriber's view of the bus.
#[derive(Debug)]
pub struct StatusSubscription {
    rx: broadcast::Receiver<StatusEvent>,
    dropped: u64,
}

impl StatusSubscription {
    /// Next event, or `None` once every publisher is gone and the buffer is drained.
    pub async fn recv(&mut self) -> Option<StatusEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => self.record_lag(n),
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<StatusEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => self.record_lag(n),
                Err(_) => return None,
            }
        }
    }

    /// Events this subscriber lost to overflow so far
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Adapt into a `Stream`; overflow gaps are skipped silently.
    pub fn into_stream(self) -> impl Stream<Item = StatusEvent> {
        BroadcastStream::new(self.rx).filter_map(|item| item.ok())
    }

    fn record_lag(&mut self, n: u64) {
        self.dropped += n;
        tracing::warn!(dropped = n, "Status subscriber lagged, oldest events dropped");
    }
}
