pub mod job;
pub mod locks;
pub mod queue;
pub mod rate_limiter;

pub use job::{ActionKind, Job, JobRecord, JobStatus};
pub use locks::AccountLocks;
pub use queue::JobQueue;
pub use rate_limiter::{RateLimiter, RateLimits};
