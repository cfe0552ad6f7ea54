//! Job model: bound invocations, job kinds, lifecycle status, retry policy.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Boxed future produced by one invocation of a job's target.
pub type JobFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// A target callable with its arguments bound at registration time.
///
/// The closure captures its own copies of whatever arguments the target
/// needs; the record is fixed from then on. Two registrations of the same
/// target never share captured state. Cloning is cheap (`Arc`).
///
/// # Example
/// ```ignore
/// let job = BoundJob::new(move || {
///     let path = path.clone();
///     async move { backup(&path).await }
/// });
/// ```
#[derive(Clone)]
pub struct BoundJob {
    target: Arc<dyn Fn() -> JobFuture + Send + Sync>,
}

impl BoundJob {
    /// Bind a target callable into an invocation record.
    pub fn new<F, Fut>(target: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            target: Arc::new(move || Box::pin(target())),
        }
    }

    /// Produce one invocation future.
    ///
    /// Each call yields a fresh future; the scheduler runs it on an isolated
    /// worker and observes only its exit status.
    pub fn invoke(&self) -> JobFuture {
        (self.target)()
    }
}

impl fmt::Debug for BoundJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BoundJob(..)")
    }
}

/// What schedule drives a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Fires every `period` seconds, optionally inside a start/stop window.
    Recurring,
    /// Fires when a `day|HH:MM` wildcard pattern matches the wall clock.
    Event,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Recurring => f.write_str("recurring"),
            JobKind::Event => f.write_str("event"),
        }
    }
}

/// Lifecycle status of a registered job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Registered but its loop has not been started yet.
    Pending,
    /// Loop started by [`run`](../taktwerk_sched/struct.Scheduler.html).
    Running,
    /// Windowed recurring job that ran past its `stop` bound.
    Done,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => f.write_str("pending"),
            JobStatus::Running => f.write_str("running"),
            JobStatus::Done => f.write_str("done"),
        }
    }
}

/// Reattempt policy for failed invocations within one firing cycle.
///
/// `total_attempts` counts the first invocation too: a policy of 3 means one
/// initial attempt plus at most two reattempts, each preceded by `backoff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub total_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Single attempt, no reattempts.
    pub fn none() -> Self {
        Self {
            total_attempts: 1,
            backoff: Duration::ZERO,
        }
    }
}
