//! Isolated worker invocations.
//!
//! Each firing of a job runs on its own tokio task so a panicking or failing
//! body cannot touch the scheduling loop that spawned it. A dedicated
//! monitor task observes the body's join result and publishes the exit
//! status through a watch channel, so handles clone cheaply and stay
//! queryable after the worker finishes.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use taktwerk_core::BoundJob;

/// Terminal outcome of one worker invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// The body returned `Ok`.
    Success,
    /// The body returned `Err`, panicked, or was terminated.
    Failure,
}

/// Handle to one isolated invocation.
///
/// Clones observe the same underlying worker; dropping every handle does not
/// stop the invocation (termination is explicit).
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    job_name: Arc<str>,
    abort: AbortHandle,
    status: watch::Receiver<Option<ExitStatus>>,
}

impl WorkerHandle {
    /// Whether the invocation is still running.
    pub fn is_alive(&self) -> bool {
        self.status.borrow().is_none()
    }

    /// Exit status; `None` while still running.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        *self.status.borrow()
    }

    /// Wait for the invocation to finish and return its status.
    pub async fn join(&mut self) -> ExitStatus {
        loop {
            if let Some(status) = *self.status.borrow() {
                return status;
            }
            if self.status.changed().await.is_err() {
                // Monitor vanished without publishing; count it as a crash.
                return ExitStatus::Failure;
            }
        }
    }

    /// Forcefully terminate the invocation.
    ///
    /// No cancellation signal is delivered to the body; the task is dropped
    /// at its next await point and the worker reports `Failure`.
    pub fn terminate(&self) {
        self.abort.abort();
    }

    /// Name of the job this worker fired for.
    pub fn job_name(&self) -> &str {
        &self.job_name
    }
}

/// Spawns isolated workers.
///
/// The contract is crash containment, not a specific isolation primitive:
/// the default [`TaskSpawner`] uses one tokio task per invocation, and a
/// thread- or subprocess-backed spawner can implement the same seam as long
/// as a crashing body only ever takes down its own worker.
pub trait Spawner: Send + Sync {
    fn spawn(&self, job_name: &str, job: &BoundJob) -> WorkerHandle;
}

/// Task-per-invocation spawner.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskSpawner;

impl Spawner for TaskSpawner {
    fn spawn(&self, job_name: &str, job: &BoundJob) -> WorkerHandle {
        let (tx, rx) = watch::channel(None);
        let body = tokio::spawn(job.invoke());
        let abort = body.abort_handle();

        let name: Arc<str> = Arc::from(job_name);
        let monitor_name = name.clone();
        tokio::spawn(async move {
            let status = match body.await {
                Ok(Ok(())) => ExitStatus::Success,
                Ok(Err(e)) => {
                    warn!(job = %monitor_name, error = %e, "invocation failed");
                    ExitStatus::Failure
                }
                Err(e) if e.is_cancelled() => {
                    debug!(job = %monitor_name, "invocation terminated");
                    ExitStatus::Failure
                }
                Err(e) => {
                    warn!(job = %monitor_name, error = %e, "invocation panicked");
                    ExitStatus::Failure
                }
            };
            let _ = tx.send(Some(status));
        });

        WorkerHandle {
            job_name: name,
            abort,
            status: rx,
        }
    }
}
