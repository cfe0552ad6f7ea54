//! Shared test fixtures: pinned clocks, a recording spawner and canned jobs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use tokio::time::Instant;

use taktwerk_core::{BoundJob, Clock, JobStatus, RetryPolicy};

use crate::registry::LoopCtx;
use crate::worker::{Spawner, TaskSpawner, WorkerHandle};

/// Clock pinned to one instant (stored as UTC).
pub(crate) struct FixedClock {
    now: Mutex<NaiveDateTime>,
}

impl FixedClock {
    pub(crate) fn at(now: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }
}

impl Clock for FixedClock {
    fn now_in(&self, tz: Tz) -> DateTime<Tz> {
        tz.from_utc_datetime(&self.now.lock().unwrap())
    }
}

/// Clock that tracks tokio's (paused) time: the wall clock advances exactly
/// as far as the test advances the runtime.
pub(crate) struct TimeDrivenClock {
    epoch: NaiveDateTime,
    base: Instant,
}

impl TimeDrivenClock {
    /// Must be constructed inside the test runtime.
    pub(crate) fn starting_at(epoch: NaiveDateTime) -> Self {
        Self {
            epoch,
            base: Instant::now(),
        }
    }
}

impl Clock for TimeDrivenClock {
    fn now_in(&self, tz: Tz) -> DateTime<Tz> {
        let elapsed = chrono::Duration::from_std(self.base.elapsed()).unwrap();
        tz.from_utc_datetime(&(self.epoch + elapsed))
    }
}

/// Spawner that records every spawn (instant and handle) while delegating the
/// actual work to [`TaskSpawner`], so exit statuses are real.
#[derive(Default)]
pub(crate) struct RecordingSpawner {
    inner: TaskSpawner,
    instants: Arc<Mutex<Vec<Instant>>>,
    handles: Arc<Mutex<Vec<WorkerHandle>>>,
}

impl RecordingSpawner {
    pub(crate) fn instants(&self) -> Arc<Mutex<Vec<Instant>>> {
        self.instants.clone()
    }

    pub(crate) fn handles(&self) -> Arc<Mutex<Vec<WorkerHandle>>> {
        self.handles.clone()
    }
}

impl Spawner for RecordingSpawner {
    fn spawn(&self, job_name: &str, job: &BoundJob) -> WorkerHandle {
        let handle = self.inner.spawn(job_name, job);
        self.instants.lock().unwrap().push(Instant::now());
        self.handles.lock().unwrap().push(handle.clone());
        handle
    }
}

/// Panics on its first spawn and delegates from then on. Drives the
/// engines' in-loop cycle containment.
#[derive(Default)]
pub(crate) struct PanicOnceSpawner {
    tripped: AtomicBool,
    pub(crate) inner: RecordingSpawner,
}

impl Spawner for PanicOnceSpawner {
    fn spawn(&self, job_name: &str, job: &BoundJob) -> WorkerHandle {
        if !self.tripped.swap(true, Ordering::SeqCst) {
            panic!("spawner wedged");
        }
        self.inner.spawn(job_name, job)
    }
}

// ── Canned jobs ─────────────────────────────────────────────────────

pub(crate) fn noop_job() -> BoundJob {
    BoundJob::new(|| async { Ok(()) })
}

pub(crate) fn failing_job() -> BoundJob {
    BoundJob::new(|| async { Err(anyhow::anyhow!("canned failure")) })
}

/// Never finishes on its own; only termination ends it.
pub(crate) fn pending_job() -> BoundJob {
    BoundJob::new(|| async {
        std::future::pending::<()>().await;
        Ok(())
    })
}

/// A loop context as the registry would build it, status already `Running`.
pub(crate) fn loop_ctx(
    name: &str,
    job: BoundJob,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    spawner: Arc<dyn Spawner>,
) -> LoopCtx {
    LoopCtx {
        name: name.to_string(),
        job,
        retry,
        workers: Arc::new(Mutex::new(Vec::new())),
        status: Arc::new(Mutex::new(JobStatus::Running)),
        clock,
        spawner,
        verbose: false,
    }
}
