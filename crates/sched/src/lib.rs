//! taktwerk scheduling engines.
//!
//! The [`Scheduler`] registry owns the job table; each registered job gets
//! its own scheduling loop task (recurring pacing or event-pattern polling),
//! and every firing runs on an isolated worker so a crashing invocation
//! cannot corrupt the scheduler or its siblings.

mod event;
mod recurring;
pub mod registry;
pub mod worker;

#[cfg(test)]
pub(crate) mod testutil;

pub use registry::{EventOpts, JobSummary, RecurringOpts, Scheduler};
pub use worker::{ExitStatus, Spawner, TaskSpawner, WorkerHandle};

// Re-exported so callers only need one crate in scope.
pub use taktwerk_core::{
    timezones, BoundJob, Clock, JobKind, JobStatus, SchedError, SchedulerConfig, SystemClock,
    WhenPattern,
};
