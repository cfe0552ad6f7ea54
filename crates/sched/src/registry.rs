//! Job registry: owns the set of registered jobs, starts one scheduling loop
//! per job, tracks worker liveness, and answers summary/removal calls.
//!
//! The job table is registration-ordered. Each entry shares two cells with
//! its loop task: the worker liveness list (so removal can reap in-flight
//! invocations) and the status cell (so a windowed job can report `done`
//! when it runs past its stop bound).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use indexmap::IndexMap;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use taktwerk_core::{
    parse_bound, parse_timezone, BoundJob, Clock, JobKind, JobStatus, RetryPolicy, SchedError,
    SchedulerConfig, SystemClock, WhenPattern,
};

use crate::event::{self, EventPacing, EventSpec};
use crate::recurring::{self, RecurringSpec};
use crate::worker::{Spawner, TaskSpawner, WorkerHandle};

// ── Shared per-job cells ────────────────────────────────────────────

/// Live worker handles for one job, shared between its loop and the registry.
pub(crate) type WorkerSet = Arc<Mutex<Vec<WorkerHandle>>>;

/// Job status cell, shared so a loop can report `done` back to the table.
pub(crate) type StatusCell = Arc<Mutex<JobStatus>>;

pub(crate) fn track(workers: &WorkerSet, handle: WorkerHandle) {
    workers.lock().unwrap().push(handle);
}

pub(crate) fn reap_finished(workers: &WorkerSet) {
    workers.lock().unwrap().retain(|w| w.is_alive());
}

pub(crate) fn terminate_all(workers: &WorkerSet) {
    for worker in workers.lock().unwrap().drain(..) {
        worker.terminate();
    }
}

/// Resourceful wait used by every scheduling loop instead of a raw sleep.
///
/// Reaps this job's finished workers first, then sleeps only the remaining
/// delta to a deadline anchored on entry, so paced loops don't drift. No-op
/// for a zero duration.
pub(crate) async fn sleep_and_reap(workers: &WorkerSet, duration: Duration) {
    if duration.is_zero() {
        return;
    }
    let deadline = Instant::now() + duration;
    reap_finished(workers);
    tokio::time::sleep_until(deadline).await;
}

// ── Loop context ────────────────────────────────────────────────────

/// Everything a scheduling loop needs, owned so the loop task is `'static`.
pub(crate) struct LoopCtx {
    pub name: String,
    pub job: BoundJob,
    pub retry: RetryPolicy,
    pub workers: WorkerSet,
    pub status: StatusCell,
    pub clock: Arc<dyn Clock>,
    pub spawner: Arc<dyn Spawner>,
    pub verbose: bool,
}

impl LoopCtx {
    /// Human-oriented diagnostics: `info` when verbose, `debug` otherwise.
    pub(crate) fn diag(&self, msg: &str) {
        if self.verbose {
            info!(job = %self.name, "{msg}");
        } else {
            debug!(job = %self.name, "{msg}");
        }
    }
}

/// Schedule stored with each entry until its loop is started.
pub(crate) enum LoopSpec {
    Recurring(RecurringSpec),
    Event(EventSpec),
}

// ── Registration options ────────────────────────────────────────────

/// Options for [`Scheduler::add_recurring_job`].
#[derive(Debug, Clone, Default)]
pub struct RecurringOpts {
    /// Job name; generated when absent (closures carry no identity).
    pub name: Option<String>,
    /// Earliest wall-clock at which the job may fire, `"Mon DD HH:MM:SS YYYY"`.
    pub start: Option<String>,
    /// Wall-clock past which the loop terminates, same format.
    pub stop: Option<String>,
    /// IANA zone the window is interpreted in; UTC when absent.
    pub timezone: Option<String>,
    /// Reattempts after a failed invocation, per period.
    pub max_attempts: u32,
    /// Delay reserved before each reattempt checkpoint, seconds.
    pub backoff_secs: u64,
}

/// Options for [`Scheduler::add_event_job`].
#[derive(Debug, Clone, Default)]
pub struct EventOpts {
    /// Job name; generated when absent.
    pub name: Option<String>,
    /// Total attempts per matched tick; config default (3) when absent.
    pub max_attempts: Option<u32>,
    /// Delay before a reattempt, seconds; config default (10) when absent.
    pub backoff_secs: Option<u64>,
}

// ── Summary rows ────────────────────────────────────────────────────

/// One row of [`Scheduler::job_summary`], in registration order.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub name: String,
    pub kind: JobKind,
    /// Human-readable schedule line, e.g. `backup [recurring | 300-second(s) | UTC]`.
    pub describe: String,
    pub status: JobStatus,
    /// Identifier of the loop hosting this job, once started.
    pub loop_id: Option<Uuid>,
    /// Whether that loop is currently alive.
    pub alive: bool,
}

impl std::fmt::Display for JobSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} | status={}", self.describe, self.status)?;
        match self.loop_id {
            Some(id) => write!(f, " | running in {} (alive={})", id.simple(), self.alive),
            None => write!(f, " | not started"),
        }
    }
}

// ── Scheduler ───────────────────────────────────────────────────────

struct JobEntry {
    kind: JobKind,
    describe: String,
    job: BoundJob,
    retry: RetryPolicy,
    spec: LoopSpec,
    status: StatusCell,
    workers: WorkerSet,
    loop_id: Option<Uuid>,
    loop_handle: Option<JoinHandle<()>>,
}

/// The job registry and public scheduling API.
pub struct Scheduler {
    jobs: Mutex<IndexMap<String, JobEntry>>,
    clock: Arc<dyn Clock>,
    spawner: Arc<dyn Spawner>,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Create a scheduler with default pacing.
    pub fn new(verbose: bool) -> Self {
        Self::with_config(SchedulerConfig {
            verbose,
            ..SchedulerConfig::default()
        })
    }

    /// Create a scheduler from an explicit configuration.
    pub fn with_config(config: SchedulerConfig) -> Self {
        Self::with_parts(config, Arc::new(SystemClock), Arc::new(TaskSpawner))
    }

    /// Full-injection constructor: clock and spawner are swappable so tests
    /// can pin the wall clock and observe spawned workers.
    pub fn with_parts(
        config: SchedulerConfig,
        clock: Arc<dyn Clock>,
        spawner: Arc<dyn Spawner>,
    ) -> Self {
        Self {
            jobs: Mutex::new(IndexMap::new()),
            clock,
            spawner,
            config,
        }
    }

    /// Register a recurring job firing every `period`.
    ///
    /// Validates the period, timezone and window bounds; a reattempt budget
    /// that meets or exceeds the period is logged as a warning but does not
    /// block registration (the loop tolerates it by shrinking the remaining
    /// sleep budget, potentially to zero).
    pub fn add_recurring_job(
        &self,
        job: BoundJob,
        period: Duration,
        opts: RecurringOpts,
    ) -> Result<String, SchedError> {
        if period < Duration::from_secs(1) {
            return Err(SchedError::ZeroPeriod);
        }
        let tz = match opts.timezone.as_deref() {
            Some(id) => parse_timezone(id)?,
            None => chrono_tz::UTC,
        };
        let start = opts.start.as_deref().map(parse_bound).transpose()?;
        let stop = opts.stop.as_deref().map(parse_bound).transpose()?;

        let name = opts.name.unwrap_or_else(auto_name);
        if opts.max_attempts > 0 {
            let budget = opts.backoff_secs.saturating_mul(opts.max_attempts as u64);
            if budget >= period.as_secs() {
                warn!(
                    job = %name,
                    budget_secs = budget,
                    period_secs = period.as_secs(),
                    "reattempt budget meets or exceeds the period; reattempt checkpoints will crowd the end of each cycle"
                );
            }
        }

        let retry = RetryPolicy {
            total_attempts: opts.max_attempts.saturating_add(1),
            backoff: Duration::from_secs(opts.backoff_secs),
        };
        let describe = format!("{} [recurring | {}-second(s) | {}]", name, period.as_secs(), tz);
        let spec = LoopSpec::Recurring(RecurringSpec {
            period,
            start,
            stop,
            tz,
        });
        self.insert(name, JobKind::Recurring, describe, job, retry, spec)
    }

    /// Register an event job firing whenever any `when` pattern matches the
    /// wall clock in `timezone`.
    ///
    /// Malformed patterns or an unknown zone reject the registration; the
    /// job table is left untouched.
    pub fn add_event_job(
        &self,
        job: BoundJob,
        timezone: &str,
        when: &[&str],
        opts: EventOpts,
    ) -> Result<String, SchedError> {
        let tz = parse_timezone(timezone)?;
        let patterns = when
            .iter()
            .map(|w| WhenPattern::parse(w))
            .collect::<Result<Vec<_>, _>>()?;

        let total = opts
            .max_attempts
            .unwrap_or(self.config.event_max_attempts)
            .max(1);
        let retry = RetryPolicy {
            total_attempts: total,
            backoff: Duration::from_secs(
                opts.backoff_secs.unwrap_or(self.config.event_backoff_secs),
            ),
        };

        let name = opts.name.unwrap_or_else(auto_name);
        let shown: Vec<&str> = patterns.iter().map(|p| p.as_str()).collect();
        let describe = format!("{} [event | {} | {}]", name, shown.join(","), tz);
        let spec = LoopSpec::Event(EventSpec { when: patterns, tz });
        self.insert(name, JobKind::Event, describe, job, retry, spec)
    }

    fn insert(
        &self,
        name: String,
        kind: JobKind,
        describe: String,
        job: BoundJob,
        retry: RetryPolicy,
        spec: LoopSpec,
    ) -> Result<String, SchedError> {
        let mut jobs = self.jobs.lock().unwrap();
        if jobs.contains_key(&name) {
            return Err(SchedError::DuplicateJob(name));
        }
        self.diag(&format!("added job: {describe}"));
        jobs.insert(
            name.clone(),
            JobEntry {
                kind,
                describe,
                job,
                retry,
                spec,
                status: Arc::new(Mutex::new(JobStatus::Pending)),
                workers: Arc::new(Mutex::new(Vec::new())),
                loop_id: None,
                loop_handle: None,
            },
        );
        Ok(name)
    }

    /// Start one scheduling loop per registered job.
    ///
    /// The runtime is checked before any loop starts, so failure here can
    /// never leave a partially-started set of loops running silently. Jobs
    /// whose loop is already running are skipped.
    pub fn run(&self) -> Result<(), SchedError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| SchedError::NoRuntime)?;

        let mut jobs = self.jobs.lock().unwrap();
        for (name, entry) in jobs.iter_mut() {
            if entry.loop_handle.is_some() {
                debug!(job = %name, "loop already started; skipping");
                continue;
            }
            let ctx = LoopCtx {
                name: name.clone(),
                job: entry.job.clone(),
                retry: entry.retry,
                workers: entry.workers.clone(),
                status: entry.status.clone(),
                clock: self.clock.clone(),
                spawner: self.spawner.clone(),
                verbose: self.config.verbose,
            };
            let handle = match &entry.spec {
                LoopSpec::Recurring(spec) => runtime.spawn(recurring::run_loop(ctx, spec.clone())),
                LoopSpec::Event(spec) => {
                    let pacing = EventPacing {
                        fire_guard: Duration::from_secs(self.config.fire_guard_secs),
                        poll_slack: Duration::from_secs(self.config.poll_slack_secs),
                    };
                    runtime.spawn(event::run_loop(ctx, spec.clone(), pacing))
                }
            };
            entry.loop_id = Some(Uuid::new_v4());
            entry.loop_handle = Some(handle);
            *entry.status.lock().unwrap() = JobStatus::Running;
            self.diag(&format!("started loop for job: {name}"));
        }
        Ok(())
    }

    /// Summary of every registered job, in registration order.
    ///
    /// Jobs whose loop has died are still listed, flagged not-alive; removed
    /// jobs never appear.
    pub fn job_summary(&self) -> Vec<JobSummary> {
        let jobs = self.jobs.lock().unwrap();
        let rows: Vec<JobSummary> = jobs
            .iter()
            .map(|(name, entry)| JobSummary {
                name: name.clone(),
                kind: entry.kind,
                describe: entry.describe.clone(),
                status: *entry.status.lock().unwrap(),
                loop_id: entry.loop_id,
                alive: entry
                    .loop_handle
                    .as_ref()
                    .map(|h| !h.is_finished())
                    .unwrap_or(false),
            })
            .collect();
        if self.config.verbose {
            info!("scheduled jobs:");
            for row in &rows {
                info!("  {row}");
            }
        }
        rows
    }

    /// Remove a job: terminate its loop, reap its workers, drop the entry.
    ///
    /// Unknown names emit a diagnostic and return; calling this twice for
    /// the same name is harmless.
    pub fn remove_job(&self, name: &str) {
        let entry = self.jobs.lock().unwrap().shift_remove(name);
        match entry {
            Some(entry) => {
                if let Some(handle) = entry.loop_handle {
                    handle.abort();
                }
                terminate_all(&entry.workers);
                self.diag(&format!("removed job: {name}"));
            }
            None => self.diag(&format!("no such job: {name}")),
        }
    }

    /// Remove every job.
    ///
    /// A second termination sweep afterwards catches loops that were
    /// mid-transition during the first pass, guaranteeing zero live job
    /// loops on return.
    pub fn clear(&self) {
        let names: Vec<String> = self.jobs.lock().unwrap().keys().cloned().collect();
        for name in names {
            self.remove_job(&name);
        }

        let mut jobs = self.jobs.lock().unwrap();
        for (_, entry) in jobs.iter() {
            if let Some(handle) = &entry.loop_handle {
                handle.abort();
            }
            terminate_all(&entry.workers);
        }
        jobs.clear();
        self.diag("cleared all jobs");
    }

    /// Number of registered jobs.
    pub fn job_count(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    fn diag(&self, msg: &str) {
        if self.config.verbose {
            info!("{msg}");
        } else {
            debug!("{msg}");
        }
    }
}

/// Fallback name for anonymous registrations; Rust closures carry no
/// runtime identity to derive one from.
fn auto_name() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("job-{}", &id[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{noop_job, pending_job, FixedClock, RecordingSpawner};
    use chrono::NaiveDate;

    fn quiet() -> Scheduler {
        Scheduler::new(false)
    }

    // ── Registration ────────────────────────────────────────────────

    #[test]
    fn duplicate_name_is_rejected() {
        let sched = quiet();
        let opts = RecurringOpts {
            name: Some("backup".into()),
            ..Default::default()
        };
        sched
            .add_recurring_job(noop_job(), Duration::from_secs(60), opts.clone())
            .unwrap();
        let err = sched
            .add_recurring_job(noop_job(), Duration::from_secs(60), opts)
            .unwrap_err();
        assert!(matches!(err, SchedError::DuplicateJob(_)));
        assert_eq!(sched.job_count(), 1);
    }

    #[test]
    fn zero_period_is_rejected() {
        let sched = quiet();
        let err = sched
            .add_recurring_job(noop_job(), Duration::ZERO, RecurringOpts::default())
            .unwrap_err();
        assert!(matches!(err, SchedError::ZeroPeriod));
    }

    #[test]
    fn malformed_pattern_never_registers() {
        let sched = quiet();
        let err = sched
            .add_event_job(noop_job(), "UTC", &["mon|09:**"], EventOpts::default())
            .unwrap_err();
        assert!(matches!(err, SchedError::InvalidPattern { .. }));
        assert!(sched.job_summary().is_empty());
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        let sched = quiet();
        let err = sched
            .add_event_job(noop_job(), "Moon/Crater", &["*|12:00"], EventOpts::default())
            .unwrap_err();
        assert!(matches!(err, SchedError::UnknownTimezone(_)));
    }

    #[test]
    fn malformed_bound_is_rejected() {
        let sched = quiet();
        let err = sched
            .add_recurring_job(
                noop_job(),
                Duration::from_secs(60),
                RecurringOpts {
                    start: Some("next tuesday".into()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, SchedError::InvalidBound(_)));
    }

    #[test]
    fn anonymous_jobs_get_unique_names() {
        let sched = quiet();
        let a = sched
            .add_recurring_job(noop_job(), Duration::from_secs(60), RecurringOpts::default())
            .unwrap();
        let b = sched
            .add_recurring_job(noop_job(), Duration::from_secs(60), RecurringOpts::default())
            .unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with("job-"));
    }

    #[test]
    fn summary_preserves_registration_order() {
        let sched = quiet();
        for name in ["zeta", "alpha", "mid"] {
            sched
                .add_recurring_job(
                    noop_job(),
                    Duration::from_secs(60),
                    RecurringOpts {
                        name: Some(name.into()),
                        ..Default::default()
                    },
                )
                .unwrap();
        }
        let names: Vec<String> = sched.job_summary().into_iter().map(|r| r.name).collect();
        assert_eq!(names, ["zeta", "alpha", "mid"]);
    }

    #[test]
    fn summary_row_serializes() {
        let sched = quiet();
        sched
            .add_event_job(
                noop_job(),
                "UTC",
                &["mon|09:30"],
                EventOpts {
                    name: Some("report".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        let rows = sched.job_summary();
        let json = serde_json::to_string(&rows).unwrap();
        assert!(json.contains("\"report\""));
        assert!(json.contains("\"event\""));
        assert!(json.contains("\"pending\""));
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    #[test]
    fn run_outside_a_runtime_errors() {
        let sched = quiet();
        sched
            .add_recurring_job(noop_job(), Duration::from_secs(60), RecurringOpts::default())
            .unwrap();
        assert!(matches!(sched.run(), Err(SchedError::NoRuntime)));
        // Nothing started: every row is still pending.
        assert!(sched
            .job_summary()
            .iter()
            .all(|r| r.status == JobStatus::Pending && r.loop_id.is_none()));
    }

    #[test]
    fn remove_unknown_job_is_idempotent() {
        let sched = quiet();
        sched.remove_job("ghost");
        sched.remove_job("ghost");
        assert!(sched.job_summary().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_marks_jobs_running_and_assigns_loop_ids() {
        let clock = FixedClock::at(
            NaiveDate::from_ymd_opt(2026, 3, 2)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
        );
        let spawner = RecordingSpawner::default();
        let sched = Scheduler::with_parts(
            SchedulerConfig::default(),
            Arc::new(clock),
            Arc::new(spawner),
        );
        sched
            .add_recurring_job(
                noop_job(),
                Duration::from_secs(30),
                RecurringOpts {
                    name: Some("tick".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        sched.run().unwrap();
        let rows = sched.job_summary();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, JobStatus::Running);
        assert!(rows[0].loop_id.is_some());
        assert!(rows[0].alive);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_leaves_no_live_loops_or_workers() {
        let clock = FixedClock::at(
            NaiveDate::from_ymd_opt(2026, 3, 2)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
        );
        let spawner = RecordingSpawner::default();
        let handles = spawner.handles();
        let sched = Scheduler::with_parts(
            SchedulerConfig::default(),
            Arc::new(clock),
            Arc::new(spawner),
        );

        // Long-running bodies so workers are still alive when we clear.
        sched
            .add_recurring_job(
                pending_job(),
                Duration::from_secs(10),
                RecurringOpts {
                    name: Some("slow".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        sched.run().unwrap();

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert!(!handles.lock().unwrap().is_empty());

        sched.clear();
        assert!(sched.job_summary().is_empty());
        assert_eq!(sched.job_count(), 0);

        // Grace period, then every spawned worker must be dead.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(handles.lock().unwrap().iter().all(|h| !h.is_alive()));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_job_stays_listed_as_done_and_not_alive() {
        let clock = FixedClock::at(
            NaiveDate::from_ymd_opt(2026, 3, 2)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
        );
        let spawner = RecordingSpawner::default();
        let handles = spawner.handles();
        let sched = Scheduler::with_parts(
            SchedulerConfig::default(),
            Arc::new(clock),
            Arc::new(spawner),
        );
        sched
            .add_recurring_job(
                noop_job(),
                Duration::from_secs(10),
                RecurringOpts {
                    name: Some("bygone".into()),
                    stop: Some("Mar 01 00:00:00 2026".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        sched.run().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        // The loop saw the past stop bound and ended; the row survives it.
        let rows = sched.job_summary();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, JobStatus::Done);
        assert!(!rows[0].alive);
        assert!(rows[0].loop_id.is_some());
        assert!(handles.lock().unwrap().is_empty());
    }

    // ── Resourceful wait ────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn sleep_and_reap_drops_finished_workers() {
        let spawner = RecordingSpawner::default();
        let workers: WorkerSet = Arc::new(Mutex::new(Vec::new()));

        let done = spawner.spawn("done", &noop_job());
        let running = spawner.spawn("running", &pending_job());
        track(&workers, done);
        track(&workers, running);

        // Let the finished worker's monitor publish its status.
        tokio::time::sleep(Duration::from_millis(5)).await;

        let before = Instant::now();
        sleep_and_reap(&workers, Duration::from_secs(3)).await;
        assert_eq!(before.elapsed(), Duration::from_secs(3));

        let list = workers.lock().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].job_name(), "running");
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_and_reap_zero_duration_is_a_noop() {
        let workers: WorkerSet = Arc::new(Mutex::new(Vec::new()));
        let before = Instant::now();
        sleep_and_reap(&workers, Duration::ZERO).await;
        assert_eq!(before.elapsed(), Duration::ZERO);
    }
}
