//! Recurring engine: fires a job every `period`, optionally inside a
//! wall-clock window.
//!
//! Pacing is drift-compensated: each cycle anchors its deadline at the tick
//! start, so neither invocation spawn time nor reattempt rounds stretch the
//! period. Reattempt checkpoints sit at the end of the cycle, each keeping
//! `backoff` in reserve for a replacement invocation.

use std::panic::AssertUnwindSafe;

use chrono::NaiveDateTime;
use chrono_tz::Tz;
use futures::FutureExt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

use taktwerk_core::JobStatus;

use crate::registry::{sleep_and_reap, terminate_all, track, LoopCtx};
use crate::worker::ExitStatus;

/// Schedule of one recurring job.
#[derive(Debug, Clone)]
pub(crate) struct RecurringSpec {
    pub period: Duration,
    /// Dormant until this wall-clock, interpreted in `tz`.
    pub start: Option<NaiveDateTime>,
    /// Loop terminates past this wall-clock and the job reports done.
    pub stop: Option<NaiveDateTime>,
    pub tz: Tz,
}

enum Tick {
    /// A full cycle ran (fired, retried as needed, slept out the period).
    Fired,
    /// Before the start bound; one period was waited out.
    Dormant,
    /// Past the stop bound.
    Expired,
}

/// Loop task hosting one recurring job. Ends only on removal (abort) or when
/// the stop bound passes.
pub(crate) async fn run_loop(ctx: LoopCtx, spec: RecurringSpec) {
    ctx.diag(&format!(
        "recurring loop up, period {}s",
        spec.period.as_secs()
    ));
    loop {
        // A panicking cycle must not take the loop down with it: terminate
        // this job's workers and go into the next cycle.
        match AssertUnwindSafe(tick(&ctx, &spec)).catch_unwind().await {
            Ok(Tick::Fired | Tick::Dormant) => {}
            Ok(Tick::Expired) => {
                *ctx.status.lock().unwrap() = JobStatus::Done;
                terminate_all(&ctx.workers);
                ctx.diag("stop bound passed; job done");
                return;
            }
            Err(_) => {
                warn!(job = %ctx.name, "scheduling cycle panicked; terminating its workers and resuming");
                terminate_all(&ctx.workers);
            }
        }
    }
}

async fn tick(ctx: &LoopCtx, spec: &RecurringSpec) -> Tick {
    let now = ctx.clock.now_in(spec.tz).naive_local();
    if let Some(stop) = spec.stop {
        if now > stop {
            return Tick::Expired;
        }
    }
    if let Some(start) = spec.start {
        if now < start {
            ctx.diag("before start bound; still pending");
            sleep_and_reap(&ctx.workers, spec.period).await;
            return Tick::Dormant;
        }
    }

    let deadline = Instant::now() + spec.period;
    ctx.diag("firing");
    let mut worker = ctx.spawner.spawn(&ctx.name, &ctx.job);
    track(&ctx.workers, worker.clone());

    // One checkpoint per allowed reattempt. Each sleeps up to the deadline
    // minus the backoff reserve, then replaces the latest invocation only if
    // it finished with a failure; a still-running invocation is left alone.
    let reattempts = ctx.retry.total_attempts.saturating_sub(1);
    for round in 1..=reattempts {
        let remaining = deadline.saturating_duration_since(Instant::now());
        sleep_and_reap(&ctx.workers, remaining.saturating_sub(ctx.retry.backoff)).await;
        if worker.exit_status() == Some(ExitStatus::Failure) {
            ctx.diag(&format!("invocation failed; reattempt {round} of {reattempts}"));
            worker = ctx.spawner.spawn(&ctx.name, &ctx.job);
            track(&ctx.workers, worker.clone());
        }
    }

    let remaining = deadline.saturating_duration_since(Instant::now());
    sleep_and_reap(&ctx.workers, remaining).await;
    Tick::Fired
}
