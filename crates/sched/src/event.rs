//! Event engine: polls the wall clock in the job's zone and fires whenever a
//! registered pattern matches the current minute.
//!
//! A matched minute fires at most once: the minute is memoized before it is
//! handled, so neither a short fire guard nor a panicking cycle can spawn a
//! second worker for it. Between unmatched polls the loop waits just under a
//! minute, which is slack enough to be cheap without ever skipping a
//! matching minute.
//!
//! A fired tick is handled to completion before the next poll: the loop
//! joins the invocation so its exit status can drive the retry rounds, which
//! means a body running past the minute boundary defers later matched
//! minutes until it finishes.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use chrono::{Datelike, NaiveDate, Timelike};
use chrono_tz::Tz;
use futures::FutureExt;
use tracing::warn;

use taktwerk_core::WhenPattern;

use crate::registry::{sleep_and_reap, terminate_all, track, LoopCtx};
use crate::worker::ExitStatus;

/// Schedule of one event job.
#[derive(Debug, Clone)]
pub(crate) struct EventSpec {
    pub when: Vec<WhenPattern>,
    pub tz: Tz,
}

/// Poll pacing, taken from [`SchedulerConfig`](taktwerk_core::SchedulerConfig).
#[derive(Debug, Clone, Copy)]
pub(crate) struct EventPacing {
    /// Hold-off after a fired tick.
    pub fire_guard: Duration,
    /// Wait between unmatched polls.
    pub poll_slack: Duration,
}

/// The minute a tick fired in, date included so the memo never carries over
/// to the same wall-clock minute a week later.
type MinuteKey = (NaiveDate, u32, u32);

/// Loop task hosting one event job. Ends only on removal (abort).
pub(crate) async fn run_loop(ctx: LoopCtx, spec: EventSpec, pacing: EventPacing) {
    let shown: Vec<&str> = spec.when.iter().map(|p| p.as_str()).collect();
    ctx.diag(&format!("event loop up, patterns [{}]", shown.join(",")));

    let mut last_fired: Option<MinuteKey> = None;
    loop {
        let cycle = AssertUnwindSafe(tick(&ctx, &spec, pacing, &mut last_fired))
            .catch_unwind()
            .await;
        if cycle.is_err() {
            warn!(job = %ctx.name, "scheduling cycle panicked; terminating its workers and resuming");
            terminate_all(&ctx.workers);
        }
    }
}

async fn tick(
    ctx: &LoopCtx,
    spec: &EventSpec,
    pacing: EventPacing,
    last_fired: &mut Option<MinuteKey>,
) {
    let now = ctx.clock.now_in(spec.tz);
    let (hour, minute) = (now.hour(), now.minute());
    let key = (now.date_naive(), hour, minute);
    let matched = spec
        .when
        .iter()
        .any(|p| p.matches(now.weekday(), hour as u8, minute as u8));

    if !matched || *last_fired == Some(key) {
        sleep_and_reap(&ctx.workers, pacing.poll_slack).await;
        return;
    }

    // Memoize before handling, so this minute can never fire twice.
    *last_fired = Some(key);

    for attempt in 1..=ctx.retry.total_attempts {
        ctx.diag(&format!(
            "firing (attempt {attempt} of {})",
            ctx.retry.total_attempts
        ));
        let mut worker = ctx.spawner.spawn(&ctx.name, &ctx.job);
        track(&ctx.workers, worker.clone());
        match worker.join().await {
            ExitStatus::Success => {
                sleep_and_reap(&ctx.workers, pacing.fire_guard).await;
                return;
            }
            ExitStatus::Failure if attempt < ctx.retry.total_attempts => {
                ctx.diag("invocation failed; backing off before reattempt");
                sleep_and_reap(&ctx.workers, ctx.retry.backoff).await;
            }
            ExitStatus::Failure => {
                warn!(
                    job = %ctx.name,
                    attempts = ctx.retry.total_attempts,
                    "every attempt for this tick failed; moving on"
                );
            }
        }
    }
    sleep_and_reap(&ctx.workers, pacing.poll_slack).await;
}
