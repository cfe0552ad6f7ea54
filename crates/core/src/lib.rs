//! Core types for the taktwerk scheduler: job model, schedule patterns,
//! wall-clock capability, configuration, and error taxonomy.
//!
//! This crate carries no scheduling loops of its own — the engines live in
//! `taktwerk-sched` and build on the types defined here.

pub mod clock;
pub mod config;
pub mod error;
pub mod job;
pub mod pattern;

pub use clock::{parse_bound, parse_timezone, timezones, Clock, SystemClock, BOUND_FORMAT};
pub use config::SchedulerConfig;
pub use error::SchedError;
pub use job::{BoundJob, JobFuture, JobKind, JobStatus, RetryPolicy};
pub use pattern::WhenPattern;
