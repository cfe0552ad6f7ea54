//! Wall-clock capability over the IANA timezone database.
//!
//! The engines never call `Utc::now()` directly; they go through the
//! [`Clock`] trait so tests can pin the wall clock while tokio's paused time
//! drives the sleeps.

use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Tz;

use crate::error::SchedError;

/// Format of `start`/`stop` bounds, e.g. `"Dec 31 23:59:59 2021"`.
pub const BOUND_FORMAT: &str = "%b %d %H:%M:%S %Y";

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync {
    /// Current time in the given zone.
    fn now_in(&self, tz: Tz) -> DateTime<Tz>;
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_in(&self, tz: Tz) -> DateTime<Tz> {
        Utc::now().with_timezone(&tz)
    }
}

/// Resolve a zone identifier like `"Asia/Kolkata"`.
pub fn parse_timezone(id: &str) -> Result<Tz, SchedError> {
    id.parse::<Tz>()
        .map_err(|_| SchedError::UnknownTimezone(id.to_string()))
}

/// All supported IANA zone identifiers.
pub fn timezones() -> Vec<&'static str> {
    chrono_tz::TZ_VARIANTS.iter().map(|tz| tz.name()).collect()
}

/// Parse a `start`/`stop` bound of the form `"Mon DD HH:MM:SS YYYY"`.
///
/// The result is a naive wall-clock timestamp; the engine interprets it in
/// the job's own timezone. Bounds are compared as parsed timestamps, not as
/// strings.
pub fn parse_bound(s: &str) -> Result<NaiveDateTime, SchedError> {
    NaiveDateTime::parse_from_str(s.trim(), BOUND_FORMAT)
        .map_err(|_| SchedError::InvalidBound(s.to_string()))
}
