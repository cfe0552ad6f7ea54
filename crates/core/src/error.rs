//! Scheduler error types.

use thiserror::Error;

/// Errors raised synchronously by registration and startup calls.
///
/// Validation failures mean the job was never registered; no loop or worker
/// is ever created for a rejected job.
#[derive(Debug, Error)]
pub enum SchedError {
    #[error("invalid `when` pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("invalid start/stop bound '{0}': expected \"Mon DD HH:MM:SS YYYY\" (e.g. \"Dec 31 23:59:59 2021\")")]
    InvalidBound(String),

    #[error("unknown timezone: {0}")]
    UnknownTimezone(String),

    #[error("period must be at least 1 second")]
    ZeroPeriod,

    #[error("a job named '{0}' is already registered")]
    DuplicateJob(String),

    #[error("scheduling loops must be started from within a tokio runtime")]
    NoRuntime,

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),
}
