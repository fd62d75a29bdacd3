//! Error types for qps-throttle.

use thiserror::Error;

/// Errors raised while configuring the throttle or its telemetry.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("telemetry error: {0}")]
    Telemetry(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// How a single piece of submitted work failed.
///
/// Every variant still counts against the outstanding and QPS limits for the
/// item's normal lifetime.
#[derive(Debug, Error)]
pub enum WorkError<E> {
    /// The work future resolved to `Err`.
    #[error("work failed: {0}")]
    Failed(E),

    /// The start function panicked when called, or the work future panicked
    /// while being polled.
    #[error("work panicked: {0}")]
    Panicked(String),

    /// The runtime dropped the work before it settled.
    #[error("work was dropped before it settled")]
    Cancelled,
}

impl<E> WorkError<E> {
    /// The error produced by the work itself, if that is what happened.
    pub fn into_failed(self) -> Option<E> {
        match self {
            WorkError::Failed(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, WorkError::Panicked(_))
    }
}
