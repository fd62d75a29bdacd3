//! # qps-throttle
//!
//! Client-side throttle for asynchronous work.
//!
//! Work is admitted in submission order, subject to two independent limits:
//! a cap on outstanding (started but unfinished) operations and a cap on how
//! many operations may start within any rolling one-second window.

pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod telemetry;

pub use config::ThrottleConfig;
pub use engine::{Drain, QPS_WINDOW, Submission, Throttle, ThrottleState, submit_all};
pub use error::{Error, Result, WorkError};
