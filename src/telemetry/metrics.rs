//! Metric instrument factories for qps-throttle.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments come from the `"qps-throttle"` meter; without an installed
//! provider they are no-ops.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("qps-throttle")
}

/// Counter: work items submitted.
/// Labels: `throttle`.
pub fn work_submitted() -> Counter<u64> {
    meter()
        .u64_counter("throttle.work.submitted")
        .with_description("Number of work items submitted")
        .build()
}

/// Counter: work items admitted and started.
/// Labels: `throttle`.
pub fn work_started() -> Counter<u64> {
    meter()
        .u64_counter("throttle.work.started")
        .with_description("Number of work items started")
        .build()
}

/// Counter: work items settled.
/// Labels: `throttle`, `result` ("ok" | "error").
pub fn work_settled() -> Counter<u64> {
    meter()
        .u64_counter("throttle.work.settled")
        .with_description("Number of work items that settled")
        .build()
}

/// Histogram: time from submission to start, in milliseconds.
/// Labels: `throttle`.
pub fn queue_wait_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("throttle.queue.wait_ms")
        .with_description("Time work spent queued before starting")
        .with_unit("ms")
        .build()
}

/// Counter: QPS window expiration wakeups that ran an admission pass.
/// Labels: `throttle`.
pub fn timer_wakeups() -> Counter<u64> {
    meter()
        .u64_counter("throttle.timer.wakeups")
        .with_description("Number of QPS window wakeups")
        .build()
}
