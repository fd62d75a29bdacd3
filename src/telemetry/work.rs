//! Work execution span helpers.
//!
//! Every admitted work item runs inside a `work.execute` span; phase changes
//! are recorded as events on that span.

use tracing::Span;

use crate::model::{Phase, WorkId};

/// Start a span for one admitted work item.
///
/// The `work.phase` field is declared empty and is filled by
/// [`record_state_transition`].
pub fn start_work_span(throttle: &str, id: WorkId) -> Span {
    tracing::info_span!(
        "work.execute",
        "throttle" = throttle,
        "work.id" = id.0,
        "work.phase" = tracing::field::Empty,
    )
}

/// Record a phase change on `span` and emit it as an event.
pub fn record_state_transition(span: &Span, from: Phase, to: Phase) {
    debug_assert!(from.can_transition_to(to), "illegal transition {from} -> {to}");
    span.record("work.phase", to.as_str());
    span.in_scope(|| {
        tracing::debug!(from = from.as_str(), to = to.as_str(), "state_transition");
    });
}
