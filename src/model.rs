//! Core data model.
//!
//! A work item is one caller-submitted unit of asynchronous work. The engine
//! tracks it from submission until its one-second QPS window has elapsed.

use std::fmt;

/// Identifier of a submitted work item.
///
/// Ids are handed out in submission order by each throttle, so comparing two
/// ids from the same throttle compares their admission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkId(pub u64);

impl fmt::Display for WorkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a work item.
///
/// ```text
/// Queued -> Started -> Completed -> Discarded
///                   \-> Failed    -> Discarded
/// ```
///
/// `Completed` and `Failed` items keep counting against the QPS limit until
/// they are discarded one second after they started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Queued,
    Started,
    Completed,
    Failed,
    Discarded,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Queued => "queued",
            Phase::Started => "started",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
            Phase::Discarded => "discarded",
        }
    }

    /// Whether `self -> next` is a legal step. No transition skips a phase.
    pub fn can_transition_to(self, next: Phase) -> bool {
        matches!(
            (self, next),
            (Phase::Queued, Phase::Started)
                | (Phase::Started, Phase::Completed)
                | (Phase::Started, Phase::Failed)
                | (Phase::Completed, Phase::Discarded)
                | (Phase::Failed, Phase::Discarded)
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_never_skip() {
        assert!(Phase::Queued.can_transition_to(Phase::Started));
        assert!(Phase::Failed.can_transition_to(Phase::Discarded));
        assert!(!Phase::Queued.can_transition_to(Phase::Completed));
        assert!(!Phase::Started.can_transition_to(Phase::Discarded));
        assert!(!Phase::Completed.can_transition_to(Phase::Failed));
    }

    #[test]
    fn ids_order_by_submission() {
        assert!(WorkId(3) < WorkId(10));
        assert_eq!(WorkId(7).to_string(), "#7");
    }
}
