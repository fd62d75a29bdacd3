//! Admission state machine.
//!
//! Owns the ordered work list, both counters, the expiration timer slot and
//! the drain signal. Everything here is synchronous and clock-free: callers
//! pass `now` in, and side effects (spawning or aborting the timer task,
//! invoking start functions) are handed back in a [`Pass`] for the caller to
//! perform.
//!
//! The list is split by the `tracked` boundary:
//!
//! ```text
//! [0, tracked)        started within the last QPS_WINDOW (running or done)
//! [tracked, len)      queued, never started
//! ```
//!
//! Expired slots only exist transiently at the front and are purged at the
//! start of every pass, or by a snapshot taken while nothing is queued.
//!
//! Admitted launches wait in a second queue until exactly one caller, the
//! launcher, calls them in admission order. Passes that run while a launcher
//! is active, including passes nested inside a start function, only append.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::{Duration, Instant};

use super::throttle::Shared;
use crate::model::WorkId;

/// How long a started item counts against the QPS limit.
pub const QPS_WINDOW: Duration = Duration::from_millis(1000);

/// Type-erased start function. Called exactly once, outside the engine lock.
pub(crate) type StartFn = Box<dyn FnOnce(Arc<Shared>, WorkId) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Limits {
    pub max_outstanding: Option<NonZeroUsize>,
    pub max_qps: Option<NonZeroUsize>,
}

/// An item admitted by a pass, waiting to have its start function called.
pub(crate) struct Launch {
    pub id: WorkId,
    pub queued_at: Instant,
    pub start: StartFn,
}

/// Side effects requested by one admission pass, in admission order.
#[derive(Default)]
pub(crate) struct Pass {
    pub launches: Vec<Launch>,
    /// Spawn a wakeup for `(generation, deadline)`.
    pub arm: Option<(u64, Instant)>,
    /// Abort a previously spawned wakeup.
    pub cancel: Option<AbortHandle>,
    /// Slots whose QPS window closed, oldest first.
    pub expired: Vec<WorkId>,
}

struct Slot {
    id: WorkId,
    queued_at: Instant,
    expires_at: Option<Instant>,
    start: Option<StartFn>,
}

struct Timer {
    generation: u64,
    handle: Option<AbortHandle>,
}

pub(crate) struct Admission {
    limits: Limits,
    items: VecDeque<Slot>,
    tracked: usize,
    outstanding: usize,
    next_id: u64,
    timer_generation: u64,
    timer: Option<Timer>,
    /// Present only while something is queued or outstanding.
    drain: Option<watch::Sender<bool>>,
    pending: VecDeque<Launch>,
    launching: bool,
}

/// A snapshot of a throttle's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleState {
    outstanding: usize,
    tracked: usize,
    queued: usize,
    timer_armed: bool,
}

impl Admission {
    pub fn new(limits: Limits) -> Self {
        Self {
            limits,
            items: VecDeque::new(),
            tracked: 0,
            outstanding: 0,
            next_id: 0,
            timer_generation: 0,
            timer: None,
            drain: None,
            pending: VecDeque::new(),
            launching: false,
        }
    }

    /// Append work at the tail. Does not admit anything.
    pub fn enqueue(&mut self, start: StartFn, now: Instant) -> WorkId {
        let id = WorkId(self.next_id);
        self.next_id += 1;
        self.items.push_back(Slot {
            id,
            queued_at: now,
            expires_at: None,
            start: Some(start),
        });
        if self.drain.is_none() {
            self.drain = Some(watch::Sender::new(false));
        }
        id
    }

    /// Purge expired slots, start everything both limits allow, then
    /// reconcile the timer.
    pub fn admit(&mut self, now: Instant) -> Pass {
        let mut pass = Pass {
            expired: self.purge(now),
            ..Pass::default()
        };
        if !pass.expired.is_empty() {
            // The armed deadline belonged to a slot that is now gone.
            pass.cancel = self.timer.take().and_then(|t| t.handle);
        }

        while self.queued() > 0 && !self.outstanding_saturated() && !self.qps_saturated() {
            let slot = &mut self.items[self.tracked];
            self.tracked += 1;
            self.outstanding += 1;
            slot.expires_at = Some(now + QPS_WINDOW);
            if let Some(start) = slot.start.take() {
                pass.launches.push(Launch {
                    id: slot.id,
                    queued_at: slot.queued_at,
                    start,
                });
            }
        }

        self.reconcile_timer(&mut pass);
        pass
    }

    /// Record one completion. Returns whether the outstanding limit was
    /// saturated before it, in which case the caller must run a pass.
    pub fn complete(&mut self) -> bool {
        debug_assert!(self.outstanding > 0, "completion without outstanding work");
        let was_saturated = self.outstanding_saturated();
        self.outstanding = self.outstanding.saturating_sub(1);
        if self.outstanding == 0 && self.queued() == 0 {
            if let Some(drain) = self.drain.take() {
                drain.send_replace(true);
            }
        }
        was_saturated
    }

    /// Claim the armed timer slot for a wakeup. A wakeup whose generation was
    /// replaced or cancelled gets `false` and must do nothing.
    pub fn take_timer(&mut self, generation: u64) -> bool {
        if self.timer.as_ref().is_some_and(|t| t.generation == generation) {
            self.timer = None;
            true
        } else {
            false
        }
    }

    pub fn set_timer_handle(&mut self, generation: u64, handle: AbortHandle) {
        match self.timer.as_mut() {
            Some(timer) if timer.generation == generation => timer.handle = Some(handle),
            _ => handle.abort(),
        }
    }

    /// Append a pass's launches behind those not yet called. Returns `true`
    /// if the caller became the launcher and must drain [`Self::next_launch`].
    pub fn queue_launches(&mut self, launches: Vec<Launch>) -> bool {
        self.pending.extend(launches);
        if self.launching || self.pending.is_empty() {
            return false;
        }
        self.launching = true;
        true
    }

    /// Next launch for the launcher. `None` ends its turn.
    pub fn next_launch(&mut self) -> Option<Launch> {
        let next = self.pending.pop_front();
        if next.is_none() {
            self.launching = false;
        }
        next
    }

    /// `None` when idle: there is nothing to wait for.
    pub fn drain_signal(&self) -> Option<watch::Receiver<bool>> {
        self.drain.as_ref().map(watch::Sender::subscribe)
    }

    /// With nothing queued no pass is coming to purge the window, so expired
    /// slots are dropped here. No timer is armed in that case.
    pub fn snapshot(&mut self, now: Instant) -> ThrottleState {
        if self.queued() == 0 {
            self.purge(now);
        }
        ThrottleState {
            outstanding: self.outstanding,
            tracked: self.tracked,
            queued: self.queued(),
            timer_armed: self.timer.is_some(),
        }
    }

    fn purge(&mut self, now: Instant) -> Vec<WorkId> {
        let mut expired = Vec::new();
        while self.tracked > 0 {
            match self.items.front().and_then(|slot| slot.expires_at) {
                Some(expires_at) if expires_at <= now => {
                    if let Some(slot) = self.items.pop_front() {
                        expired.push(slot.id);
                    }
                    self.tracked -= 1;
                }
                _ => break,
            }
        }
        expired
    }

    /// Armed iff ready work is held back by the QPS limit alone.
    fn reconcile_timer(&mut self, pass: &mut Pass) {
        let held_by_qps =
            self.queued() > 0 && self.qps_saturated() && !self.outstanding_saturated();

        if !held_by_qps {
            if let Some(timer) = self.timer.take() {
                pass.cancel = timer.handle;
            }
            return;
        }
        if self.timer.is_some() {
            return;
        }
        // QPS saturated implies at least one tracked slot at the front.
        if let Some(deadline) = self.items.front().and_then(|slot| slot.expires_at) {
            self.timer_generation += 1;
            self.timer = Some(Timer {
                generation: self.timer_generation,
                handle: None,
            });
            pass.arm = Some((self.timer_generation, deadline));
        }
    }

    fn queued(&self) -> usize {
        self.items.len() - self.tracked
    }

    fn outstanding_saturated(&self) -> bool {
        self.limits
            .max_outstanding
            .is_some_and(|max| self.outstanding >= max.get())
    }

    fn qps_saturated(&self) -> bool {
        self.limits
            .max_qps
            .is_some_and(|max| self.tracked >= max.get())
    }
}

impl ThrottleState {
    /// Started but not yet settled.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }
    /// Started within the current QPS window, settled or not. While work is
    /// queued, expired slots are only dropped by the next admission pass.
    pub fn tracked(&self) -> usize {
        self.tracked
    }
    /// Submitted but not yet started.
    pub fn queued(&self) -> usize {
        self.queued
    }
    /// Whether a QPS window wakeup is pending.
    pub fn timer_armed(&self) -> bool {
        self.timer_armed
    }
    pub fn is_idle(&self) -> bool {
        self.outstanding == 0 && self.queued == 0
    }
}
