//! The throttle handle and the glue between the admission state machine and
//! the tokio runtime.
//!
//! Submission, completion and timer wakeups each run exactly one admission
//! pass under the engine lock. Admitted start functions are called after the
//! lock is released, by one launcher at a time and in admission order; a pass
//! that finds a launcher active, on another thread or inside a start function
//! calling `submit`, leaves its launches to it. Completions and wakeups run in
//! their own tasks, so a pass is never nested inside another pass.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Histogram};
use tokio::sync::oneshot;
use tokio::task::JoinError;
use tokio::time::Instant;
use tracing::{Instrument, Span, debug, trace};

use super::admission::{Admission, Launch, Limits, Pass, StartFn, ThrottleState};
use super::submission::{Drain, Submission};
use crate::config::ThrottleConfig;
use crate::error::WorkError;
use crate::model::{Phase, WorkId};
use crate::telemetry::metrics;
use crate::telemetry::work::{record_state_transition, start_work_span};

/// Starts asynchronous work in FIFO order, bounded by an outstanding-count
/// limit and a queries-per-second limit.
///
/// Cloning is cheap; clones share the same queue and limits. A throttle must
/// be used from within a tokio runtime.
///
/// ```no_run
/// # async fn example() {
/// use qps_throttle::{Throttle, ThrottleConfig};
///
/// let throttle = Throttle::new(ThrottleConfig::default().with_max_qps(10));
/// let answer = throttle.submit(|| async { Ok::<_, std::io::Error>(42) });
/// assert_eq!(answer.await.unwrap(), 42);
/// throttle.drain().await;
/// # }
/// ```
#[derive(Clone)]
pub struct Throttle {
    shared: Arc<Shared>,
}

pub(crate) struct Shared {
    name: String,
    state: Mutex<Admission>,
    instruments: Instruments,
}

struct Instruments {
    labels: [KeyValue; 1],
    submitted: Counter<u64>,
    started: Counter<u64>,
    settled: Counter<u64>,
    queue_wait: Histogram<f64>,
    wakeups: Counter<u64>,
}

impl Throttle {
    pub fn new(config: ThrottleConfig) -> Self {
        let limits = Limits {
            max_outstanding: config.max_outstanding,
            max_qps: config.max_qps,
        };
        debug!(
            throttle = %config.name,
            max_outstanding = ?config.max_outstanding,
            max_qps = ?config.max_qps,
            "throttle created"
        );
        Self {
            shared: Arc::new(Shared {
                instruments: Instruments::new(&config.name),
                name: config.name,
                state: Mutex::new(Admission::new(limits)),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Queue `start` and run an admission pass.
    ///
    /// Returns immediately; `start` may already have been called by the time
    /// this returns. The returned [`Submission`] resolves with the outcome of
    /// the work. Dropping it does not cancel or withdraw the work.
    ///
    /// A panic inside `start` itself, or inside the future it returns, settles
    /// the submission with [`WorkError::Panicked`]; the slot accounting is the
    /// same as for any other completion.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn submit<F, Fut, T, E>(&self, start: F) -> Submission<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let (settle, settled) = oneshot::channel();
        let (id, launcher) = {
            let mut state = self.shared.lock();
            let now = Instant::now();
            let id = state.enqueue(erase(start, settle), now);
            let pass = state.admit(now);
            (id, self.shared.apply(&mut state, pass))
        };
        self.shared
            .instruments
            .submitted
            .add(1, &self.shared.instruments.labels);
        debug!(throttle = %self.shared.name, id = %id, "work submitted");

        if launcher {
            self.shared.launch();
        }
        Submission::new(id, settled)
    }

    /// Resolves once nothing is queued or outstanding; immediately if that is
    /// already the case.
    pub fn drain(&self) -> Drain {
        Drain::new(self.shared.lock().drain_signal())
    }

    /// Current counters. See [`ThrottleState::tracked`] for how fresh the
    /// QPS window count is.
    pub fn state(&self) -> ThrottleState {
        self.shared.lock().snapshot(Instant::now())
    }
}

impl fmt::Debug for Throttle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Throttle")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .finish()
    }
}

impl Shared {
    /// Admission code does not panic while holding the lock, so a poisoned
    /// lock still guards consistent state.
    fn lock(&self) -> MutexGuard<'_, Admission> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Perform the timer side effects of `pass` and queue its launches while
    /// still holding the lock. Returns whether the caller is now the launcher.
    fn apply(self: &Arc<Self>, state: &mut Admission, pass: Pass) -> bool {
        let Pass {
            launches,
            arm,
            cancel,
            expired,
        } = pass;

        for id in expired {
            trace!(
                throttle = %self.name,
                id = %id,
                phase = Phase::Discarded.as_str(),
                "qps window expired"
            );
        }
        if let Some(handle) = cancel {
            trace!(throttle = %self.name, "expiration timer cancelled");
            handle.abort();
        }
        if let Some((generation, deadline)) = arm {
            let shared = Arc::clone(self);
            let task = tokio::spawn(async move {
                tokio::time::sleep_until(deadline).await;
                shared.wake(generation);
            });
            state.set_timer_handle(generation, task.abort_handle());
            trace!(
                throttle = %self.name,
                generation,
                in_ms = deadline.saturating_duration_since(Instant::now()).as_millis() as u64,
                "expiration timer armed"
            );
        }
        state.queue_launches(launches)
    }

    /// Call queued start functions until none are left. Only the launcher
    /// calls this.
    fn launch(self: &Arc<Self>) {
        loop {
            let next = self.lock().next_launch();
            let Some(Launch {
                id,
                queued_at,
                start,
            }) = next
            else {
                return;
            };
            let waited = queued_at.elapsed();
            self.instruments.started.add(1, &self.instruments.labels);
            self.instruments
                .queue_wait
                .record(waited.as_secs_f64() * 1000.0, &self.instruments.labels);
            debug!(
                throttle = %self.name,
                id = %id,
                waited_ms = waited.as_millis() as u64,
                "work started"
            );
            start(Arc::clone(self), id);
        }
    }

    /// Completion bookkeeping for one started item, success or failure.
    fn complete(self: &Arc<Self>, id: WorkId, ok: bool) {
        self.instruments.settled.add(
            1,
            &[
                self.instruments.labels[0].clone(),
                KeyValue::new("result", if ok { "ok" } else { "error" }),
            ],
        );
        let launcher = {
            let mut state = self.lock();
            if state.complete() {
                let pass = state.admit(Instant::now());
                self.apply(&mut state, pass)
            } else {
                false
            }
        };
        debug!(throttle = %self.name, id = %id, ok, "work settled");
        if launcher {
            self.launch();
        }
    }

    fn wake(self: &Arc<Self>, generation: u64) {
        let launcher = {
            let mut state = self.lock();
            if !state.take_timer(generation) {
                return;
            }
            self.instruments.wakeups.add(1, &self.instruments.labels);
            trace!(throttle = %self.name, generation, "expiration timer fired");
            let pass = state.admit(Instant::now());
            self.apply(&mut state, pass)
        };
        if launcher {
            self.launch();
        }
    }
}

impl Instruments {
    fn new(throttle: &str) -> Self {
        Self {
            labels: [KeyValue::new("throttle", throttle.to_string())],
            submitted: metrics::work_submitted(),
            started: metrics::work_started(),
            settled: metrics::work_settled(),
            queue_wait: metrics::queue_wait_ms(),
            wakeups: metrics::timer_wakeups(),
        }
    }
}

/// Wrap a typed start function and its settle channel into a [`StartFn`].
///
/// When launched it calls `start` on the caller's thread, runs the returned
/// future on its own task, and settles from a separate task once that
/// finishes: bookkeeping first, then the caller's channel.
fn erase<F, Fut, T, E>(start: F, settle: oneshot::Sender<Result<T, WorkError<E>>>) -> StartFn
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    Box::new(move |shared: Arc<Shared>, id: WorkId| {
        let span = start_work_span(&shared.name, id);
        record_state_transition(&span, Phase::Queued, Phase::Started);

        let started = span.in_scope(|| panic::catch_unwind(AssertUnwindSafe(start)));
        tokio::spawn(
            async move {
                let outcome = match started {
                    Ok(work) => settle_joined(tokio::spawn(work.in_current_span()).await),
                    Err(payload) => Err(WorkError::Panicked(panic_message(payload.as_ref()))),
                };
                let phase = if outcome.is_ok() {
                    Phase::Completed
                } else {
                    Phase::Failed
                };
                record_state_transition(&Span::current(), Phase::Started, phase);

                shared.complete(id, outcome.is_ok());
                let _ = settle.send(outcome);
            }
            .instrument(span),
        );
    })
}

fn settle_joined<T, E>(joined: Result<Result<T, E>, JoinError>) -> Result<T, WorkError<E>> {
    match joined {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(WorkError::Failed(err)),
        Err(err) if err.is_panic() => Err(WorkError::Panicked(panic_message(
            err.into_panic().as_ref(),
        ))),
        Err(_) => Err(WorkError::Cancelled),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "opaque panic payload".to_string()
    }
}
