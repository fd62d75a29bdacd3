//! Futures handed back to callers: one per submitted item, and the drain
//! signal.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::{oneshot, watch};

use crate::error::WorkError;
use crate::model::WorkId;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// The eventual outcome of one submitted piece of work.
///
/// Settles exactly once, with the value or error the work produced.
#[derive(Debug)]
pub struct Submission<T, E> {
    id: WorkId,
    settled: oneshot::Receiver<Result<T, WorkError<E>>>,
}

impl<T, E> Submission<T, E> {
    pub(crate) fn new(id: WorkId, settled: oneshot::Receiver<Result<T, WorkError<E>>>) -> Self {
        Self { id, settled }
    }

    /// Position of this item in the throttle's submission order.
    pub fn id(&self) -> WorkId {
        self.id
    }
}

impl<T, E> Future for Submission<T, E> {
    type Output = Result<T, WorkError<E>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.settled)
            .poll(cx)
            .map(|settled| settled.unwrap_or(Err(WorkError::Cancelled)))
    }
}

/// Resolves once the throttle has nothing queued or outstanding.
///
/// Every drain requested during the same busy period observes the same
/// signal.
pub struct Drain {
    signal: BoxFuture<()>,
}

impl Drain {
    pub(crate) fn new(signal: Option<watch::Receiver<bool>>) -> Self {
        let signal: BoxFuture<()> = match signal {
            None => Box::pin(std::future::ready(())),
            Some(mut idle) => Box::pin(async move {
                loop {
                    let drained = *idle.borrow_and_update();
                    // A closed channel means the throttle itself is gone.
                    if drained || idle.changed().await.is_err() {
                        break;
                    }
                }
            }),
        };
        Self { signal }
    }
}

impl Future for Drain {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.signal.as_mut().poll(cx)
    }
}
