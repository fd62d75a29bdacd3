//! Run a batch of work through a dedicated throttle and gather the results.

use std::future::Future;

use tokio::task::JoinSet;
use tracing::debug;

use super::throttle::Throttle;
use crate::config::ThrottleConfig;
use crate::error::WorkError;

/// Submit every start function through one new throttle built from `config`.
///
/// Resolves with all values in input order once everything succeeded, or
/// with the first error to settle. Work that is still queued or running when
/// that happens keeps going; its outcome is dropped.
pub async fn submit_all<I, F, Fut, T, E>(
    work: I,
    config: ThrottleConfig,
) -> Result<Vec<T>, WorkError<E>>
where
    I: IntoIterator<Item = F>,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let throttle = Throttle::new(config);
    let mut pending = JoinSet::new();
    for (index, start) in work.into_iter().enumerate() {
        let submission = throttle.submit(start);
        pending.spawn(async move { (index, submission.await) });
    }

    let total = pending.len();
    let mut results: Vec<Option<T>> = std::iter::repeat_with(|| None).take(total).collect();
    while let Some(joined) = pending.join_next().await {
        let (index, outcome) = joined.map_err(|_| WorkError::<E>::Cancelled)?;
        match outcome {
            Ok(value) => results[index] = Some(value),
            Err(err) => {
                debug!(throttle = %throttle.name(), index, total, "batch rejected");
                // Dropping `pending` only stops observing; the work itself runs on.
                return Err(err);
            }
        }
    }

    results
        .into_iter()
        .map(|value| value.ok_or(WorkError::Cancelled))
        .collect()
}
