//! Integration tests for batch submission.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use qps_throttle::{ThrottleConfig, WorkError, submit_all};
use tokio::time::{Instant, sleep};

#[tokio::test(start_paused = true)]
async fn results_come_back_in_input_order() {
    let delays = [300u64, 10, 200, 50, 120];
    let work = delays.into_iter().enumerate().map(|(i, ms)| {
        move || async move {
            sleep(Duration::from_millis(ms)).await;
            Ok::<_, String>(i * 10)
        }
    });

    let results = submit_all(work, ThrottleConfig::default().with_max_outstanding(2))
        .await
        .unwrap();
    assert_eq!(results, vec![0, 10, 20, 30, 40]);
}

#[tokio::test(start_paused = true)]
async fn batch_respects_qps_limit() {
    let t0 = Instant::now();
    let work = (0..4).map(|i| move || async move { Ok::<_, String>(i) });

    let results = submit_all(work, ThrottleConfig::default().with_max_qps(2))
        .await
        .unwrap();
    assert_eq!(results, vec![0, 1, 2, 3]);
    assert_eq!(Instant::now().duration_since(t0), Duration::from_millis(1000));
}

#[tokio::test(start_paused = true)]
async fn first_rejection_wins_and_the_rest_still_run() {
    let finished = Arc::new(AtomicUsize::new(0));
    let work = (0..5).map(|i| {
        let finished = Arc::clone(&finished);
        move || async move {
            if i == 2 {
                return Err("item 2 rejected");
            }
            sleep(Duration::from_millis(100)).await;
            finished.fetch_add(1, Ordering::SeqCst);
            Ok(i)
        }
    });

    let outcome = submit_all(work, ThrottleConfig::default().with_max_outstanding(2)).await;
    match outcome {
        Err(WorkError::Failed(msg)) => assert_eq!(msg, "item 2 rejected"),
        other => panic!("expected the rejection, got {other:?}"),
    }

    sleep(Duration::from_secs(1)).await;
    assert_eq!(finished.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn empty_batch_resolves_empty() {
    let work: Vec<fn() -> std::future::Ready<Result<u8, String>>> = Vec::new();
    let results = submit_all(work, ThrottleConfig::default()).await.unwrap();
    assert!(results.is_empty());
}
