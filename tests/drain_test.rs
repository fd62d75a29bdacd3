//! Integration tests for drain signalling.

use std::convert::Infallible;
use std::time::Duration;

use qps_throttle::{Throttle, ThrottleConfig};
use tokio::sync::oneshot;
use tokio::time::{Instant, sleep, timeout};

fn ready_work() -> std::future::Ready<Result<(), Infallible>> {
    std::future::ready(Ok(()))
}

#[tokio::test(start_paused = true)]
async fn drain_on_idle_throttle_resolves_immediately() {
    let throttle = Throttle::new(ThrottleConfig::default());
    let t0 = Instant::now();

    throttle.drain().await;
    assert_eq!(Instant::now(), t0);
    assert!(throttle.state().is_idle());
}

#[tokio::test(start_paused = true)]
async fn drain_waits_for_outstanding_work() {
    let throttle = Throttle::new(ThrottleConfig::default());
    let (finish, done) = oneshot::channel::<()>();
    let work = throttle.submit(move || async move {
        done.await.map_err(|_| "dropped")
    });

    assert!(
        timeout(Duration::from_secs(5), throttle.drain()).await.is_err(),
        "drained while work was outstanding"
    );

    finish.send(()).unwrap();
    throttle.drain().await;
    assert!(throttle.state().is_idle());
    work.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn drain_waits_for_qps_blocked_queue() {
    let throttle = Throttle::new(ThrottleConfig::default().with_max_qps(1));
    let t0 = Instant::now();

    for _ in 0..3 {
        let _ = throttle.submit(ready_work);
    }
    // Nothing is outstanding between windows, but work is still queued.
    sleep(Duration::from_millis(10)).await;
    assert_eq!(throttle.state().outstanding(), 0);
    assert_eq!(throttle.state().queued(), 2);

    throttle.drain().await;
    assert_eq!(Instant::now().duration_since(t0), Duration::from_millis(2000));
    assert!(throttle.state().is_idle());
}

#[tokio::test]
async fn concurrent_drains_share_one_signal() {
    let throttle = Throttle::new(ThrottleConfig::default().with_max_outstanding(1));
    let (finish, done) = oneshot::channel::<()>();
    let _work = throttle.submit(move || async move { done.await.map_err(|_| "dropped") });

    let first = tokio::spawn(throttle.drain());
    let second = tokio::spawn(throttle.drain());
    tokio::task::yield_now().await;
    assert!(!first.is_finished());
    assert!(!second.is_finished());

    finish.send(()).unwrap();
    first.await.unwrap();
    second.await.unwrap();
}

#[tokio::test]
async fn each_busy_period_gets_a_fresh_signal() {
    let throttle = Throttle::new(ThrottleConfig::default());

    let _ = throttle.submit(ready_work);
    throttle.drain().await;
    assert!(throttle.state().is_idle());

    let (finish, done) = oneshot::channel::<()>();
    let _work = throttle.submit(move || async move { done.await.map_err(|_| "dropped") });
    let pending = tokio::spawn(throttle.drain());
    tokio::task::yield_now().await;
    assert!(!pending.is_finished(), "old signal leaked into new busy period");

    finish.send(()).unwrap();
    pending.await.unwrap();
}

#[tokio::test]
async fn failures_still_reach_drain() {
    let throttle = Throttle::new(ThrottleConfig::default().with_max_outstanding(2));
    for i in 0..4 {
        let _ = throttle.submit(move || async move {
            if i % 2 == 0 {
                Err(format!("item {i} failed"))
            } else {
                Ok(i)
            }
        });
    }
    throttle.drain().await;
    assert!(throttle.state().is_idle());
}
