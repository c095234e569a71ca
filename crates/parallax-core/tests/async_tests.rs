//! Async behaviors and settling
//!
//! Deferred behaviors return futures. With async mode on, the comparison
//! pipeline settles them before comparing, off the caller's path: `run`
//! returns the control's outcome while candidates are still in flight.

use futures::future;
use parallax_core::prelude::*;
use parallax_core::{Pending, SystemClock, Timing};
use parallax_test_utils::{recorder, CallCounter, Event, EVENT_TIMEOUT};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::{mpsc, Arc};
use std::time::Duration;
use tokio::sync::oneshot;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("rejected: {0}")]
struct Rejection(u32);

#[tokio::test]
async fn rejected_candidate_settles_to_its_error() {
    let mut experiment = Experiment::<u32, Rejection>::new("test");
    experiment.use_control_async(|| async { Ok(1) }).unwrap();
    experiment
        .try_candidate_async("rejecting", || async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Err(Rejection(7))
        })
        .unwrap();
    experiment.set_async(true);
    let (subscriber, mut events) = recorder();
    experiment.subscribe(subscriber);

    assert_eq!(experiment.run_async(|_| true).await.unwrap(), Ok(1));

    let result = events.next().await.and_then(Event::into_result).unwrap();
    let candidate = &result.candidates()[0];
    assert!(!candidate.did_return());
    assert_eq!(candidate.error(), Some(&Rejection(7)));
    assert_eq!(result.control().value(), Some(&1));
    assert_eq!(result.mismatched().len(), 1);
}

#[tokio::test]
async fn outcome_is_unsettled_before_settling() {
    let (tx, rx) = oneshot::channel::<Result<u32, Rejection>>();
    let observation = Observation::with_timing(
        "pending",
        Timing::Benchmark(Arc::new(SystemClock)),
        Arc::new(Policy::new()),
        move || Outcome::Pending(Pending::new(async move { rx.await.unwrap_or(Ok(0)) })),
    );

    assert!(observation.did_return());
    assert!(observation.error().is_none());
    assert_eq!(observation.inspect(), "value: <pending>");

    tx.send(Err(Rejection(3))).unwrap();
    let settled = observation.settle().await;

    assert!(!settled.did_return());
    assert_eq!(settled.error(), Some(&Rejection(3)));
    assert_eq!(settled.inspect(), r#"error: [Rejection] "rejected: 3""#);
}

#[tokio::test]
async fn async_control_error_reaches_the_caller() {
    let mut experiment = Experiment::<u32, Rejection>::new("test");
    experiment.use_control_async(|| async { Err(Rejection(1)) }).unwrap();
    experiment.candidate(|| Ok(1)).unwrap();
    experiment.set_async(true);

    assert_eq!(
        experiment.run_async(|_| true).await.unwrap(),
        Err(Rejection(1))
    );
}

#[tokio::test]
async fn blocking_and_deferred_behaviors_compare_alike() {
    let mut experiment = Experiment::<u32, Rejection>::new("test");
    experiment.use_control(|| Ok(4)).unwrap();
    experiment
        .try_candidate_async("deferred", || async {
            tokio::task::yield_now().await;
            Ok(4)
        })
        .unwrap();
    experiment.set_async(true);
    let (subscriber, mut events) = recorder();
    experiment.subscribe(subscriber);

    assert_eq!(experiment.run_async(|_| true).await.unwrap(), Ok(4));

    let result = events.next().await.and_then(Event::into_result).unwrap();
    assert!(result.all_matched());
    assert_eq!(result.matched()[0].name(), "deferred");
}

#[tokio::test]
async fn async_mapper_runs_after_settling() {
    let mut experiment =
        Experiment::<Vec<u32>, Rejection, u32>::with_mapper("sum", |values| values.iter().sum());
    experiment
        .use_control_async(|| async { Ok(vec![1, 2, 3]) })
        .unwrap();
    experiment.try_candidate("flat", || Ok(vec![6])).unwrap();
    experiment.set_async(true);
    let (subscriber, mut events) = recorder();
    experiment.subscribe(subscriber);

    assert_eq!(experiment.run_async(|_| true).await.unwrap(), Ok(vec![1, 2, 3]));

    let result = events.next().await.and_then(Event::into_result).unwrap();
    assert_eq!(result.control().value(), Some(&6));
    assert!(result.all_matched());
}

#[tokio::test]
async fn async_skip_awaits_control_only() {
    let candidate = CallCounter::new();
    let mut experiment = Experiment::<u32, Rejection>::new("test");
    experiment.use_control_async(|| async { Ok(9) }).unwrap();
    experiment.candidate(candidate.returning(1)).unwrap();
    experiment.set_async(true);
    let (subscriber, mut events) = recorder();
    experiment.subscribe(subscriber);

    assert_eq!(experiment.run_async(|_| false).await.unwrap(), Ok(9));
    assert_eq!(candidate.count(), 0);
    assert_eq!(
        events.next().await.and_then(|e| e.skip_reason()),
        Some(SkipReason::SamplerDeclined)
    );
}

/// Deferred candidate that resolves only once the returned sender fires
fn gated_candidate(
    experiment: &mut Experiment<u32, Rejection>,
) -> oneshot::Sender<Result<u32, Rejection>> {
    let (tx, rx) = oneshot::channel();
    let gate = Arc::new(Mutex::new(Some(rx)));
    experiment
        .try_candidate_async("gated", move || {
            let rx = gate.lock().take();
            async move {
                match rx {
                    Some(rx) => rx.await.unwrap_or(Ok(0)),
                    None => Ok(0),
                }
            }
        })
        .unwrap();
    tx
}

// =============================================================================
// Returning before candidates settle
// =============================================================================

#[test]
fn blocking_run_returns_before_hanging_candidate() {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut experiment = Experiment::<u32, Rejection>::new("test");
        experiment.use_control(|| Ok(1)).unwrap();
        experiment
            .try_candidate_async("hang", || future::pending())
            .unwrap();
        experiment.set_async(true);
        let _ = tx.send(experiment.run(|_| true));
    });

    assert_eq!(rx.recv_timeout(EVENT_TIMEOUT).unwrap(), Ok(Ok(1)));
}

#[test]
fn blocking_run_settles_candidates_off_the_caller_path() {
    let mut experiment = Experiment::<u32, Rejection>::new("test");
    experiment.use_control(|| Ok(2)).unwrap();
    let release = gated_candidate(&mut experiment);
    experiment.set_async(true);
    let (subscriber, mut events) = recorder();
    experiment.subscribe(subscriber);

    assert_eq!(experiment.run(|_| true).unwrap(), Ok(2));
    assert!(events.drain().is_empty());

    release.send(Ok(3)).unwrap();
    let result = events.next_blocking().and_then(Event::into_result).unwrap();
    assert_eq!(result.mismatched()[0].value(), Some(&3));
}

#[tokio::test]
async fn run_async_returns_before_candidates_settle() {
    let mut experiment = Experiment::<u32, Rejection>::new("test");
    experiment.use_control_async(|| async { Ok(2) }).unwrap();
    let release = gated_candidate(&mut experiment);
    experiment.set_async(true);
    let (subscriber, mut events) = recorder();
    experiment.subscribe(subscriber);

    assert_eq!(experiment.run_async(|_| true).await.unwrap(), Ok(2));
    tokio::task::yield_now().await;
    assert!(events.drain().is_empty());

    release.send(Ok(2)).unwrap();
    let result = events.next().await.and_then(Event::into_result).unwrap();
    assert!(result.all_matched());
}

// =============================================================================
// Blocking on a deferred control inside a runtime
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocking_run_drives_timer_control_on_multi_thread_runtime() {
    let mut experiment = Experiment::<u32, Rejection>::new("test");
    experiment
        .use_control_async(|| async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(1)
        })
        .unwrap();
    experiment
        .try_candidate_async("hang", || future::pending())
        .unwrap();
    experiment.set_async(true);

    assert_eq!(experiment.run(|_| true), Ok(Ok(1)));
}

#[tokio::test]
async fn blocking_run_refuses_deferred_control_on_current_thread_runtime() {
    let candidate = CallCounter::new();
    let mut experiment = Experiment::<u32, Rejection>::new("test");
    experiment
        .use_control_async(|| async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(1)
        })
        .unwrap();
    experiment.candidate(candidate.returning(1)).unwrap();

    assert_eq!(
        experiment.run(|_| true),
        Err(ExperimentError::BlockingInRuntime)
    );
    assert_eq!(candidate.count(), 0);
    assert_eq!(experiment.run_async(|_| true).await, Ok(Ok(1)));
}

#[tokio::test]
async fn blocking_run_keeps_blocking_control_on_current_thread_runtime() {
    let mut experiment = Experiment::<u32, Rejection>::new("test");
    experiment.use_control(|| Ok(6)).unwrap();
    let release = gated_candidate(&mut experiment);
    experiment.set_async(true);
    let (subscriber, mut events) = recorder();
    experiment.subscribe(subscriber);

    assert_eq!(experiment.run(|_| true), Ok(Ok(6)));

    release.send(Ok(6)).unwrap();
    let result = events.next().await.and_then(Event::into_result).unwrap();
    assert!(result.all_matched());
}

#[test]
fn blocking_run_blocks_on_deferred_control() {
    let mut experiment = Experiment::<u32, Rejection>::new("test");
    experiment.use_control_async(|| async { Ok(5) }).unwrap();
    experiment.candidate(|| Ok(5)).unwrap();

    assert_eq!(experiment.run(|_| true).unwrap(), Ok(5));
}
