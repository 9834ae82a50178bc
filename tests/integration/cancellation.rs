//! Cancellation tests.
//!
//! Cancelling a run stops new dispatches, lets running operations finish and
//! reports every unstarted task as cancelled.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use opgraph::client::InMemoryClient;
use opgraph::core::{GraphBuilder, TaskOutcome};
use opgraph::orchestration::{Scheduler, SchedulerEvent};
use opgraph::workflow::PRODUCT_SETS;

use crate::fixtures::{independent_chains, lifecycle};

/// Test: cancel mid-run
/// Given a chain with slow calls
/// When the token is cancelled while create is in flight
/// Then create finishes, the rest are cancelled and no further calls happen
#[tokio::test(start_paused = true)]
async fn test_cancel_lets_running_task_finish() {
    let graph = lifecycle(GraphBuilder::new(), "ps", PRODUCT_SETS, None)
        .build()
        .unwrap();
    let client = Arc::new(InMemoryClient::new().with_latency(Duration::from_millis(100)));
    let (event_tx, mut event_rx) = mpsc::channel(64);
    let scheduler = Scheduler::new(graph, client.clone(), 2).with_events(event_tx);

    let cancel = CancellationToken::new();
    let run = {
        let cancel = cancel.clone();
        tokio::spawn(async move { scheduler.run(cancel).await })
    };

    // Wait for create to be dispatched, then cancel
    assert_eq!(
        event_rx.recv().await,
        Some(SchedulerEvent::TaskStarted {
            task: "ps_create".into()
        })
    );
    cancel.cancel();

    let report = run.await.unwrap().unwrap();

    assert!(report.cancelled);
    assert!(!report.is_success());
    assert!(report.outcome("ps_create").unwrap().is_succeeded());
    for name in ["ps_get", "ps_update", "ps_delete"] {
        assert_eq!(report.outcome(name), Some(&TaskOutcome::Cancelled), "{name}");
    }
    assert_eq!(client.call_count(), 1);
    assert_eq!(client.resource_count(PRODUCT_SETS).await, 1);

    let mut rest = Vec::new();
    while let Some(event) = event_rx.recv().await {
        rest.push(event);
    }
    assert_eq!(rest.last(), Some(&SchedulerEvent::RunFinished { cancelled: true }));
}

/// Test: cancel before the run starts
#[tokio::test]
async fn test_cancel_before_start() {
    let graph = independent_chains(2, PRODUCT_SETS);
    let client = Arc::new(InMemoryClient::new());
    let scheduler = Scheduler::new(graph, client.clone(), 4);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = scheduler.run(cancel).await.unwrap();

    assert!(report.cancelled);
    assert!(report.started.is_empty());
    assert_eq!(report.outcomes.len(), 8);
    assert!(report
        .outcomes
        .values()
        .all(|o| *o == TaskOutcome::Cancelled));
    assert_eq!(client.call_count(), 0);
}

/// Test: cancelling after completion changes nothing
#[tokio::test]
async fn test_cancel_after_finish() {
    let graph = independent_chains(1, PRODUCT_SETS);
    let scheduler = Scheduler::new(graph, Arc::new(InMemoryClient::new()), 1);

    let cancel = CancellationToken::new();
    let report = scheduler.run(cancel.clone()).await.unwrap();
    cancel.cancel();

    assert!(!report.cancelled);
    assert!(report.is_success());
}
