//! Parallel execution correctness tests.
//!
//! Independent chains run concurrently, a chain never runs out of order, and
//! the scheduler never has more than `max_concurrent` calls in flight.

use std::sync::Arc;
use std::time::Duration;

use opgraph::client::InMemoryClient;
use opgraph::core::{GraphBuilder, TaskNode};
use opgraph::workflow::PRODUCTS;

use crate::fixtures::{
    independent_chains, lifecycle_names, position, run_collecting, settled_before_start,
    TrackingClient,
};

/// Test: independent chains start before earlier chains finish
#[tokio::test(start_paused = true)]
async fn test_chains_overlap() {
    let graph = independent_chains(3, PRODUCTS);
    let client = Arc::new(TrackingClient::new(
        InMemoryClient::new().with_latency(Duration::from_millis(50)),
    ));

    let (report, _) = run_collecting(graph, client.clone(), 3).await;

    assert!(report.is_success());
    assert_eq!(client.peak(), 3, "one call per chain should overlap");

    // All three creates start before any chain reaches its delete
    let first_delete = position(&report.started, "chain0_delete")
        .min(position(&report.started, "chain1_delete"))
        .min(position(&report.started, "chain2_delete"));
    for i in 0..3 {
        assert!(position(&report.started, &format!("chain{i}_create")) < first_delete);
    }
}

/// Test: every chain keeps its own order under concurrency
#[tokio::test(start_paused = true)]
async fn test_chain_order_preserved() {
    let graph = independent_chains(4, PRODUCTS);
    let client = Arc::new(InMemoryClient::new().with_latency(Duration::from_millis(10)));

    let (report, events) = run_collecting(graph, client, 4).await;

    assert!(report.is_success());
    for i in 0..4 {
        let names = lifecycle_names(&format!("chain{i}"));
        for pair in names.windows(2) {
            assert!(
                settled_before_start(&events, &pair[0], &pair[1]),
                "{} must finish before {} starts",
                pair[0],
                pair[1]
            );
        }
    }
}

/// Test: concurrency limit
/// Given ten independent creates and a limit of two
/// When the graph runs
/// Then at most two calls are ever in flight
#[tokio::test(start_paused = true)]
async fn test_max_concurrent_respected() {
    let graph = (0..10)
        .fold(GraphBuilder::new(), |b, i| {
            b.task(TaskNode::create(&format!("create{i}"), PRODUCTS))
        })
        .build()
        .unwrap();
    let client = Arc::new(TrackingClient::new(
        InMemoryClient::new().with_latency(Duration::from_millis(20)),
    ));

    let (report, _) = run_collecting(graph, client.clone(), 2).await;

    assert!(report.is_success());
    assert_eq!(report.outcomes.len(), 10);
    assert_eq!(client.peak(), 2);
    assert_eq!(client.inner.resource_count(PRODUCTS).await, 10);
}

/// Test: a limit of one runs tasks strictly one at a time in topological order
#[tokio::test(start_paused = true)]
async fn test_sequential_when_limit_is_one() {
    let graph = independent_chains(2, PRODUCTS);
    let order: Vec<String> = graph
        .topological_order()
        .unwrap()
        .into_iter()
        .map(|t| t.name.clone())
        .collect();
    let client = Arc::new(TrackingClient::new(
        InMemoryClient::new().with_latency(Duration::from_millis(5)),
    ));

    let (report, _) = run_collecting(graph, client.clone(), 1).await;

    assert!(report.is_success());
    assert_eq!(client.peak(), 1);
    assert_eq!(report.started, order);
    assert_eq!(report.finished, order);
}

/// Test: diamond dependency waits for both branches
#[tokio::test(start_paused = true)]
async fn test_diamond_join_waits_for_both() {
    let graph = GraphBuilder::new()
        .task(TaskNode::create("root", PRODUCTS))
        .task(TaskNode::create("left", PRODUCTS))
        .task(TaskNode::create("right", PRODUCTS))
        .task(TaskNode::create("join", PRODUCTS))
        .edge("root", "left")
        .edge("root", "right")
        .edge("left", "join")
        .edge("right", "join")
        .build()
        .unwrap();
    let client = Arc::new(TrackingClient::new(
        InMemoryClient::new().with_latency(Duration::from_millis(10)),
    ));

    let (report, events) = run_collecting(graph, client.clone(), 4).await;

    assert!(report.is_success());
    assert_eq!(client.peak(), 2);
    assert!(settled_before_start(&events, "left", "join"));
    assert!(settled_before_start(&events, "right", "join"));
    assert_eq!(report.started.last().map(String::as_str), Some("join"));
}
