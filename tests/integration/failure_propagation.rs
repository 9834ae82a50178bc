//! Failure handling tests.
//!
//! A failed task marks everything downstream of it as skipped. Tasks that do
//! not depend on the failure run normally.

use std::sync::Arc;
use std::time::Duration;

use opgraph::client::InMemoryClient;
use opgraph::config::Config;
use opgraph::core::{GraphBuilder, OperationKind, ResourceId, TaskNode, TaskOutcome};
use opgraph::orchestration::SchedulerEvent;
use opgraph::workflow::{vision_workflow, PRODUCTS, PRODUCT_SETS};

use crate::fixtures::{lifecycle, run_collecting};

/// Test: failed update skips delete
/// Given a chain whose update is rejected
/// When the graph runs
/// Then create and get succeed, update fails, delete never runs
#[tokio::test]
async fn test_failure_skips_descendants() {
    let graph = lifecycle(GraphBuilder::new(), "ps", PRODUCT_SETS, None)
        .build()
        .unwrap();
    let client =
        Arc::new(InMemoryClient::new().with_failure(OperationKind::Update, PRODUCT_SETS));

    let (report, events) = run_collecting(graph, client.clone(), 4).await;

    assert!(!report.is_success());
    assert!(report.outcome("ps_create").unwrap().is_succeeded());
    assert!(report.outcome("ps_get").unwrap().is_succeeded());
    assert!(matches!(
        report.outcome("ps_update"),
        Some(TaskOutcome::Failed { error }) if error.contains("injected failure")
    ));
    assert_eq!(
        report.outcome("ps_delete"),
        Some(&TaskOutcome::Skipped {
            upstream: "ps_update".into()
        })
    );

    // The delete call was never made, so the resource is still there
    assert_eq!(client.call_count(), 3);
    assert_eq!(client.resource_count(PRODUCT_SETS).await, 1);
    assert!(events.contains(&SchedulerEvent::TaskSkipped {
        task: "ps_delete".into(),
        upstream: "ps_update".into(),
    }));
}

/// Test: failure at the root skips the whole chain
#[tokio::test]
async fn test_root_failure_skips_chain() {
    let graph = lifecycle(GraphBuilder::new(), "p", PRODUCTS, None)
        .build()
        .unwrap();
    let client = Arc::new(InMemoryClient::new().with_failure(OperationKind::Create, PRODUCTS));

    let (report, _) = run_collecting(graph, client.clone(), 4).await;

    assert_eq!(report.failed(), vec!["p_create"]);
    assert_eq!(report.skipped(), vec!["p_delete", "p_get", "p_update"]);
    assert_eq!(client.call_count(), 1);
}

/// Test: sibling chains are unaffected
/// Given two chains on different resources and a failing product get
/// When the graph runs
/// Then the product set chain completes
#[tokio::test(start_paused = true)]
async fn test_sibling_chain_unaffected() {
    let builder = lifecycle(GraphBuilder::new(), "ps", PRODUCT_SETS, None);
    let graph = lifecycle(builder, "p", PRODUCTS, None).build().unwrap();
    let client = Arc::new(
        InMemoryClient::new()
            .with_failure(OperationKind::Get, PRODUCTS)
            .with_latency(Duration::from_millis(10)),
    );

    let (report, _) = run_collecting(graph, client.clone(), 2).await;

    for name in ["ps_create", "ps_get", "ps_update", "ps_delete", "p_create"] {
        assert!(report.outcome(name).unwrap().is_succeeded(), "{name}");
    }
    assert_eq!(report.failed(), vec!["p_get"]);
    assert_eq!(report.skipped(), vec!["p_delete", "p_update"]);
    assert_eq!(client.resource_count(PRODUCT_SETS).await, 0);
    assert_eq!(client.resource_count(PRODUCTS).await, 1);
}

/// Test: a failure in a diamond skips the join but not the other branch
#[tokio::test]
async fn test_diamond_branch_failure() {
    let graph = GraphBuilder::new()
        .task(TaskNode::create("root", PRODUCT_SETS))
        .task(TaskNode::create("left", PRODUCTS))
        .task(TaskNode::create("right", PRODUCT_SETS).with_id("r"))
        .task(TaskNode::get("join", PRODUCT_SETS, ResourceId::Literal("r".into())))
        .edge("root", "left")
        .edge("root", "right")
        .edge("left", "join")
        .edge("right", "join")
        .build()
        .unwrap();
    let client = Arc::new(InMemoryClient::new().with_failure(OperationKind::Create, PRODUCTS));

    let (report, _) = run_collecting(graph, client, 4).await;

    assert!(report.outcome("root").unwrap().is_succeeded());
    assert!(report.outcome("right").unwrap().is_succeeded());
    assert_eq!(report.failed(), vec!["left"]);
    assert_eq!(report.skipped(), vec!["join"]);
}

/// Test: a missing resource fails the task with the client's error
#[tokio::test]
async fn test_not_found_is_a_failure() {
    let graph = GraphBuilder::new()
        .task(TaskNode::get("get", PRODUCTS, ResourceId::Literal("missing".into())))
        .task(TaskNode::delete("delete", PRODUCTS, ResourceId::Literal("missing".into())))
        .edge("get", "delete")
        .build()
        .unwrap();

    let (report, _) = run_collecting(graph, Arc::new(InMemoryClient::new()), 1).await;

    match report.outcome("get") {
        Some(TaskOutcome::Failed { error }) => {
            assert!(error.contains("get"), "{error}");
            assert!(error.contains("not found"), "{error}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(report.outcome("delete").unwrap().is_skipped());
}

/// Test: failure injected into the example workflow
/// Given every product update fails
/// When the workflow runs
/// Then both product chains stop at update and the product set chains finish
#[tokio::test]
async fn test_vision_workflow_product_update_fails() {
    let graph = vision_workflow(&Config::default()).unwrap();
    let client =
        Arc::new(InMemoryClient::new().with_failure(OperationKind::Update, PRODUCTS));

    let (report, _) = run_collecting(graph, client.clone(), 4).await;

    assert_eq!(report.failed(), vec!["product_update", "product_update_2"]);
    assert_eq!(report.skipped(), vec!["product_delete", "product_delete_2"]);
    assert_eq!(report.succeeded().len(), 14);
    assert_eq!(client.resource_count(PRODUCT_SETS).await, 0);
    assert_eq!(client.resource_count(PRODUCTS).await, 2);
}
