//! Worker protocol tests
//!
//! Drives a served coordinator through the same client the exam-client
//! worker uses:
//! 1. Registration and re-registration
//! 2. Status reports, including the "unknown client" reply
//! 3. Assignment polling
//! 4. Event push and unregistration

use std::time::Duration;

use serde_json::json;

use examgrid::coordinator::registry::StatusReport;
use examgrid::coordinator::{ClientConfig, ClientError, CoordinatorClient, WorkerStatus};
use examgrid::delivery::DeliveryStore;
use examgrid::models::{Assignment, ClientEvent, EventType};

use super::fixtures::{register_request, store_with_due, RunningCoordinator};

fn client(url: &str, client_id: &str) -> CoordinatorClient {
    CoordinatorClient::new(ClientConfig::new(url, client_id).with_timeout(Duration::from_secs(5)))
        .expect("coordinator client")
}

// ============================================================================
// Registration Tests
// ============================================================================

#[tokio::test]
async fn test_worker_registration() {
    let (store, _) = store_with_due(0);
    let coordinator = RunningCoordinator::start(store).await;
    let client = client(&coordinator.url, "exam-client-a");

    let response = client.register(&register_request("exam-client-a", 3)).await.unwrap();
    assert!(response.success);
    assert_eq!(response.client_id, "exam-client-a");

    let worker = coordinator.state.registry.get_worker("exam-client-a").await.unwrap();
    assert_eq!(worker.status, WorkerStatus::Active);
    assert_eq!(worker.max_deliveries, 3);
    assert_eq!(worker.active_deliveries, 0);
    assert_eq!(coordinator.state.registry.available_capacity().await, 3);

    coordinator.stop().await;
}

#[tokio::test]
async fn test_reregistration_replaces_record() {
    let (store, _) = store_with_due(0);
    let coordinator = RunningCoordinator::start(store).await;
    let client = client(&coordinator.url, "exam-client-a");

    client.register(&register_request("exam-client-a", 3)).await.unwrap();
    client
        .report_status(&StatusReport {
            active_deliveries: 2,
            max_deliveries: 3,
            ..Default::default()
        })
        .await
        .unwrap();

    client.register(&register_request("exam-client-a", 5)).await.unwrap();

    let workers = coordinator.state.registry.list_workers().await;
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0].max_deliveries, 5);
    assert_eq!(workers[0].active_deliveries, 0);

    coordinator.stop().await;
}

// ============================================================================
// Status Report Tests
// ============================================================================

#[tokio::test]
async fn test_status_report_updates_capacity() {
    let (store, _) = store_with_due(0);
    let coordinator = RunningCoordinator::start(store).await;
    let client = client(&coordinator.url, "exam-client-a");
    client.register(&register_request("exam-client-a", 4)).await.unwrap();

    let ack = client
        .report_status(&StatusReport {
            active_deliveries: 3,
            max_deliveries: 4,
            total_processed: 9,
            uptime: 120,
            deliveries: Vec::new(),
        })
        .await
        .unwrap();
    assert!(ack.success);

    let worker = coordinator.state.registry.get_worker("exam-client-a").await.unwrap();
    assert_eq!(worker.active_deliveries, 3);
    assert_eq!(worker.total_processed, 9);
    assert_eq!(worker.uptime, 120);
    assert_eq!(coordinator.state.registry.available_capacity().await, 1);

    coordinator.stop().await;
}

#[tokio::test]
async fn test_status_from_unknown_worker_asks_for_reregistration() {
    let (store, _) = store_with_due(0);
    let coordinator = RunningCoordinator::start(store).await;
    let client = client(&coordinator.url, "ghost");

    let ack = client.report_status(&StatusReport::default()).await.unwrap();
    assert!(!ack.success);
    assert!(coordinator.state.registry.list_workers().await.is_empty());

    coordinator.stop().await;
}

// ============================================================================
// Polling Tests
// ============================================================================

#[tokio::test]
async fn test_poll_hands_out_each_assignment_once() {
    let (store, _) = store_with_due(0);
    let coordinator = RunningCoordinator::start(store).await;
    let first = client(&coordinator.url, "exam-client-a");
    let second = client(&coordinator.url, "exam-client-b");
    first.register(&register_request("exam-client-a", 2)).await.unwrap();
    second.register(&register_request("exam-client-b", 2)).await.unwrap();

    assert!(first.poll_assignment().await.unwrap().is_none());

    coordinator
        .state
        .registry
        .enqueue(Assignment::new(41, "Physics Final", json!({"participants": []})))
        .await
        .unwrap();

    let assignment = first.poll_assignment().await.unwrap().expect("assignment");
    assert_eq!(assignment.delivery_id, 41);
    assert_eq!(assignment.delivery_name, "Physics Final");
    assert_eq!(assignment.client_id.as_deref(), Some("exam-client-a"));
    assert!(assignment.assigned_at.is_some());

    assert!(second.poll_assignment().await.unwrap().is_none());
    assert_eq!(coordinator.state.registry.pending_assignments().await, 0);

    coordinator.stop().await;
}

#[tokio::test]
async fn test_poll_skipped_for_worker_at_capacity() {
    let (store, _) = store_with_due(0);
    let coordinator = RunningCoordinator::start(store).await;
    let client = client(&coordinator.url, "exam-client-a");
    client.register(&register_request("exam-client-a", 1)).await.unwrap();
    client
        .report_status(&StatusReport {
            active_deliveries: 1,
            max_deliveries: 1,
            ..Default::default()
        })
        .await
        .unwrap();

    coordinator
        .state
        .registry
        .enqueue(Assignment::new(5, "Queued", json!({})))
        .await
        .unwrap();

    assert!(client.poll_assignment().await.unwrap().is_none());
    assert_eq!(coordinator.state.registry.pending_assignments().await, 1);

    coordinator.stop().await;
}

#[tokio::test]
async fn test_poll_from_unregistered_worker_is_not_found() {
    let (store, _) = store_with_due(0);
    let coordinator = RunningCoordinator::start(store).await;
    let client = client(&coordinator.url, "stranger");

    match client.poll_assignment().await {
        Err(ClientError::HttpError { status, .. }) => assert_eq!(status, 404),
        other => panic!("Expected 404, got: {other:?}"),
    }

    coordinator.stop().await;
}

// ============================================================================
// Event and Unregister Tests
// ============================================================================

#[tokio::test]
async fn test_pushed_events_are_recorded() {
    let (store, deliveries) = store_with_due(1);
    let coordinator = RunningCoordinator::start(store.clone()).await;
    let client = client(&coordinator.url, "exam-client-a");
    let delivery_id = deliveries[0].id;

    let mut events = coordinator.state.events.subscribe();

    let ack = client
        .push_event(&ClientEvent::new(
            EventType::AnswerSubmitted,
            delivery_id,
            "exam-client-a",
            json!({"participant_id": 101, "question_id": 3}),
        ))
        .await
        .unwrap();
    assert!(ack.success);

    assert_eq!(store.event_count(delivery_id).unwrap(), 1);
    let received = events.recv().await.unwrap();
    assert_eq!(received.event_type, EventType::AnswerSubmitted);
    assert_eq!(received.delivery_id, delivery_id);

    coordinator.stop().await;
}

#[tokio::test]
async fn test_unregister_removes_worker_capacity() {
    let (store, _) = store_with_due(0);
    let coordinator = RunningCoordinator::start(store).await;
    let client = client(&coordinator.url, "exam-client-a");
    client.register(&register_request("exam-client-a", 2)).await.unwrap();
    assert_eq!(coordinator.state.registry.available_capacity().await, 2);

    let ack = client.unregister().await.unwrap();
    assert!(ack.success);
    assert!(coordinator.state.registry.get_worker("exam-client-a").await.is_none());
    assert_eq!(coordinator.state.registry.available_capacity().await, 0);

    coordinator.stop().await;
}
