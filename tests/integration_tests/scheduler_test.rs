//! Auto-start scheduler tests
//!
//! Runs the scheduler over the real delivery store and client registry:
//! 1. Claims bounded by live worker capacity
//! 2. Deferral when no worker has room
//! 3. Queue overflow releasing claims
//! 4. Two schedulers racing over one store

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use tokio::sync::watch;

use examgrid::coordinator::registry::StatusReport;
use examgrid::coordinator::ClientRegistry;
use examgrid::delivery::{DeliveryStatus, DeliveryStore, SqliteDeliveryStore};
use examgrid::scheduler::AutoStartScheduler;

use super::fixtures::{register_request, store_with_due, wait_until, PARTICIPANT_BASE};

fn registry(queue_capacity: usize) -> Arc<ClientRegistry> {
    Arc::new(ClientRegistry::new(ChronoDuration::seconds(120), queue_capacity))
}

fn scheduler(store: &Arc<SqliteDeliveryStore>, registry: &Arc<ClientRegistry>) -> AutoStartScheduler {
    AutoStartScheduler::new(store.clone(), registry.clone(), Duration::from_millis(50))
}

fn status_of(store: &SqliteDeliveryStore, id: i64) -> DeliveryStatus {
    store.get(id).unwrap().unwrap().status
}

// ============================================================================
// Capacity Tests
// ============================================================================

#[tokio::test]
async fn test_claims_bounded_by_worker_capacity() {
    let (store, deliveries) = store_with_due(3);
    let registry = registry(10);
    registry.register(register_request("exam-client-a", 2)).await;

    let report = scheduler(&store, &registry).tick().await;

    assert_eq!(report.due, 3);
    assert_eq!(report.capacity, 2);
    assert_eq!(report.claimed, 2);
    assert!(!report.deferred);

    assert_eq!(status_of(&store, deliveries[0].id), DeliveryStatus::Started);
    assert_eq!(status_of(&store, deliveries[1].id), DeliveryStatus::Started);
    assert_eq!(status_of(&store, deliveries[2].id), DeliveryStatus::Unset);
    assert_eq!(registry.pending_assignments().await, 2);
}

#[tokio::test]
async fn test_assignment_carries_group_roster() {
    let (store, deliveries) = store_with_due(1);
    let registry = registry(10);
    registry.register(register_request("exam-client-a", 1)).await;

    scheduler(&store, &registry).tick().await;

    let assignment = registry.poll("exam-client-a").await.unwrap().expect("assignment");
    assert_eq!(assignment.delivery_id, deliveries[0].id);
    assert_eq!(assignment.delivery_name, "Midterm 1");
    assert_eq!(assignment.duration_minutes(), Some(45));

    let participants = assignment.participants().unwrap();
    assert_eq!(participants.len(), 1);
    assert_eq!(participants[0].id, PARTICIPANT_BASE + 1);
    assert_eq!(assignment.exam_data["exam_title"], "Algebra II");
}

#[tokio::test]
async fn test_unlimited_worker_takes_every_due_delivery() {
    let (store, _) = store_with_due(5);
    let registry = registry(10);
    registry.register(register_request("exam-client-a", 0)).await;

    let report = scheduler(&store, &registry).tick().await;

    assert_eq!(report.claimed, 5);
    assert_eq!(registry.pending_assignments().await, 5);
}

#[tokio::test]
async fn test_busy_worker_leaves_remaining_capacity() {
    let (store, _) = store_with_due(3);
    let registry = registry(10);
    registry.register(register_request("exam-client-a", 3)).await;
    registry
        .report_status(
            "exam-client-a",
            StatusReport {
                active_deliveries: 2,
                max_deliveries: 3,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let report = scheduler(&store, &registry).tick().await;

    assert_eq!(report.capacity, 1);
    assert_eq!(report.claimed, 1);
}

// ============================================================================
// Deferral Tests
// ============================================================================

#[tokio::test]
async fn test_no_workers_defers_batch() {
    let (store, deliveries) = store_with_due(2);
    let registry = registry(10);

    let report = scheduler(&store, &registry).tick().await;

    assert!(report.deferred);
    assert_eq!(report.claimed, 0);
    for delivery in &deliveries {
        assert_eq!(status_of(&store, delivery.id), DeliveryStatus::Unset);
    }
}

#[tokio::test]
async fn test_stale_worker_contributes_no_capacity() {
    let (store, deliveries) = store_with_due(1);
    let registry = Arc::new(ClientRegistry::new(ChronoDuration::milliseconds(50), 10));
    registry.register(register_request("exam-client-a", 4)).await;

    tokio::time::sleep(Duration::from_millis(120)).await;

    let report = scheduler(&store, &registry).tick().await;
    assert!(report.deferred);
    assert_eq!(status_of(&store, deliveries[0].id), DeliveryStatus::Unset);
}

// ============================================================================
// Overflow Tests
// ============================================================================

#[tokio::test]
async fn test_queue_overflow_releases_claims() {
    let (store, deliveries) = store_with_due(3);
    let registry = registry(1);
    registry.register(register_request("exam-client-a", 0)).await;
    let scheduler = scheduler(&store, &registry);

    let report = scheduler.tick().await;
    assert_eq!(report.claimed, 1);
    assert_eq!(report.released, 2);
    assert_eq!(status_of(&store, deliveries[0].id), DeliveryStatus::Started);
    assert_eq!(status_of(&store, deliveries[1].id), DeliveryStatus::Unset);
    assert_eq!(status_of(&store, deliveries[2].id), DeliveryStatus::Unset);

    // Draining the queue lets the released deliveries through on a later tick
    registry.poll("exam-client-a").await.unwrap().expect("first assignment");
    let report = scheduler.tick().await;
    assert_eq!(report.due, 2);
    assert_eq!(report.claimed, 1);
    assert_eq!(status_of(&store, deliveries[1].id), DeliveryStatus::Started);
}

// ============================================================================
// Concurrency Tests
// ============================================================================

#[tokio::test]
async fn test_racing_schedulers_claim_each_delivery_once() {
    let (store, _) = store_with_due(4);
    let left = registry(10);
    let right = registry(10);
    left.register(register_request("exam-client-a", 0)).await;
    right.register(register_request("exam-client-b", 0)).await;

    let left_scheduler = scheduler(&store, &left);
    let right_scheduler = scheduler(&store, &right);

    let (a, b) = tokio::join!(left_scheduler.tick(), right_scheduler.tick());

    assert_eq!(a.claimed + b.claimed, 4);
    assert_eq!(
        left.pending_assignments().await + right.pending_assignments().await,
        4
    );
    assert!(store.due_for_auto_start(chrono::Utc::now()).unwrap().is_empty());
}

#[tokio::test]
async fn test_spawned_scheduler_runs_until_shutdown() {
    let (store, _) = store_with_due(3);
    let registry = registry(10);
    registry.register(register_request("exam-client-a", 0)).await;

    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = Arc::new(scheduler(&store, &registry)).spawn(stop_rx);

    let queued = wait_until(Duration::from_secs(5), || {
        let registry = registry.clone();
        async move { registry.pending_assignments().await == 3 }
    })
    .await;
    assert!(queued, "scheduler should queue every due delivery");

    stop_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("scheduler stops on shutdown")
        .unwrap();
}
