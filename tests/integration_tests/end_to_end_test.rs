//! End-to-end delivery tests
//!
//! A served coordinator and a live exam client talking over HTTP:
//! 1. Capacity-limited distribution of due deliveries
//! 2. A participant sitting a delivery until the results are reconciled
//! 3. The background loops picking up work and shutting down cleanly

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use examgrid::coordinator::{ClientConfig, CoordinatorClient};
use examgrid::delivery::{DeliveryStatus, DeliveryStore};
use examgrid::models::{InstanceStatus, ParticipantStatus};
use examgrid::worker::{ExamClient, PollOutcome, WorkerConfig};

use super::fixtures::{store_with_due, wait_until, worker_config, RunningCoordinator, PARTICIPANT_BASE};

fn store_files(dir: &std::path::Path) -> usize {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".db"))
        .count()
}

async fn post_json(http: &reqwest::Client, url: String, body: Value) -> Value {
    let response = http.post(url).json(&body).send().await.unwrap();
    assert!(response.status().is_success(), "POST failed: {}", response.status());
    response.json().await.unwrap()
}

// ============================================================================
// Distribution
// ============================================================================

#[tokio::test]
async fn test_capacity_limited_distribution() {
    let dir = tempfile::tempdir().unwrap();
    let (store, deliveries) = store_with_due(3);
    let coordinator = RunningCoordinator::start(store.clone()).await;

    let worker = ExamClient::new(worker_config(&coordinator.url, "exam-client-a", 2, dir.path())).unwrap();
    worker.register().await.unwrap();

    let report = coordinator.scheduler.tick().await;
    assert_eq!(report.due, 3);
    assert_eq!(report.claimed, 2);
    assert_eq!(
        store.get(deliveries[2].id).unwrap().unwrap().status,
        DeliveryStatus::Unset
    );

    let mut ports = Vec::new();
    for _ in 0..2 {
        match worker.poll_once().await.unwrap() {
            PollOutcome::Started { port, .. } => ports.push(port),
            other => panic!("Expected a started delivery, got: {other:?}"),
        }
    }
    assert_ne!(ports[0], ports[1]);
    assert_eq!(worker.active_count().await, 2);

    // Worker is full and nothing else is queued
    assert_eq!(worker.poll_once().await.unwrap(), PollOutcome::AtCapacity);
    assert_eq!(coordinator.state.registry.pending_assignments().await, 0);

    let client = CoordinatorClient::new(
        ClientConfig::new(&coordinator.url, "exam-client-a").with_timeout(Duration::from_secs(5)),
    )
    .unwrap();
    assert!(client.poll_assignment().await.unwrap().is_none());

    let ack = worker.report_status_once().await.unwrap();
    assert!(ack.success);
    let seen = coordinator.state.registry.get_worker("exam-client-a").await.unwrap();
    assert_eq!(seen.active_deliveries, 2);
    assert_eq!(seen.deliveries.len(), 2);
    assert_eq!(coordinator.state.registry.available_capacity().await, 0);

    // A second tick has no room for the third delivery
    let report = coordinator.scheduler.tick().await;
    assert_eq!(report.due, 1);
    assert!(report.deferred);

    worker.shutdown().await;
    assert!(coordinator.state.registry.get_worker("exam-client-a").await.is_none());
    coordinator.stop().await;
}

// ============================================================================
// Full Delivery Run
// ============================================================================

#[tokio::test]
async fn test_participant_completion_reconciles_results() {
    let dir = tempfile::tempdir().unwrap();
    let (store, deliveries) = store_with_due(1);
    let delivery_id = deliveries[0].id;
    let participant_id = PARTICIPANT_BASE + 1;
    let coordinator = RunningCoordinator::start(store.clone()).await;

    let worker = ExamClient::new(worker_config(&coordinator.url, "exam-client-a", 1, dir.path())).unwrap();
    worker.register().await.unwrap();
    coordinator.scheduler.tick().await;

    let port = match worker.poll_once().await.unwrap() {
        PollOutcome::Started { delivery_id: started, port } => {
            assert_eq!(started, delivery_id);
            port
        }
        other => panic!("Expected a started delivery, got: {other:?}"),
    };
    assert_eq!(store_files(dir.path()), 1);

    let http = reqwest::Client::new();
    let base = format!("http://127.0.0.1:{port}");

    let started = post_json(
        &http,
        format!("{base}/exam/start"),
        json!({"participant_id": participant_id, "total_questions": 2}),
    )
    .await;
    let attempt_id = started["data"]["attempt_id"].as_i64().unwrap();

    let answered = post_json(
        &http,
        format!("{base}/exam/answer"),
        json!({"attempt_id": attempt_id, "question_id": 1, "answer": "B", "score": 4}),
    )
    .await;
    assert_eq!(answered["data"]["questions_answered"], 1);
    assert_eq!(answered["data"]["current_score"], 4);

    // The coordinator reads progress from the running endpoint
    worker.report_status_once().await.unwrap();
    let live_url = format!("{}/api/deliveries/{delivery_id}/live-progress", coordinator.url);
    let live: Value = http.get(&live_url).send().await.unwrap().json().await.unwrap();
    assert_eq!(live["data"]["source"], "exam_client");
    assert_eq!(live["data"]["client_id"], "exam-client-a");
    assert_eq!(live["data"]["participants"][0]["participant_id"], participant_id);
    assert_eq!(live["data"]["participants"][0]["questions_answered"], 1);
    assert_eq!(live["data"]["stats"]["in_progress"], 1);

    post_json(
        &http,
        format!("{base}/exam/complete"),
        json!({"attempt_id": attempt_id}),
    )
    .await;

    // Everyone finished: the instance exports, the coordinator finishes the delivery
    let finished = wait_until(Duration::from_secs(10), || {
        let store = store.clone();
        async move {
            store
                .get(delivery_id)
                .ok()
                .flatten()
                .is_some_and(|d| d.is_finished())
        }
    })
    .await;
    assert!(finished, "delivery should be finished after final results");

    let delivery = store.get(delivery_id).unwrap().unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Finished);

    let results = store.final_results(delivery_id).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].participant_id, participant_id);
    assert_eq!(results[0].status, ParticipantStatus::Completed);
    assert_eq!(results[0].score, 4);
    assert_eq!(results[0].answered, 1);
    assert_eq!(results[0].client_id, "exam-client-a");

    // The endpoint is gone, so progress now comes from the stored results
    let live: Value = http.get(&live_url).send().await.unwrap().json().await.unwrap();
    assert_eq!(live["data"]["source"], "database");
    assert_eq!(live["data"]["stats"]["completed"], 1);

    let drained = wait_until(Duration::from_secs(5), || {
        let worker = &worker;
        async move { worker.active_count().await == 0 }
    })
    .await;
    assert!(drained, "instance should leave the worker after export");
    assert_eq!(worker.total_processed(), 1);
    assert_eq!(store_files(dir.path()), 0);

    // Started, answered and completed events reach the central store
    let recorded = wait_until(Duration::from_secs(5), || {
        let store = store.clone();
        async move { store.event_count(delivery_id).unwrap_or(0) >= 3 }
    })
    .await;
    assert!(recorded, "endpoint events should be recorded centrally");

    worker.shutdown().await;
    coordinator.stop().await;
}

// ============================================================================
// Background Loops
// ============================================================================

#[tokio::test]
async fn test_worker_loops_pick_up_and_release_work() {
    let dir = tempfile::tempdir().unwrap();
    let (store, deliveries) = store_with_due(1);
    let delivery_id = deliveries[0].id;
    let coordinator = RunningCoordinator::start(store.clone()).await;

    let config = WorkerConfig {
        status_interval_secs: 1,
        poll_interval_secs: 1,
        ..worker_config(&coordinator.url, "exam-client-loop", 2, dir.path())
    };
    let worker = Arc::new(ExamClient::new(config).unwrap());
    let handle = worker.start().await.unwrap();
    assert!(handle.is_running());
    assert!(coordinator.state.registry.get_worker("exam-client-loop").await.is_some());

    coordinator.scheduler.tick().await;

    let running = wait_until(Duration::from_secs(10), || {
        let worker = worker.clone();
        async move {
            worker
                .instances()
                .await
                .iter()
                .any(|i| i.id == delivery_id && i.status == InstanceStatus::Running)
        }
    })
    .await;
    assert!(running, "poll loop should start the queued delivery");

    let reported = wait_until(Duration::from_secs(10), || {
        let registry = coordinator.state.registry.clone();
        async move {
            registry
                .get_worker("exam-client-loop")
                .await
                .is_some_and(|w| w.active_deliveries == 1)
        }
    })
    .await;
    assert!(reported, "status loop should report the running delivery");

    handle.shutdown().await;
    worker.shutdown().await;

    assert_eq!(worker.active_count().await, 0);
    assert!(coordinator.state.registry.get_worker("exam-client-loop").await.is_none());

    // Cancelled instances are not exported, so the delivery stays started
    let delivery = store.get(delivery_id).unwrap().unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Started);
    assert!(!delivery.is_finished());

    coordinator.stop().await;
}
