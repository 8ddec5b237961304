//! Error scenario integration tests
//!
//! Tests failure modes and recovery:
//! 1. Unreachable coordinator at registration
//! 2. Coordinator forgetting a worker
//! 3. Final results refused, store kept for recovery
//! 4. Refused lifecycle transitions over HTTP
//! 5. Duplicate and unknown deliveries

use std::time::Duration;

use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use examgrid::coordinator::{ClientConfig, ClientError, CoordinatorClient};
use examgrid::delivery::{DeliveryStatus, DeliveryStore};
use examgrid::models::{Assignment, ExportBundle};
use examgrid::worker::{ExamClient, WorkerError};

use super::fixtures::{store_with_due, wait_until, worker_config, RunningCoordinator};

fn store_files(dir: &std::path::Path) -> usize {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".db"))
        .count()
}

fn single_candidate_assignment(delivery_id: i64) -> Assignment {
    Assignment::new(
        delivery_id,
        "Retake",
        json!({
            "delivery_id": delivery_id,
            "duration": 30,
            "participants": [{"id": 501, "name": "Candidate 501"}],
        }),
    )
}

// ============================================================================
// Registration Errors
// ============================================================================

#[tokio::test]
async fn test_registration_fails_without_coordinator() {
    let dir = tempfile::tempdir().unwrap();
    let worker = ExamClient::new(worker_config("http://127.0.0.1:1", "exam-client-a", 1, dir.path())).unwrap();

    match worker.register().await {
        Err(WorkerError::Registration(_)) => {}
        other => panic!("Expected registration failure, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_worker_reregisters_after_coordinator_forgets_it() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _) = store_with_due(0);
    let coordinator = RunningCoordinator::start(store).await;

    let worker = ExamClient::new(worker_config(&coordinator.url, "exam-client-a", 2, dir.path())).unwrap();
    worker.register().await.unwrap();

    // Simulates a coordinator restart losing its in-memory registry
    coordinator.state.registry.unregister("exam-client-a").await;

    let ack = worker.report_status_once().await.unwrap();
    assert!(!ack.success);
    assert!(coordinator.state.registry.get_worker("exam-client-a").await.is_some());

    let ack = worker.report_status_once().await.unwrap();
    assert!(ack.success);

    worker.shutdown().await;
    coordinator.stop().await;
}

// ============================================================================
// Export Errors
// ============================================================================

#[tokio::test]
async fn test_refused_final_results_keep_store() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/internal/exam-clients/register"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "message": "ok",
            "client_id": "exam-client-a",
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/internal/exam-clients/event"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true, "message": "ok"})))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/internal/exam-clients/exam-client-a/final-results"))
        .respond_with(ResponseTemplate::new(500).set_body_string("database unavailable"))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/api/internal/exam-clients/exam-client-a"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true, "message": "ok"})))
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let worker = ExamClient::new(worker_config(&mock_server.uri(), "exam-client-a", 1, dir.path())).unwrap();
    worker.register().await.unwrap();

    let port = worker.start_delivery(single_candidate_assignment(77)).await.unwrap();
    let http = reqwest::Client::new();
    let base = format!("http://127.0.0.1:{port}");

    let started: Value = http
        .post(format!("{base}/exam/start"))
        .json(&json!({"participant_id": 501}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let attempt_id = started["data"]["attempt_id"].as_i64().unwrap();

    let response = http
        .post(format!("{base}/exam/complete"))
        .json(&json!({"attempt_id": attempt_id}))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    let closed = wait_until(Duration::from_secs(10), || {
        let worker = &worker;
        async move { worker.active_count().await == 0 }
    })
    .await;
    assert!(closed, "instance should close after the export attempt");
    assert_eq!(store_files(dir.path()), 1, "store must survive a refused export");

    worker.shutdown().await;
}

#[tokio::test]
async fn test_final_results_for_unknown_delivery_rejected() {
    let (store, _) = store_with_due(0);
    let coordinator = RunningCoordinator::start(store).await;
    let client = CoordinatorClient::new(
        ClientConfig::new(&coordinator.url, "exam-client-a").with_timeout(Duration::from_secs(5)),
    )
    .unwrap();

    let bundle = ExportBundle {
        delivery_id: 9_999,
        participants: Vec::new(),
        attempts: Vec::new(),
        answers: Vec::new(),
        progress: Vec::new(),
        exported_at: chrono::Utc::now(),
    };

    match client.submit_final_results(&bundle).await {
        Err(ClientError::HttpError { status, .. }) => assert_eq!(status, 404),
        other => panic!("Expected 404, got: {other:?}"),
    }

    coordinator.stop().await;
}

// ============================================================================
// Lifecycle Errors
// ============================================================================

#[tokio::test]
async fn test_refused_transitions_over_http() {
    let (store, deliveries) = store_with_due(1);
    let id = deliveries[0].id;
    let coordinator = RunningCoordinator::start(store.clone()).await;
    let http = reqwest::Client::new();
    let control = format!("{}/api/deliveries/{id}/control", coordinator.url);

    let response = http.post(&control).json(&json!({"action": "resume"})).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 409);

    let response = http.post(&control).json(&json!({"action": "start"})).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["status"], "started");

    let response = http.post(&control).json(&json!({"action": "start"})).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 409);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);

    let response = http.post(&control).json(&json!({"action": "teleport"})).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 400);

    let response = http
        .post(format!("{}/api/deliveries/424242/control", coordinator.url))
        .json(&json!({"action": "stop"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);

    assert_eq!(store.get(id).unwrap().unwrap().status, DeliveryStatus::Started);
    coordinator.stop().await;
}

// ============================================================================
// Instance Errors
// ============================================================================

#[tokio::test]
async fn test_duplicate_delivery_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let worker = ExamClient::new(worker_config("http://127.0.0.1:1", "exam-client-a", 2, dir.path())).unwrap();

    worker.start_delivery(single_candidate_assignment(12)).await.unwrap();
    match worker.start_delivery(single_candidate_assignment(12)).await {
        Err(WorkerError::AlreadyRunning(12)) => {}
        other => panic!("Expected duplicate rejection, got: {other:?}"),
    }
    assert_eq!(worker.active_count().await, 1);

    assert!(worker.cancel_delivery(12).await);
    let gone = wait_until(Duration::from_secs(5), || {
        let worker = &worker;
        async move { worker.active_count().await == 0 }
    })
    .await;
    assert!(gone);
    assert_eq!(store_files(dir.path()), 1, "cancelled delivery keeps its store file");
}

#[tokio::test]
async fn test_malformed_roster_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let worker = ExamClient::new(worker_config("http://127.0.0.1:1", "exam-client-a", 2, dir.path())).unwrap();

    let assignment = Assignment::new(13, "Broken", json!({"participants": "not a list"}));
    match worker.start_delivery(assignment).await {
        Err(WorkerError::InvalidAssignment { delivery_id, .. }) => assert_eq!(delivery_id, 13),
        other => panic!("Expected invalid assignment, got: {other:?}"),
    }
    assert_eq!(worker.active_count().await, 0);
}
