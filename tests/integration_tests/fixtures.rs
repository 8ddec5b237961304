//! Test fixtures for integration tests
//!
//! Builds delivery stores, worker configs and a coordinator served on an
//! ephemeral port.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use examgrid::coordinator::registry::RegisterRequest;
use examgrid::coordinator::{AppState, CoordinatorConfig, CoordinatorServer};
use examgrid::delivery::{Delivery, DeliveryStore, NewDelivery, SharedDeliveryStore, SqliteDeliveryStore};
use examgrid::models::ParticipantRecord;
use examgrid::scheduler::AutoStartScheduler;
use examgrid::worker::WorkerConfig;

/// First participant id; delivery `n` (1-based) gets participant `PARTICIPANT_BASE + n`
pub const PARTICIPANT_BASE: i64 = 100;

/// Store with `count` auto-start deliveries that became due ten minutes ago.
///
/// Each delivery has its own group with a single participant, and scheduled
/// times are staggered by a second so the due order is stable.
pub fn store_with_due(count: usize) -> (Arc<SqliteDeliveryStore>, Vec<Delivery>) {
    let store = Arc::new(SqliteDeliveryStore::in_memory().expect("in-memory store"));
    let base = Utc::now() - ChronoDuration::minutes(10);

    let deliveries = (0..count)
        .map(|i| {
            let group_id = i as i64 + 1;
            let delivery = store
                .create(
                    &NewDelivery::new(format!("Midterm {}", i + 1))
                        .with_exam(7, "Algebra II")
                        .with_group(group_id, format!("Class {}", i + 1))
                        .with_duration(45)
                        .auto_start_at(base + ChronoDuration::seconds(i as i64)),
                )
                .expect("create delivery");
            store
                .add_group_member(
                    group_id,
                    &ParticipantRecord::new(PARTICIPANT_BASE + group_id, format!("Candidate {group_id}")),
                )
                .expect("add group member");
            delivery
        })
        .collect();

    (store, deliveries)
}

/// Registration body for a worker with the given limit
pub fn register_request(client_id: &str, max_deliveries: u32) -> RegisterRequest {
    RegisterRequest {
        client_id: client_id.to_string(),
        client_ip: "127.0.0.1".to_string(),
        port: 8234,
        max_deliveries,
        version: "test".to_string(),
        capabilities: vec!["exam_delivery".to_string()],
    }
}

/// Coordinator config for tests: in-memory, quiet, scheduler driven by hand
pub fn coordinator_config() -> CoordinatorConfig {
    CoordinatorConfig::builder()
        .in_memory()
        .scheduler_enabled(false)
        .enable_request_logging(false)
        .build()
        .expect("valid coordinator config")
}

/// Worker config pointed at `coordinator_url` with OS-assigned endpoint ports
pub fn worker_config(coordinator_url: &str, client_id: &str, max_deliveries: u32, data_dir: &Path) -> WorkerConfig {
    WorkerConfig::builder()
        .coordinator_url(coordinator_url)
        .client_id(client_id)
        .client_ip("127.0.0.1")
        .port(0)
        .max_deliveries(max_deliveries)
        .data_dir(data_dir)
        .request_timeout_secs(5)
        .register_retries(0)
        .shutdown_grace_secs(2)
        .enable_request_logging(false)
        .build()
        .expect("valid worker config")
}

/// A coordinator serving on 127.0.0.1 with an ephemeral port
pub struct RunningCoordinator {
    pub url: String,
    pub state: AppState,
    pub scheduler: Arc<AutoStartScheduler>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl RunningCoordinator {
    /// Serve `store` until [`RunningCoordinator::stop`] is called
    pub async fn start(store: SharedDeliveryStore) -> Self {
        let server = CoordinatorServer::with_store(coordinator_config(), store).expect("coordinator server");
        let state = server.state();
        let scheduler = server.scheduler();

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind coordinator");
        let url = format!("http://{}", listener.local_addr().expect("local addr"));

        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let _ = server
                .serve(listener, async move {
                    let _ = rx.await;
                })
                .await;
        });

        Self {
            url,
            state,
            scheduler,
            shutdown: Some(tx),
            handle: Some(handle),
        }
    }

    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }
    }
}

/// Poll `check` every 50ms until it holds or `limit` passes
pub async fn wait_until<F, Fut>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
