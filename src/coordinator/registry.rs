//! Client registry for tracking exam-client workers
//!
//! This module manages worker registration, liveness derived from status
//! reports, the bounded assignment queue, and aggregate capacity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::metrics;
use crate::models::{Assignment, InstanceSummary};

use super::config::CoordinatorConfig;
use super::queue::{AssignmentQueue, QueueError};

/// Capacity reported when any live worker accepts unlimited deliveries
pub const UNLIMITED_CAPACITY: u32 = 999_999;

// ============================================================================
// Worker Status
// ============================================================================

/// Status of a registered worker, derived from its last status report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Active,
    Offline,
}

impl Default for WorkerStatus {
    fn default() -> Self {
        Self::Offline
    }
}

// ============================================================================
// Registered Worker
// ============================================================================

/// Information about a registered worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredWorker {
    pub client_id: String,
    pub client_ip: String,
    pub port: u16,

    /// Declared concurrent delivery limit (0 = unlimited)
    pub max_deliveries: u32,

    pub version: String,
    #[serde(default)]
    pub capabilities: Vec<String>,

    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub status: WorkerStatus,

    pub active_deliveries: u32,
    pub total_processed: u64,

    /// Worker uptime in seconds, as last reported
    pub uptime: u64,

    /// Instance summaries from the last status report
    #[serde(default)]
    pub deliveries: Vec<InstanceSummary>,
}

impl RegisteredWorker {
    fn from_request(request: RegisterRequest) -> Self {
        let now = Utc::now();
        Self {
            client_id: request.client_id,
            client_ip: request.client_ip,
            port: request.port,
            max_deliveries: request.max_deliveries,
            version: request.version,
            capabilities: request.capabilities,
            registered_at: now,
            last_seen: now,
            status: WorkerStatus::Active,
            active_deliveries: 0,
            total_processed: 0,
            uptime: 0,
            deliveries: Vec::new(),
        }
    }

    /// Check if the worker reported within `window` of `now`
    pub fn is_live_at(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        now - self.last_seen <= window
    }

    /// Check if the worker accepts unlimited deliveries
    pub fn is_unlimited(&self) -> bool {
        self.max_deliveries == 0
    }

    /// Check if the worker has reached its declared limit
    pub fn is_at_capacity(&self) -> bool {
        !self.is_unlimited() && self.active_deliveries >= self.max_deliveries
    }

    /// Free slots for a bounded worker
    pub fn free_slots(&self) -> u32 {
        self.max_deliveries.saturating_sub(self.active_deliveries)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.client_ip, self.port)
    }
}

// ============================================================================
// Protocol Messages
// ============================================================================

/// Request to register a worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub client_id: String,
    pub client_ip: String,
    pub port: u16,
    #[serde(default)]
    pub max_deliveries: u32,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Response to registration request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub success: bool,
    pub message: String,
    pub client_id: String,
}

/// Periodic status report from a worker
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusReport {
    pub active_deliveries: u32,
    pub max_deliveries: u32,
    pub total_processed: u64,
    /// Seconds since the worker started
    pub uptime: u64,
    #[serde(default)]
    pub deliveries: Vec<InstanceSummary>,
}

/// Where a running delivery's endpoint can be reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryLocation {
    pub client_id: String,
    pub host: String,
    pub port: u16,
}

impl DeliveryLocation {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Plain `{success, message}` acknowledgement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckResponse {
    pub success: bool,
    pub message: String,
}

impl AckResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

// ============================================================================
// Client Registry
// ============================================================================

/// Registry for tracking all exam-client workers and pending assignments
pub struct ClientRegistry {
    workers: RwLock<HashMap<String, RegisteredWorker>>,
    queue: AssignmentQueue,
    liveness_window: chrono::Duration,
}

impl ClientRegistry {
    /// Create a new registry
    pub fn new(liveness_window: chrono::Duration, queue_capacity: usize) -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
            queue: AssignmentQueue::new(queue_capacity),
            liveness_window,
        }
    }

    pub fn from_config(config: &CoordinatorConfig) -> Self {
        Self::new(config.liveness_window(), config.queue_capacity)
    }

    pub fn liveness_window(&self) -> chrono::Duration {
        self.liveness_window
    }

    /// Register or re-register a worker; always succeeds
    pub async fn register(&self, request: RegisterRequest) -> RegisterResponse {
        let client_id = request.client_id.clone();
        let worker = RegisteredWorker::from_request(request);

        tracing::info!(
            client_id = %client_id,
            address = %worker.address(),
            max_deliveries = worker.max_deliveries,
            version = %worker.version,
            "Exam client registered"
        );

        let registered = {
            let mut workers = self.workers.write().await;
            workers.insert(client_id.clone(), worker);
            workers.len()
        };
        metrics::record_registration(registered);

        RegisterResponse {
            success: true,
            message: "Client registered successfully".to_string(),
            client_id,
        }
    }

    /// Apply a status report; unknown workers must re-register
    pub async fn report_status(&self, client_id: &str, report: StatusReport) -> Result<(), RegistryError> {
        let mut workers = self.workers.write().await;

        let Some(worker) = workers.get_mut(client_id) else {
            metrics::record_status_report(false);
            return Err(RegistryError::WorkerNotFound(client_id.to_string()));
        };

        worker.last_seen = Utc::now();
        worker.status = WorkerStatus::Active;
        worker.active_deliveries = report.active_deliveries;
        worker.max_deliveries = report.max_deliveries;
        worker.total_processed = report.total_processed;
        worker.uptime = report.uptime;
        worker.deliveries = report.deliveries;

        metrics::record_status_report(true);
        tracing::debug!(
            client_id = %client_id,
            active = worker.active_deliveries,
            max = worker.max_deliveries,
            "Status report received"
        );
        Ok(())
    }

    /// Get one worker with its derived status
    pub async fn get_worker(&self, client_id: &str) -> Option<RegisteredWorker> {
        let now = Utc::now();
        self.workers
            .read()
            .await
            .get(client_id)
            .map(|w| self.with_derived_status(w, now))
    }

    /// Live worker whose last status report lists a running `delivery_id`
    ///
    /// Returns the worker's advertised address and the port the delivery's
    /// endpoint is bound to.
    pub async fn locate_delivery(&self, delivery_id: i64) -> Option<DeliveryLocation> {
        let now = Utc::now();
        let workers = self.workers.read().await;

        workers
            .values()
            .filter(|w| w.is_live_at(now, self.liveness_window))
            .find_map(|w| {
                w.deliveries
                    .iter()
                    .find(|d| d.id == delivery_id && !d.status.is_terminal() && d.port != 0)
                    .map(|d| DeliveryLocation {
                        client_id: w.client_id.clone(),
                        host: w.client_ip.clone(),
                        port: d.port,
                    })
            })
    }

    /// List all workers, flagging stale ones offline
    pub async fn list_workers(&self) -> Vec<RegisteredWorker> {
        self.list_workers_at(Utc::now()).await
    }

    /// List all workers as seen at `now`
    pub async fn list_workers_at(&self, now: DateTime<Utc>) -> Vec<RegisteredWorker> {
        let mut list: Vec<RegisteredWorker> = self
            .workers
            .read()
            .await
            .values()
            .map(|w| self.with_derived_status(w, now))
            .collect();
        list.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        list
    }

    fn with_derived_status(&self, worker: &RegisteredWorker, now: DateTime<Utc>) -> RegisteredWorker {
        let mut view = worker.clone();
        view.status = if worker.is_live_at(now, self.liveness_window) {
            WorkerStatus::Active
        } else {
            WorkerStatus::Offline
        };
        view
    }

    /// Remove a worker unconditionally
    pub async fn unregister(&self, client_id: &str) -> Option<RegisteredWorker> {
        let removed = self.workers.write().await.remove(client_id);
        if removed.is_some() {
            tracing::info!(client_id = %client_id, "Exam client unregistered");
        }
        removed
    }

    /// Queue an assignment without waiting
    pub async fn enqueue(&self, assignment: Assignment) -> Result<(), QueueError> {
        let delivery_id = assignment.delivery_id;
        match self.queue.try_enqueue(assignment).await {
            Ok(depth) => {
                metrics::record_assignment_enqueued();
                tracing::info!(delivery_id, depth, "Delivery assignment queued");
                Ok(())
            }
            Err(e) => {
                metrics::record_assignment_dropped();
                tracing::warn!(delivery_id, error = %e, "Assignment queue full");
                Err(e)
            }
        }
    }

    /// Hand the next pending assignment to `client_id`, if it has room
    pub async fn poll(&self, client_id: &str) -> Result<Option<Assignment>, RegistryError> {
        {
            let workers = self.workers.read().await;
            let worker = workers
                .get(client_id)
                .ok_or_else(|| RegistryError::WorkerNotFound(client_id.to_string()))?;

            if worker.is_at_capacity() {
                return Ok(None);
            }
        }

        let Some(mut assignment) = self.queue.try_dequeue().await else {
            return Ok(None);
        };

        assignment.claim(client_id);
        metrics::record_assignment_polled();
        tracing::info!(
            client_id = %client_id,
            delivery_id = assignment.delivery_id,
            "Assignment handed to exam client"
        );
        Ok(Some(assignment))
    }

    /// Aggregate free capacity across live workers
    pub async fn available_capacity(&self) -> u32 {
        self.available_capacity_at(Utc::now()).await
    }

    /// Aggregate free capacity across workers live at `now`
    pub async fn available_capacity_at(&self, now: DateTime<Utc>) -> u32 {
        let workers = self.workers.read().await;
        let mut total: u64 = 0;

        for worker in workers.values() {
            if !worker.is_live_at(now, self.liveness_window) {
                continue;
            }
            if worker.is_unlimited() {
                return UNLIMITED_CAPACITY;
            }
            total += u64::from(worker.free_slots());
        }

        total.min(u64::from(UNLIMITED_CAPACITY)) as u32
    }

    /// Number of assignments waiting for a worker
    pub async fn pending_assignments(&self) -> usize {
        self.queue.len().await
    }

    /// Get registry statistics
    pub async fn stats(&self) -> RegistryStats {
        let workers = self.list_workers().await;
        let active = workers
            .iter()
            .filter(|w| w.status == WorkerStatus::Active)
            .count();

        metrics::update_worker_gauges(workers.len(), active);

        RegistryStats {
            total_workers: workers.len(),
            active,
            offline: workers.len() - active,
            pending_assignments: self.queue.len().await,
            queue_capacity: self.queue.capacity(),
            available_capacity: self.available_capacity().await,
        }
    }
}

/// Registry statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total_workers: usize,
    pub active: usize,
    pub offline: usize,
    pub pending_assignments: usize,
    pub queue_capacity: usize,
    pub available_capacity: u32,
}

// ============================================================================
// Errors
// ============================================================================

/// Registry errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Client not found: {0}")]
    WorkerNotFound(String),
}

// ============================================================================
// Tests
// ============================================================================
