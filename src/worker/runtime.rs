//! Exam-client runtime
//!
//! Registers with the coordinator, then runs two periodic loops (status
//! report and assignment poll) while supervising zero or more delivery
//! instances. Shutdown cancels every instance, waits for them to wind down
//! and unregisters.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::coordinator::client::{ClientConfig, ClientError, CoordinatorClient};
use crate::coordinator::registry::{AckResponse, RegisterRequest, RegisterResponse, StatusReport};
use crate::exam::store::ExamStoreError;
use crate::metrics;
use crate::models::{Assignment, InstanceSummary};
use crate::utils::retry::{with_retry_if, RetryConfig};

use super::config::WorkerConfig;
use super::instance::{self, InstanceContext};
use super::port::{bind_listener, default_host, derive_port};

// ============================================================================
// Errors
// ============================================================================

/// Worker runtime errors
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Registration failed: {0}")]
    Registration(String),

    #[error("Coordinator error: {0}")]
    Client(#[from] ClientError),

    #[error("Delivery store error: {0}")]
    Store(#[from] ExamStoreError),

    #[error("Endpoint bind failed: {0}")]
    Bind(#[from] std::io::Error),

    #[error("Delivery {0} is already running on this worker")]
    AlreadyRunning(i64),

    #[error("At capacity ({active}/{max} deliveries)")]
    AtCapacity { active: usize, max: u32 },

    #[error("Invalid assignment for delivery {delivery_id}: {reason}")]
    InvalidAssignment { delivery_id: i64, reason: String },
}

// ============================================================================
// Poll Outcome
// ============================================================================

/// Result of one poll tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Skipped the poll: no free slot
    AtCapacity,
    NoAssignment,
    Started { delivery_id: i64, port: u16 },
    Rejected { delivery_id: i64, reason: String },
}

// ============================================================================
// Instance Handle
// ============================================================================

struct InstanceHandle {
    summary: watch::Receiver<InstanceSummary>,
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

type InstanceMap = Arc<RwLock<HashMap<i64, InstanceHandle>>>;

// ============================================================================
// Exam Client
// ============================================================================

/// A worker process: identity, coordinator link and running instances
pub struct ExamClient {
    config: WorkerConfig,
    client: Arc<CoordinatorClient>,
    instances: InstanceMap,
    total_processed: Arc<AtomicU64>,
    started: Instant,
    shutdown: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ExamClient {
    /// Create a worker from its configuration
    pub fn new(config: WorkerConfig) -> Result<Self, WorkerError> {
        let client_config =
            ClientConfig::new(&config.coordinator_url, &config.client_id).with_timeout(config.request_timeout());
        let client = Arc::new(CoordinatorClient::new(client_config)?);

        let (shutdown, shutdown_rx) = watch::channel(false);

        Ok(Self {
            config,
            client,
            instances: Arc::new(RwLock::new(HashMap::new())),
            total_processed: Arc::new(AtomicU64::new(0)),
            started: Instant::now(),
            shutdown,
            shutdown_rx,
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn client_id(&self) -> &str {
        &self.config.client_id
    }

    pub fn total_processed(&self) -> u64 {
        self.total_processed.load(Ordering::SeqCst)
    }

    fn register_request(&self) -> RegisterRequest {
        RegisterRequest {
            client_id: self.config.client_id.clone(),
            client_ip: self.config.client_ip.clone(),
            port: self.config.port,
            max_deliveries: self.config.max_deliveries,
            version: self.config.version.clone(),
            capabilities: self.config.capabilities.clone(),
        }
    }

    /// Register with the coordinator, retrying with backoff
    pub async fn register(&self) -> Result<RegisterResponse, WorkerError> {
        let request = self.register_request();
        let retry = RetryConfig::with_delays(self.config.register_retries, 500, 5_000);

        let response = with_retry_if(&retry, || self.client.register(&request), ClientError::is_recoverable)
            .await
            .map_err(|e| WorkerError::Registration(e.to_string()))?;

        if !response.success {
            return Err(WorkerError::Registration(response.message));
        }

        tracing::info!(
            client_id = %self.config.client_id,
            coordinator = %self.config.coordinator_url,
            max_deliveries = self.config.max_deliveries,
            "Registered with coordinator"
        );
        Ok(response)
    }

    /// Register, then spawn the status and poll loops
    pub async fn start(self: &Arc<Self>) -> Result<RunnerHandle, WorkerError> {
        self.register().await?;

        let status_handle = self.spawn_status_loop();
        let poll_handle = self.spawn_poll_loop();

        Ok(RunnerHandle {
            status_handle,
            poll_handle,
            shutdown: self.shutdown.clone(),
        })
    }

    fn spawn_status_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let worker = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_rx.clone();

        tokio::spawn(async move {
            let mut ticker = interval(worker.config.status_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = worker.report_status_once().await {
                            tracing::warn!(error = %e, "Status report failed");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        tracing::info!("Status loop shutting down");
                        break;
                    }
                }
            }
        })
    }

    fn spawn_poll_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let worker = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_rx.clone();

        tokio::spawn(async move {
            let mut ticker = interval(worker.config.poll_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match worker.poll_once().await {
                            Ok(PollOutcome::Started { delivery_id, port }) => {
                                tracing::info!(delivery_id, port, "Delivery started from poll");
                            }
                            Ok(PollOutcome::Rejected { delivery_id, reason }) => {
                                tracing::warn!(delivery_id, reason = %reason, "Assignment rejected");
                            }
                            Ok(_) => {}
                            Err(e) => tracing::warn!(error = %e, "Assignment poll failed"),
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        tracing::info!("Poll loop shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Snapshot of every running instance
    pub async fn instances(&self) -> Vec<InstanceSummary> {
        let mut list: Vec<InstanceSummary> = self
            .instances
            .read()
            .await
            .values()
            .map(|h| h.summary.borrow().clone())
            .collect();
        list.sort_by_key(|s| s.id);
        list
    }

    pub async fn active_count(&self) -> usize {
        self.instances.read().await.len()
    }

    /// Send one status report; re-register if the coordinator has forgotten us
    pub async fn report_status_once(&self) -> Result<AckResponse, WorkerError> {
        let deliveries = self.instances().await;
        let report = StatusReport {
            active_deliveries: deliveries.len() as u32,
            max_deliveries: self.config.max_deliveries,
            total_processed: self.total_processed(),
            uptime: self.started.elapsed().as_secs(),
            deliveries,
        };

        let ack = self.client.report_status(&report).await?;
        if !ack.success {
            tracing::warn!(message = %ack.message, "Coordinator does not know this worker, re-registering");
            self.register().await?;
        } else {
            tracing::debug!(active = report.active_deliveries, "Status reported");
        }
        Ok(ack)
    }

    /// Poll once for an assignment and start it if one arrives
    pub async fn poll_once(&self) -> Result<PollOutcome, WorkerError> {
        if !self.config.has_capacity(self.active_count().await) {
            tracing::debug!("At capacity, skipping poll");
            return Ok(PollOutcome::AtCapacity);
        }

        let Some(assignment) = self.client.poll_assignment().await? else {
            return Ok(PollOutcome::NoAssignment);
        };

        let delivery_id = assignment.delivery_id;
        match self.start_delivery(assignment).await {
            Ok(port) => Ok(PollOutcome::Started { delivery_id, port }),
            Err(e) => Ok(PollOutcome::Rejected {
                delivery_id,
                reason: e.to_string(),
            }),
        }
    }

    /// Start a delivery instance; returns the bound endpoint port
    pub async fn start_delivery(&self, assignment: Assignment) -> Result<u16, WorkerError> {
        let delivery_id = assignment.delivery_id;
        let mut instances = self.instances.write().await;

        if instances.contains_key(&delivery_id) {
            return Err(WorkerError::AlreadyRunning(delivery_id));
        }
        if !self.config.has_capacity(instances.len()) {
            return Err(WorkerError::AtCapacity {
                active: instances.len(),
                max: self.config.max_deliveries,
            });
        }

        let taken: HashSet<u16> = instances.values().map(|h| h.summary.borrow().port).collect();
        let preferred = derive_port(self.config.port, delivery_id);
        let listener = bind_listener(default_host(), preferred, &taken).await?;

        let ctx = self.instance_context();
        let prepared = instance::prepare(&assignment, listener, &ctx)?;
        let port = prepared.summary.port;

        let (status_tx, status_rx) = watch::channel(prepared.summary.clone());
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let registry = Arc::clone(&self.instances);
        let processed = Arc::clone(&self.total_processed);
        let task = tokio::spawn(async move {
            let outcome = instance::supervise(prepared, cancel_rx, status_tx, ctx).await;

            processed.fetch_add(1, Ordering::SeqCst);
            let remaining = {
                let mut map = registry.write().await;
                map.remove(&outcome.delivery_id);
                map.len()
            };
            metrics::set_active_instances(remaining);
        });

        instances.insert(
            delivery_id,
            InstanceHandle {
                summary: status_rx,
                cancel: cancel_tx,
                task,
            },
        );
        metrics::set_active_instances(instances.len());

        tracing::info!(
            delivery_id,
            name = %assignment.delivery_name,
            port,
            preferred_port = preferred,
            "Delivery instance accepted"
        );
        Ok(port)
    }

    fn instance_context(&self) -> InstanceContext {
        InstanceContext {
            client: Arc::clone(&self.client),
            data_dir: self.config.data_dir.clone(),
            ceiling: self.config.instance_ceiling(),
            retain_exported_stores: self.config.retain_exported_stores,
            request_logging: self.config.enable_request_logging,
        }
    }

    /// Cancel one running instance
    pub async fn cancel_delivery(&self, delivery_id: i64) -> bool {
        match self.instances.read().await.get(&delivery_id) {
            Some(handle) => handle.cancel.send(true).is_ok(),
            None => false,
        }
    }

    /// Stop the loops, cancel every instance, wait for them, then unregister
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);

        let handles: Vec<(i64, InstanceHandle)> = self.instances.write().await.drain().collect();
        tracing::info!(instances = handles.len(), "Shutting down exam client");

        for (_, handle) in &handles {
            let _ = handle.cancel.send(true);
        }

        let grace = self.config.shutdown_grace();
        let waits = handles.into_iter().map(|(delivery_id, handle)| async move {
            if tokio::time::timeout(grace, handle.task).await.is_err() {
                tracing::warn!(delivery_id, "Delivery instance did not stop within grace period");
            }
        });
        join_all(waits).await;
        metrics::set_active_instances(0);

        match self.client.unregister().await {
            Ok(_) => tracing::info!(client_id = %self.config.client_id, "Unregistered from coordinator"),
            Err(e) => tracing::warn!(error = %e, "Failed to unregister from coordinator"),
        }
    }
}

// ============================================================================
// Runner Handle
// ============================================================================

/// Handle to the running worker loops
pub struct RunnerHandle {
    status_handle: JoinHandle<()>,
    poll_handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl RunnerHandle {
    /// Wait for both loops to finish
    pub async fn wait(self) {
        let _ = tokio::join!(self.status_handle, self.poll_handle);
    }

    /// Stop the loops and wait
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        self.wait().await;
    }

    pub fn is_running(&self) -> bool {
        !self.status_handle.is_finished() && !self.poll_handle.is_finished()
    }
}

// ============================================================================
// Tests
// ============================================================================
