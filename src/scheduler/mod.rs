//! Auto-start scheduler
//!
//! Periodically scans the delivery store for auto-start deliveries whose
//! scheduled time has passed, claims each one through the guarded start
//! transition and queues an assignment for a worker to poll.
//!
//! # Tick
//!
//! ```text
//!   due deliveries ──▶ capacity? ──0──▶ defer whole batch
//!                         │
//!                         ▼ n
//!         for each due (up to n):
//!             start ──AlreadyStarted/Finished──▶ skip
//!               │ ok
//!               ▼
//!             enqueue ──Full──▶ release claim
//! ```
//!
//! A queue overflow never leaves a delivery marked started without a worker:
//! the claim is released and the delivery is retried on a later tick.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::coordinator::queue::QueueError;
use crate::coordinator::registry::ClientRegistry;
use crate::delivery::{Delivery, DeliveryError, SharedDeliveryStore};
use crate::metrics;
use crate::models::Assignment;

// ============================================================================
// Assignment Sink
// ============================================================================

/// Where claimed deliveries go, and how many may be claimed right now
#[async_trait]
pub trait AssignmentSink: Send + Sync {
    async fn available_capacity(&self) -> u32;

    async fn enqueue(&self, assignment: Assignment) -> Result<(), QueueError>;
}

#[async_trait]
impl AssignmentSink for ClientRegistry {
    async fn available_capacity(&self) -> u32 {
        ClientRegistry::available_capacity(self).await
    }

    async fn enqueue(&self, assignment: Assignment) -> Result<(), QueueError> {
        ClientRegistry::enqueue(self, assignment).await
    }
}

// ============================================================================
// Tick Report
// ============================================================================

/// What one scheduler tick did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub due: usize,
    pub capacity: u32,
    pub claimed: usize,
    /// Lost the claim to a concurrent start or already finished
    pub skipped: usize,
    pub failed: usize,
    /// Whole batch deferred because no worker had room
    pub deferred: bool,
    /// Claims undone after the queue refused the assignment
    pub released: usize,
}

// ============================================================================
// Scheduler
// ============================================================================

/// Claims due deliveries and queues them for workers
pub struct AutoStartScheduler {
    store: SharedDeliveryStore,
    sink: Arc<dyn AssignmentSink>,
    interval: Duration,
}

impl AutoStartScheduler {
    pub fn new(store: SharedDeliveryStore, sink: Arc<dyn AssignmentSink>, interval: Duration) -> Self {
        Self {
            store,
            sink,
            interval,
        }
    }

    /// Run one scheduling pass at the current time
    pub async fn tick(&self) -> TickReport {
        self.tick_at(Utc::now()).await
    }

    /// Run one scheduling pass as of `now`
    pub async fn tick_at(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();

        let due = match self.store.due_for_auto_start(now) {
            Ok(due) => due,
            Err(e) => {
                tracing::error!(error = %e, "Failed to query due deliveries");
                return report;
            }
        };

        report.due = due.len();
        if due.is_empty() {
            return report;
        }

        report.capacity = self.sink.available_capacity().await;
        if report.capacity == 0 {
            report.deferred = true;
            tracing::info!(due = report.due, "No worker capacity available, deferring due deliveries");
            return report;
        }

        for delivery in due {
            if report.claimed >= report.capacity as usize {
                break;
            }

            match self.store.start(delivery.id) {
                Ok(started) => {
                    self.dispatch(started, &mut report).await;
                }
                Err(e) if e.is_already_claimed() => {
                    report.skipped += 1;
                    metrics::record_scheduler_claim("skipped");
                    tracing::debug!(delivery_id = delivery.id, reason = %e, "Delivery already claimed");
                }
                Err(e) => {
                    report.failed += 1;
                    metrics::record_scheduler_claim("failed");
                    tracing::warn!(delivery_id = delivery.id, error = %e, "Failed to claim delivery");
                }
            }
        }

        tracing::info!(
            due = report.due,
            capacity = report.capacity,
            claimed = report.claimed,
            skipped = report.skipped,
            released = report.released,
            "Scheduler tick complete"
        );
        report
    }

    async fn dispatch(&self, delivery: Delivery, report: &mut TickReport) {
        let delivery_id = delivery.id;

        let assignment = match self.build_assignment(&delivery) {
            Ok(assignment) => assignment,
            Err(e) => {
                tracing::warn!(delivery_id, error = %e, "Failed to build assignment payload");
                report.failed += 1;
                metrics::record_scheduler_claim("failed");
                self.release(delivery_id, report);
                return;
            }
        };

        match self.sink.enqueue(assignment).await {
            Ok(()) => {
                report.claimed += 1;
                metrics::record_scheduler_claim("claimed");
                tracing::info!(delivery_id, name = %delivery.label(), "Delivery auto-started");
            }
            Err(e) => {
                tracing::warn!(delivery_id, error = %e, "Assignment not queued, releasing claim");
                metrics::record_scheduler_claim("overflow");
                self.release(delivery_id, report);
            }
        }
    }

    fn release(&self, delivery_id: i64, report: &mut TickReport) {
        match self.store.release(delivery_id) {
            Ok(true) => report.released += 1,
            Ok(false) => {
                tracing::warn!(delivery_id, "Claim already moved on, nothing to release");
            }
            Err(e) => {
                tracing::error!(delivery_id, error = %e, "Failed to release delivery claim");
            }
        }
    }

    /// Assignment payload: scheduling metadata plus the group roster
    fn build_assignment(&self, delivery: &Delivery) -> Result<Assignment, DeliveryError> {
        let roster = self.store.group_roster(delivery.group_id)?;

        let exam_data = json!({
            "delivery_id": delivery.id,
            "exam_id": delivery.exam_id,
            "group_id": delivery.group_id,
            "exam_title": delivery.exam_title,
            "group_name": delivery.group_name,
            "scheduled_at": delivery.scheduled_at,
            "duration": delivery.duration,
            "is_anytime": delivery.is_anytime,
            "participants": serde_json::to_value(&roster)?,
        });

        let config = json!({
            "automatic_start": delivery.automatic_start,
            "started_at": delivery.started_at,
        });

        Ok(Assignment::new(delivery.id, delivery.label(), exam_data).with_config(config))
    }

    /// Run once immediately, then on every interval until shutdown
    pub fn spawn(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(interval = ?self.interval, "Auto-start scheduler started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.tick().await;
                    }
                    _ = shutdown_rx.changed() => {
                        tracing::info!("Auto-start scheduler shutting down");
                        break;
                    }
                }
            }
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
