//! Prometheus metrics for the examgrid coordinator and exam-client workers
//!
//! This module provides metrics tracking for:
//! - Coordinator: worker registration, status reports, the assignment queue,
//!   scheduler claims, received events and final results
//! - Worker: running delivery instances, exports and event push failures
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, Counter, CounterVec, Encoder, Gauge,
    TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for all coordinator metrics
struct CoordinatorMetrics {
    registered_workers: Gauge,
    live_workers: Gauge,
    registrations: Counter,
    status_reports: Counter,
    unknown_status_reports: Counter,
    assignments_enqueued: Counter,
    assignments_dropped: Counter,
    assignments_polled: Counter,
    scheduler_claims: CounterVec,
    events_received: CounterVec,
    final_results: CounterVec,
}

/// Container for all worker metrics
struct WorkerMetrics {
    active_instances: Gauge,
    instances_started: Counter,
    instances_finished: CounterVec,
    exports: CounterVec,
    event_push_failures: Counter,
}

/// Global storage for coordinator metrics
static COORDINATOR_METRICS: OnceLock<CoordinatorMetrics> = OnceLock::new();

/// Global storage for worker metrics
static WORKER_METRICS: OnceLock<WorkerMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Call once at startup. Registration failures are returned and every
/// helper in this module stays a no-op.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = examgrid::metrics::init_metrics() {
///     eprintln!("Warning: Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let coordinator = CoordinatorMetrics {
        registered_workers: register_gauge!(
            "examgrid_coordinator_registered_workers",
            "Number of registered exam-client workers"
        )?,
        live_workers: register_gauge!(
            "examgrid_coordinator_live_workers",
            "Number of workers that reported within the liveness window"
        )?,
        registrations: register_counter!(
            "examgrid_coordinator_registrations_total",
            "Total worker registrations, including re-registrations"
        )?,
        status_reports: register_counter!(
            "examgrid_coordinator_status_reports_total",
            "Total status reports accepted"
        )?,
        unknown_status_reports: register_counter!(
            "examgrid_coordinator_unknown_status_reports_total",
            "Status reports from workers the registry does not know"
        )?,
        assignments_enqueued: register_counter!(
            "examgrid_coordinator_assignments_enqueued_total",
            "Assignments accepted by the queue"
        )?,
        assignments_dropped: register_counter!(
            "examgrid_coordinator_assignments_dropped_total",
            "Assignments rejected because the queue was full"
        )?,
        assignments_polled: register_counter!(
            "examgrid_coordinator_assignments_polled_total",
            "Assignments handed to a polling worker"
        )?,
        scheduler_claims: register_counter_vec!(
            "examgrid_scheduler_claims_total",
            "Auto-start claim attempts by outcome",
            &["outcome"]
        )?,
        events_received: register_counter_vec!(
            "examgrid_coordinator_events_total",
            "Delivery events received from workers",
            &["event_type"]
        )?,
        final_results: register_counter_vec!(
            "examgrid_coordinator_final_results_total",
            "Final result submissions by outcome",
            &["outcome"]
        )?,
    };

    let worker = WorkerMetrics {
        active_instances: register_gauge!(
            "examgrid_worker_active_instances",
            "Delivery instances currently running on this worker"
        )?,
        instances_started: register_counter!(
            "examgrid_worker_instances_started_total",
            "Delivery instances started"
        )?,
        instances_finished: register_counter_vec!(
            "examgrid_worker_instances_finished_total",
            "Delivery instances finished by final status",
            &["status"]
        )?,
        exports: register_counter_vec!(
            "examgrid_worker_exports_total",
            "Final exports by outcome",
            &["outcome"]
        )?,
        event_push_failures: register_counter!(
            "examgrid_worker_event_push_failures_total",
            "Event pushes to the coordinator that failed"
        )?,
    };

    COORDINATOR_METRICS
        .set(coordinator)
        .map_err(|_| "Coordinator metrics already initialized")?;
    WORKER_METRICS
        .set(worker)
        .map_err(|_| "Worker metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    COORDINATOR_METRICS.get().is_some() && WORKER_METRICS.get().is_some()
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

fn outcome(ok: bool) -> &'static str {
    if ok {
        "success"
    } else {
        "failure"
    }
}

// ============================================================================
// Coordinator Helpers
// ============================================================================

/// Record a registration; `registered` is the registry size afterwards
pub fn record_registration(registered: usize) {
    if let Some(m) = COORDINATOR_METRICS.get() {
        m.registrations.inc();
        m.registered_workers.set(registered as f64);
    }
}

/// Record a status report; `known` is false when the worker must re-register
pub fn record_status_report(known: bool) {
    let Some(m) = COORDINATOR_METRICS.get() else {
        return;
    };
    if known {
        m.status_reports.inc();
    } else {
        m.unknown_status_reports.inc();
    }
}

pub fn record_assignment_enqueued() {
    if let Some(m) = COORDINATOR_METRICS.get() {
        m.assignments_enqueued.inc();
    }
}

pub fn record_assignment_dropped() {
    if let Some(m) = COORDINATOR_METRICS.get() {
        m.assignments_dropped.inc();
    }
}

pub fn record_assignment_polled() {
    if let Some(m) = COORDINATOR_METRICS.get() {
        m.assignments_polled.inc();
    }
}

/// Update registered/live worker gauges
pub fn update_worker_gauges(registered: usize, live: usize) {
    if let Some(m) = COORDINATOR_METRICS.get() {
        m.registered_workers.set(registered as f64);
        m.live_workers.set(live as f64);
    }
}

/// Record one scheduler claim attempt (`claimed`, `skipped`, `failed`, `overflow`)
pub fn record_scheduler_claim(outcome: &str) {
    if let Some(m) = COORDINATOR_METRICS.get() {
        m.scheduler_claims.with_label_values(&[outcome]).inc();
    }
}

pub fn record_event_received(event_type: &str) {
    if let Some(m) = COORDINATOR_METRICS.get() {
        m.events_received.with_label_values(&[event_type]).inc();
    }
}

pub fn record_final_results(accepted: bool) {
    if let Some(m) = COORDINATOR_METRICS.get() {
        m.final_results.with_label_values(&[outcome(accepted)]).inc();
    }
}

// ============================================================================
// Worker Helpers
// ============================================================================

pub fn set_active_instances(active: usize) {
    if let Some(m) = WORKER_METRICS.get() {
        m.active_instances.set(active as f64);
    }
}

pub fn record_instance_started() {
    if let Some(m) = WORKER_METRICS.get() {
        m.instances_started.inc();
    }
}

/// Record how an instance ended (`completed`, `cancelled`, ...)
pub fn record_instance_finished(status: &str) {
    if let Some(m) = WORKER_METRICS.get() {
        m.instances_finished.with_label_values(&[status]).inc();
    }
}

pub fn record_export(success: bool) {
    if let Some(m) = WORKER_METRICS.get() {
        m.exports.with_label_values(&[outcome(success)]).inc();
    }
}

pub fn record_event_push_failure() {
    if let Some(m) = WORKER_METRICS.get() {
        m.event_push_failures.inc();
    }
}

// ============================================================================
// Tests
// ============================================================================
