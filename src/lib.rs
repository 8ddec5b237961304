//! examgrid - coordinator and workers for distributed exam deliveries
//!
//! A coordinator holds the central delivery store, tracks exam-client
//! workers and turns due deliveries into assignments. Workers poll for those
//! assignments and run each delivery as an isolated instance with its own
//! SQLite store and HTTP endpoint, then sync the results back.
//!
//! # Architecture
//!
//! - [`coordinator`] - Registry, assignment queue, REST API, server assembly
//! - [`delivery`] - Central delivery store and lifecycle state machine
//! - [`scheduler`] - Auto-start scheduler that claims due deliveries
//! - [`worker`] - Exam-client runtime, instance supervision, port selection
//! - [`exam`] - Per-delivery store, participant endpoint, event push
//! - [`models`] - Wire and data types shared by both sides
//! - [`config`] - TOML and environment configuration
//! - [`metrics`] - Prometheus metrics
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use examgrid::worker::{ExamClient, WorkerConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let worker = Arc::new(ExamClient::new(WorkerConfig::from_env()?)?);
//!     let handle = worker.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     handle.shutdown().await;
//!     worker.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod delivery;
pub mod error;
pub mod exam;
pub mod metrics;
pub mod models;
pub mod scheduler;
pub mod utils;
pub mod worker;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::coordinator::{ClientRegistry, CoordinatorConfig, CoordinatorServer};
    pub use crate::delivery::{Delivery, DeliveryAction, DeliveryStatus, DeliveryStore, SqliteDeliveryStore};
    pub use crate::error::{Classify, Error, ErrorCategory, Result};
    pub use crate::exam::DeliveryDatabase;
    pub use crate::models::{Assignment, ExportBundle, InstanceStatus, InstanceSummary};
    pub use crate::scheduler::AutoStartScheduler;
    pub use crate::worker::{ExamClient, WorkerConfig};
}

// Direct re-exports for convenience
pub use models::{Assignment, ExportBundle, InstanceStatus, InstanceSummary};
