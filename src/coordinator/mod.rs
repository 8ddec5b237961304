//! Coordinator for distributed exam deliveries
//!
//! The coordinator keeps the worker registry, the bounded assignment queue
//! and the central delivery store, and runs the auto-start scheduler that
//! turns due deliveries into assignments.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │               Coordinator Server             │
//! │                                              │
//! │  ┌──────────────────┐   ┌─────────────────┐  │
//! │  │  Client Registry │◀──│   Auto-start    │  │
//! │  │  - workers       │   │   Scheduler     │  │
//! │  │  - capacity      │   └───────┬─────────┘  │
//! │  │  - queue         │           │ claim      │
//! │  └──────────────────┘   ┌───────▼─────────┐  │
//! │                         │ Delivery Store  │  │
//! │  ┌──────────────────┐   │ (SQLite)        │  │
//! │  │    Event Hub     │──▶│ events, results │  │
//! │  └──────────────────┘   └─────────────────┘  │
//! │                                              │
//! │  REST API                                    │
//! │  POST   /api/internal/exam-clients/register  │
//! │  POST   /api/internal/exam-clients/{id}/status│
//! │  GET    /api/internal/exam-clients/{id}/assignments│
//! │  DELETE /api/internal/exam-clients/{id}      │
//! │  POST   /api/internal/exam-clients/event     │
//! │  POST   /api/internal/exam-clients/{id}/final-results│
//! │  POST   /api/deliveries/{id}/control         │
//! │  GET    /api/deliveries/{id}/live-progress   │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use examgrid::coordinator::{CoordinatorServer, CoordinatorConfig};
//!
//! let server = CoordinatorServer::new(CoordinatorConfig::default())?;
//! server.start_with_shutdown(async { let _ = tokio::signal::ctrl_c().await; }).await?;
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod events;
pub mod live;
pub mod queue;
pub mod registry;
pub mod server;

pub use client::{ClientConfig, ClientError, CoordinatorClient};
pub use config::CoordinatorConfig;
pub use events::EventHub;
pub use live::{LiveProgressClient, LiveProgressView, ProgressSource};
pub use queue::{AssignmentQueue, QueueError};
pub use registry::{ClientRegistry, DeliveryLocation, RegisteredWorker, RegistryError, WorkerStatus};
pub use server::{AppState, CoordinatorServer, ServerError};
