//! Exam-client worker
//!
//! A worker registers with the coordinator, polls for assignments and runs
//! each accepted delivery as an isolated instance with its own SQLite store
//! and HTTP endpoint.

pub mod config;
pub mod instance;
pub mod port;
pub mod runtime;

pub use config::WorkerConfig;
pub use instance::{InstanceContext, InstanceOutcome};
pub use runtime::{ExamClient, PollOutcome, RunnerHandle, WorkerError};
