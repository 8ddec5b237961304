//! Unified error handling for the examgrid crate
//!
//! Each module keeps its own error enum; this module folds them into one
//! [`Error`] for code that crosses module boundaries (the CLI commands and
//! library users driving both sides).
//!
//! # Architecture
//!
//! - [`Classify`] - Common interface for recoverability and category
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all module errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use examgrid::error::{Classify, Error};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         tracing::warn!(error = %err, "Retrying on next tick");
//!     } else {
//!         tracing::error!(category = ?err.category(), error = %err, "Giving up");
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

pub use crate::config::ConfigError;
pub use crate::coordinator::client::ClientError;
pub use crate::coordinator::queue::QueueError;
pub use crate::coordinator::registry::RegistryError;
pub use crate::coordinator::server::ServerError;
pub use crate::delivery::DeliveryError;
pub use crate::exam::store::ExamStoreError;
pub use crate::worker::runtime::WorkerError;

/// Recoverability and category for every examgrid error
pub trait Classify: std::error::Error {
    /// Worth retrying (typically on the next scheduled tick)
    fn is_recoverable(&self) -> bool;

    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Coordinator unreachable, timeouts, 5xx
    Network,
    /// SQLite, filesystem
    Storage,
    /// Refused lifecycle transition or duplicate work
    Conflict,
    /// Configuration and validation errors
    Config,
    /// Malformed or unexpected protocol messages
    Protocol,
    Other,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Storage => "storage",
            Self::Conflict => "conflict",
            Self::Config => "config",
            Self::Protocol => "protocol",
            Self::Other => "other",
        }
    }
}

/// Unified error type for the examgrid crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Exam store error: {0}")]
    ExamStore(#[from] ExamStoreError),

    #[error("Coordinator client error: {0}")]
    Client(#[from] ClientError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Classify for ClientError {
    fn is_recoverable(&self) -> bool {
        ClientError::is_recoverable(self)
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::InitError(_) => ErrorCategory::Config,
            Self::ParseError(_) | Self::Rejected(_) => ErrorCategory::Protocol,
            Self::HttpError { status, .. } if *status < 500 && *status != 429 => ErrorCategory::Protocol,
            _ => ErrorCategory::Network,
        }
    }
}

impl Classify for DeliveryError {
    fn is_recoverable(&self) -> bool {
        false
    }

    fn category(&self) -> ErrorCategory {
        match self {
            e if e.is_conflict() => ErrorCategory::Conflict,
            Self::NotFound(_) | Self::InvalidAction(_) | Self::Serialization(_) => ErrorCategory::Protocol,
            _ => ErrorCategory::Storage,
        }
    }
}

impl Classify for WorkerError {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Client(e) => e.is_recoverable(),
            Self::AtCapacity { .. } => true,
            _ => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Registration(_) => ErrorCategory::Network,
            Self::Client(e) => Classify::category(e),
            Self::Store(_) | Self::Bind(_) => ErrorCategory::Storage,
            Self::AlreadyRunning(_) | Self::AtCapacity { .. } => ErrorCategory::Conflict,
            Self::InvalidAssignment { .. } => ErrorCategory::Protocol,
        }
    }
}

impl Classify for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Client(e) => Classify::is_recoverable(e),
            Self::Worker(e) => e.is_recoverable(),
            Self::Delivery(e) => e.is_recoverable(),
            // Queue overflow clears once workers poll
            Self::Queue(_) => true,
            Self::Io(_) | Self::Http(_) => true,
            _ => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Client(e) => Classify::category(e),
            Self::Worker(e) => e.category(),
            Self::Delivery(e) => e.category(),
            Self::Registry(_) | Self::Json(_) => ErrorCategory::Protocol,
            Self::Queue(_) => ErrorCategory::Conflict,
            Self::ExamStore(_) | Self::Database(_) | Self::Io(_) => ErrorCategory::Storage,
            Self::Http(_) => ErrorCategory::Network,
            Self::Server(ServerError::ConfigError(_)) | Self::Config(_) => ErrorCategory::Config,
            Self::Server(_) => ErrorCategory::Network,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::DeliveryStatus;

    #[test]
    fn test_error_category() {
        let err: Error = ClientError::NetworkError("connection refused".into()).into();
        assert_eq!(err.category(), ErrorCategory::Network);
        assert!(err.is_recoverable());

        let err: Error = ClientError::HttpError {
            status: 400,
            message: "bad".into(),
        }
        .into();
        assert_eq!(err.category(), ErrorCategory::Protocol);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_conflicts_are_not_recoverable() {
        let err: Error = DeliveryError::AlreadyStarted {
            id: 1,
            status: DeliveryStatus::Started,
        }
        .into();
        assert_eq!(err.category(), ErrorCategory::Conflict);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_worker_error_delegates_to_client() {
        let err = WorkerError::Client(ClientError::HttpError {
            status: 503,
            message: "unavailable".into(),
        });
        assert!(err.is_recoverable());
        assert_eq!(err.category(), ErrorCategory::Network);
    }

    #[test]
    fn test_queue_full() {
        let err: Error = QueueError::Full {
            delivery_id: 3,
            capacity: 1,
        }
        .into();
        assert!(err.is_recoverable());
        assert_eq!(err.category(), ErrorCategory::Conflict);
    }

    #[test]
    fn test_other_error() {
        let err = Error::with_source("export failed", io::Error::other("disk full"));
        assert_eq!(err.category(), ErrorCategory::Other);
        assert_eq!(err.to_string(), "export failed");
    }
}
