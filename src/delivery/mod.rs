//! Central delivery records and their lifecycle
//!
//! The coordinator owns one relational store of deliveries. This module holds
//! the delivery model, the guarded state machine over `last_status`, and the
//! SQLite-backed [`DeliveryStore`] used by the scheduler and the HTTP API.

pub mod lifecycle;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use lifecycle::{DeliveryAction, DeliveryStatus};
pub use store::{DeliveryStore, ReconcileSummary, SharedDeliveryStore, SqliteDeliveryStore};

// ============================================================================
// Delivery
// ============================================================================

/// One scheduled exam session for one group of candidates
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Delivery {
    pub id: i64,
    pub exam_id: i64,
    pub group_id: i64,
    pub name: String,
    pub display_name: String,
    pub exam_title: String,
    pub group_name: String,
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Duration in minutes
    pub duration: i64,
    pub is_anytime: bool,
    pub automatic_start: bool,
    pub status: DeliveryStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Delivery {
    /// A delivery is finished once `finished_at` is stamped, whatever its status says
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    /// Name shown to operators and workers
    pub fn label(&self) -> &str {
        if self.display_name.is_empty() {
            &self.name
        } else {
            &self.display_name
        }
    }
}

/// Fields needed to create a delivery
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewDelivery {
    pub exam_id: i64,
    pub group_id: i64,
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub exam_title: String,
    #[serde(default)]
    pub group_name: String,
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration: i64,
    #[serde(default)]
    pub is_anytime: bool,
    #[serde(default)]
    pub automatic_start: bool,
}

impl NewDelivery {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            duration: 60,
            ..Default::default()
        }
    }

    /// Schedule an automatic start at `at`
    pub fn auto_start_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self.automatic_start = true;
        self
    }

    pub fn with_exam(mut self, exam_id: i64, title: impl Into<String>) -> Self {
        self.exam_id = exam_id;
        self.exam_title = title.into();
        self
    }

    pub fn with_group(mut self, group_id: i64, name: impl Into<String>) -> Self {
        self.group_id = group_id;
        self.group_name = name.into();
        self
    }

    pub fn with_duration(mut self, minutes: i64) -> Self {
        self.duration = minutes;
        self
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Delivery store and lifecycle errors
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Delivery not found: {0}")]
    NotFound(i64),

    #[error("Delivery {0} is already finished")]
    AlreadyFinished(i64),

    #[error("Delivery {id} is already {status}")]
    AlreadyStarted { id: i64, status: DeliveryStatus },

    #[error("Cannot {action} delivery {id} while it is {current}")]
    InvalidState {
        id: i64,
        action: DeliveryAction,
        current: DeliveryStatus,
    },

    #[error("Invalid action: {0}")]
    InvalidAction(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Delivery store lock poisoned")]
    LockPoisoned,
}

impl DeliveryError {
    /// Refused transition, as opposed to a storage failure
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::AlreadyFinished(_) | Self::AlreadyStarted { .. } | Self::InvalidState { .. }
        )
    }

    /// Lost a start race or the delivery is already done; expected under concurrent scheduling
    pub fn is_already_claimed(&self) -> bool {
        matches!(self, Self::AlreadyFinished(_) | Self::AlreadyStarted { .. })
    }
}
