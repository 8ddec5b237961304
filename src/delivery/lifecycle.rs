//! Delivery lifecycle state machine
//!
//! ```text
//!   unset ──start──▶ started ◀──resume── paused
//!                      │  └────pause────▶  │
//!                      ├──stop / finish────┤
//!                      ▼                   ▼
//!               stopped | finished  (terminal, finished_at set)
//! ```
//!
//! Every transition is a single conditional `UPDATE`. Zero affected rows
//! means the guard failed; [`refusal`] then explains why from a fresh read.

use serde::{Deserialize, Serialize};

use super::{Delivery, DeliveryError};

// ============================================================================
// Status
// ============================================================================

/// Central lifecycle status of a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Unset,
    Started,
    Paused,
    Stopped,
    Finished,
}

impl DeliveryStatus {
    /// Parse a stored status, tolerating case, whitespace, null and legacy aliases
    pub fn from_db(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Self::Unset;
        };
        match raw.trim().to_lowercase().as_str() {
            "started" | "ongoing" | "running" => Self::Started,
            "paused" => Self::Paused,
            "stopped" => Self::Stopped,
            "finished" => Self::Finished,
            _ => Self::Unset,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unset => "unset",
            Self::Started => "started",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Finished => "finished",
        }
    }

    /// Value written to the `last_status` column
    pub fn to_db(&self) -> Option<&'static str> {
        match self {
            Self::Unset => None,
            other => Some(other.as_str()),
        }
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Actions
// ============================================================================

/// A requested lifecycle transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryAction {
    Start,
    Pause,
    Resume,
    Stop,
    Finish,
}

impl DeliveryAction {
    /// Parse an operator control action (start, stop, pause, resume)
    pub fn from_control(raw: &str) -> Result<Self, DeliveryError> {
        match raw.trim().to_lowercase().as_str() {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "pause" => Ok(Self::Pause),
            "resume" => Ok(Self::Resume),
            _ => Err(DeliveryError::InvalidAction(raw.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Stop => "stop",
            Self::Finish => "finish",
        }
    }

    /// Status a successful transition lands in
    pub fn target(&self) -> DeliveryStatus {
        match self {
            Self::Start | Self::Resume => DeliveryStatus::Started,
            Self::Pause => DeliveryStatus::Paused,
            Self::Stop => DeliveryStatus::Stopped,
            Self::Finish => DeliveryStatus::Finished,
        }
    }

    /// Guarded update for this action. `?1` is the delivery id, `?2` the current time.
    pub(crate) fn guarded_update(&self) -> &'static str {
        match self {
            Self::Start => {
                "UPDATE deliveries
                 SET last_status = 'started', started_at = COALESCE(started_at, ?2), updated_at = ?2
                 WHERE id = ?1
                   AND finished_at IS NULL
                   AND (last_status IS NULL
                        OR LOWER(TRIM(last_status)) NOT IN
                           ('started', 'ongoing', 'running', 'paused', 'stopped', 'finished'))"
            }
            Self::Pause => {
                "UPDATE deliveries
                 SET last_status = 'paused', updated_at = ?2
                 WHERE id = ?1
                   AND finished_at IS NULL
                   AND LOWER(TRIM(last_status)) IN ('started', 'ongoing', 'running', 'paused')"
            }
            Self::Resume => {
                "UPDATE deliveries
                 SET last_status = 'started', updated_at = ?2
                 WHERE id = ?1
                   AND finished_at IS NULL
                   AND LOWER(TRIM(last_status)) = 'paused'"
            }
            Self::Stop => {
                "UPDATE deliveries
                 SET last_status = 'stopped', finished_at = ?2, updated_at = ?2
                 WHERE id = ?1 AND finished_at IS NULL"
            }
            Self::Finish => {
                "UPDATE deliveries
                 SET last_status = 'finished', finished_at = ?2, updated_at = ?2
                 WHERE id = ?1 AND finished_at IS NULL"
            }
        }
    }
}

impl std::fmt::Display for DeliveryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Undo a scheduler claim that could not be queued
pub(crate) const RELEASE_CLAIM: &str = "UPDATE deliveries
     SET last_status = NULL, started_at = NULL, updated_at = ?2
     WHERE id = ?1 AND finished_at IS NULL AND LOWER(TRIM(last_status)) = 'started'";

/// Explain why `action` was refused, given a fresh read of the delivery
pub fn refusal(id: i64, action: DeliveryAction, current: Option<&Delivery>) -> DeliveryError {
    let Some(delivery) = current else {
        return DeliveryError::NotFound(id);
    };

    if delivery.is_finished() {
        return DeliveryError::AlreadyFinished(id);
    }

    match (action, delivery.status) {
        (DeliveryAction::Start, status @ (DeliveryStatus::Started | DeliveryStatus::Paused)) => {
            DeliveryError::AlreadyStarted { id, status }
        }
        (_, current) => DeliveryError::InvalidState {
            id,
            action,
            current,
        },
    }
}
