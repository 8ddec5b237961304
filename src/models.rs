// Core data structures shared by the coordinator and exam-client

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Assignment
// ============================================================================

/// A unit of work handed from the coordinator to exactly one exam-client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Assignment {
    pub delivery_id: i64,
    pub delivery_name: String,

    /// Opaque exam payload built by the scheduler
    #[serde(default)]
    pub exam_data: Value,

    /// Opaque delivery configuration
    #[serde(default)]
    pub config: Value,

    pub created_at: DateTime<Utc>,

    /// Claiming worker, stamped on poll
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Claim time, stamped on poll
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_at: Option<DateTime<Utc>>,
}

impl Assignment {
    /// Create an unclaimed assignment
    pub fn new(delivery_id: i64, delivery_name: impl Into<String>, exam_data: Value) -> Self {
        Self {
            delivery_id,
            delivery_name: delivery_name.into(),
            exam_data,
            config: Value::Object(Default::default()),
            created_at: Utc::now(),
            client_id: None,
            assigned_at: None,
        }
    }

    /// Attach delivery configuration
    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    /// Stamp the assignment with the claiming worker
    pub fn claim(&mut self, client_id: &str) {
        self.client_id = Some(client_id.to_string());
        self.assigned_at = Some(Utc::now());
    }

    /// Check if the assignment has been claimed
    pub fn is_claimed(&self) -> bool {
        self.client_id.is_some()
    }

    /// Participant roster carried in `exam_data.participants`
    pub fn participants(&self) -> Result<Vec<ParticipantRecord>, serde_json::Error> {
        match self.exam_data.get("participants") {
            Some(list) if !list.is_null() => serde_json::from_value(list.clone()),
            _ => Ok(Vec::new()),
        }
    }

    /// Question catalogue carried in `exam_data.questions`
    pub fn questions(&self) -> Vec<Value> {
        self.exam_data
            .get("questions")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    }

    /// Scheduled duration in minutes, if the payload carries a positive one
    pub fn duration_minutes(&self) -> Option<i64> {
        self.exam_data
            .get("duration")
            .and_then(Value::as_i64)
            .filter(|d| *d > 0)
    }
}

// ============================================================================
// Delivery instance (worker-local)
// ============================================================================

/// Lifecycle of a delivery instance on an exam-client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Starting,
    Running,
    Completed,
    Cancelled,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Check if the instance has reached an end state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a running delivery instance, sent with every status report
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceSummary {
    pub id: i64,
    pub name: String,
    pub status: InstanceStatus,
    pub started_at: DateTime<Utc>,
    pub participants: usize,
    pub port: u16,
}

// ============================================================================
// Participant / Attempt / Answer / Progress
// ============================================================================

/// Participant status inside one delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
    Abandoned,
}

impl ParticipantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Abandoned => "abandoned",
        }
    }
}

impl std::str::FromStr for ParticipantStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "in_progress" => Self::InProgress,
            "completed" => Self::Completed,
            "abandoned" => Self::Abandoned,
            _ => Self::NotStarted,
        })
    }
}

/// Attempt status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    #[default]
    InProgress,
    Completed,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

impl std::str::FromStr for AttemptStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "completed" => Self::Completed,
            _ => Self::InProgress,
        })
    }
}

/// A candidate sitting one delivery
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParticipantRecord {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub identifier: String,
    #[serde(default)]
    pub status: ParticipantStatus,
}

impl ParticipantRecord {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            email: String::new(),
            identifier: String::new(),
            status: ParticipantStatus::NotStarted,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttemptRecord {
    pub id: i64,
    pub participant_id: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub current_question: i64,
    pub status: AttemptStatus,
}

/// One answer per (attempt, question); the latest submission wins
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnswerRecord {
    pub id: i64,
    pub attempt_id: i64,
    pub question_id: i64,
    pub answer: String,
    pub submitted_at: DateTime<Utc>,
    pub score: i64,
}

/// Per-participant progress, derived from the answers of the current attempt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressRecord {
    pub participant_id: i64,
    pub questions_answered: i64,
    pub total_questions: i64,
    pub current_score: i64,
    /// Remaining time budget in seconds
    pub time_remaining: i64,
    pub last_activity: DateTime<Utc>,
}

// ============================================================================
// Export bundle
// ============================================================================

/// Full snapshot of a delivery instance store, sent as the final sync
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportBundle {
    pub delivery_id: i64,
    pub participants: Vec<ParticipantRecord>,
    pub attempts: Vec<AttemptRecord>,
    pub answers: Vec<AnswerRecord>,
    pub progress: Vec<ProgressRecord>,
    pub exported_at: DateTime<Utc>,
}

// ============================================================================
// Events
// ============================================================================

/// Event types pushed from a delivery endpoint to the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ParticipantStarted,
    AnswerSubmitted,
    ParticipantCompleted,
    #[serde(other)]
    Other,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ParticipantStarted => "participant_started",
            Self::AnswerSubmitted => "answer_submitted",
            Self::ParticipantCompleted => "participant_completed",
            Self::Other => "other",
        }
    }
}

/// Near-real-time event from a running delivery
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientEvent {
    pub event_type: EventType,
    pub delivery_id: i64,
    pub client_id: String,
    #[serde(default)]
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl ClientEvent {
    pub fn new(event_type: EventType, delivery_id: i64, client_id: impl Into<String>, data: Value) -> Self {
        Self {
            event_type,
            delivery_id,
            client_id: client_id.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_assignment_claim() {
        let mut assignment = Assignment::new(7, "Cardiology OSCE", json!({}));
        assert!(!assignment.is_claimed());

        assignment.claim("exam-client-a");

        assert_eq!(assignment.client_id.as_deref(), Some("exam-client-a"));
        assert!(assignment.assigned_at.is_some());
    }

    #[test]
    fn test_assignment_payload_accessors() {
        let assignment = Assignment::new(
            3,
            "Block A",
            json!({
                "duration": 90,
                "participants": [
                    {"id": 1, "name": "Candidate One", "email": "one@example.org"},
                    {"id": 2, "name": "Candidate Two"}
                ],
                "questions": [{"id": 10, "text": "Q10"}]
            }),
        );

        let participants = assignment.participants().unwrap();
        assert_eq!(participants.len(), 2);
        assert_eq!(participants[1].status, ParticipantStatus::NotStarted);
        assert_eq!(assignment.questions().len(), 1);
        assert_eq!(assignment.duration_minutes(), Some(90));
    }

    #[test]
    fn test_assignment_without_roster() {
        let assignment = Assignment::new(3, "Block A", json!({"duration": 0}));
        assert!(assignment.participants().unwrap().is_empty());
        assert!(assignment.questions().is_empty());
        assert_eq!(assignment.duration_minutes(), None);
    }

    #[test]
    fn test_unknown_event_type_is_accepted() {
        let event: ClientEvent = serde_json::from_value(json!({
            "event_type": "proctor_flag",
            "delivery_id": 4,
            "client_id": "c1",
            "data": {},
            "timestamp": "2024-01-01T10:00:00Z"
        }))
        .unwrap();

        assert_eq!(event.event_type, EventType::Other);
    }

    #[test]
    fn test_status_round_trip_strings() {
        assert_eq!("completed".parse::<ParticipantStatus>().unwrap(), ParticipantStatus::Completed);
        assert_eq!("garbage".parse::<AttemptStatus>().unwrap(), AttemptStatus::InProgress);
        assert_eq!(InstanceStatus::Cancelled.to_string(), "cancelled");
    }
}
