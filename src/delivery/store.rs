//! Delivery store abstraction and its SQLite implementation
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Scheduler   │   │ Control API  │   │ Final sync   │
//! └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!        └──────────────────┼──────────────────┘
//!                           ▼
//!                ┌─────────────────────┐
//!                │  DeliveryStore      │  (trait)
//!                └──────────┬──────────┘
//!                           ▼
//!                ┌─────────────────────┐
//!                │ SqliteDeliveryStore │  deliveries, group_members,
//!                └─────────────────────┘  delivery_results, delivery_answers,
//!                                         delivery_events
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::models::{ClientEvent, ExportBundle, ParticipantRecord, ParticipantStatus};
use crate::utils::sql::{from_sql_time, from_sql_time_opt, to_sql_time};

use super::lifecycle::{refusal, DeliveryAction, DeliveryStatus, RELEASE_CLAIM};
use super::{Delivery, DeliveryError, NewDelivery};

type Result<T> = std::result::Result<T, DeliveryError>;

/// Shared handle used by the server, API and scheduler
pub type SharedDeliveryStore = Arc<dyn DeliveryStore>;

// ============================================================================
// Result types
// ============================================================================

/// Outcome of persisting a worker's final export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileSummary {
    pub delivery_id: i64,
    pub participants: usize,
    pub answers: usize,
    /// False when the delivery had already been finished or stopped
    pub finished_now: bool,
}

/// Per-participant result stored centrally after a delivery completes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantResult {
    pub delivery_id: i64,
    pub participant_id: i64,
    pub name: String,
    pub status: ParticipantStatus,
    pub score: i64,
    pub answered: i64,
    pub total_questions: i64,
    pub completed_at: Option<DateTime<Utc>>,
    pub client_id: String,
}

// ============================================================================
// Trait
// ============================================================================

/// Central relational store of deliveries
pub trait DeliveryStore: Send + Sync {
    /// Insert a new delivery in the unset state
    fn create(&self, new: &NewDelivery) -> Result<Delivery>;

    fn get(&self, id: i64) -> Result<Option<Delivery>>;

    /// Auto-start deliveries whose time has come and that are still eligible to start
    fn due_for_auto_start(&self, now: DateTime<Utc>) -> Result<Vec<Delivery>>;

    fn add_group_member(&self, group_id: i64, participant: &ParticipantRecord) -> Result<()>;

    fn group_roster(&self, group_id: i64) -> Result<Vec<ParticipantRecord>>;

    /// Run one guarded transition; refused transitions carry the reason
    fn apply(&self, id: i64, action: DeliveryAction) -> Result<Delivery>;

    /// Return a started delivery to unset; false if it had moved on
    fn release(&self, id: i64) -> Result<bool>;

    /// Append a worker event to the audit trail
    fn record_event(&self, event: &ClientEvent) -> Result<i64>;

    fn event_count(&self, delivery_id: i64) -> Result<usize>;

    /// Persist a final export and mark the delivery finished, atomically
    fn record_final_results(&self, client_id: &str, bundle: &ExportBundle) -> Result<ReconcileSummary>;

    fn final_results(&self, delivery_id: i64) -> Result<Vec<ParticipantResult>>;

    fn start(&self, id: i64) -> Result<Delivery> {
        self.apply(id, DeliveryAction::Start)
    }

    fn pause(&self, id: i64) -> Result<Delivery> {
        self.apply(id, DeliveryAction::Pause)
    }

    fn resume(&self, id: i64) -> Result<Delivery> {
        self.apply(id, DeliveryAction::Resume)
    }

    fn stop(&self, id: i64) -> Result<Delivery> {
        self.apply(id, DeliveryAction::Stop)
    }

    fn finish(&self, id: i64) -> Result<Delivery> {
        self.apply(id, DeliveryAction::Finish)
    }
}

// ============================================================================
// SQLite Implementation
// ============================================================================

const DELIVERY_COLUMNS: &str = "id, exam_id, group_id, name, display_name, exam_title, group_name, \
     scheduled_at, duration, is_anytime, automatic_start, last_status, \
     started_at, finished_at, created_at, updated_at";

/// SQLite implementation of [`DeliveryStore`]
pub struct SqliteDeliveryStore {
    conn: Mutex<Connection>,
}

impl SqliteDeliveryStore {
    /// Open (or create) the store at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;

        tracing::info!(path = %path.display(), "Delivery store initialized");
        Ok(store)
    }

    /// Create in-memory store (for testing and ephemeral coordinators)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DeliveryError::LockPoisoned)
    }

    fn create_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
                PRAGMA foreign_keys = ON;

                CREATE TABLE IF NOT EXISTS deliveries (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    exam_id INTEGER NOT NULL DEFAULT 0,
                    group_id INTEGER NOT NULL DEFAULT 0,
                    name TEXT NOT NULL,
                    display_name TEXT NOT NULL DEFAULT '',
                    exam_title TEXT NOT NULL DEFAULT '',
                    group_name TEXT NOT NULL DEFAULT '',
                    scheduled_at TEXT,
                    duration INTEGER NOT NULL DEFAULT 0,
                    is_anytime INTEGER NOT NULL DEFAULT 0,
                    automatic_start INTEGER NOT NULL DEFAULT 0,
                    last_status TEXT,
                    started_at TEXT,
                    finished_at TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_deliveries_due
                    ON deliveries(automatic_start, scheduled_at);

                CREATE TABLE IF NOT EXISTS group_members (
                    group_id INTEGER NOT NULL,
                    participant_id INTEGER NOT NULL,
                    name TEXT NOT NULL,
                    email TEXT NOT NULL DEFAULT '',
                    identifier TEXT NOT NULL DEFAULT '',
                    PRIMARY KEY (group_id, participant_id)
                );

                CREATE TABLE IF NOT EXISTS delivery_results (
                    delivery_id INTEGER NOT NULL REFERENCES deliveries(id),
                    participant_id INTEGER NOT NULL,
                    name TEXT NOT NULL,
                    status TEXT NOT NULL,
                    score INTEGER NOT NULL DEFAULT 0,
                    answered INTEGER NOT NULL DEFAULT 0,
                    total_questions INTEGER NOT NULL DEFAULT 0,
                    completed_at TEXT,
                    client_id TEXT NOT NULL,
                    received_at TEXT NOT NULL,
                    PRIMARY KEY (delivery_id, participant_id)
                );

                CREATE TABLE IF NOT EXISTS delivery_answers (
                    delivery_id INTEGER NOT NULL REFERENCES deliveries(id),
                    participant_id INTEGER NOT NULL,
                    attempt_id INTEGER NOT NULL,
                    question_id INTEGER NOT NULL,
                    answer TEXT NOT NULL,
                    score INTEGER NOT NULL DEFAULT 0,
                    submitted_at TEXT NOT NULL,
                    PRIMARY KEY (delivery_id, attempt_id, question_id)
                );

                CREATE TABLE IF NOT EXISTS delivery_events (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    delivery_id INTEGER NOT NULL,
                    client_id TEXT NOT NULL,
                    event_type TEXT NOT NULL,
                    data TEXT NOT NULL,
                    occurred_at TEXT NOT NULL,
                    received_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_delivery_events_delivery
                    ON delivery_events(delivery_id);
                "#,
        )?;
        Ok(())
    }

    fn read(conn: &Connection, id: i64) -> Result<Option<Delivery>> {
        let sql = format!("SELECT {DELIVERY_COLUMNS} FROM deliveries WHERE id = ?1");
        let delivery = conn.query_row(&sql, params![id], map_delivery).optional()?;
        Ok(delivery)
    }
}

fn map_delivery(row: &Row<'_>) -> rusqlite::Result<Delivery> {
    Ok(Delivery {
        id: row.get(0)?,
        exam_id: row.get(1)?,
        group_id: row.get(2)?,
        name: row.get(3)?,
        display_name: row.get(4)?,
        exam_title: row.get(5)?,
        group_name: row.get(6)?,
        scheduled_at: from_sql_time_opt(7, row.get(7)?)?,
        duration: row.get(8)?,
        is_anytime: row.get(9)?,
        automatic_start: row.get(10)?,
        status: DeliveryStatus::from_db(row.get::<_, Option<String>>(11)?.as_deref()),
        started_at: from_sql_time_opt(12, row.get(12)?)?,
        finished_at: from_sql_time_opt(13, row.get(13)?)?,
        created_at: from_sql_time(14, &row.get::<_, String>(14)?)?,
        updated_at: from_sql_time(15, &row.get::<_, String>(15)?)?,
    })
}

impl DeliveryStore for SqliteDeliveryStore {
    fn create(&self, new: &NewDelivery) -> Result<Delivery> {
        let conn = self.conn()?;
        let now = to_sql_time(Utc::now());

        conn.execute(
            r#"
                INSERT INTO deliveries (exam_id, group_id, name, display_name, exam_title, group_name,
                                        scheduled_at, duration, is_anytime, automatic_start,
                                        created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
                "#,
            params![
                new.exam_id,
                new.group_id,
                new.name,
                new.display_name,
                new.exam_title,
                new.group_name,
                new.scheduled_at.map(to_sql_time),
                new.duration,
                new.is_anytime,
                new.automatic_start,
                now,
            ],
        )?;

        let id = conn.last_insert_rowid();
        Self::read(&conn, id)?.ok_or(DeliveryError::NotFound(id))
    }

    fn get(&self, id: i64) -> Result<Option<Delivery>> {
        let conn = self.conn()?;
        Self::read(&conn, id)
    }

    fn due_for_auto_start(&self, now: DateTime<Utc>) -> Result<Vec<Delivery>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {DELIVERY_COLUMNS} FROM deliveries
             WHERE automatic_start = 1
               AND scheduled_at IS NOT NULL
               AND scheduled_at <= ?1
               AND finished_at IS NULL
               AND (last_status IS NULL
                    OR LOWER(TRIM(last_status)) NOT IN
                       ('started', 'ongoing', 'running', 'paused', 'stopped', 'finished'))
             ORDER BY scheduled_at, id"
        );

        let mut stmt = conn.prepare(&sql)?;
        let due = stmt
            .query_map(params![to_sql_time(now)], map_delivery)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(due)
    }

    fn add_group_member(&self, group_id: i64, participant: &ParticipantRecord) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
                INSERT OR REPLACE INTO group_members (group_id, participant_id, name, email, identifier)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            params![
                group_id,
                participant.id,
                participant.name,
                participant.email,
                participant.identifier
            ],
        )?;
        Ok(())
    }

    fn group_roster(&self, group_id: i64) -> Result<Vec<ParticipantRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT participant_id, name, email, identifier FROM group_members
             WHERE group_id = ?1 ORDER BY participant_id",
        )?;

        let roster = stmt
            .query_map(params![group_id], |row| {
                Ok(ParticipantRecord {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    email: row.get(2)?,
                    identifier: row.get(3)?,
                    status: ParticipantStatus::NotStarted,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(roster)
    }

    fn apply(&self, id: i64, action: DeliveryAction) -> Result<Delivery> {
        let conn = self.conn()?;
        let now = to_sql_time(Utc::now());

        let changed = conn.execute(action.guarded_update(), params![id, now])?;
        let current = Self::read(&conn, id)?;

        if changed == 0 {
            return Err(refusal(id, action, current.as_ref()));
        }

        tracing::info!(delivery_id = id, action = %action, "Delivery transition applied");
        current.ok_or(DeliveryError::NotFound(id))
    }

    fn release(&self, id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(RELEASE_CLAIM, params![id, to_sql_time(Utc::now())])?;
        if changed > 0 {
            tracing::info!(delivery_id = id, "Delivery claim released");
        }
        Ok(changed > 0)
    }

    fn record_event(&self, event: &ClientEvent) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            r#"
                INSERT INTO delivery_events (delivery_id, client_id, event_type, data, occurred_at, received_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            params![
                event.delivery_id,
                event.client_id,
                event.event_type.as_str(),
                serde_json::to_string(&event.data)?,
                to_sql_time(event.timestamp),
                to_sql_time(Utc::now()),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn event_count(&self, delivery_id: i64) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM delivery_events WHERE delivery_id = ?1",
            params![delivery_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn record_final_results(&self, client_id: &str, bundle: &ExportBundle) -> Result<ReconcileSummary> {
        let mut conn = self.conn()?;
        let delivery_id = bundle.delivery_id;

        if Self::read(&conn, delivery_id)?.is_none() {
            return Err(DeliveryError::NotFound(delivery_id));
        }

        let now = to_sql_time(Utc::now());
        let tx = conn.transaction()?;

        let attempt_owner: HashMap<i64, i64> = bundle
            .attempts
            .iter()
            .map(|a| (a.id, a.participant_id))
            .collect();

        {
            let mut insert_result = tx.prepare(
                r#"
                    INSERT OR REPLACE INTO delivery_results
                        (delivery_id, participant_id, name, status, score, answered, total_questions,
                         completed_at, client_id, received_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                    "#,
            )?;

            for participant in &bundle.participants {
                let progress = bundle
                    .progress
                    .iter()
                    .find(|p| p.participant_id == participant.id);
                let completed_at = bundle
                    .attempts
                    .iter()
                    .filter(|a| a.participant_id == participant.id)
                    .filter_map(|a| a.ended_at)
                    .max();

                insert_result.execute(params![
                    delivery_id,
                    participant.id,
                    participant.name,
                    participant.status.as_str(),
                    progress.map(|p| p.current_score).unwrap_or(0),
                    progress.map(|p| p.questions_answered).unwrap_or(0),
                    progress.map(|p| p.total_questions).unwrap_or(0),
                    completed_at.map(to_sql_time),
                    client_id,
                    now,
                ])?;
            }

            let mut insert_answer = tx.prepare(
                r#"
                    INSERT OR REPLACE INTO delivery_answers
                        (delivery_id, participant_id, attempt_id, question_id, answer, score, submitted_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    "#,
            )?;

            for answer in &bundle.answers {
                let participant_id = attempt_owner.get(&answer.attempt_id).copied().unwrap_or(0);
                insert_answer.execute(params![
                    delivery_id,
                    participant_id,
                    answer.attempt_id,
                    answer.question_id,
                    answer.answer,
                    answer.score,
                    to_sql_time(answer.submitted_at),
                ])?;
            }
        }

        let finished = tx.execute(DeliveryAction::Finish.guarded_update(), params![delivery_id, now])?;
        tx.commit()?;

        let summary = ReconcileSummary {
            delivery_id,
            participants: bundle.participants.len(),
            answers: bundle.answers.len(),
            finished_now: finished > 0,
        };

        tracing::info!(
            delivery_id,
            client_id = %client_id,
            participants = summary.participants,
            answers = summary.answers,
            finished_now = summary.finished_now,
            "Final results reconciled"
        );
        Ok(summary)
    }

    fn final_results(&self, delivery_id: i64) -> Result<Vec<ParticipantResult>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT delivery_id, participant_id, name, status, score, answered, total_questions,
                    completed_at, client_id
             FROM delivery_results WHERE delivery_id = ?1 ORDER BY participant_id",
        )?;

        let results = stmt
            .query_map(params![delivery_id], |row| {
                Ok(ParticipantResult {
                    delivery_id: row.get(0)?,
                    participant_id: row.get(1)?,
                    name: row.get(2)?,
                    status: row
                        .get::<_, String>(3)?
                        .parse()
                        .unwrap_or(ParticipantStatus::NotStarted),
                    score: row.get(4)?,
                    answered: row.get(5)?,
                    total_questions: row.get(6)?,
                    completed_at: from_sql_time_opt(7, row.get(7)?)?,
                    client_id: row.get(8)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(results)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnswerRecord, AttemptRecord, AttemptStatus, EventType, ProgressRecord};
    use serde_json::json;

    fn due_delivery(store: &SqliteDeliveryStore, name: &str) -> Delivery {
        store
            .create(&NewDelivery::new(name).auto_start_at(Utc::now() - chrono::Duration::minutes(1)))
            .unwrap()
    }

    fn set_raw_status(store: &SqliteDeliveryStore, id: i64, status: Option<&str>) {
        store
            .conn()
            .unwrap()
            .execute("UPDATE deliveries SET last_status = ?2 WHERE id = ?1", params![id, status])
            .unwrap();
    }

    #[test]
    fn test_create_and_get() {
        let store = SqliteDeliveryStore::in_memory().unwrap();
        let created = store
            .create(&NewDelivery::new("Block A").with_exam(3, "Physiology").with_duration(90))
            .unwrap();

        let fetched = store.get(created.id).unwrap().unwrap();
        assert_eq!(fetched.status, DeliveryStatus::Unset);
        assert_eq!(fetched.exam_title, "Physiology");
        assert_eq!(fetched.duration, 90);
        assert!(store.get(999).unwrap().is_none());
    }

    #[test]
    fn test_due_query_filters() {
        let store = SqliteDeliveryStore::in_memory().unwrap();
        let due = due_delivery(&store, "due");
        let legacy = due_delivery(&store, "legacy-running");
        set_raw_status(&store, legacy.id, Some(" Ongoing "));
        let blank = due_delivery(&store, "blank-status");
        set_raw_status(&store, blank.id, Some(""));

        store
            .create(&NewDelivery::new("future").auto_start_at(Utc::now() + chrono::Duration::hours(1)))
            .unwrap();
        store.create(&NewDelivery::new("manual")).unwrap();

        let ids: Vec<i64> = store
            .due_for_auto_start(Utc::now())
            .unwrap()
            .iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec![due.id, blank.id]);
    }

    #[test]
    fn test_full_lifecycle() {
        let store = SqliteDeliveryStore::in_memory().unwrap();
        let id = due_delivery(&store, "d").id;

        let started = store.start(id).unwrap();
        assert_eq!(started.status, DeliveryStatus::Started);
        assert!(started.started_at.is_some());

        assert_eq!(store.pause(id).unwrap().status, DeliveryStatus::Paused);
        assert_eq!(store.pause(id).unwrap().status, DeliveryStatus::Paused);
        assert_eq!(store.resume(id).unwrap().status, DeliveryStatus::Started);

        let stopped = store.stop(id).unwrap();
        assert_eq!(stopped.status, DeliveryStatus::Stopped);
        assert!(stopped.is_finished());

        assert!(matches!(store.finish(id), Err(DeliveryError::AlreadyFinished(_))));
        assert!(matches!(store.start(id), Err(DeliveryError::AlreadyFinished(_))));
        assert!(store.due_for_auto_start(Utc::now()).unwrap().is_empty());
    }

    #[test]
    fn test_refused_transitions_carry_reason() {
        let store = SqliteDeliveryStore::in_memory().unwrap();
        let id = due_delivery(&store, "d").id;

        assert!(matches!(
            store.resume(id),
            Err(DeliveryError::InvalidState {
                current: DeliveryStatus::Unset,
                ..
            })
        ));
        assert!(matches!(store.pause(id), Err(DeliveryError::InvalidState { .. })));

        store.start(id).unwrap();
        assert!(matches!(store.start(id), Err(DeliveryError::AlreadyStarted { .. })));
        assert!(matches!(store.start(4242), Err(DeliveryError::NotFound(4242))));
    }

    #[test]
    fn test_single_claim_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deliveries.db");
        let id = due_delivery(&SqliteDeliveryStore::open(&path).unwrap(), "race").id;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let path = path.clone();
                std::thread::spawn(move || SqliteDeliveryStore::open(&path).unwrap().start(id))
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let wins = results.iter().filter(|r| r.is_ok()).count();
        let already = results
            .iter()
            .filter(|r| matches!(r, Err(DeliveryError::AlreadyStarted { .. })))
            .count();

        assert_eq!(wins, 1);
        assert_eq!(already, 7);
    }

    #[test]
    fn test_release_only_undoes_started() {
        let store = SqliteDeliveryStore::in_memory().unwrap();
        let id = due_delivery(&store, "d").id;

        assert!(!store.release(id).unwrap());

        store.start(id).unwrap();
        assert!(store.release(id).unwrap());

        let released = store.get(id).unwrap().unwrap();
        assert_eq!(released.status, DeliveryStatus::Unset);
        assert!(released.started_at.is_none());
        assert_eq!(store.due_for_auto_start(Utc::now()).unwrap().len(), 1);

        store.start(id).unwrap();
        store.pause(id).unwrap();
        assert!(!store.release(id).unwrap());
    }

    #[test]
    fn test_group_roster() {
        let store = SqliteDeliveryStore::in_memory().unwrap();
        store.add_group_member(1, &ParticipantRecord::new(2, "Two")).unwrap();
        store.add_group_member(1, &ParticipantRecord::new(1, "One")).unwrap();
        store.add_group_member(2, &ParticipantRecord::new(3, "Other")).unwrap();

        let roster = store.group_roster(1).unwrap();
        assert_eq!(roster.iter().map(|p| p.id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_record_event() {
        let store = SqliteDeliveryStore::in_memory().unwrap();
        let event = ClientEvent::new(EventType::AnswerSubmitted, 5, "c1", json!({"attempt_id": 1}));

        store.record_event(&event).unwrap();
        store.record_event(&event).unwrap();

        assert_eq!(store.event_count(5).unwrap(), 2);
        assert_eq!(store.event_count(6).unwrap(), 0);
    }

    fn bundle(delivery_id: i64) -> ExportBundle {
        let now = Utc::now();
        let mut done = ParticipantRecord::new(1, "One");
        done.status = ParticipantStatus::Completed;

        ExportBundle {
            delivery_id,
            participants: vec![done, ParticipantRecord::new(2, "Two")],
            attempts: vec![AttemptRecord {
                id: 10,
                participant_id: 1,
                started_at: now,
                ended_at: Some(now),
                current_question: 2,
                status: AttemptStatus::Completed,
            }],
            answers: vec![
                AnswerRecord {
                    id: 1,
                    attempt_id: 10,
                    question_id: 1,
                    answer: "a".to_string(),
                    submitted_at: now,
                    score: 3,
                },
                AnswerRecord {
                    id: 2,
                    attempt_id: 10,
                    question_id: 2,
                    answer: "b".to_string(),
                    submitted_at: now,
                    score: 4,
                },
            ],
            progress: vec![ProgressRecord {
                participant_id: 1,
                questions_answered: 2,
                total_questions: 2,
                current_score: 7,
                time_remaining: 60,
                last_activity: now,
            }],
            exported_at: now,
        }
    }

    #[test]
    fn test_final_results_reconcile_and_finish() {
        let store = SqliteDeliveryStore::in_memory().unwrap();
        let id = due_delivery(&store, "d").id;
        store.start(id).unwrap();

        let summary = store.record_final_results("c1", &bundle(id)).unwrap();
        assert_eq!(summary.participants, 2);
        assert_eq!(summary.answers, 2);
        assert!(summary.finished_now);

        let delivery = store.get(id).unwrap().unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Finished);

        let results = store.final_results(id).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].score, 7);
        assert_eq!(results[0].status, ParticipantStatus::Completed);
        assert!(results[0].completed_at.is_some());
        assert_eq!(results[1].answered, 0);

        // A resent export replaces rows and leaves the delivery finished
        let again = store.record_final_results("c1", &bundle(id)).unwrap();
        assert!(!again.finished_now);
        assert_eq!(store.final_results(id).unwrap().len(), 2);
    }

    #[test]
    fn test_final_results_unknown_delivery() {
        let store = SqliteDeliveryStore::in_memory().unwrap();
        assert!(matches!(
            store.record_final_results("c1", &bundle(77)),
            Err(DeliveryError::NotFound(77))
        ));
    }
}
