//! Per-delivery embedded store
//!
//! Every running delivery owns one SQLite file holding its participants,
//! attempts, answers and progress. Writes that touch more than one table run
//! in a single transaction so a failed request never leaves partial state.
//! The file is exported as one bundle when the delivery completes.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{
    AnswerRecord, AttemptRecord, AttemptStatus, ExportBundle, ParticipantRecord, ParticipantStatus,
    ProgressRecord,
};
use crate::utils::sql::{from_sql_time, from_sql_time_opt, to_sql_time};

/// Seconds allotted per question when the delivery has no fixed duration
pub const SECONDS_PER_QUESTION: i64 = 60;

type Result<T> = std::result::Result<T, ExamStoreError>;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ExamStoreError {
    #[error("Participant not found: {0}")]
    ParticipantNotFound(i64),

    #[error("Attempt not found: {0}")]
    AttemptNotFound(i64),

    #[error("Attempt {0} is already completed")]
    AttemptClosed(i64),

    #[error("Participant {0} has already completed the exam")]
    ParticipantCompleted(i64),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Exam store lock poisoned")]
    LockPoisoned,
}

impl ExamStoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ParticipantNotFound(_) | Self::AttemptNotFound(_))
    }

    /// Request refused by the state of the attempt or participant
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::AttemptClosed(_) | Self::ParticipantCompleted(_))
    }
}

// ============================================================================
// Views
// ============================================================================

/// One row of the live progress view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveProgress {
    pub participant_id: i64,
    pub name: String,
    pub status: ParticipantStatus,
    pub attempt_id: Option<i64>,
    pub questions_answered: i64,
    pub total_questions: i64,
    pub current_score: i64,
    pub time_remaining: i64,
    pub last_activity: Option<chrono::DateTime<Utc>>,
}

/// Aggregate counts for one delivery
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryStats {
    pub total_participants: usize,
    pub not_started: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub abandoned: usize,
    /// Mean score over completed participants
    pub average_score: f64,
}

impl DeliveryStats {
    /// Completed share of all participants (0.0 - 1.0)
    pub fn completion_rate(&self) -> f64 {
        if self.total_participants == 0 {
            return 0.0;
        }
        self.completed as f64 / self.total_participants as f64
    }

    /// True once every loaded participant has completed
    pub fn all_completed(&self) -> bool {
        self.total_participants > 0 && self.completed == self.total_participants
    }
}

// ============================================================================
// Delivery Database
// ============================================================================

/// Embedded store for exactly one delivery
pub struct DeliveryDatabase {
    conn: Mutex<Connection>,
    delivery_id: i64,
    path: Option<PathBuf>,
    time_budget_secs: Option<i64>,
}

impl DeliveryDatabase {
    /// Create a fresh store file for `delivery_id` under `data_dir`
    pub fn open(delivery_id: i64, data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;

        let file_name = format!(
            "delivery_{}_{}.db",
            delivery_id,
            Utc::now().format("%Y%m%d_%H%M%S")
        );
        let path = data_dir.join(file_name);

        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let db = Self {
            conn: Mutex::new(conn),
            delivery_id,
            path: Some(path.clone()),
            time_budget_secs: None,
        };
        db.create_schema()?;

        tracing::info!(delivery_id, path = %path.display(), "Delivery store created");
        Ok(db)
    }

    /// Create in-memory store (for testing)
    pub fn in_memory(delivery_id: i64) -> Result<Self> {
        let db = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            delivery_id,
            path: None,
            time_budget_secs: None,
        };
        db.create_schema()?;
        Ok(db)
    }

    /// Fix the per-attempt time budget instead of deriving it from question count
    pub fn with_time_budget(mut self, seconds: Option<i64>) -> Self {
        self.time_budget_secs = seconds.filter(|s| *s > 0);
        self
    }

    pub fn delivery_id(&self) -> i64 {
        self.delivery_id
    }

    /// Backing file, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| ExamStoreError::LockPoisoned)
    }

    fn create_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
                PRAGMA foreign_keys = ON;

                CREATE TABLE IF NOT EXISTS participants (
                    id INTEGER PRIMARY KEY CHECK (id > 0),
                    name TEXT NOT NULL,
                    email TEXT NOT NULL DEFAULT '',
                    identifier TEXT NOT NULL DEFAULT '',
                    status TEXT NOT NULL DEFAULT 'not_started'
                );

                CREATE TABLE IF NOT EXISTS attempts (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    participant_id INTEGER NOT NULL REFERENCES participants(id),
                    started_at TEXT NOT NULL,
                    ended_at TEXT,
                    current_question INTEGER NOT NULL DEFAULT 0,
                    status TEXT NOT NULL DEFAULT 'in_progress'
                );

                CREATE INDEX IF NOT EXISTS idx_attempts_participant
                    ON attempts(participant_id);

                CREATE TABLE IF NOT EXISTS answers (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    attempt_id INTEGER NOT NULL REFERENCES attempts(id),
                    question_id INTEGER NOT NULL,
                    answer TEXT NOT NULL,
                    submitted_at TEXT NOT NULL,
                    score INTEGER NOT NULL DEFAULT 0,
                    UNIQUE (attempt_id, question_id)
                );

                CREATE TABLE IF NOT EXISTS progress (
                    participant_id INTEGER PRIMARY KEY REFERENCES participants(id),
                    attempt_id INTEGER NOT NULL,
                    questions_answered INTEGER NOT NULL DEFAULT 0,
                    total_questions INTEGER NOT NULL DEFAULT 0,
                    current_score INTEGER NOT NULL DEFAULT 0,
                    time_remaining INTEGER NOT NULL DEFAULT 0,
                    last_activity TEXT NOT NULL
                );
                "#,
        )?;
        Ok(())
    }

    fn time_budget(&self, total_questions: i64) -> i64 {
        self.time_budget_secs
            .unwrap_or(total_questions.max(0) * SECONDS_PER_QUESTION)
    }

    // ------------------------------------------------------------------------
    // Participants
    // ------------------------------------------------------------------------

    /// Insert or refresh one participant, keeping any status already recorded
    pub fn add_participant(&self, participant: &ParticipantRecord) -> Result<()> {
        let conn = self.conn()?;
        upsert_participant(&conn, participant)?;
        Ok(())
    }

    /// Load the delivery roster; returns the number of participants written
    pub fn load_participants(&self, participants: &[ParticipantRecord]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for participant in participants {
            upsert_participant(&tx, participant)?;
        }
        tx.commit()?;

        tracing::debug!(
            delivery_id = self.delivery_id,
            count = participants.len(),
            "Participants loaded"
        );
        Ok(participants.len())
    }

    pub fn participants(&self) -> Result<Vec<ParticipantRecord>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id, name, email, identifier, status FROM participants ORDER BY id")?;
        let participants = stmt
            .query_map([], |row| {
                Ok(ParticipantRecord {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    email: row.get(2)?,
                    identifier: row.get(3)?,
                    status: row
                        .get::<_, String>(4)?
                        .parse()
                        .unwrap_or(ParticipantStatus::NotStarted),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(participants)
    }

    // ------------------------------------------------------------------------
    // Attempts and answers
    // ------------------------------------------------------------------------

    /// Open an attempt for a participant and reset their progress
    ///
    /// A participant with an attempt still in progress gets that attempt back
    /// unchanged, so a reconnecting candidate resumes instead of restarting.
    /// A participant who already completed is refused.
    pub fn start_attempt(&self, participant_id: i64, total_questions: i64) -> Result<i64> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let status: Option<String> = tx
            .query_row(
                "SELECT status FROM participants WHERE id = ?1",
                params![participant_id],
                |row| row.get(0),
            )
            .optional()?;
        match status.as_deref() {
            None => return Err(ExamStoreError::ParticipantNotFound(participant_id)),
            Some(s) if s == ParticipantStatus::Completed.as_str() => {
                return Err(ExamStoreError::ParticipantCompleted(participant_id));
            }
            Some(_) => {}
        }

        let open: Option<i64> = tx
            .query_row(
                "SELECT id FROM attempts WHERE participant_id = ?1 AND status = 'in_progress'
                 ORDER BY id DESC LIMIT 1",
                params![participant_id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(attempt_id) = open {
            return Ok(attempt_id);
        }

        let now = to_sql_time(Utc::now());
        tx.execute(
            "INSERT INTO attempts (participant_id, started_at, status) VALUES (?1, ?2, 'in_progress')",
            params![participant_id, now],
        )?;
        let attempt_id = tx.last_insert_rowid();

        tx.execute(
            r#"
                INSERT OR REPLACE INTO progress
                    (participant_id, attempt_id, questions_answered, total_questions, current_score,
                     time_remaining, last_activity)
                VALUES (?1, ?2, 0, ?3, 0, ?4, ?5)
                "#,
            params![
                participant_id,
                attempt_id,
                total_questions,
                self.time_budget(total_questions),
                now
            ],
        )?;

        tx.execute(
            "UPDATE participants SET status = 'in_progress' WHERE id = ?1",
            params![participant_id],
        )?;

        tx.commit()?;
        Ok(attempt_id)
    }

    /// Record an answer (latest submission wins) and recompute progress from the answers table
    pub fn submit_answer(
        &self,
        attempt_id: i64,
        question_id: i64,
        answer: &str,
        score: i64,
    ) -> Result<ProgressRecord> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let (participant_id, status) = open_attempt(&tx, attempt_id)?;
        if status == AttemptStatus::Completed {
            return Err(ExamStoreError::AttemptClosed(attempt_id));
        }

        let now = to_sql_time(Utc::now());
        tx.execute(
            r#"
                INSERT INTO answers (attempt_id, question_id, answer, submitted_at, score)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(attempt_id, question_id) DO UPDATE SET
                    answer = excluded.answer,
                    submitted_at = excluded.submitted_at,
                    score = excluded.score
                "#,
            params![attempt_id, question_id, answer, now, score],
        )?;

        let (answered, total_score): (i64, i64) = tx.query_row(
            "SELECT COUNT(*), COALESCE(SUM(score), 0) FROM answers WHERE attempt_id = ?1",
            params![attempt_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        tx.execute(
            r#"
                UPDATE progress
                SET questions_answered = ?2, current_score = ?3, last_activity = ?4
                WHERE participant_id = ?1
                "#,
            params![participant_id, answered, total_score, now],
        )?;

        tx.execute(
            "UPDATE attempts SET current_question = ?2 WHERE id = ?1",
            params![attempt_id, question_id],
        )?;

        let progress = read_progress(&tx, participant_id)?
            .ok_or(ExamStoreError::ParticipantNotFound(participant_id))?;
        tx.commit()?;
        Ok(progress)
    }

    /// Close an attempt and mark its participant completed; returns the participant id
    pub fn complete_attempt(&self, attempt_id: i64) -> Result<i64> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let (participant_id, status) = open_attempt(&tx, attempt_id)?;
        if status == AttemptStatus::Completed {
            return Ok(participant_id);
        }

        let now = to_sql_time(Utc::now());
        tx.execute(
            "UPDATE attempts SET status = 'completed', ended_at = ?2 WHERE id = ?1",
            params![attempt_id, now],
        )?;
        tx.execute(
            "UPDATE participants SET status = 'completed' WHERE id = ?1",
            params![participant_id],
        )?;
        tx.execute(
            "UPDATE progress SET last_activity = ?2 WHERE participant_id = ?1",
            params![participant_id, now],
        )?;

        tx.commit()?;
        Ok(participant_id)
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    pub fn progress_for_participant(&self, participant_id: i64) -> Result<Option<ProgressRecord>> {
        let conn = self.conn()?;
        read_progress(&conn, participant_id)
    }

    /// Every participant joined with their current attempt and progress
    pub fn live_progress(&self) -> Result<Vec<LiveProgress>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
                SELECT p.id, p.name, p.status, pr.attempt_id,
                       COALESCE(pr.questions_answered, 0), COALESCE(pr.total_questions, 0),
                       COALESCE(pr.current_score, 0), COALESCE(pr.time_remaining, 0),
                       pr.last_activity
                FROM participants p
                LEFT JOIN progress pr ON pr.participant_id = p.id
                ORDER BY p.id
                "#,
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok(LiveProgress {
                    participant_id: row.get(0)?,
                    name: row.get(1)?,
                    status: row
                        .get::<_, String>(2)?
                        .parse()
                        .unwrap_or(ParticipantStatus::NotStarted),
                    attempt_id: row.get(3)?,
                    questions_answered: row.get(4)?,
                    total_questions: row.get(5)?,
                    current_score: row.get(6)?,
                    time_remaining: row.get(7)?,
                    last_activity: from_sql_time_opt(8, row.get(8)?)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn stats(&self) -> Result<DeliveryStats> {
        let conn = self.conn()?;
        let (total, not_started, in_progress, completed, abandoned): (i64, i64, i64, i64, i64) = conn
            .query_row(
                r#"
                    SELECT COUNT(*),
                           COALESCE(SUM(status = 'not_started'), 0),
                           COALESCE(SUM(status = 'in_progress'), 0),
                           COALESCE(SUM(status = 'completed'), 0),
                           COALESCE(SUM(status = 'abandoned'), 0)
                    FROM participants
                    "#,
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )?;

        let average_score: Option<f64> = conn.query_row(
            r#"
                SELECT AVG(pr.current_score)
                FROM participants p JOIN progress pr ON pr.participant_id = p.id
                WHERE p.status = 'completed'
                "#,
            [],
            |row| row.get(0),
        )?;

        Ok(DeliveryStats {
            total_participants: total as usize,
            not_started: not_started as usize,
            in_progress: in_progress as usize,
            completed: completed as usize,
            abandoned: abandoned as usize,
            average_score: average_score.unwrap_or(0.0),
        })
    }

    /// Read-only snapshot of every table
    pub fn export_all(&self) -> Result<ExportBundle> {
        let participants = self.participants()?;
        let conn = self.conn()?;

        let attempts = conn
            .prepare(
                "SELECT id, participant_id, started_at, ended_at, current_question, status
                 FROM attempts ORDER BY id",
            )?
            .query_map([], |row| {
                Ok(AttemptRecord {
                    id: row.get(0)?,
                    participant_id: row.get(1)?,
                    started_at: from_sql_time(2, &row.get::<_, String>(2)?)?,
                    ended_at: from_sql_time_opt(3, row.get(3)?)?,
                    current_question: row.get(4)?,
                    status: row
                        .get::<_, String>(5)?
                        .parse()
                        .unwrap_or(AttemptStatus::InProgress),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let answers = conn
            .prepare(
                "SELECT id, attempt_id, question_id, answer, submitted_at, score
                 FROM answers ORDER BY id",
            )?
            .query_map([], |row| {
                Ok(AnswerRecord {
                    id: row.get(0)?,
                    attempt_id: row.get(1)?,
                    question_id: row.get(2)?,
                    answer: row.get(3)?,
                    submitted_at: from_sql_time(4, &row.get::<_, String>(4)?)?,
                    score: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let progress = conn
            .prepare(
                "SELECT participant_id, questions_answered, total_questions, current_score,
                        time_remaining, last_activity
                 FROM progress ORDER BY participant_id",
            )?
            .query_map([], map_progress)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(ExportBundle {
            delivery_id: self.delivery_id,
            participants,
            attempts,
            answers,
            progress,
            exported_at: Utc::now(),
        })
    }
}

// ============================================================================
// Row helpers
// ============================================================================

fn upsert_participant(conn: &Connection, participant: &ParticipantRecord) -> rusqlite::Result<()> {
    conn.execute(
        r#"
            INSERT INTO participants (id, name, email, identifier, status)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                email = excluded.email,
                identifier = excluded.identifier
            "#,
        params![
            participant.id,
            participant.name,
            participant.email,
            participant.identifier,
            participant.status.as_str()
        ],
    )?;
    Ok(())
}

fn open_attempt(tx: &Transaction<'_>, attempt_id: i64) -> Result<(i64, AttemptStatus)> {
    tx.query_row(
        "SELECT participant_id, status FROM attempts WHERE id = ?1",
        params![attempt_id],
        |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?
                    .parse()
                    .unwrap_or(AttemptStatus::InProgress),
            ))
        },
    )
    .optional()?
    .ok_or(ExamStoreError::AttemptNotFound(attempt_id))
}

fn read_progress(conn: &Connection, participant_id: i64) -> Result<Option<ProgressRecord>> {
    let progress = conn
        .query_row(
            "SELECT participant_id, questions_answered, total_questions, current_score,
                    time_remaining, last_activity
             FROM progress WHERE participant_id = ?1",
            params![participant_id],
            map_progress,
        )
        .optional()?;
    Ok(progress)
}

fn map_progress(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProgressRecord> {
    Ok(ProgressRecord {
        participant_id: row.get(0)?,
        questions_answered: row.get(1)?,
        total_questions: row.get(2)?,
        current_score: row.get(3)?,
        time_remaining: row.get(4)?,
        last_activity: from_sql_time(5, &row.get::<_, String>(5)?)?,
    })
}

/// Delete a store file together with its WAL side files
pub fn remove_store_files(path: &Path) -> std::io::Result<()> {
    std::fs::remove_file(path)?;
    for suffix in ["-wal", "-shm"] {
        let mut side = path.as_os_str().to_owned();
        side.push(suffix);
        match std::fs::remove_file(PathBuf::from(side)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
