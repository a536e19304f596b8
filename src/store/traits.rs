//! Unified `Database` trait: single async interface for sessions, the
//! conversation log, and the three job queues.
//!
//! Queue primitives are deliberately small and individually atomic
//! (`pop_job` and `remove_retry` are single statements). The retry engine in
//! `crate::jobs` composes them; no multi-statement transaction is assumed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::session::model::{MessageRole, Session, SessionMessage};

/// A payload popped from a pending queue.
#[derive(Debug, Clone)]
pub struct StoredJob {
    pub seq: i64,
    pub job_id: String,
    pub payload: String,
}

/// A row of the retry queue.
#[derive(Debug, Clone)]
pub struct StoredRetry {
    pub seq: i64,
    pub job_id: String,
    pub payload: String,
    /// Due time in Unix milliseconds.
    pub due_at_ms: i64,
    pub last_error: String,
}

/// A row of the dead-letter queue.
#[derive(Debug, Clone)]
pub struct StoredDeadLetter {
    pub seq: i64,
    pub job_id: String,
    pub payload: String,
    pub failed_at: DateTime<Utc>,
    pub last_error: String,
}

/// Backend-agnostic database trait.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Sessions ────────────────────────────────────────────────────

    /// Get a session by ID.
    async fn get_session(&self, id: &str) -> Result<Option<Session>, DatabaseError>;

    /// Insert a session unless one with the same ID exists.
    /// Returns `true` if the row was created.
    async fn insert_session(&self, session: &Session) -> Result<bool, DatabaseError>;

    /// Overwrite the mutable fields of a session.
    async fn update_session(&self, session: &Session) -> Result<(), DatabaseError>;

    /// Bump `last_activity`.
    async fn touch_session(&self, id: &str, at: DateTime<Utc>) -> Result<(), DatabaseError>;

    // ── Conversation log ────────────────────────────────────────────

    /// Append a message to a session's log.
    async fn add_session_message(
        &self,
        session_id: &str,
        role: MessageRole,
        content: &str,
    ) -> Result<(), DatabaseError>;

    /// All messages of a session, oldest first.
    async fn list_session_messages(
        &self,
        session_id: &str,
    ) -> Result<Vec<SessionMessage>, DatabaseError>;

    // ── Pending queue ───────────────────────────────────────────────

    /// Append a payload to the tail of a pending queue.
    async fn push_job(&self, queue: &str, job_id: &str, payload: &str)
    -> Result<(), DatabaseError>;

    /// Atomically remove and return the head of a pending queue.
    async fn pop_job(&self, queue: &str) -> Result<Option<StoredJob>, DatabaseError>;

    // ── Retry queue ─────────────────────────────────────────────────

    /// Insert a payload into a retry queue, due at `due_at_ms`.
    async fn insert_retry(
        &self,
        queue: &str,
        job_id: &str,
        payload: &str,
        due_at_ms: i64,
        last_error: &str,
    ) -> Result<(), DatabaseError>;

    /// Entries due at or before `now_ms`, earliest first.
    async fn due_retries(
        &self,
        queue: &str,
        now_ms: i64,
        limit: usize,
    ) -> Result<Vec<StoredRetry>, DatabaseError>;

    /// All entries of a retry queue, earliest first.
    async fn list_retries(&self, queue: &str) -> Result<Vec<StoredRetry>, DatabaseError>;

    /// Remove one retry entry. Returns `false` if someone else removed it first.
    async fn remove_retry(&self, queue: &str, seq: i64) -> Result<bool, DatabaseError>;

    // ── Dead-letter queue ───────────────────────────────────────────

    /// Record a permanently failed payload.
    async fn insert_dead_letter(
        &self,
        queue: &str,
        job_id: &str,
        payload: &str,
        failed_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<(), DatabaseError>;

    /// Most recent dead letters first, up to `limit`.
    async fn list_dead_letters(
        &self,
        queue: &str,
        limit: usize,
    ) -> Result<Vec<StoredDeadLetter>, DatabaseError>;

    /// Remove and return the newest dead letter for a job.
    async fn take_dead_letter(
        &self,
        queue: &str,
        job_id: &str,
    ) -> Result<Option<StoredDeadLetter>, DatabaseError>;

    // ── Stats ───────────────────────────────────────────────────────

    /// Number of rows in a queue. `kind` is `pending`, `retry` or `dead`.
    async fn queue_len(&self, queue: &str, kind: QueueKind) -> Result<u64, DatabaseError>;
}

/// Which of the three queue tables a name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    Pending,
    Retry,
    Dead,
}

impl QueueKind {
    pub(crate) fn table(&self) -> &'static str {
        match self {
            Self::Pending => "queue_pending",
            Self::Retry => "queue_retry",
            Self::Dead => "queue_dead",
        }
    }
}
