//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. A single connection is
//! reused for all operations.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::session::model::{MessageRole, Session, SessionMessage, SessionMode};
use crate::store::migrations;
use crate::store::traits::{
    Database, QueueKind, StoredDeadLetter, StoredJob, StoredRetry,
};

/// libSQL database backend.
///
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn opt_int(n: Option<u64>) -> libsql::Value {
    match n {
        Some(n) => libsql::Value::Integer(n as i64),
        None => libsql::Value::Null,
    }
}

const SESSION_COLUMNS: &str = "id, subject_hash, project, branch_name, agent_session_id, pr_number, mode, pending_plan, created_at, last_activity";

/// Map a libsql Row to a Session. Column order matches SESSION_COLUMNS.
fn row_to_session(row: &libsql::Row) -> Result<Session, DatabaseError> {
    let parse = |e: libsql::Error| DatabaseError::Query(format!("session row parse: {e}"));
    let mode_str: String = row.get(6).map_err(parse)?;
    let created_str: String = row.get(8).map_err(parse)?;
    let activity_str: String = row.get(9).map_err(parse)?;

    Ok(Session {
        id: row.get(0).map_err(parse)?,
        subject_hash: row.get(1).map_err(parse)?,
        project: row.get(2).map_err(parse)?,
        branch_name: row.get(3).map_err(parse)?,
        agent_session_id: row.get::<String>(4).ok(),
        pr_number: row.get::<i64>(5).ok().map(|n| n as u64),
        mode: mode_str.parse().map_err(DatabaseError::Serialization)?,
        pending_plan: row.get::<String>(7).ok(),
        created_at: parse_datetime(&created_str),
        last_activity: parse_datetime(&activity_str),
    })
}

fn row_to_retry(row: &libsql::Row) -> Result<StoredRetry, libsql::Error> {
    Ok(StoredRetry {
        seq: row.get(0)?,
        job_id: row.get(1)?,
        payload: row.get(2)?,
        due_at_ms: row.get(3)?,
        last_error: row.get::<String>(4).unwrap_or_default(),
    })
}

fn row_to_dead_letter(row: &libsql::Row) -> Result<StoredDeadLetter, libsql::Error> {
    let failed_str: String = row.get(3)?;
    Ok(StoredDeadLetter {
        seq: row.get(0)?,
        job_id: row.get(1)?,
        payload: row.get(2)?,
        failed_at: parse_datetime(&failed_str),
        last_error: row.get::<String>(4).unwrap_or_default(),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Sessions ────────────────────────────────────────────────────

    async fn get_session(&self, id: &str) -> Result<Option<Session>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_session: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_session(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_session: {e}"))),
        }
    }

    async fn insert_session(&self, session: &Session) -> Result<bool, DatabaseError> {
        let inserted = self
            .conn()
            .execute(
                &format!(
                    "INSERT OR IGNORE INTO sessions ({SESSION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    session.id.as_str(),
                    session.subject_hash.as_str(),
                    session.project.as_str(),
                    session.branch_name.as_str(),
                    opt_text(session.agent_session_id.as_deref()),
                    opt_int(session.pr_number),
                    session.mode.as_str(),
                    opt_text(session.pending_plan.as_deref()),
                    session.created_at.to_rfc3339(),
                    session.last_activity.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_session: {e}")))?;

        debug!(session_id = %session.id, created = inserted > 0, "Session insert");
        Ok(inserted > 0)
    }

    async fn update_session(&self, session: &Session) -> Result<(), DatabaseError> {
        let updated = self
            .conn()
            .execute(
                "UPDATE sessions SET project = ?2, agent_session_id = ?3, pr_number = ?4,
                     mode = ?5, pending_plan = ?6, last_activity = ?7
                 WHERE id = ?1",
                params![
                    session.id.as_str(),
                    session.project.as_str(),
                    opt_text(session.agent_session_id.as_deref()),
                    opt_int(session.pr_number),
                    session.mode.as_str(),
                    opt_text(session.pending_plan.as_deref()),
                    session.last_activity.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_session: {e}")))?;

        if updated == 0 {
            return Err(DatabaseError::NotFound {
                entity: "session".into(),
                id: session.id.clone(),
            });
        }
        Ok(())
    }

    async fn touch_session(&self, id: &str, at: DateTime<Utc>) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE sessions SET last_activity = ?2 WHERE id = ?1",
                params![id, at.to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("touch_session: {e}")))?;
        Ok(())
    }

    // ── Conversation log ────────────────────────────────────────────

    async fn add_session_message(
        &self,
        session_id: &str,
        role: MessageRole,
        content: &str,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO session_messages (session_id, role, content, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![session_id, role.as_str(), content, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("add_session_message: {e}")))?;
        Ok(())
    }

    async fn list_session_messages(
        &self,
        session_id: &str,
    ) -> Result<Vec<SessionMessage>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT session_id, role, content, created_at FROM session_messages
                 WHERE session_id = ?1 ORDER BY seq ASC",
                params![session_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_session_messages: {e}")))?;

        let mut messages = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_session_messages: {e}")))?
        {
            let role_str: String = row.get(1).unwrap_or_default();
            let created_str: String = row.get(3).unwrap_or_default();
            messages.push(SessionMessage {
                session_id: row.get(0).unwrap_or_default(),
                role: role_str.parse().map_err(DatabaseError::Serialization)?,
                content: row.get(2).unwrap_or_default(),
                created_at: parse_datetime(&created_str),
            });
        }
        Ok(messages)
    }

    // ── Pending queue ───────────────────────────────────────────────

    async fn push_job(
        &self,
        queue: &str,
        job_id: &str,
        payload: &str,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO queue_pending (name, job_id, payload, enqueued_at) VALUES (?1, ?2, ?3, ?4)",
                params![queue, job_id, payload, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("push_job: {e}")))?;
        Ok(())
    }

    async fn pop_job(&self, queue: &str) -> Result<Option<StoredJob>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "DELETE FROM queue_pending
                 WHERE seq = (SELECT seq FROM queue_pending WHERE name = ?1 ORDER BY seq LIMIT 1)
                 RETURNING seq, job_id, payload",
                params![queue],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("pop_job: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let parse = |e: libsql::Error| DatabaseError::Query(format!("pop_job row: {e}"));
                Ok(Some(StoredJob {
                    seq: row.get(0).map_err(parse)?,
                    job_id: row.get(1).map_err(parse)?,
                    payload: row.get(2).map_err(parse)?,
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("pop_job: {e}"))),
        }
    }

    // ── Retry queue ─────────────────────────────────────────────────

    async fn insert_retry(
        &self,
        queue: &str,
        job_id: &str,
        payload: &str,
        due_at_ms: i64,
        last_error: &str,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO queue_retry (name, job_id, payload, due_at, last_error) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![queue, job_id, payload, due_at_ms, last_error],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_retry: {e}")))?;
        Ok(())
    }

    async fn due_retries(
        &self,
        queue: &str,
        now_ms: i64,
        limit: usize,
    ) -> Result<Vec<StoredRetry>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT seq, job_id, payload, due_at, last_error FROM queue_retry
                 WHERE name = ?1 AND due_at <= ?2 ORDER BY due_at ASC, seq ASC LIMIT ?3",
                params![queue, now_ms, limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("due_retries: {e}")))?;

        let mut entries = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("due_retries: {e}")))?
        {
            entries.push(
                row_to_retry(&row)
                    .map_err(|e| DatabaseError::Query(format!("due_retries row: {e}")))?,
            );
        }
        Ok(entries)
    }

    async fn list_retries(&self, queue: &str) -> Result<Vec<StoredRetry>, DatabaseError> {
        self.due_retries(queue, i64::MAX, usize::MAX >> 1).await
    }

    async fn remove_retry(&self, queue: &str, seq: i64) -> Result<bool, DatabaseError> {
        let removed = self
            .conn()
            .execute(
                "DELETE FROM queue_retry WHERE name = ?1 AND seq = ?2",
                params![queue, seq],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("remove_retry: {e}")))?;
        Ok(removed > 0)
    }

    // ── Dead-letter queue ───────────────────────────────────────────

    async fn insert_dead_letter(
        &self,
        queue: &str,
        job_id: &str,
        payload: &str,
        failed_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO queue_dead (name, job_id, payload, failed_at, last_error) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![queue, job_id, payload, failed_at.to_rfc3339(), last_error],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_dead_letter: {e}")))?;
        Ok(())
    }

    async fn list_dead_letters(
        &self,
        queue: &str,
        limit: usize,
    ) -> Result<Vec<StoredDeadLetter>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT seq, job_id, payload, failed_at, last_error FROM queue_dead
                 WHERE name = ?1 ORDER BY seq DESC LIMIT ?2",
                params![queue, limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_dead_letters: {e}")))?;

        let mut letters = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_dead_letters: {e}")))?
        {
            letters.push(
                row_to_dead_letter(&row)
                    .map_err(|e| DatabaseError::Query(format!("list_dead_letters row: {e}")))?,
            );
        }
        Ok(letters)
    }

    async fn take_dead_letter(
        &self,
        queue: &str,
        job_id: &str,
    ) -> Result<Option<StoredDeadLetter>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "DELETE FROM queue_dead
                 WHERE seq = (SELECT seq FROM queue_dead WHERE name = ?1 AND job_id = ?2
                              ORDER BY seq DESC LIMIT 1)
                 RETURNING seq, job_id, payload, failed_at, last_error",
                params![queue, job_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("take_dead_letter: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_dead_letter(&row).map_err(|e| {
                DatabaseError::Query(format!("take_dead_letter row: {e}"))
            })?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("take_dead_letter: {e}"))),
        }
    }

    // ── Stats ───────────────────────────────────────────────────────

    async fn queue_len(&self, queue: &str, kind: QueueKind) -> Result<u64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT COUNT(*) FROM {} WHERE name = ?1", kind.table()),
                params![queue],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("queue_len: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0) as u64),
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("queue_len: {e}"))),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    // ── Session tests ───────────────────────────────────────────────

    #[tokio::test]
    async fn insert_and_get_session() {
        let db = test_db().await;
        let session = Session::new("0123456789ab", "widget");

        assert!(db.insert_session(&session).await.unwrap());
        let fetched = db.get_session("0123456789ab").await.unwrap().unwrap();
        assert_eq!(fetched.project, "widget");
        assert_eq!(fetched.branch_name, "mail-agent/01234567");
        assert_eq!(fetched.mode, SessionMode::Normal);
        assert!(fetched.pr_number.is_none());
        assert!(fetched.agent_session_id.is_none());
    }

    #[tokio::test]
    async fn insert_session_is_idempotent() {
        let db = test_db().await;
        let session = Session::new("abc", "widget");
        assert!(db.insert_session(&session).await.unwrap());
        assert!(!db.insert_session(&session).await.unwrap());
    }

    #[tokio::test]
    async fn get_session_not_found() {
        let db = test_db().await;
        assert!(db.get_session("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_session_persists_plan_and_pr() {
        let db = test_db().await;
        let mut session = Session::new("abc", "widget");
        db.insert_session(&session).await.unwrap();

        session.set_pending_plan("1. do the thing");
        session.pr_number = Some(42);
        session.agent_session_id = Some("agent-xyz".into());
        db.update_session(&session).await.unwrap();

        let fetched = db.get_session("abc").await.unwrap().unwrap();
        assert_eq!(fetched.mode, SessionMode::PlanPending);
        assert_eq!(fetched.pending_plan.as_deref(), Some("1. do the thing"));
        assert_eq!(fetched.pr_number, Some(42));
        assert_eq!(fetched.agent_session_id.as_deref(), Some("agent-xyz"));

        session.clear_plan();
        db.update_session(&session).await.unwrap();
        let fetched = db.get_session("abc").await.unwrap().unwrap();
        assert_eq!(fetched.mode, SessionMode::Normal);
        assert!(fetched.pending_plan.is_none());
    }

    #[tokio::test]
    async fn update_missing_session_errors() {
        let db = test_db().await;
        let err = db.update_session(&Session::new("nope", "widget")).await;
        assert!(matches!(err, Err(DatabaseError::NotFound { .. })));
    }

    #[tokio::test]
    async fn session_messages_keep_order() {
        let db = test_db().await;
        db.insert_session(&Session::new("abc", "widget")).await.unwrap();

        db.add_session_message("abc", MessageRole::User, "first").await.unwrap();
        db.add_session_message("abc", MessageRole::Agent, "second").await.unwrap();
        db.add_session_message("abc", MessageRole::User, "third").await.unwrap();

        let messages = db.list_session_messages("abc").await.unwrap();
        let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
        assert_eq!(messages[1].role, MessageRole::Agent);
    }

    // ── Queue tests ─────────────────────────────────────────────────

    #[tokio::test]
    async fn pending_queue_is_fifo() {
        let db = test_db().await;
        db.push_job("q:pending", "a", "{a}").await.unwrap();
        db.push_job("q:pending", "b", "{b}").await.unwrap();

        assert_eq!(db.pop_job("q:pending").await.unwrap().unwrap().job_id, "a");
        assert_eq!(db.pop_job("q:pending").await.unwrap().unwrap().job_id, "b");
        assert!(db.pop_job("q:pending").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn queues_are_scoped_by_name() {
        let db = test_db().await;
        db.push_job("one:pending", "a", "{}").await.unwrap();
        assert!(db.pop_job("two:pending").await.unwrap().is_none());
        assert_eq!(db.queue_len("one:pending", QueueKind::Pending).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn due_retries_ordered_and_filtered() {
        let db = test_db().await;
        db.insert_retry("q:retry", "late", "{}", 3_000, "e").await.unwrap();
        db.insert_retry("q:retry", "early", "{}", 1_000, "e").await.unwrap();
        db.insert_retry("q:retry", "future", "{}", 9_000, "e").await.unwrap();

        let due = db.due_retries("q:retry", 3_000, 100).await.unwrap();
        let ids: Vec<_> = due.iter().map(|r| r.job_id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late"]);

        assert!(db.remove_retry("q:retry", due[0].seq).await.unwrap());
        assert!(!db.remove_retry("q:retry", due[0].seq).await.unwrap());
        assert_eq!(db.list_retries("q:retry").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn dead_letters_list_and_take() {
        let db = test_db().await;
        db.insert_dead_letter("q:dead", "a", "{a}", Utc::now(), "boom").await.unwrap();
        db.insert_dead_letter("q:dead", "b", "{b}", Utc::now(), "bang").await.unwrap();

        let letters = db.list_dead_letters("q:dead", 10).await.unwrap();
        assert_eq!(letters.len(), 2);
        assert_eq!(letters[0].job_id, "b");

        let taken = db.take_dead_letter("q:dead", "a").await.unwrap().unwrap();
        assert_eq!(taken.last_error, "boom");
        assert!(db.take_dead_letter("q:dead", "a").await.unwrap().is_none());
        assert_eq!(db.queue_len("q:dead", QueueKind::Dead).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn open_local_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("mail-agent.db");
        let db = LibSqlBackend::new_local(&path).await.unwrap();
        db.push_job("q:pending", "a", "{}").await.unwrap();
        assert!(path.exists());
    }
}
