//! Session manager: resolves the session for a job and persists changes.
//!
//! Read-modify-write on a session is not locked. Two workers processing
//! jobs of the same session concurrently race and the last `save` wins;
//! route each session to a single worker to avoid it.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::jobs::EmailJob;
use crate::session::model::{MessageRole, Session, SessionMessage};
use crate::store::Database;

pub struct SessionManager {
    db: Arc<dyn Database>,
}

impl SessionManager {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Load the job's session, creating it in `Normal` mode on first contact.
    /// Existing sessions get their `last_activity` bumped.
    pub async fn load_or_create(&self, job: &EmailJob) -> Result<Session, DatabaseError> {
        if let Some(mut session) = self.db.get_session(&job.session_id).await? {
            session.last_activity = Utc::now();
            self.db
                .touch_session(&session.id, session.last_activity)
                .await?;
            debug!(session_id = %session.id, mode = %session.mode, "Session resolved");
            return Ok(session);
        }

        let session = Session::new(&job.session_id, &job.project);
        if self.db.insert_session(&session).await? {
            info!(
                session_id = %session.id,
                project = %session.project,
                branch = %session.branch_name,
                "Session created"
            );
            return Ok(session);
        }

        // Lost a creation race; use the stored row.
        self.db
            .get_session(&job.session_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "session".into(),
                id: job.session_id.clone(),
            })
    }

    pub async fn get(&self, id: &str) -> Result<Option<Session>, DatabaseError> {
        self.db.get_session(id).await
    }

    /// Persist a mutated session.
    pub async fn save(&self, session: &mut Session) -> Result<(), DatabaseError> {
        session.last_activity = Utc::now();
        self.db.update_session(session).await
    }

    /// Append to the session's conversation log.
    pub async fn record(
        &self,
        session_id: &str,
        role: MessageRole,
        content: &str,
    ) -> Result<(), DatabaseError> {
        self.db.add_session_message(session_id, role, content).await
    }

    /// Full conversation log, oldest first.
    pub async fn history(&self, session_id: &str) -> Result<Vec<SessionMessage>, DatabaseError> {
        self.db.list_session_messages(session_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::model::{SessionMode, subject_hash};
    use crate::store::LibSqlBackend;

    async fn manager() -> SessionManager {
        SessionManager::new(Arc::new(LibSqlBackend::new_memory().await.unwrap()))
    }

    fn job_for(subject: &str) -> EmailJob {
        EmailJob::new(subject_hash(subject), "widget", "prompt", "a@b.c", subject, "<m>")
    }

    #[tokio::test]
    async fn first_message_creates_normal_session() {
        let sessions = manager().await;
        let session = sessions.load_or_create(&job_for("Add dark mode")).await.unwrap();
        assert_eq!(session.mode, SessionMode::Normal);
        assert_eq!(session.project, "widget");
        assert_eq!(session.id, subject_hash("Add dark mode"));
    }

    #[tokio::test]
    async fn reply_reuses_session_and_bumps_activity() {
        let sessions = manager().await;
        let mut first = sessions.load_or_create(&job_for("Add dark mode")).await.unwrap();
        first.pr_number = Some(7);
        sessions.save(&mut first).await.unwrap();

        let again = sessions
            .load_or_create(&job_for("Re: Add dark mode"))
            .await
            .unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(again.pr_number, Some(7));
        assert!(again.last_activity >= first.last_activity);
        assert_eq!(again.created_at, first.created_at);
    }

    #[tokio::test]
    async fn history_round_trip() {
        let sessions = manager().await;
        let session = sessions.load_or_create(&job_for("Add dark mode")).await.unwrap();
        sessions.record(&session.id, MessageRole::User, "please").await.unwrap();
        sessions.record(&session.id, MessageRole::Agent, "done").await.unwrap();

        let history = sessions.history(&session.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, MessageRole::User);
    }
}
