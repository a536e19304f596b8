//! Application context: every shared component, built once at startup and
//! handed to constructors.

use std::sync::Arc;

use crate::agent::CodingAgent;
use crate::config::{QueueConfig, WorkerConfig};
use crate::git::PullRequestHost;
use crate::jobs::JobQueue;
use crate::mailer::Mailer;
use crate::session::SessionManager;
use crate::store::Database;

#[derive(Clone)]
pub struct AppContext {
    pub db: Arc<dyn Database>,
    pub queue: Arc<JobQueue>,
    pub sessions: Arc<SessionManager>,
    pub agent: Arc<dyn CodingAgent>,
    pub git: Arc<dyn PullRequestHost>,
    pub mailer: Arc<dyn Mailer>,
    pub queue_config: QueueConfig,
    pub worker_config: WorkerConfig,
}

impl AppContext {
    /// Wire the queue and session manager over `db` and attach the
    /// collaborators.
    pub fn new(
        db: Arc<dyn Database>,
        agent: Arc<dyn CodingAgent>,
        git: Arc<dyn PullRequestHost>,
        mailer: Arc<dyn Mailer>,
        queue_config: QueueConfig,
        worker_config: WorkerConfig,
    ) -> Self {
        let queue = Arc::new(JobQueue::new(Arc::clone(&db), &queue_config.prefix));
        let sessions = Arc::new(SessionManager::new(Arc::clone(&db)));
        Self {
            db,
            queue,
            sessions,
            agent,
            git,
            mailer,
            queue_config,
            worker_config,
        }
    }
}
