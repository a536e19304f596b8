//! Error types for the mail agent.
//!
//! Everything that can fail inside a job is funnelled into [`Error`]. The
//! worker treats every variant as transient except [`Error::Permanent`],
//! which is reported to the sender and never retried.

use std::time::Duration;

use uuid::Uuid;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Git error: {0}")]
    Git(#[from] GitError),

    #[error("Mail error: {0}")]
    Mail(#[from] MailError),

    #[error("{0}")]
    Permanent(#[from] PermanentError),
}

impl Error {
    /// Whether the failure must not be retried.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }
}

/// Failures that retrying cannot fix.
#[derive(Debug, thiserror::Error)]
pub enum PermanentError {
    #[error("No pull request exists yet for this thread, so there is nothing to {command}.")]
    NoPullRequest { command: String },

    #[error("Malformed job payload: {0}")]
    MalformedJob(String),

    #[error("Unknown project '{0}'")]
    UnknownProject(String),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Queue-related errors.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Dead letter for job {id} not found")]
    DeadLetterNotFound { id: Uuid },

    #[error("Failed to encode job {id}: {reason}")]
    Encode { id: Uuid, reason: String },

    #[error("Store error: {0}")]
    Store(#[from] DatabaseError),
}

/// External coding agent errors.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Failed to start agent: {0}")]
    Spawn(String),

    #[error("Agent run failed: {0}")]
    RunFailed(String),

    #[error("Agent timed out after {0:?}")]
    Timeout(Duration),

    #[error("Agent stream ended without a result")]
    NoResult,
}

/// Version control / pull request collaborator errors.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("Command `{command}` failed: {reason}")]
    CommandFailed { command: String, reason: String },

    #[error("Could not parse output of `{command}`: {reason}")]
    Parse { command: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outbound mail errors.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to send mail: {0}")]
    SendFailed(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_permanent_variant_is_permanent() {
        let permanent: Error = PermanentError::NoPullRequest {
            command: "merge".into(),
        }
        .into();
        assert!(permanent.is_permanent());

        let transient: Error = AgentError::RunFailed("boom".into()).into();
        assert!(!transient.is_permanent());

        let db: Error = DatabaseError::Query("locked".into()).into();
        assert!(!db.is_permanent());
    }

    #[test]
    fn no_pull_request_message_is_plain_language() {
        let err = PermanentError::NoPullRequest {
            command: "merge".into(),
        };
        assert_eq!(
            err.to_string(),
            "No pull request exists yet for this thread, so there is nothing to merge."
        );
    }
}
