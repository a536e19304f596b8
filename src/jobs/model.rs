//! Job records as they travel through the pending, retry and dead-letter queues.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A file that arrived with the email and was stored by the intake layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRef {
    pub file_name: String,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// One unit of work created from an inbound email.
///
/// The payload is immutable apart from `retry_count`, which only the retry
/// engine touches and only ever increments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailJob {
    pub id: Uuid,
    pub session_id: String,
    /// Routing target: the project/repository this thread works on.
    pub project: String,
    pub prompt: String,
    pub reply_to: String,
    pub original_subject: String,
    /// Message-ID of the inbound email, used for reply threading.
    pub message_id: String,
    /// Whether the agent should continue its previous context.
    #[serde(default)]
    pub resume_session: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentRef>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub retry_count: u32,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

impl EmailJob {
    /// Build a first-attempt job.
    pub fn new(
        session_id: impl Into<String>,
        project: impl Into<String>,
        prompt: impl Into<String>,
        reply_to: impl Into<String>,
        original_subject: impl Into<String>,
        message_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.into(),
            project: project.into(),
            prompt: prompt.into(),
            reply_to: reply_to.into(),
            original_subject: original_subject.into(),
            message_id: message_id.into(),
            resume_session: false,
            attachments: Vec::new(),
            created_at: Utc::now(),
            retry_count: 0,
        }
    }

    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume_session = resume;
        self
    }

    pub fn with_attachments(mut self, attachments: Vec<AttachmentRef>) -> Self {
        self.attachments = attachments;
        self
    }

    /// Serialize to the queue payload format.
    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a queue payload.
    pub fn from_payload(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

/// A job waiting in the retry queue.
#[derive(Debug, Clone)]
pub struct RetryEnvelope {
    pub job: EmailJob,
    pub due_at: DateTime<Utc>,
    pub last_error: String,
}

/// A job that exhausted its retries (or could not be decoded).
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub job_id: Uuid,
    /// The decoded job, if the payload was well-formed.
    pub job: Option<EmailJob>,
    /// Raw payload as stored.
    pub payload: String,
    pub failed_at: DateTime<Utc>,
    pub last_error: String,
}

/// A pending payload that could not be decoded into an [`EmailJob`].
///
/// Whatever addressing survives in the raw JSON is kept so the sender can
/// still be told.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedJob {
    pub job_id: String,
    pub reply_to: Option<String>,
    pub original_subject: Option<String>,
    pub message_id: Option<String>,
    pub error: String,
}

impl MalformedJob {
    /// Salvage the reply address and thread fields from a raw payload.
    pub fn salvage(job_id: &str, payload: &str, error: impl Into<String>) -> Self {
        let value = serde_json::from_str::<serde_json::Value>(payload).ok();
        let field = |name: &str| {
            value
                .as_ref()
                .and_then(|v| v.get(name))
                .and_then(serde_json::Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Self {
            job_id: job_id.to_string(),
            reply_to: field("replyTo"),
            original_subject: field("originalSubject"),
            message_id: field("messageId"),
            error: error.into(),
        }
    }
}

/// Sizes of the three queues.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: u64,
    pub retry: u64,
    pub dead: u64,
}
