//! Outbound replies to the sender of a job.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;
use tracing::info;

use crate::config::SmtpConfig;
use crate::error::MailError;
use crate::intent::strip_commands;
use crate::jobs::{EmailJob, MalformedJob};

/// A reply on the sender's thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub to: String,
    pub subject: String,
    pub body: String,
    /// Message-ID of the email being answered, for threading.
    pub in_reply_to: Option<String>,
}

impl Reply {
    /// Address a reply to the sender of `job`, on the same thread.
    pub fn to_job(job: &EmailJob, body: impl Into<String>) -> Self {
        let in_reply_to = Some(job.message_id.trim())
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        Self {
            to: job.reply_to.clone(),
            subject: reply_subject(&job.original_subject),
            body: body.into(),
            in_reply_to,
        }
    }

    /// Reply for a payload that never decoded. `None` without an address.
    pub fn to_malformed(bad: &MalformedJob, body: impl Into<String>) -> Option<Self> {
        let to = bad.reply_to.clone()?;
        let subject = bad
            .original_subject
            .as_deref()
            .map(reply_subject)
            .unwrap_or_else(|| "Re: your request".to_string());
        Some(Self {
            to,
            subject,
            body: body.into(),
            in_reply_to: bad.message_id.clone(),
        })
    }
}

/// `"Re: "` + subject, unless it already starts with one.
///
/// Command tokens are dropped so a `[plan]` or `[confirm]` does not ride
/// along on every later message of the thread.
pub fn reply_subject(subject: &str) -> String {
    let subject = strip_commands(subject);
    let already = subject
        .get(..3)
        .is_some_and(|head| head.eq_ignore_ascii_case("re:"));
    if already {
        subject
    } else {
        format!("Re: {subject}")
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, reply: &Reply) -> Result<(), MailError>;
}

/// SMTP delivery via lettre.
pub struct SmtpMailer {
    transport: SmtpTransport,
    from_address: String,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, MailError> {
        let creds = Credentials::new(
            config.username.clone(),
            config.password.expose_secret().to_string(),
        );
        let transport = SmtpTransport::relay(&config.host)
            .map_err(|e| MailError::SendFailed(format!("SMTP relay error: {e}")))?
            .port(config.port)
            .credentials(creds)
            .build();
        Ok(Self {
            transport,
            from_address: config.from_address.clone(),
        })
    }

    fn build_message(&self, reply: &Reply) -> Result<Message, MailError> {
        let mut builder = Message::builder()
            .from(self.from_address.parse().map_err(|e: lettre::address::AddressError| {
                MailError::InvalidAddress {
                    address: self.from_address.clone(),
                    reason: e.to_string(),
                }
            })?)
            .to(reply.to.parse().map_err(|e: lettre::address::AddressError| {
                MailError::InvalidAddress {
                    address: reply.to.clone(),
                    reason: e.to_string(),
                }
            })?)
            .subject(reply.subject.clone())
            .header(ContentType::TEXT_PLAIN);

        if let Some(id) = &reply.in_reply_to {
            builder = builder.in_reply_to(id.clone()).references(id.clone());
        }

        builder
            .body(reply.body.clone())
            .map_err(|e| MailError::SendFailed(format!("Failed to build email: {e}")))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, reply: &Reply) -> Result<(), MailError> {
        let email = self.build_message(reply)?;
        let transport = self.transport.clone();

        tokio::task::spawn_blocking(move || transport.send(&email))
            .await
            .map_err(|e| MailError::SendFailed(format!("SMTP task failed: {e}")))?
            .map_err(|e| MailError::SendFailed(format!("SMTP send failed: {e}")))?;

        info!(to = %reply.to, subject = %reply.subject, "Reply sent");
        Ok(())
    }
}

/// Fallback when no SMTP server is configured: replies go to the log.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, reply: &Reply) -> Result<(), MailError> {
        info!(
            to = %reply.to,
            subject = %reply.subject,
            in_reply_to = reply.in_reply_to.as_deref().unwrap_or(""),
            body = %reply.body,
            "Reply (SMTP not configured)"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::*;

    fn mailer() -> SmtpMailer {
        SmtpMailer::new(&SmtpConfig {
            host: "smtp.example.com".into(),
            port: 587,
            username: "agent@example.com".into(),
            password: SecretString::from("hunter2".to_string()),
            from_address: "Mail Agent <agent@example.com>".into(),
        })
        .unwrap()
    }

    #[test]
    fn reply_subject_adds_prefix_once() {
        assert_eq!(reply_subject("Add dark mode"), "Re: Add dark mode");
        assert_eq!(reply_subject("RE: Add dark mode"), "RE: Add dark mode");
        assert_eq!(reply_subject("  re:x "), "re:x");
        assert_eq!(reply_subject("[confirm] Re: Plan"), "Re: Plan");
    }

    #[test]
    fn reply_targets_job_sender() {
        let job = EmailJob::new("abc", "widget", "p", "dev@example.com", "[plan] X", "<m1@x>");
        let reply = Reply::to_job(&job, "hello");
        assert_eq!(reply.to, "dev@example.com");
        assert_eq!(reply.subject, "Re: X");
        assert_eq!(reply.in_reply_to.as_deref(), Some("<m1@x>"));
    }

    #[test]
    fn malformed_reply_needs_an_address() {
        let bad = MalformedJob::salvage("j1", r#"{"replyTo":"dev@example.com"}"#, "broken");
        let reply = Reply::to_malformed(&bad, "sorry").unwrap();
        assert_eq!(reply.to, "dev@example.com");
        assert_eq!(reply.subject, "Re: your request");
        assert_eq!(reply.in_reply_to, None);

        let anonymous = MalformedJob::salvage("j2", "{not json", "broken");
        assert!(Reply::to_malformed(&anonymous, "sorry").is_none());
    }

    #[test]
    fn message_carries_threading_headers() {
        let reply = Reply {
            to: "dev@example.com".into(),
            subject: "Re: X".into(),
            body: "done".into(),
            in_reply_to: Some("<m1@x>".into()),
        };
        let message = mailer().build_message(&reply).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("In-Reply-To: <m1@x>"));
        assert!(raw.contains("References: <m1@x>"));
    }

    #[test]
    fn bad_recipient_is_rejected() {
        let reply = Reply {
            to: "not an address".into(),
            subject: "Re: X".into(),
            body: "done".into(),
            in_reply_to: None,
        };
        assert!(matches!(
            mailer().build_message(&reply),
            Err(MailError::InvalidAddress { .. })
        ));
    }
}
