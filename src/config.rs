//! Configuration types, built from environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;

use crate::error::{ConfigError, PermanentError};

/// Default prefix shared by the pending, retry and dead-letter queues.
pub const DEFAULT_QUEUE_PREFIX: &str = "mail-agent";

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("could not parse '{raw}'"),
        }),
        Err(_) => Ok(default),
    }
}

/// Queue and store settings.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Path of the libSQL database file.
    pub db_path: PathBuf,
    /// Prefix scoping the three queue names.
    pub prefix: String,
    /// How long one blocking dequeue waits before re-checking for shutdown.
    pub poll_timeout: Duration,
    /// Interval of the retry promoter.
    pub promote_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/mail-agent.db"),
            prefix: DEFAULT_QUEUE_PREFIX.to_string(),
            poll_timeout: Duration::from_secs(5),
            promote_interval: Duration::from_secs(1),
        }
    }
}

impl QueueConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            db_path: std::env::var("MAIL_AGENT_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            prefix: env_or("MAIL_AGENT_QUEUE_PREFIX", DEFAULT_QUEUE_PREFIX),
            poll_timeout: Duration::from_secs(env_parse("MAIL_AGENT_POLL_TIMEOUT_SECS", 5)?),
            promote_interval: Duration::from_secs(env_parse(
                "MAIL_AGENT_PROMOTE_INTERVAL_SECS",
                1,
            )?),
        })
    }
}

/// Worker settings: where projects live and how the agent is driven.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Directory containing one checkout per routable project.
    pub projects_dir: PathBuf,
    /// Command line used to launch the external coding agent.
    pub agent_command: String,
    /// Upper bound for a single agent run.
    pub agent_timeout: Duration,
    /// Base URL used to build pull request links in replies.
    pub pr_url_base: Option<String>,
    /// Branch pull requests are opened against.
    pub base_branch: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            projects_dir: PathBuf::from("./projects"),
            agent_command: "coding-agent".to_string(),
            agent_timeout: Duration::from_secs(30 * 60),
            pr_url_base: None,
            base_branch: "main".to_string(),
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            projects_dir: std::env::var("MAIL_AGENT_PROJECTS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.projects_dir),
            agent_command: env_or("MAIL_AGENT_AGENT_CMD", &defaults.agent_command),
            agent_timeout: Duration::from_secs(env_parse(
                "MAIL_AGENT_AGENT_TIMEOUT_SECS",
                defaults.agent_timeout.as_secs(),
            )?),
            pr_url_base: std::env::var("MAIL_AGENT_PR_URL_BASE").ok(),
            base_branch: env_or("MAIL_AGENT_BASE_BRANCH", &defaults.base_branch),
        })
    }

    /// Resolve the working directory for a project name.
    ///
    /// Names must be a single path component.
    pub fn project_dir(&self, project: &str) -> Result<PathBuf, PermanentError> {
        let trimmed = project.trim();
        let single_component = !trimmed.is_empty()
            && Path::new(trimmed).components().count() == 1
            && !trimmed.contains(['/', '\\'])
            && trimmed != "."
            && trimmed != "..";
        if !single_component {
            return Err(PermanentError::UnknownProject(project.to_string()));
        }
        Ok(self.projects_dir.join(trimmed))
    }
}

/// Outbound SMTP settings. `None` from [`SmtpConfig::from_env`] means replies
/// are logged instead of sent.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
}

impl SmtpConfig {
    /// Returns `Ok(None)` if `MAIL_AGENT_SMTP_HOST` is not set.
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let Ok(host) = std::env::var("MAIL_AGENT_SMTP_HOST") else {
            return Ok(None);
        };
        let username = env_or("MAIL_AGENT_SMTP_USERNAME", "");
        let from_address = match std::env::var("MAIL_AGENT_SMTP_FROM") {
            Ok(from) => from,
            Err(_) if !username.is_empty() => username.clone(),
            Err(_) => return Err(ConfigError::MissingEnvVar("MAIL_AGENT_SMTP_FROM".into())),
        };
        Ok(Some(Self {
            host,
            port: env_parse("MAIL_AGENT_SMTP_PORT", 587)?,
            username,
            password: SecretString::from(env_or("MAIL_AGENT_SMTP_PASSWORD", "")),
            from_address,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_dir_joins_single_component() {
        let config = WorkerConfig {
            projects_dir: PathBuf::from("/srv/projects"),
            ..WorkerConfig::default()
        };
        assert_eq!(
            config.project_dir("widget").unwrap(),
            PathBuf::from("/srv/projects/widget")
        );
    }

    #[test]
    fn project_dir_rejects_traversal() {
        let config = WorkerConfig::default();
        for bad in ["", "..", "a/b", "../etc", "."] {
            assert!(config.project_dir(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn queue_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.prefix, "mail-agent");
        assert_eq!(config.promote_interval, Duration::from_secs(1));
    }
}
