//! Session records, the conversation log, and subject-derived identifiers.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::intent::Command;

/// Length of the hex session key derived from a subject.
pub const SESSION_KEY_LEN: usize = 12;

/// Prefix of every branch the agent works on.
pub const BRANCH_PREFIX: &str = "mail-agent/";

/// Reply/forward markers stripped from the front of a subject.
const SUBJECT_PREFIXES: &[&str] = &["re:", "fwd:", "fw:"];

/// Normalize a subject for session matching.
///
/// Lower-cases, drops bracketed control commands and strips any number of
/// leading `Re:`/`Fwd:`/`Fw:` markers and surrounding whitespace. Inner
/// whitespace is kept as sent, apart from the gap a removed command leaves.
pub fn normalize_subject(subject: &str) -> String {
    let mut text = subject.to_lowercase();
    for command in Command::ALL {
        while let Some((before, after)) = text.split_once(command.token()) {
            let (before, after) = (before.trim_end(), after.trim_start());
            text = if before.is_empty() || after.is_empty() {
                format!("{before}{after}")
            } else {
                format!("{before} {after}")
            };
        }
    }

    let mut rest = text.trim();
    loop {
        let stripped = SUBJECT_PREFIXES
            .iter()
            .find_map(|prefix| rest.strip_prefix(prefix));
        match stripped {
            Some(after) => rest = after.trim_start(),
            None => break,
        }
    }

    rest.trim_end().to_string()
}

/// Session key for a subject: first 12 hex chars of SHA-256 over the
/// normalized subject. Collisions are tolerated.
pub fn subject_hash(subject: &str) -> String {
    let digest = Sha256::digest(normalize_subject(subject).as_bytes());
    let mut key = hex::encode(digest);
    key.truncate(SESSION_KEY_LEN);
    key
}

/// Branch the agent commits to for a session.
pub fn branch_name(session_id: &str) -> String {
    let short: String = session_id.chars().take(8).collect();
    format!("{BRANCH_PREFIX}{short}")
}

/// Plan-mode state of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    #[default]
    Normal,
    PlanPending,
}

impl SessionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::PlanPending => "plan_pending",
        }
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Self::Normal),
            "plan_pending" => Ok(Self::PlanPending),
            other => Err(format!("unknown session mode '{other}'")),
        }
    }
}

/// One email conversation thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub subject_hash: String,
    pub project: String,
    pub branch_name: String,
    /// Continuation token of the external agent.
    pub agent_session_id: Option<String>,
    pub pr_number: Option<u64>,
    pub mode: SessionMode,
    /// Present only while `mode` is `PlanPending`.
    pub pending_plan: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    /// A fresh session in `Normal` mode.
    pub fn new(id: impl Into<String>, project: impl Into<String>) -> Self {
        let id = id.into();
        let now = Utc::now();
        Self {
            subject_hash: id.clone(),
            branch_name: branch_name(&id),
            id,
            project: project.into(),
            agent_session_id: None,
            pr_number: None,
            mode: SessionMode::Normal,
            pending_plan: None,
            created_at: now,
            last_activity: now,
        }
    }

    pub fn is_plan_pending(&self) -> bool {
        self.mode == SessionMode::PlanPending
    }

    /// Enter plan mode holding `plan`.
    pub fn set_pending_plan(&mut self, plan: impl Into<String>) {
        self.mode = SessionMode::PlanPending;
        self.pending_plan = Some(plan.into());
    }

    /// Leave plan mode, dropping any stored plan.
    pub fn clear_plan(&mut self) {
        self.mode = SessionMode::Normal;
        self.pending_plan = None;
    }
}

/// Author of a logged message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Agent,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
        }
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "agent" => Ok(Self::Agent),
            other => Err(format!("unknown message role '{other}'")),
        }
    }
}

/// Append-only conversation log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMessage {
    pub session_id: String,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Render a conversation log as plain text context for the agent.
pub fn render_history(messages: &[SessionMessage]) -> String {
    messages
        .iter()
        .map(|m| {
            let who = match m.role {
                MessageRole::User => "User",
                MessageRole::Agent => "Agent",
            };
            format!("[{who}]\n{}", m.content.trim())
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_prefix_insensitive() {
        let base = subject_hash("Widget fix");
        assert_eq!(base, subject_hash("Re: Widget fix"));
        assert_eq!(base, subject_hash("FWD:  widget fix "));
        assert_eq!(base, subject_hash("Re: Fw: RE: widget fix"));
        assert_eq!(base.len(), SESSION_KEY_LEN);
        assert!(base.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn hash_is_idempotent() {
        assert_eq!(subject_hash("Add dark mode"), subject_hash("Add dark mode"));
        assert_ne!(subject_hash("Add dark mode"), subject_hash("Add light mode"));
    }

    #[test]
    fn hash_ignores_control_commands() {
        let base = subject_hash("Add dark mode");
        assert_eq!(base, subject_hash("[plan] Add dark mode"));
        assert_eq!(base, subject_hash("[CONFIRM] Re: [plan] Add dark mode"));
        assert_eq!(base, subject_hash("Re: Add dark mode [merge]"));
    }

    #[test]
    fn hash_keeps_inner_whitespace() {
        let expected = &hex::encode(Sha256::digest(b"widget  fix"))[..SESSION_KEY_LEN];
        assert_eq!(subject_hash("Re:  Widget  fix "), expected);
        assert_ne!(subject_hash("Widget  fix"), subject_hash("Widget fix"));
        assert_eq!(normalize_subject("Add [plan]  dark mode"), "add dark mode");
    }

    #[test]
    fn prefix_only_stripped_at_start() {
        assert_eq!(normalize_subject("Fix re: handling"), "fix re: handling");
    }

    #[test]
    fn branch_uses_first_eight_chars() {
        assert_eq!(branch_name("0123456789ab"), "mail-agent/01234567");
        let session = Session::new("0123456789ab", "widget");
        assert_eq!(session.branch_name, "mail-agent/01234567");
        assert_eq!(session.mode, SessionMode::Normal);
    }

    #[test]
    fn plan_helpers_keep_mode_and_plan_in_step() {
        let mut session = Session::new("abc", "widget");
        session.set_pending_plan("1. do it");
        assert!(session.is_plan_pending());
        assert_eq!(session.pending_plan.as_deref(), Some("1. do it"));

        session.clear_plan();
        assert_eq!(session.mode, SessionMode::Normal);
        assert!(session.pending_plan.is_none());
    }

    #[test]
    fn mode_round_trips_through_str() {
        for mode in [SessionMode::Normal, SessionMode::PlanPending] {
            assert_eq!(mode.as_str().parse::<SessionMode>().unwrap(), mode);
        }
        assert!("bogus".parse::<SessionMode>().is_err());
    }
}
