//! Subprocess-backed agent.
//!
//! Runs the configured command through `sh -c` in the project directory.
//! The prompt goes to stdin; run parameters go in the environment:
//!
//! - `MAIL_AGENT_MODE`: `plan` or `execute`
//! - `MAIL_AGENT_RESUME`: continuation token, when resuming
//! - `MAIL_AGENT_ATTACHMENTS`: newline-separated attachment paths
//!
//! Stdout is read line by line. JSON lines tagged with `type`
//! (`text`, `tool_use`, `result`, `error`) map onto [`AgentEvent`]s; any
//! other line is treated as plain text.

use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::agent::{AgentEvent, AgentRequest, CodingAgent};
use crate::error::AgentError;

/// Tail of stderr kept for failure messages (8KB).
const MAX_STDERR: usize = 8 * 1024;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    Text {
        text: String,
    },
    ToolUse {
        name: String,
    },
    Result {
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        result: String,
    },
    Error {
        message: String,
    },
}

impl From<WireEvent> for AgentEvent {
    fn from(wire: WireEvent) -> Self {
        match wire {
            WireEvent::Text { text } => AgentEvent::Text(text),
            WireEvent::ToolUse { name } => AgentEvent::ToolUse { name },
            WireEvent::Result { session_id, result } => AgentEvent::Done { session_id, result },
            WireEvent::Error { message } => AgentEvent::Failed(message),
        }
    }
}

fn parse_line(line: &str) -> AgentEvent {
    match serde_json::from_str::<WireEvent>(line) {
        Ok(wire) => wire.into(),
        Err(_) => AgentEvent::Text(line.to_string()),
    }
}

pub struct ProcessAgent {
    command: String,
}

impl ProcessAgent {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl CodingAgent for ProcessAgent {
    async fn run(
        &self,
        request: AgentRequest,
        events: mpsc::Sender<AgentEvent>,
    ) -> Result<(), AgentError> {
        let attachments = request
            .attachments
            .iter()
            .map(|a| a.path.display().to_string())
            .collect::<Vec<_>>()
            .join("\n");

        let mut command = Command::new("sh");
        command
            .args(["-c", &self.command])
            .current_dir(&request.workdir)
            .env("MAIL_AGENT_MODE", request.mode.as_str())
            .env("MAIL_AGENT_ATTACHMENTS", attachments)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        match &request.resume {
            Some(token) => command.env("MAIL_AGENT_RESUME", token),
            None => command.env_remove("MAIL_AGENT_RESUME"),
        };

        let mut child = command
            .spawn()
            .map_err(|e| AgentError::Spawn(format!("{}: {e}", self.command)))?;
        info!(
            command = %self.command,
            mode = request.mode.as_str(),
            workdir = %request.workdir.display(),
            "Agent process started"
        );

        // Written from a separate task so a chatty agent can't fill stdout
        // while we are still blocked on stdin. An agent that exits without
        // reading the prompt is judged by its exit status alone.
        if let Some(mut stdin) = child.stdin.take() {
            let prompt = request.prompt.clone();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                    debug!(error = %e, "Agent did not consume the prompt");
                }
            });
        }

        let stderr_task = child.stderr.take().map(|mut err| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = err.read_to_end(&mut buf).await;
                let start = buf.len().saturating_sub(MAX_STDERR);
                String::from_utf8_lossy(&buf[start..]).into_owned()
            })
        });

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Spawn("stdout not captured".into()))?;
        let mut lines = BufReader::new(stdout).lines();
        let mut finished = false;

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| AgentError::RunFailed(format!("Failed to read agent output: {e}")))?
        {
            if line.trim().is_empty() {
                continue;
            }
            let event = parse_line(&line);
            finished |= matches!(event, AgentEvent::Done { .. } | AgentEvent::Failed(_));
            if events.send(event).await.is_err() {
                debug!("Agent event consumer went away");
                break;
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| AgentError::RunFailed(format!("Failed to wait for agent: {e}")))?;
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            let reason = format!(
                "agent exited with {}: {}",
                status.code().map_or("signal".to_string(), |c| c.to_string()),
                stderr.trim()
            );
            let _ = events.send(AgentEvent::Failed(reason.clone())).await;
            return Err(AgentError::RunFailed(reason));
        }

        if !finished {
            let _ = events
                .send(AgentEvent::Done {
                    session_id: None,
                    result: String::new(),
                })
                .await;
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::agent::{AgentMode, run_to_completion};

    fn request(prompt: &str) -> AgentRequest {
        AgentRequest {
            workdir: PathBuf::from("."),
            prompt: prompt.into(),
            mode: AgentMode::PlanOnly,
            resume: Some("tok-9".into()),
            attachments: Vec::new(),
        }
    }

    async fn run(command: &str, prompt: &str) -> Result<crate::agent::AgentOutcome, AgentError> {
        run_to_completion(
            Arc::new(ProcessAgent::new(command)),
            request(prompt),
            Duration::from_secs(10),
        )
        .await
    }

    #[test]
    fn json_lines_map_to_events() {
        assert_eq!(
            parse_line(r#"{"type":"tool_use","name":"edit"}"#),
            AgentEvent::ToolUse { name: "edit".into() }
        );
        assert_eq!(
            parse_line(r#"{"type":"result","session_id":"s1","result":"ok"}"#),
            AgentEvent::Done {
                session_id: Some("s1".into()),
                result: "ok".into()
            }
        );
        assert_eq!(parse_line("plain output"), AgentEvent::Text("plain output".into()));
    }

    #[tokio::test]
    async fn plain_output_becomes_result() {
        let outcome = run("cat", "plan the dark mode work").await.unwrap();
        assert_eq!(outcome.text, "plan the dark mode work");
        assert_eq!(outcome.session_id, None);
    }

    #[tokio::test]
    async fn environment_carries_mode_and_token() {
        let script = r#"printf '{"type":"result","session_id":"%s","result":"%s"}\n' "$MAIL_AGENT_RESUME" "$MAIL_AGENT_MODE""#;
        let outcome = run(script, "").await.unwrap();
        assert_eq!(outcome.session_id.as_deref(), Some("tok-9"));
        assert_eq!(outcome.text, "plan");
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_failure_with_stderr() {
        let err = run("echo boom >&2; exit 3", "").await.unwrap_err();
        match err {
            AgentError::RunFailed(reason) => {
                assert!(reason.contains("3"));
                assert!(reason.contains("boom"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
