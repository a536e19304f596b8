//! External coding agent: the trait the worker drives, plus the event
//! stream collector and the subprocess adapter used by the binary.
//!
//! An agent run streams [`AgentEvent`]s over an mpsc channel. The worker
//! reads them in order until `Done`/`Failed` or until the agent drops its
//! sender, all under the configured timeout.

pub mod process;

pub use process::ProcessAgent;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::error::AgentError;
use crate::jobs::AttachmentRef;

/// Channel depth between a running agent and its consumer.
const EVENT_BUFFER: usize = 64;

/// How the agent is allowed to act.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentMode {
    /// Read-only: produce a plan, change nothing.
    PlanOnly,
    /// Full execution: edit files in the working directory.
    Execute,
}

impl AgentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlanOnly => "plan",
            Self::Execute => "execute",
        }
    }
}

/// One agent invocation.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub workdir: PathBuf,
    pub prompt: String,
    pub mode: AgentMode,
    /// Continuation token from a previous run of the same session.
    pub resume: Option<String>,
    pub attachments: Vec<AttachmentRef>,
}

/// Events streamed by a running agent, in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    /// Assistant text.
    Text(String),
    /// The agent invoked one of its tools.
    ToolUse { name: String },
    /// Run finished. `session_id` is the continuation token for the next run.
    Done {
        session_id: Option<String>,
        result: String,
    },
    Failed(String),
}

/// Collected result of a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentOutcome {
    /// Final result text, or the concatenated streamed text when the
    /// agent reported an empty result.
    pub text: String,
    pub session_id: Option<String>,
    pub tool_uses: usize,
}

#[async_trait]
pub trait CodingAgent: Send + Sync {
    /// Run the agent, streaming events into `events`.
    ///
    /// Implementations may return once they have sent `Done`/`Failed`;
    /// an `Err` return is treated like a `Failed` event.
    async fn run(
        &self,
        request: AgentRequest,
        events: mpsc::Sender<AgentEvent>,
    ) -> Result<(), AgentError>;
}

/// Run `agent` and consume its event stream to completion.
pub async fn run_to_completion(
    agent: Arc<dyn CodingAgent>,
    request: AgentRequest,
    timeout: Duration,
) -> Result<AgentOutcome, AgentError> {
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let mode = request.mode;

    let run = agent.run(request, tx);
    let collect = collect_events(ReceiverStream::new(rx));

    let (run_result, collected) = tokio::time::timeout(timeout, async {
        tokio::join!(run, collect)
    })
    .await
    .map_err(|_| AgentError::Timeout(timeout))?;

    // A `Done` on the stream wins even if the agent errored afterwards (e.g.
    // sending into the closed channel). Without one, prefer the agent's own
    // error over the generic `NoResult`.
    let outcome = match (collected, run_result) {
        (Ok(outcome), _) => outcome,
        (Err(AgentError::NoResult), Err(e)) => return Err(e),
        (Err(e), _) => return Err(e),
    };

    debug!(
        mode = mode.as_str(),
        tool_uses = outcome.tool_uses,
        resumable = outcome.session_id.is_some(),
        "Agent run finished"
    );
    Ok(outcome)
}

async fn collect_events(
    mut stream: ReceiverStream<AgentEvent>,
) -> Result<AgentOutcome, AgentError> {
    let mut streamed = String::new();
    let mut tool_uses = 0;

    while let Some(event) = stream.next().await {
        match event {
            AgentEvent::Text(text) => {
                if !streamed.is_empty() {
                    streamed.push('\n');
                }
                streamed.push_str(&text);
            }
            AgentEvent::ToolUse { name } => {
                tool_uses += 1;
                debug!(tool = %name, "Agent tool use");
            }
            AgentEvent::Done { session_id, result } => {
                let text = if result.trim().is_empty() {
                    streamed
                } else {
                    result
                };
                return Ok(AgentOutcome {
                    text,
                    session_id,
                    tool_uses,
                });
            }
            AgentEvent::Failed(reason) => {
                warn!(reason = %reason, "Agent reported failure");
                return Err(AgentError::RunFailed(reason));
            }
        }
    }

    Err(AgentError::NoResult)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scripted(Vec<AgentEvent>);

    #[async_trait]
    impl CodingAgent for Scripted {
        async fn run(
            &self,
            _request: AgentRequest,
            events: mpsc::Sender<AgentEvent>,
        ) -> Result<(), AgentError> {
            for event in self.0.clone() {
                events
                    .send(event)
                    .await
                    .map_err(|e| AgentError::RunFailed(e.to_string()))?;
            }
            Ok(())
        }
    }

    struct Hangs;

    #[async_trait]
    impl CodingAgent for Hangs {
        async fn run(
            &self,
            _request: AgentRequest,
            _events: mpsc::Sender<AgentEvent>,
        ) -> Result<(), AgentError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    fn request() -> AgentRequest {
        AgentRequest {
            workdir: PathBuf::from("."),
            prompt: "do it".into(),
            mode: AgentMode::Execute,
            resume: None,
            attachments: Vec::new(),
        }
    }

    async fn run(events: Vec<AgentEvent>) -> Result<AgentOutcome, AgentError> {
        run_to_completion(Arc::new(Scripted(events)), request(), Duration::from_secs(5)).await
    }

    #[tokio::test]
    async fn done_result_and_token_are_returned() {
        let outcome = run(vec![
            AgentEvent::Text("thinking".into()),
            AgentEvent::ToolUse { name: "edit".into() },
            AgentEvent::Done {
                session_id: Some("tok-1".into()),
                result: "Added dark mode".into(),
            },
        ])
        .await
        .unwrap();

        assert_eq!(outcome.text, "Added dark mode");
        assert_eq!(outcome.session_id.as_deref(), Some("tok-1"));
        assert_eq!(outcome.tool_uses, 1);
    }

    #[tokio::test]
    async fn empty_result_falls_back_to_streamed_text_in_order() {
        let outcome = run(vec![
            AgentEvent::Text("first".into()),
            AgentEvent::Text("second".into()),
            AgentEvent::Done {
                session_id: None,
                result: String::new(),
            },
        ])
        .await
        .unwrap();
        assert_eq!(outcome.text, "first\nsecond");
    }

    #[tokio::test]
    async fn failed_event_is_an_error() {
        let err = run(vec![AgentEvent::Failed("rate limited".into())])
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::RunFailed(r) if r == "rate limited"));
    }

    #[tokio::test]
    async fn closed_stream_without_done_is_no_result() {
        let err = run(vec![AgentEvent::Text("partial".into())]).await.unwrap_err();
        assert!(matches!(err, AgentError::NoResult));
    }

    #[tokio::test]
    async fn hung_agent_times_out() {
        let err = run_to_completion(Arc::new(Hangs), request(), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Timeout(_)));
    }
}
