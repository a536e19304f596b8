//! Job processor: one job from session lookup to reply text.
//!
//! 1. Resolve the project directory and the session
//! 2. Classify the message and `decide` the action
//! 3. Run the action through the agent and PR host
//! 4. Log the message and agent output, save the session
//!
//! Sending the reply and retry handling belong to the runner.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::agent::{AgentMode, AgentOutcome, AgentRequest, CodingAgent, run_to_completion};
use crate::config::WorkerConfig;
use crate::context::AppContext;
use crate::error::{PermanentError, Result};
use crate::git::PullRequestHost;
use crate::intent::{PrCommand, classify};
use crate::jobs::EmailJob;
use crate::mailer::Reply;
use crate::session::{
    Action, MessageRole, Session, SessionManager, SessionMode, decide, render_history,
};
use crate::worker::prompts;

/// What processing a job produced.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub session_id: String,
    pub action: Action,
    pub mode: SessionMode,
    pub pr_number: Option<u64>,
    pub reply: Reply,
}

/// Result of one action before it is logged.
struct Performed {
    reply: String,
    agent_output: Option<String>,
}

pub struct JobProcessor {
    sessions: Arc<SessionManager>,
    agent: Arc<dyn CodingAgent>,
    git: Arc<dyn PullRequestHost>,
    config: WorkerConfig,
}

impl JobProcessor {
    pub fn new(ctx: &AppContext) -> Self {
        Self {
            sessions: Arc::clone(&ctx.sessions),
            agent: Arc::clone(&ctx.agent),
            git: Arc::clone(&ctx.git),
            config: ctx.worker_config.clone(),
        }
    }

    pub async fn process(&self, job: &EmailJob) -> Result<ProcessOutcome> {
        let workdir = self.workdir(&job.project)?;
        let mut session = self.sessions.load_or_create(job).await?;

        let intent = classify(&job.original_subject, &job.prompt);
        let action = decide(&session, &intent);
        let next_mode = action.next_mode(session.mode);
        info!(
            job_id = %job.id,
            session_id = %session.id,
            mode = %session.mode,
            action = action.label(),
            retry_count = job.retry_count,
            "Processing job"
        );

        let history = render_history(&self.sessions.history(&session.id).await?);

        let performed = match &action {
            Action::CancelPlan => {
                session.clear_plan();
                Performed {
                    reply: prompts::cancel_reply(),
                    agent_output: None,
                }
            }
            Action::ExecuteApprovedPlan { plan } => {
                let prompt = prompts::approved_plan_prompt(plan, &job.prompt);
                let performed = self
                    .execute(job, &mut session, &workdir, prompt, &history)
                    .await?;
                session.clear_plan();
                performed
            }
            Action::RevisePlan { plan } => {
                let prompt = prompts::revision_prompt(plan, &job.prompt, &history);
                let outcome = self
                    .run_agent(job, &mut session, &workdir, prompt, AgentMode::PlanOnly)
                    .await?;
                session.set_pending_plan(outcome.text.trim());
                Performed {
                    reply: prompts::revised_plan_reply(&outcome.text),
                    agent_output: Some(outcome.text),
                }
            }
            Action::PullRequest(command) => {
                self.pull_request(*command, &session, &workdir).await?
            }
            Action::RequestPlan => {
                let context = self.context_for(job, &session, &history);
                let prompt = prompts::plan_prompt(&job.prompt, context);
                let outcome = self
                    .run_agent(job, &mut session, &workdir, prompt, AgentMode::PlanOnly)
                    .await?;
                session.set_pending_plan(outcome.text.trim());
                Performed {
                    reply: prompts::plan_reply(&outcome.text),
                    agent_output: Some(outcome.text),
                }
            }
            Action::Execute => {
                let context = self.context_for(job, &session, &history);
                let prompt = prompts::execute_prompt(&job.prompt, context);
                self.execute(job, &mut session, &workdir, prompt, &history)
                    .await?
            }
        };
        debug_assert_eq!(session.mode, next_mode);

        let message = if job.prompt.trim().is_empty() {
            &job.original_subject
        } else {
            &job.prompt
        };
        self.sessions
            .record(&session.id, MessageRole::User, message)
            .await?;
        if let Some(output) = &performed.agent_output {
            self.sessions
                .record(&session.id, MessageRole::Agent, output)
                .await?;
        }
        self.sessions.save(&mut session).await?;

        info!(
            job_id = %job.id,
            session_id = %session.id,
            mode = %session.mode,
            pr = session.pr_number,
            "Job processed"
        );
        Ok(ProcessOutcome {
            session_id: session.id.clone(),
            action,
            mode: session.mode,
            pr_number: session.pr_number,
            reply: Reply::to_job(job, performed.reply),
        })
    }

    fn workdir(&self, project: &str) -> std::result::Result<PathBuf, PermanentError> {
        let dir = self.config.project_dir(project)?;
        if !dir.is_dir() {
            return Err(PermanentError::UnknownProject(project.to_string()));
        }
        Ok(dir)
    }

    /// Continuation token for this job, if the agent should resume.
    fn resume_token(&self, job: &EmailJob, session: &Session) -> Option<String> {
        session
            .agent_session_id
            .clone()
            .filter(|_| job.resume_session)
    }

    /// Earlier turns for the prompt. A resumed agent already has them.
    fn context_for<'a>(&self, job: &EmailJob, session: &Session, history: &'a str) -> &'a str {
        if self.resume_token(job, session).is_some() {
            ""
        } else {
            history
        }
    }

    async fn run_agent(
        &self,
        job: &EmailJob,
        session: &mut Session,
        workdir: &Path,
        prompt: String,
        mode: AgentMode,
    ) -> Result<AgentOutcome> {
        let request = AgentRequest {
            workdir: workdir.to_path_buf(),
            prompt,
            mode,
            resume: self.resume_token(job, session),
            attachments: job.attachments.clone(),
        };
        debug!(
            session_id = %session.id,
            mode = mode.as_str(),
            resume = request.resume.is_some(),
            attachments = request.attachments.len(),
            "Running agent"
        );

        let outcome =
            run_to_completion(Arc::clone(&self.agent), request, self.config.agent_timeout).await?;
        if let Some(token) = &outcome.session_id {
            session.agent_session_id = Some(token.clone());
        }
        Ok(outcome)
    }

    /// Full execution on the session branch, then commit and PR.
    async fn execute(
        &self,
        job: &EmailJob,
        session: &mut Session,
        workdir: &Path,
        prompt: String,
        history: &str,
    ) -> Result<Performed> {
        self.git
            .checkout_branch(workdir, &session.branch_name)
            .await?;
        let outcome = self
            .run_agent(job, session, workdir, prompt, AgentMode::Execute)
            .await?;
        let reply = self
            .finalize(job, session, workdir, &outcome.text, history)
            .await?;
        Ok(Performed {
            reply,
            agent_output: Some(outcome.text),
        })
    }

    /// Commit the agent's changes and open or update the pull request.
    /// Returns the reply text.
    async fn finalize(
        &self,
        job: &EmailJob,
        session: &mut Session,
        workdir: &Path,
        summary: &str,
        history: &str,
    ) -> Result<String> {
        let title = prompts::pr_title(&job.original_subject);
        let branch = session.branch_name.clone();
        let committed = self
            .git
            .commit_and_push(workdir, &branch, &title)
            .await?;

        if !self.git.has_commits(workdir, &branch).await? {
            return Ok(format!("{}\n\nNo changes were committed.", summary.trim()));
        }

        match session.pr_number {
            None => {
                let conversation = format!(
                    "{history}\n\n[User]\n{}\n\n[Agent]\n{}",
                    job.prompt.trim(),
                    summary.trim()
                );
                let body = prompts::pr_body(conversation.trim(), summary);
                let pr = self.git.create_pr(workdir, &branch, &title, &body).await?;
                session.pr_number = Some(pr.number);
                info!(session_id = %session.id, pr = pr.number, "Pull request opened");
                Ok(format!("{}\n\nPull request: {}", summary.trim(), pr.url))
            }
            Some(number) if committed => {
                self.git.comment(workdir, number, summary).await?;
                Ok(format!(
                    "{}\n\nUpdated pull request: {}",
                    summary.trim(),
                    self.pr_link(number)
                ))
            }
            Some(number) => Ok(format!(
                "{}\n\nNo new changes were committed. Pull request: {}",
                summary.trim(),
                self.pr_link(number)
            )),
        }
    }

    async fn pull_request(
        &self,
        command: PrCommand,
        session: &Session,
        workdir: &Path,
    ) -> Result<Performed> {
        let number = session
            .pr_number
            .ok_or_else(|| PermanentError::NoPullRequest {
                command: command.name().to_string(),
            })?;

        let reply = match command {
            PrCommand::Merge => {
                self.git.merge(workdir, number).await?;
                info!(session_id = %session.id, pr = number, "Pull request merged");
                format!("Merged pull request {}.", self.pr_link(number))
            }
            PrCommand::Close => {
                self.git.close(workdir, number).await?;
                info!(session_id = %session.id, pr = number, "Pull request closed");
                format!("Closed pull request {}.", self.pr_link(number))
            }
            PrCommand::Status => {
                let status = self.git.status(workdir, number).await?;
                prompts::status_reply(session, &status)
            }
        };
        Ok(Performed {
            reply,
            agent_output: None,
        })
    }

    fn pr_link(&self, number: u64) -> String {
        match &self.config.pr_url_base {
            Some(base) => format!("{}/{number}", base.trim_end_matches('/')),
            None => format!("#{number}"),
        }
    }
}
