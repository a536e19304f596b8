//! Worker loop: dequeue, process, reply, and hand failures to the retry
//! engine.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::context::AppContext;
use crate::error::Error;
use crate::jobs::{Dequeued, EmailJob, JobQueue, MAX_RETRIES, MalformedJob, RetryOutcome};
use crate::mailer::{Mailer, Reply};
use crate::worker::processor::{JobProcessor, ProcessOutcome};

/// How one job ended.
#[derive(Debug, Clone)]
pub enum JobResult {
    Completed(ProcessOutcome),
    /// Permanent failure, reported and dropped.
    Rejected { error: String },
    RetryScheduled { retry_count: u32, delay: Duration },
    DeadLettered { error: String },
    /// The failure could not be handed to the retry queue.
    Lost { error: String },
}

pub struct Worker {
    queue: Arc<JobQueue>,
    processor: JobProcessor,
    mailer: Arc<dyn Mailer>,
    poll_timeout: Duration,
}

impl Worker {
    pub fn new(ctx: &AppContext) -> Self {
        Self {
            queue: Arc::clone(&ctx.queue),
            processor: JobProcessor::new(ctx),
            mailer: Arc::clone(&ctx.mailer),
            poll_timeout: ctx.queue_config.poll_timeout,
        }
    }

    /// Process until `shutdown` is set. The flag is checked between jobs
    /// and after every empty poll, so an in-flight job always finishes.
    pub async fn run(&self, shutdown: Arc<AtomicBool>) {
        info!(
            queue = %self.queue.names().pending,
            poll_timeout_ms = self.poll_timeout.as_millis() as u64,
            "Worker started"
        );

        while !shutdown.load(Ordering::Relaxed) {
            match self.queue.dequeue(self.poll_timeout).await {
                Ok(Some(Dequeued::Job(job))) => {
                    self.handle(job).await;
                }
                Ok(Some(Dequeued::Malformed(bad))) => {
                    self.reject_malformed(&bad).await;
                }
                Ok(None) => {}
                Err(e) => {
                    error!(error = %e, "Dequeue failed");
                    tokio::time::sleep(self.poll_timeout).await;
                }
            }
        }

        info!("Worker shutting down");
    }

    /// Process one job and deal with the outcome. Every path ends with a
    /// reply to the sender.
    pub async fn handle(&self, job: EmailJob) -> JobResult {
        let job_id = job.id;

        match self.processor.process(&job).await {
            Ok(outcome) => {
                self.send(&job_id, &outcome.reply).await;
                JobResult::Completed(outcome)
            }
            Err(e) if e.is_permanent() => {
                warn!(job_id = %job_id, error = %e, "Job rejected");
                self.notify(&job, rejected_text(&e)).await;
                JobResult::Rejected {
                    error: e.to_string(),
                }
            }
            Err(e) => self.retry(job, e).await,
        }
    }

    /// Tell the sender of an undecodable payload, if an address survived.
    /// The queue has already dead-lettered it.
    pub async fn reject_malformed(&self, bad: &MalformedJob) -> JobResult {
        match Reply::to_malformed(bad, rejected_text(&bad.error)) {
            Some(reply) => self.send(&bad.job_id, &reply).await,
            None => warn!(job_id = %bad.job_id, "Malformed job has no reply address"),
        }
        JobResult::Rejected {
            error: bad.error.clone(),
        }
    }

    async fn retry(&self, job: EmailJob, err: Error) -> JobResult {
        let error = err.to_string();
        warn!(
            job_id = %job.id,
            retry_count = job.retry_count,
            error = %error,
            "Job failed"
        );

        match self.queue.schedule_retry(job.clone(), &error).await {
            Ok(RetryOutcome::Scheduled {
                retry_count, delay, ..
            }) => {
                self.notify(&job, retry_text(&error, retry_count, delay))
                    .await;
                JobResult::RetryScheduled { retry_count, delay }
            }
            Ok(RetryOutcome::DeadLettered { .. }) => {
                self.notify(&job, dead_letter_text(&error)).await;
                JobResult::DeadLettered { error }
            }
            Err(qe) => {
                error!(
                    job_id = %job.id,
                    error = %qe,
                    "Could not schedule retry, job dropped"
                );
                self.notify(&job, lost_text(&error)).await;
                JobResult::Lost { error }
            }
        }
    }

    async fn notify(&self, job: &EmailJob, body: String) {
        self.send(&job.id, &Reply::to_job(job, body)).await;
    }

    /// Reply delivery is not retried; the work it reports is already saved.
    async fn send(&self, job_id: &(dyn fmt::Display + Sync), reply: &Reply) {
        if let Err(e) = self.mailer.send(reply).await {
            error!(job_id = %job_id, to = %reply.to, error = %e, "Reply not delivered");
        }
    }
}

fn rejected_text(reason: impl fmt::Display) -> String {
    format!("I couldn't act on your message. {reason}")
}

fn retry_text(error: &str, retry_count: u32, delay: Duration) -> String {
    let secs = delay.as_secs().max(1);
    let unit = if secs == 1 { "second" } else { "seconds" };
    format!(
        "Something went wrong while working on your request:\n\n{error}\n\n\
         I'll try again in {secs} {unit} (retry {retry_count} of {MAX_RETRIES})."
    )
}

fn dead_letter_text(error: &str) -> String {
    format!(
        "Your request could not be completed after {MAX_RETRIES} retries and \
         will not be attempted again.\n\nLast error:\n{error}"
    )
}

fn lost_text(error: &str) -> String {
    format!(
        "Your request failed and could not be queued for another attempt.\n\n\
         Last error:\n{error}"
    )
}

/// Spawn the worker loop. Returns a `JoinHandle` and shutdown flag.
pub fn spawn_worker(ctx: &AppContext) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);
    let worker = Worker::new(ctx);

    let handle = tokio::spawn(async move {
        worker.run(shutdown).await;
    });

    (handle, shutdown_flag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AgentError, PermanentError};

    #[test]
    fn rejection_is_plain_language() {
        let err: Error = PermanentError::NoPullRequest {
            command: "merge".into(),
        }
        .into();
        assert_eq!(
            rejected_text(&err),
            "I couldn't act on your message. No pull request exists yet for this thread, \
             so there is nothing to merge."
        );
    }

    #[test]
    fn retry_text_names_attempt_and_delay() {
        let err: Error = AgentError::RunFailed("rate limited".into()).into();
        let text = retry_text(&err.to_string(), 2, Duration::from_secs(2));
        assert!(text.contains("rate limited"));
        assert!(text.contains("2 seconds"));
        assert!(text.contains("retry 2 of 3"));
    }

    #[test]
    fn final_failure_mentions_retry_limit() {
        let text = dead_letter_text("boom");
        assert!(text.contains("after 3 retries"));
        assert!(text.ends_with("boom"));
    }
}
