//! Job queue and retry engine.
//!
//! Three queues share one prefix: `<prefix>:pending`, `<prefix>:retry` and
//! `<prefix>:dead`. The worker drains `pending` with [`JobQueue::dequeue`];
//! failed jobs go to `retry` with exponential backoff via
//! [`JobQueue::schedule_retry`]; the promoter moves due entries back with
//! [`JobQueue::promote_due`].
//!
//! # Delivery guarantees
//!
//! Delivery is at-least-once in the retry path and *not* acknowledged: a job
//! is removed from `pending` when it is dequeued. If the process dies after
//! the pop and before the outcome is persisted (or before a retry is
//! scheduled), that job is lost. There is no redelivery of in-flight work.
//! Promotion has the same window between removing a retry entry and pushing
//! it to `pending`. An undecodable payload is popped before it is written
//! to `dead`, so a store failure between the two drops the row. All three
//! are accepted tradeoffs.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Notify, broadcast};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{PermanentError, QueueError};
use crate::jobs::model::{DeadLetter, EmailJob, MalformedJob, QueueStats, RetryEnvelope};
use crate::store::{Database, QueueKind, StoredDeadLetter};

/// Retries allowed before a job is dead-lettered.
pub const MAX_RETRIES: u32 = 3;

/// Backoff unit: the first retry waits one unit, then two, then four.
pub const BACKOFF_UNIT: Duration = Duration::from_secs(1);

/// How often an idle consumer re-polls the store for jobs pushed by
/// another process.
const DEFAULT_IDLE_POLL: Duration = Duration::from_millis(250);

/// Retry rows moved per promotion batch.
const PROMOTE_BATCH: usize = 100;

/// Default broadcast channel capacity.
const EVENT_CAPACITY: usize = 256;

/// Delay before the retry that follows attempt number `retry_count`.
pub fn backoff_delay(retry_count: u32) -> Duration {
    BACKOFF_UNIT.saturating_mul(2u32.saturating_pow(retry_count))
}

/// Names of the three queues under one prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueNames {
    pub pending: String,
    pub retry: String,
    pub dead: String,
}

impl QueueNames {
    pub fn new(prefix: &str) -> Self {
        Self {
            pending: format!("{prefix}:pending"),
            retry: format!("{prefix}:retry"),
            dead: format!("{prefix}:dead"),
        }
    }
}

/// What `schedule_retry` did with a failed job.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome {
    /// Back in the retry queue.
    Scheduled {
        retry_count: u32,
        delay: Duration,
        due_at: DateTime<Utc>,
    },
    /// Out of retries; moved to the dead-letter queue.
    DeadLettered { failed_at: DateTime<Utc> },
}

/// Observable queue events.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    RetryScheduled {
        job_id: Uuid,
        retry_count: u32,
        due_at: DateTime<Utc>,
    },
    /// Final failure notification: the job will not run again.
    DeadLettered {
        job_id: Uuid,
        reply_to: Option<String>,
        error: String,
        failed_at: DateTime<Utc>,
    },
    Promoted { count: usize },
    /// An undecodable payload went straight to the dead-letter queue.
    Rejected {
        job_id: String,
        reply_to: Option<String>,
        error: String,
    },
}

/// What came off the pending queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Dequeued {
    Job(EmailJob),
    /// Already dead-lettered; only the sender still needs to hear about it.
    Malformed(MalformedJob),
}

/// Pending / retry / dead-letter queues over a [`Database`].
pub struct JobQueue {
    db: Arc<dyn Database>,
    names: QueueNames,
    notify: Notify,
    idle_poll: Duration,
    events: broadcast::Sender<QueueEvent>,
}

impl JobQueue {
    pub fn new(db: Arc<dyn Database>, prefix: &str) -> Self {
        let (events, _rx) = broadcast::channel(EVENT_CAPACITY);
        Self {
            db,
            names: QueueNames::new(prefix),
            notify: Notify::new(),
            idle_poll: DEFAULT_IDLE_POLL,
            events,
        }
    }

    /// Override how often an idle consumer re-polls the store.
    pub fn with_idle_poll(mut self, idle_poll: Duration) -> Self {
        self.idle_poll = idle_poll;
        self
    }

    pub fn names(&self) -> &QueueNames {
        &self.names
    }

    /// Subscribe to retry, promotion and dead-letter events.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: QueueEvent) {
        // Ok if nobody is listening
        let _ = self.events.send(event);
    }

    /// Append a job to the pending queue.
    pub async fn enqueue(&self, job: &EmailJob) -> Result<(), QueueError> {
        let payload = job.to_payload().map_err(|e| QueueError::Encode {
            id: job.id,
            reason: e.to_string(),
        })?;
        self.db
            .push_job(&self.names.pending, &job.id.to_string(), &payload)
            .await?;
        debug!(job_id = %job.id, session_id = %job.session_id, "Job enqueued");
        self.notify.notify_one();
        Ok(())
    }

    /// Pop the head of the pending queue, waiting up to `timeout`.
    ///
    /// Returns `None` when the timeout elapses with nothing to do. A payload
    /// that fails to decode is dead-lettered and returned as
    /// [`Dequeued::Malformed`] so the caller can tell the sender.
    pub async fn dequeue(&self, timeout: Duration) -> Result<Option<Dequeued>, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if let Some(stored) = self.db.pop_job(&self.names.pending).await? {
                match EmailJob::from_payload(&stored.payload) {
                    Ok(job) => {
                        debug!(job_id = %job.id, retry_count = job.retry_count, "Job dequeued");
                        return Ok(Some(Dequeued::Job(job)));
                    }
                    Err(e) => {
                        let reason = PermanentError::MalformedJob(e.to_string()).to_string();
                        warn!(job_id = %stored.job_id, error = %reason, "Dead-lettering undecodable job");
                        self.db
                            .insert_dead_letter(
                                &self.names.dead,
                                &stored.job_id,
                                &stored.payload,
                                Utc::now(),
                                &reason,
                            )
                            .await?;
                        let malformed = MalformedJob::salvage(&stored.job_id, &stored.payload, reason);
                        self.emit(QueueEvent::Rejected {
                            job_id: malformed.job_id.clone(),
                            reply_to: malformed.reply_to.clone(),
                            error: malformed.error.clone(),
                        });
                        return Ok(Some(Dequeued::Malformed(malformed)));
                    }
                }
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let wait = (deadline - now).min(self.idle_poll);
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Like [`JobQueue::dequeue`], but skips undecodable payloads.
    pub async fn dequeue_blocking(
        &self,
        timeout: Duration,
    ) -> Result<Option<EmailJob>, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match self.dequeue(remaining).await? {
                Some(Dequeued::Job(job)) => return Ok(Some(job)),
                Some(Dequeued::Malformed(_)) => continue,
                None => return Ok(None),
            }
        }
    }

    /// Hand a failed job back for another attempt, now.
    pub async fn schedule_retry(
        &self,
        job: EmailJob,
        error: &str,
    ) -> Result<RetryOutcome, QueueError> {
        self.schedule_retry_at(job, error, Utc::now()).await
    }

    /// Hand a failed job back for another attempt, as of `now`.
    ///
    /// With `retry_count < MAX_RETRIES` the counter is incremented and the
    /// job is due `2^retry_count` units after `now`. Otherwise the job is
    /// dead-lettered and a [`QueueEvent::DeadLettered`] is emitted.
    pub async fn schedule_retry_at(
        &self,
        mut job: EmailJob,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<RetryOutcome, QueueError> {
        if job.retry_count >= MAX_RETRIES {
            self.dead_letter(&job, error, now).await?;
            return Ok(RetryOutcome::DeadLettered { failed_at: now });
        }

        let delay = backoff_delay(job.retry_count);
        job.retry_count += 1;
        let due_at = now
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());

        let payload = job.to_payload().map_err(|e| QueueError::Encode {
            id: job.id,
            reason: e.to_string(),
        })?;
        self.db
            .insert_retry(
                &self.names.retry,
                &job.id.to_string(),
                &payload,
                due_at.timestamp_millis(),
                error,
            )
            .await?;

        info!(
            job_id = %job.id,
            retry_count = job.retry_count,
            delay_ms = delay.as_millis() as u64,
            error,
            "Scheduled retry with exponential backoff"
        );
        self.emit(QueueEvent::RetryScheduled {
            job_id: job.id,
            retry_count: job.retry_count,
            due_at,
        });

        Ok(RetryOutcome::Scheduled {
            retry_count: job.retry_count,
            delay,
            due_at,
        })
    }

    async fn dead_letter(
        &self,
        job: &EmailJob,
        error: &str,
        failed_at: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        let payload = job.to_payload().map_err(|e| QueueError::Encode {
            id: job.id,
            reason: e.to_string(),
        })?;
        self.db
            .insert_dead_letter(
                &self.names.dead,
                &job.id.to_string(),
                &payload,
                failed_at,
                error,
            )
            .await?;

        error!(
            job_id = %job.id,
            session_id = %job.session_id,
            retries = job.retry_count,
            max = MAX_RETRIES,
            error,
            "Job moved to dead letter queue"
        );
        self.emit(QueueEvent::DeadLettered {
            job_id: job.id,
            reply_to: Some(job.reply_to.clone()),
            error: error.to_string(),
            failed_at,
        });
        Ok(())
    }

    /// Move every retry entry due at or before `now` back to pending.
    ///
    /// Each entry is first removed from the retry queue and only pushed to
    /// pending by the caller whose removal succeeded, so concurrent
    /// promoters never duplicate a job. Returns the number promoted.
    pub async fn promote_due(&self, now: DateTime<Utc>) -> Result<usize, QueueError> {
        let now_ms = now.timestamp_millis();
        let mut promoted = 0;

        loop {
            let due = self
                .db
                .due_retries(&self.names.retry, now_ms, PROMOTE_BATCH)
                .await?;
            let batch_len = due.len();

            for entry in due {
                if !self.db.remove_retry(&self.names.retry, entry.seq).await? {
                    continue;
                }
                self.db
                    .push_job(&self.names.pending, &entry.job_id, &entry.payload)
                    .await?;
                promoted += 1;
            }

            if batch_len < PROMOTE_BATCH {
                break;
            }
        }

        if promoted > 0 {
            debug!(count = promoted, "Promoted due retries");
            self.notify.notify_one();
            self.emit(QueueEvent::Promoted { count: promoted });
        }
        Ok(promoted)
    }

    /// Everything currently waiting in the retry queue, earliest first.
    pub async fn retry_entries(&self) -> Result<Vec<RetryEnvelope>, QueueError> {
        let rows = self.db.list_retries(&self.names.retry).await?;
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            match EmailJob::from_payload(&row.payload) {
                Ok(job) => entries.push(RetryEnvelope {
                    job,
                    due_at: DateTime::from_timestamp_millis(row.due_at_ms)
                        .unwrap_or(DateTime::<Utc>::MIN_UTC),
                    last_error: row.last_error,
                }),
                Err(e) => warn!(job_id = %row.job_id, error = %e, "Skipping undecodable retry entry"),
            }
        }
        Ok(entries)
    }

    /// Most recent dead letters, newest first.
    pub async fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>, QueueError> {
        let rows = self.db.list_dead_letters(&self.names.dead, limit).await?;
        Ok(rows.into_iter().map(to_dead_letter).collect())
    }

    /// Manually put a dead-lettered job back into pending with a fresh retry
    /// budget. Dead letters are never requeued automatically.
    pub async fn requeue_dead_letter(&self, job_id: Uuid) -> Result<EmailJob, QueueError> {
        let Some(row) = self
            .db
            .take_dead_letter(&self.names.dead, &job_id.to_string())
            .await?
        else {
            return Err(QueueError::DeadLetterNotFound { id: job_id });
        };

        let mut job = match EmailJob::from_payload(&row.payload) {
            Ok(job) => job,
            Err(e) => {
                // Put it back untouched.
                self.db
                    .insert_dead_letter(
                        &self.names.dead,
                        &row.job_id,
                        &row.payload,
                        row.failed_at,
                        &row.last_error,
                    )
                    .await?;
                return Err(QueueError::Encode {
                    id: job_id,
                    reason: e.to_string(),
                });
            }
        };

        job.retry_count = 0;
        self.enqueue(&job).await?;
        info!(job_id = %job.id, "Dead letter requeued");
        Ok(job)
    }

    /// Current queue sizes.
    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        Ok(QueueStats {
            pending: self.db.queue_len(&self.names.pending, QueueKind::Pending).await?,
            retry: self.db.queue_len(&self.names.retry, QueueKind::Retry).await?,
            dead: self.db.queue_len(&self.names.dead, QueueKind::Dead).await?,
        })
    }
}

fn to_dead_letter(row: StoredDeadLetter) -> DeadLetter {
    let job = EmailJob::from_payload(&row.payload).ok();
    DeadLetter {
        job_id: job
            .as_ref()
            .map(|j| j.id)
            .or_else(|| Uuid::parse_str(&row.job_id).ok())
            .unwrap_or_else(Uuid::nil),
        job,
        payload: row.payload,
        failed_at: row.failed_at,
        last_error: row.last_error,
    }
}
