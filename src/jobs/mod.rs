//! Job pipeline: the queued unit of work and the retry engine around it.
//!
//! - `model`: `EmailJob`, retry envelopes, dead letters
//! - `queue`: pending / retry / dead-letter queues with exponential backoff
//! - `promoter`: background loop moving due retries back to pending

pub mod model;
pub mod promoter;
pub mod queue;

pub use model::{AttachmentRef, DeadLetter, EmailJob, MalformedJob, QueueStats, RetryEnvelope};
pub use promoter::spawn_retry_promoter;
pub use queue::{
    BACKOFF_UNIT, Dequeued, JobQueue, MAX_RETRIES, QueueEvent, RetryOutcome, backoff_delay,
};
