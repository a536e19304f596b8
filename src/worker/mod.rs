//! Worker system: turns queued jobs into agent runs and replies.
//!
//! Core components:
//! - `processor`: one job: session, intent, action, collaborators, log
//! - `runner`: the dequeue loop, reply delivery and retry hand-off
//! - `prompts`: agent prompts and reply texts

pub mod processor;
pub mod prompts;
pub mod runner;

pub use processor::{JobProcessor, ProcessOutcome};
pub use runner::{JobResult, Worker, spawn_worker};
