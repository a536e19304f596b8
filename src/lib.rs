//! Mail agent: email-driven coding agent with durable retries.

pub mod agent;
pub mod config;
pub mod context;
pub mod error;
pub mod git;
pub mod intent;
pub mod jobs;
pub mod mailer;
pub mod session;
pub mod store;
pub mod worker;
