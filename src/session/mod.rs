//! Conversation sessions: one per email thread.
//!
//! - `model`: `Session`, `SessionMode`, the message log, subject hashing
//! - `machine`: pure transition engine (`decide`)
//! - `manager`: load/create/save against the store

pub mod machine;
pub mod manager;
pub mod model;

pub use machine::{Action, decide};
pub use manager::SessionManager;
pub use model::{
    MessageRole, Session, SessionMessage, SessionMode, branch_name, normalize_subject,
    render_history, subject_hash,
};
