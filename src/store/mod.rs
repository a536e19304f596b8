//! Persistence layer: libSQL-backed storage for sessions, the conversation
//! log, and the job queues.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{Database, QueueKind, StoredDeadLetter, StoredJob, StoredRetry};
