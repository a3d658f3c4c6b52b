//! Message storage.
//!
//! The message log is the only mutable state shared by every worker
//! process. Workers open the same durable store; sequence assignment and
//! idempotency-key deduplication both happen inside it, so two workers
//! racing on the same key resolve to one commit and one duplicate.
//!
//! Implementations:
//! - `SqliteMessageStore`: SQLite file in WAL mode, shared across processes
//! - `MockMessageStore`: In-memory log with failure injection for tests

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::StorageConfig;

pub mod mock;
pub mod schema;
pub mod sqlite;

pub use mock::MockMessageStore;
pub use sqlite::SqliteMessageStore;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
///
/// A repeated idempotency key is not an error; see [`AppendOutcome::Duplicate`].
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Injected failure: {0}")]
    Injected(String),
}

/// One committed message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Store-assigned, strictly increasing, never reused.
    pub sequence: i64,
    /// Publisher-supplied deduplication token.
    pub idempotency_key: String,
    /// Opaque text payload.
    pub content: String,
}

/// Result of an append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// A new entry was written.
    Committed(LogEntry),
    /// The idempotency key was already present; nothing was written.
    Duplicate,
}

/// Ordered, finite stream of entries produced by [`MessageStore::read_from`].
pub type EntryStream<'a> = BoxStream<'a, Result<LogEntry>>;

/// Sequence value that precedes every stored entry.
pub const SEQUENCE_ORIGIN: i64 = 0;

/// Interface for the durable message log.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append a message unless its idempotency key already exists.
    ///
    /// Only a conflict on the idempotency key yields `Duplicate`; every other
    /// failure is returned as an error and nothing is committed.
    async fn append(&self, content: &str, idempotency_key: &str) -> Result<AppendOutcome>;

    /// Stream every entry with `sequence > after`, ascending.
    ///
    /// Each call starts a fresh read. An append racing with the read may or
    /// may not be observed.
    fn read_from(&self, after: i64) -> EntryStream<'_>;
}

/// Open the configured store and make sure its schema exists.
pub async fn init_storage(config: &StorageConfig) -> Result<Arc<dyn MessageStore>> {
    info!(path = %config.path, "Opening message store");

    let store = SqliteMessageStore::connect(config).await?;
    store.init().await?;

    Ok(Arc::new(store))
}
