//! Mock storage implementation for testing.

use std::collections::HashSet;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::sync::RwLock;

use super::{AppendOutcome, EntryStream, LogEntry, MessageStore, Result, StorageError};

#[derive(Default)]
struct MockLog {
    entries: Vec<LogEntry>,
    keys: HashSet<String>,
}

/// Mock message store that keeps the log in memory.
///
/// Sequence numbers start at 1, matching the SQLite store.
#[derive(Default)]
pub struct MockMessageStore {
    log: RwLock<MockLog>,
    fail_on_append: RwLock<bool>,
    /// When set, reads yield this many entries and then an error.
    fail_read_after: RwLock<Option<usize>>,
}

impl MockMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_append(&self, fail: bool) {
        *self.fail_on_append.write().await = fail;
    }

    pub async fn set_fail_on_read(&self, fail: bool) {
        *self.fail_read_after.write().await = fail.then_some(0);
    }

    pub async fn set_fail_read_after(&self, entries: usize) {
        *self.fail_read_after.write().await = Some(entries);
    }

    /// Number of committed entries.
    pub async fn len(&self) -> usize {
        self.log.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl MessageStore for MockMessageStore {
    async fn append(&self, content: &str, idempotency_key: &str) -> Result<AppendOutcome> {
        if *self.fail_on_append.read().await {
            return Err(StorageError::Injected("append".to_string()));
        }

        let mut log = self.log.write().await;
        if !log.keys.insert(idempotency_key.to_string()) {
            return Ok(AppendOutcome::Duplicate);
        }

        let entry = LogEntry {
            sequence: log.entries.len() as i64 + 1,
            idempotency_key: idempotency_key.to_string(),
            content: content.to_string(),
        };
        log.entries.push(entry.clone());
        Ok(AppendOutcome::Committed(entry))
    }

    fn read_from(&self, after: i64) -> EntryStream<'_> {
        stream::once(async move {
            let fail_after = *self.fail_read_after.read().await;
            let log = self.log.read().await;

            let mut items: Vec<Result<LogEntry>> = log
                .entries
                .iter()
                .filter(|entry| entry.sequence > after)
                .take(fail_after.unwrap_or(usize::MAX))
                .cloned()
                .map(Ok)
                .collect();

            if fail_after.is_some() {
                items.push(Err(StorageError::Injected("read".to_string())));
            }

            stream::iter(items)
        })
        .flatten()
        .boxed()
    }
}
