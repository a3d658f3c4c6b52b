//! SQLite MessageStore implementation.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use sea_query::{OnConflict, Query, SqliteQueryBuilder};
use sea_query_binder::SqlxBinder;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::config::StorageConfig;
use crate::storage::schema::{Messages, CREATE_MESSAGES_TABLE, SELECT_MESSAGES_PAGE};
use crate::storage::{AppendOutcome, EntryStream, LogEntry, MessageStore, Result, StorageError};

/// Rows fetched per connection checkout when streaming the log.
const READ_PAGE_SIZE: i64 = 256;

/// SQLite implementation of MessageStore.
///
/// Every worker process opens its own pool on the same database file. WAL
/// mode lets readers stream while another process appends, and the busy
/// timeout makes concurrent writers queue instead of failing.
pub struct SqliteMessageStore {
    pool: SqlitePool,
}

impl SqliteMessageStore {
    /// Create a new SQLite message store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database file named by the config.
    pub async fn connect(config: &StorageConfig) -> Result<Self> {
        if let Some(parent) = Path::new(&config.path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        Ok(Self::new(pool))
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(CREATE_MESSAGES_TABLE).execute(&self.pool).await?;
        Ok(())
    }

    /// Underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn entry_from_row(row: &SqliteRow) -> Result<LogEntry> {
    Ok(LogEntry {
        sequence: row.try_get("sequence")?,
        idempotency_key: row.try_get("idempotency_key")?,
        content: row.try_get("content")?,
    })
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    #[tracing::instrument(name = "store.append", skip_all, fields(idempotency_key = %idempotency_key))]
    async fn append(&self, content: &str, idempotency_key: &str) -> Result<AppendOutcome> {
        // The conflict target is the idempotency key alone; any other
        // constraint failure still surfaces as an error.
        let (sql, values) = Query::insert()
            .into_table(Messages::Table)
            .columns([Messages::IdempotencyKey, Messages::Content])
            .values_panic([idempotency_key.into(), content.into()])
            .on_conflict(
                OnConflict::column(Messages::IdempotencyKey)
                    .do_nothing()
                    .to_owned(),
            )
            .returning_col(Messages::Sequence)
            .build_sqlx(SqliteQueryBuilder);

        let row = sqlx::query_with(&sql, values)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let sequence: i64 = row.try_get("sequence")?;
                debug!(sequence, "Appended message");
                Ok(AppendOutcome::Committed(LogEntry {
                    sequence,
                    idempotency_key: idempotency_key.to_string(),
                    content: content.to_string(),
                }))
            }
            None => {
                debug!("Idempotency key already present, append absorbed");
                Ok(AppendOutcome::Duplicate)
            }
        }
    }

    /// Reads page by page, holding a pooled connection only while a page
    /// is fetched, so a slow consumer never starves appends.
    fn read_from(&self, after: i64) -> EntryStream<'_> {
        stream::try_unfold(Some(after), move |cursor| async move {
            let Some(after) = cursor else {
                return Ok::<_, StorageError>(None);
            };

            let page = sqlx::query(SELECT_MESSAGES_PAGE)
                .bind(after)
                .bind(READ_PAGE_SIZE)
                .fetch_all(&self.pool)
                .await?
                .iter()
                .map(entry_from_row)
                .collect::<Result<Vec<_>>>()?;

            let Some(last) = page.last().map(|e| e.sequence) else {
                return Ok(None);
            };
            let next = (page.len() as i64 == READ_PAGE_SIZE).then_some(last);
            debug!(after, rows = page.len(), "Read message page");

            Ok(Some((stream::iter(page.into_iter().map(Ok::<LogEntry, StorageError>)), next)))
        })
        .try_flatten()
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;
    use tempfile::TempDir;

    use super::*;

    async fn open(dir: &TempDir) -> SqliteMessageStore {
        let config = StorageConfig {
            path: dir.path().join("courier.db").to_string_lossy().to_string(),
            ..StorageConfig::default()
        };
        let store = SqliteMessageStore::connect(&config).await.unwrap();
        store.init().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        store.init().await.unwrap();
    }

    #[tokio::test]
    async fn test_content_with_quotes_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        store.append("it's \"quoted\"; DROP", "q1").await.unwrap();

        let entries: Vec<LogEntry> = store.read_from(0).try_collect().await.unwrap();
        assert_eq!(entries[0].content, "it's \"quoted\"; DROP");
    }

    #[tokio::test]
    async fn test_log_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = open(&dir).await;
            store.append("persisted", "p1").await.unwrap();
            store.pool().close().await;
        }

        let store = open(&dir).await;
        let entries: Vec<LogEntry> = store.read_from(0).try_collect().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].sequence, 1);

        let again = store.append("persisted", "p1").await.unwrap();
        assert_eq!(again, AppendOutcome::Duplicate);
    }

    #[tokio::test]
    async fn test_duplicate_leaves_no_sequence_hole() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        store.append("hello", "a1").await.unwrap();
        assert_eq!(store.append("hello", "a1").await.unwrap(), AppendOutcome::Duplicate);

        match store.append("next", "b1").await.unwrap() {
            AppendOutcome::Committed(entry) => assert_eq!(entry.sequence, 2),
            AppendOutcome::Duplicate => panic!("fresh key reported as duplicate"),
        }
    }

    #[tokio::test]
    async fn test_read_spans_pages() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        let total = READ_PAGE_SIZE * 2 + 3;
        for i in 0..total {
            store.append("m", &format!("k{i}")).await.unwrap();
        }

        let entries: Vec<LogEntry> = store.read_from(1).try_collect().await.unwrap();
        assert_eq!(entries.len() as i64, total - 1);
        assert_eq!(entries.first().map(|e| e.sequence), Some(2));
        assert_eq!(entries.last().map(|e| e.sequence), Some(total));
    }

    #[tokio::test]
    async fn test_paused_read_does_not_block_append() {
        let dir = TempDir::new().unwrap();
        let config = StorageConfig {
            path: dir.path().join("courier.db").to_string_lossy().to_string(),
            max_connections: 1,
            ..StorageConfig::default()
        };
        let store = SqliteMessageStore::connect(&config).await.unwrap();
        store.init().await.unwrap();
        for i in 0..3 {
            store.append("m", &format!("k{i}")).await.unwrap();
        }

        let mut replay = store.read_from(0);
        assert_eq!(replay.next().await.unwrap().unwrap().sequence, 1);

        let appended = tokio::time::timeout(
            Duration::from_secs(2),
            store.append("while paused", "late"),
        )
        .await
        .expect("append should not wait on a paused read")
        .unwrap();
        assert!(matches!(appended, AppendOutcome::Committed(_)));
    }

    #[tokio::test]
    async fn test_two_pools_race_on_same_key() {
        let dir = TempDir::new().unwrap();
        let a = open(&dir).await;
        let b = open(&dir).await;

        let (ra, rb) = tokio::join!(a.append("x", "race"), b.append("y", "race"));
        let outcomes = [ra.unwrap(), rb.unwrap()];

        let committed = outcomes
            .iter()
            .filter(|o| matches!(o, AppendOutcome::Committed(_)))
            .count();
        assert_eq!(committed, 1);
        assert!(outcomes.contains(&AppendOutcome::Duplicate));
    }
}
