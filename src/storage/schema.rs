//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.

use sea_query::Iden;

/// Messages table schema.
#[derive(Iden)]
pub enum Messages {
    Table,
    #[iden = "sequence"]
    Sequence,
    #[iden = "idempotency_key"]
    IdempotencyKey,
    #[iden = "content"]
    Content,
}

/// SQL for creating the messages table.
///
/// A plain rowid key takes `max(sequence) + 1` at insert time, so an insert
/// dropped by the idempotency-key conflict leaves no hole. The log is never
/// deleted from, so a sequence is never handed out twice.
pub const CREATE_MESSAGES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    sequence INTEGER PRIMARY KEY,
    idempotency_key TEXT NOT NULL UNIQUE,
    content TEXT NOT NULL
)
"#;

/// One page of entries after a sequence, oldest first.
pub const SELECT_MESSAGES_PAGE: &str =
    "SELECT sequence, idempotency_key, content FROM messages WHERE sequence > ? ORDER BY sequence ASC LIMIT ?";
