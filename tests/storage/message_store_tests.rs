//! MessageStore interface tests.
//!
//! These tests verify the contract of the MessageStore trait. They share
//! one store per run, so each works relative to the log's current end.

use futures::TryStreamExt;
use uuid::Uuid;

use courier::storage::{AppendOutcome, LogEntry, MessageStore, SEQUENCE_ORIGIN};

/// Unique idempotency key.
pub fn key(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4())
}

/// Read the whole log.
pub async fn all_entries<S: MessageStore>(store: &S) -> Vec<LogEntry> {
    store
        .read_from(SEQUENCE_ORIGIN)
        .try_collect()
        .await
        .expect("read should succeed")
}

pub async fn last_sequence<S: MessageStore>(store: &S) -> i64 {
    all_entries(store)
        .await
        .last()
        .map(|e| e.sequence)
        .unwrap_or(SEQUENCE_ORIGIN)
}

pub async fn append_committed<S: MessageStore>(store: &S, content: &str, key: &str) -> LogEntry {
    match store.append(content, key).await.expect("append should succeed") {
        AppendOutcome::Committed(entry) => entry,
        AppendOutcome::Duplicate => panic!("key {} unexpectedly duplicate", key),
    }
}

// =============================================================================
// MessageStore::append tests
// =============================================================================

pub async fn test_append_assigns_next_sequence<S: MessageStore>(store: &S) {
    let before = last_sequence(store).await;

    let entry = append_committed(store, "hello", &key("next")).await;

    assert_eq!(entry.sequence, before + 1, "sequence should follow the log end");
    assert_eq!(entry.content, "hello");
}

pub async fn test_append_sequences_gapless<S: MessageStore>(store: &S) {
    let mut sequences = Vec::new();
    for i in 0..5 {
        let entry = append_committed(store, &format!("m{}", i), &key("gapless")).await;
        sequences.push(entry.sequence);
    }

    for pair in sequences.windows(2) {
        assert_eq!(pair[1], pair[0] + 1, "sequences should be consecutive");
    }
}

pub async fn test_append_duplicate_key<S: MessageStore>(store: &S) {
    let k = key("dup");
    let first = append_committed(store, "hello", &k).await;
    let len = all_entries(store).await.len();

    let again = store.append("hello", &k).await.expect("append should succeed");

    assert_eq!(again, AppendOutcome::Duplicate);
    assert_eq!(all_entries(store).await.len(), len, "log should not grow");
    assert_eq!(last_sequence(store).await, first.sequence);
}

pub async fn test_append_duplicate_keeps_first_content<S: MessageStore>(store: &S) {
    let k = key("first-wins");
    let first = append_committed(store, "original", &k).await;

    let again = store.append("changed", &k).await.expect("append should succeed");
    assert_eq!(again, AppendOutcome::Duplicate);

    let stored: Vec<_> = all_entries(store)
        .await
        .into_iter()
        .filter(|e| e.idempotency_key == k)
        .collect();
    assert_eq!(stored, vec![first]);
}

pub async fn test_append_duplicate_does_not_consume_sequence<S: MessageStore>(store: &S) {
    let k = key("no-burn");
    let first = append_committed(store, "a", &k).await;
    store.append("a", &k).await.expect("append should succeed");

    let next = append_committed(store, "b", &key("no-burn")).await;
    assert_eq!(next.sequence, first.sequence + 1);
}

pub async fn test_append_preserves_content<S: MessageStore>(store: &S) {
    for content in ["", "it's \"quoted\"", "línea\nnueva 🚀", "; DROP TABLE messages; --"] {
        let entry = append_committed(store, content, &key("content")).await;
        let stored = all_entries(store)
            .await
            .into_iter()
            .find(|e| e.sequence == entry.sequence)
            .expect("entry should be readable");
        assert_eq!(stored.content, content);
    }
}

// =============================================================================
// MessageStore::read_from tests
// =============================================================================

pub async fn test_read_from_is_exclusive<S: MessageStore>(store: &S) {
    let a = append_committed(store, "a", &key("excl")).await;
    let b = append_committed(store, "b", &key("excl")).await;

    let entries: Vec<LogEntry> = store
        .read_from(a.sequence)
        .try_collect()
        .await
        .expect("read should succeed");

    assert_eq!(entries.first(), Some(&b), "read should start after the cursor");
}

pub async fn test_read_from_ordered<S: MessageStore>(store: &S) {
    for i in 0..3 {
        append_committed(store, &format!("o{}", i), &key("order")).await;
    }

    let sequences: Vec<i64> = all_entries(store).await.iter().map(|e| e.sequence).collect();
    let mut sorted = sequences.clone();
    sorted.sort_unstable();
    assert_eq!(sequences, sorted, "entries should be in sequence order");
}

pub async fn test_read_past_end_empty<S: MessageStore>(store: &S) {
    let end = last_sequence(store).await;

    let entries: Vec<LogEntry> = store
        .read_from(end)
        .try_collect()
        .await
        .expect("read should succeed");

    assert!(entries.is_empty());
}

pub async fn test_read_from_origin_sees_everything<S: MessageStore>(store: &S) {
    let entries = all_entries(store).await;

    assert!(!entries.is_empty());
    assert_eq!(entries[0].sequence, SEQUENCE_ORIGIN + 1);
    for (i, entry) in entries.iter().enumerate() {
        assert_eq!(entry.sequence, SEQUENCE_ORIGIN + 1 + i as i64);
    }
}

/// Run all MessageStore tests against a store implementation.
#[macro_export]
macro_rules! run_message_store_tests {
    ($store:expr) => {
        use $crate::storage::message_store_tests::*;

        // append tests
        test_append_assigns_next_sequence($store).await;
        println!("  test_append_assigns_next_sequence: PASSED");

        test_append_sequences_gapless($store).await;
        println!("  test_append_sequences_gapless: PASSED");

        test_append_duplicate_key($store).await;
        println!("  test_append_duplicate_key: PASSED");

        test_append_duplicate_keeps_first_content($store).await;
        println!("  test_append_duplicate_keeps_first_content: PASSED");

        test_append_duplicate_does_not_consume_sequence($store).await;
        println!("  test_append_duplicate_does_not_consume_sequence: PASSED");

        test_append_preserves_content($store).await;
        println!("  test_append_preserves_content: PASSED");

        // read tests
        test_read_from_is_exclusive($store).await;
        println!("  test_read_from_is_exclusive: PASSED");

        test_read_from_ordered($store).await;
        println!("  test_read_from_ordered: PASSED");

        test_read_past_end_empty($store).await;
        println!("  test_read_past_end_empty: PASSED");

        test_read_from_origin_sees_everything($store).await;
        println!("  test_read_from_origin_sees_everything: PASSED");
    };
}
