//! Handler dispatch shared by peer channel implementations.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::error;

use super::EntryHandler;
use crate::storage::LogEntry;

/// Dispatch an entry to all handlers, logging failures.
///
/// Returns `true` if every handler succeeded.
pub async fn dispatch_to_handlers(
    handlers: &Arc<RwLock<Vec<Box<dyn EntryHandler>>>>,
    entry: &Arc<LogEntry>,
) -> bool {
    let handlers_guard = handlers.read().await;
    let mut all_succeeded = true;

    for handler in handlers_guard.iter() {
        if let Err(e) = handler.handle(Arc::clone(entry)).await {
            error!(sequence = entry.sequence, error = %e, "Handler failed");
            all_succeeded = false;
        }
    }

    all_succeeded
}
