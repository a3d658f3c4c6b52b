//! Client publish handling.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::bus::FanoutRouter;
use crate::storage::{AppendOutcome, MessageStore, Result};

/// What a successful publish did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Stored and broadcast under this sequence.
    Committed(i64),
    /// The idempotency key was already stored; nothing changed.
    Duplicate,
}

/// Appends client messages and fans out the ones that are new.
///
/// The client is acknowledged once the message is durable, or when it was
/// already durable from an earlier attempt. A store failure is never
/// acknowledged, so the client retries with the same key.
pub struct PublishHandler {
    store: Arc<dyn MessageStore>,
    router: Arc<FanoutRouter>,
}

impl PublishHandler {
    pub fn new(store: Arc<dyn MessageStore>, router: Arc<FanoutRouter>) -> Self {
        Self { store, router }
    }

    /// Append, broadcast if new, then call `ack`.
    ///
    /// A broadcast failure after commit is logged and still acknowledged:
    /// the entry is durable and reaches any session that missed it on replay.
    #[tracing::instrument(name = "session.publish", skip_all, fields(idempotency_key = %idempotency_key))]
    pub async fn handle<F>(&self, content: &str, idempotency_key: &str, ack: F) -> Result<PublishOutcome>
    where
        F: FnOnce() + Send,
    {
        let outcome = match self.store.append(content, idempotency_key).await? {
            AppendOutcome::Duplicate => {
                debug!("Duplicate publish absorbed");
                PublishOutcome::Duplicate
            }
            AppendOutcome::Committed(entry) => {
                let sequence = entry.sequence;
                if let Err(e) = self.router.broadcast(entry).await {
                    warn!(sequence, error = %e, "Broadcast incomplete after commit");
                }
                PublishOutcome::Committed(sequence)
            }
        };

        ack();
        Ok(outcome)
    }

    /// Run a publish on its own task, independent of the connection that
    /// sent it, and report `ack_id` on `acks` when it is acknowledged.
    pub fn spawn(
        self: &Arc<Self>,
        content: String,
        idempotency_key: String,
        ack_id: u64,
        acks: mpsc::UnboundedSender<u64>,
    ) -> JoinHandle<()> {
        let handler = Arc::clone(self);
        tokio::spawn(async move {
            let ack = move || {
                // Receiver gone means the originator disconnected.
                let _ = acks.send(ack_id);
            };
            if let Err(e) = handler.handle(&content, &idempotency_key, ack).await {
                error!(ack_id, error = %e, "Publish failed, not acknowledged");
            }
        })
    }
}
