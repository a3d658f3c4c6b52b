//! Catch-up replay from the message store.

use std::sync::Arc;

use futures::StreamExt;
use tracing::{error, info};

use super::registry::Subscriber;
use crate::storage::MessageStore;
use crate::transport::{FrameSink, Result, ServerFrame};

/// Outcome of one replay.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Entries sent to the client.
    pub replayed: usize,
    /// Entries the session had already been sent.
    pub skipped: usize,
    /// False when a store read failed and replay was abandoned.
    pub completed: bool,
}

/// Replays committed entries a session has not been sent.
pub struct RecoveryEngine {
    store: Arc<dyn MessageStore>,
}

impl RecoveryEngine {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self { store }
    }

    /// Send every stored entry above the subscriber's watermark, in
    /// sequence order.
    ///
    /// A store failure ends the replay early and is only logged; the
    /// session stays live. Only a transport failure is returned.
    #[tracing::instrument(
        name = "session.recover",
        skip_all,
        fields(session = %subscriber.session_id, after = subscriber.cursor.last_delivered())
    )]
    pub async fn recover<S>(&self, subscriber: &mut Subscriber, sink: &mut S) -> Result<RecoveryReport>
    where
        S: FrameSink + ?Sized,
    {
        let mut report = RecoveryReport::default();
        let mut entries = self.store.read_from(subscriber.cursor.last_delivered());

        while let Some(next) = entries.next().await {
            let entry = match next {
                Ok(entry) => entry,
                Err(e) => {
                    error!(error = %e, replayed = report.replayed, "Replay read failed, abandoning");
                    return Ok(report);
                }
            };

            if !subscriber.cursor.mark(entry.sequence) {
                report.skipped += 1;
                continue;
            }
            sink.send(ServerFrame::deliver(&entry)).await?;
            report.replayed += 1;
        }

        report.completed = true;
        info!(replayed = report.replayed, skipped = report.skipped, "Replay complete");
        Ok(report)
    }
}
