//! Attach and resume bookkeeping for a worker's sessions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

use super::cursor::DeliveryCursor;
use crate::bus::LocalHub;
use crate::storage::{LogEntry, SEQUENCE_ORIGIN};

/// A session's live delivery state.
pub struct Subscriber {
    pub session_id: String,
    /// Live entries from the worker's hub.
    pub receiver: broadcast::Receiver<Arc<LogEntry>>,
    pub cursor: DeliveryCursor,
    /// True when this attach resumed a parked session.
    pub recovered: bool,
}

impl Subscriber {
    /// Highest sequence this session has been sent.
    pub fn last_known_sequence(&self) -> i64 {
        self.cursor.last_delivered()
    }
}

struct Parked {
    subscriber: Subscriber,
    parked_at: Instant,
}

/// Hands out subscribers and parks them across disconnects.
///
/// A parked subscriber keeps its hub receiver, so entries broadcast while
/// the client is away queue up and are delivered on resume without a store
/// read. Parked sessions older than the recovery window are dropped.
pub struct SessionRegistry {
    hub: LocalHub,
    window: Duration,
    parked: Mutex<HashMap<String, Parked>>,
}

impl SessionRegistry {
    pub fn new(hub: LocalHub, window: Duration) -> Self {
        Self {
            hub,
            window,
            parked: Mutex::new(HashMap::new()),
        }
    }

    /// Resume `session_id` if it is parked and within the window, otherwise
    /// start a fresh session positioned after `last_sequence`.
    pub async fn attach(&self, session_id: Option<&str>, last_sequence: Option<i64>) -> Subscriber {
        if let Some(id) = session_id {
            let parked = self.parked.lock().await.remove(id);
            match parked {
                Some(p) if p.parked_at.elapsed() < self.window => {
                    info!(session = %id, "Session resumed");
                    let mut subscriber = p.subscriber;
                    subscriber.recovered = true;
                    return subscriber;
                }
                Some(_) => debug!(session = %id, "Parked session expired"),
                None => debug!(session = %id, "Unknown session, starting fresh"),
            }
        }

        // Subscribe before any replay so nothing committed meanwhile is missed.
        Subscriber {
            session_id: Uuid::new_v4().to_string(),
            receiver: self.hub.subscribe(),
            cursor: DeliveryCursor::new(
                last_sequence
                    .unwrap_or(SEQUENCE_ORIGIN)
                    .max(SEQUENCE_ORIGIN),
            ),
            recovered: false,
        }
    }

    /// Keep a disconnected session for resume.
    pub async fn park(&self, subscriber: Subscriber) {
        if self.window.is_zero() {
            return;
        }
        debug!(
            session = %subscriber.session_id,
            last_sequence = subscriber.last_known_sequence(),
            "Session parked"
        );
        self.parked.lock().await.insert(
            subscriber.session_id.clone(),
            Parked {
                subscriber,
                parked_at: Instant::now(),
            },
        );
    }

    /// Drop parked sessions past the window. Returns how many were dropped.
    pub async fn sweep(&self) -> usize {
        let mut parked = self.parked.lock().await;
        let before = parked.len();
        parked.retain(|_, p| p.parked_at.elapsed() < self.window);
        let dropped = before - parked.len();
        if dropped > 0 {
            debug!(dropped, "Swept expired sessions");
        }
        dropped
    }

    pub async fn parked_count(&self) -> usize {
        self.parked.lock().await.len()
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}
