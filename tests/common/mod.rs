//! Shared utilities for integration tests.
//!
//! Runs several workers inside the test process. Each worker opens its own
//! pool on one SQLite file, as separate processes would, and the workers
//! exchange entries over an in-process peer channel.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use courier::bus::ChannelPeerChannel;
use courier::config::Config;
use courier::storage::{init_storage, SqliteMessageStore};
use courier::transport::memory::{self, MemoryClient};
use courier::transport::ServerFrame;
use courier::worker::Worker;

/// How long to wait for an expected frame.
pub const WAIT: Duration = Duration::from_secs(5);

/// How long silence must last to count as "nothing more arrives".
pub const QUIET: Duration = Duration::from_millis(200);

pub struct Cluster {
    pub workers: Vec<Worker>,
    config: Config,
    _network: ChannelPeerChannel,
    _dir: TempDir,
}

impl Cluster {
    pub async fn start(count: usize) -> Self {
        Self::start_with(count, Config::for_test()).await
    }

    pub async fn start_with(count: usize, mut config: Config) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        config.storage.path = dir.path().join("chat.db").to_string_lossy().into_owned();
        config.workers.count = count;

        let network = ChannelPeerChannel::new(0);
        let mut workers = Vec::with_capacity(count);
        for index in 0..count {
            let store = init_storage(&config.storage)
                .await
                .expect("Failed to open store");
            let worker = Worker::start(index, &config, store, Arc::new(network.join(index)))
                .await
                .expect("Failed to start worker");
            workers.push(worker);
        }

        Self {
            workers,
            config,
            _network: network,
            _dir: dir,
        }
    }

    /// Open a client connection to worker `index`.
    pub fn connect(&self, index: usize) -> MemoryClient {
        let (source, sink, client) = memory::connection();
        self.workers[index].spawn_session(source, sink);
        client
    }

    /// Connect to worker `index` and attach; returns the client and the
    /// `attached` reply.
    pub async fn attach(
        &self,
        index: usize,
        session_id: Option<&str>,
        last_sequence: Option<i64>,
    ) -> (MemoryClient, String, bool) {
        let mut client = self.connect(index);
        client
            .attach(session_id, last_sequence)
            .expect("attach should send");
        match expect_frame(&mut client).await {
            ServerFrame::Attached {
                session_id,
                recovered,
            } => (client, session_id, recovered),
            other => panic!("expected attached, got {:?}", other),
        }
    }

    /// A separate connection to the shared log for inspection.
    pub async fn store(&self) -> SqliteMessageStore {
        SqliteMessageStore::connect(&self.config.storage)
            .await
            .expect("Failed to open store")
    }

    /// Wait until worker `index` has `count` parked sessions.
    pub async fn wait_parked(&self, index: usize, count: usize) {
        let registry = self.workers[index].registry();
        tokio::time::timeout(WAIT, async {
            while registry.parked_count().await != count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("session was not parked");
    }
}

pub async fn expect_frame(client: &mut MemoryClient) -> ServerFrame {
    client.recv_timeout(WAIT).await.expect("expected a frame")
}

/// Next frame, which must be a delivery; returns (content, sequence).
pub async fn expect_deliver(client: &mut MemoryClient) -> (String, i64) {
    match expect_frame(client).await {
        ServerFrame::Deliver { content, sequence } => (content, sequence),
        other => panic!("expected deliver, got {:?}", other),
    }
}

pub async fn expect_ack(client: &mut MemoryClient, ack_id: u64) {
    assert_eq!(expect_frame(client).await, ServerFrame::Ack { ack_id });
}

/// Assert nothing more arrives.
pub async fn expect_quiet(client: &mut MemoryClient) {
    if let Some(frame) = client.recv_timeout(QUIET).await {
        panic!("expected no more frames, got {:?}", frame);
    }
}

/// Publish and wait for own delivery then ack; returns the sequence.
pub async fn publish_and_confirm(
    client: &mut MemoryClient,
    content: &str,
    key: &str,
    ack_id: u64,
) -> i64 {
    client
        .publish(content, key, ack_id)
        .expect("publish should send");
    let (delivered, sequence) = expect_deliver(client).await;
    assert_eq!(delivered, content);
    expect_ack(client, ack_id).await;
    sequence
}
