//! One worker: a client endpoint wired to the shared log and its peers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bus::{BusError, FanoutRouter, LocalHub, PeerChannel};
use crate::config::Config;
use crate::session::{
    run_session, PublishHandler, RecoveryEngine, SessionContext, SessionError, SessionRegistry,
};
use crate::storage::MessageStore;
use crate::transport::{websocket, FrameSink, FrameSource};
use crate::utils::retry::ACCEPT_RETRY_DELAY;

/// Errors starting or running a worker.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A worker process's services.
pub struct Worker {
    index: usize,
    router: Arc<FanoutRouter>,
    ctx: SessionContext,
}

impl Worker {
    /// Wire a worker over `store` and `peers` and start consuming peer
    /// traffic.
    pub async fn start(
        index: usize,
        config: &Config,
        store: Arc<dyn MessageStore>,
        peers: Arc<dyn PeerChannel>,
    ) -> Result<Self, WorkerError> {
        let hub = LocalHub::new(config.session.channel_capacity);
        let router = Arc::new(FanoutRouter::new(index, hub.clone(), peers));
        router.start().await?;

        let ctx = SessionContext {
            registry: Arc::new(SessionRegistry::new(
                hub,
                config.session.recovery_window(),
            )),
            recovery: Arc::new(RecoveryEngine::new(Arc::clone(&store))),
            publisher: Arc::new(PublishHandler::new(store, Arc::clone(&router))),
        };

        info!(worker = index, "Worker started");
        Ok(Self { index, router, ctx })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.ctx.registry
    }

    pub fn hub(&self) -> &LocalHub {
        self.router.hub()
    }

    /// Run a session over an already-established connection.
    pub fn spawn_session<R, W>(&self, source: R, sink: W) -> JoinHandle<Result<(), SessionError>>
    where
        R: FrameSource + 'static,
        W: FrameSink + 'static,
    {
        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            let result = run_session(ctx, source, sink).await;
            if let Err(e) = &result {
                warn!(error = %e, "Session ended with error");
            }
            result
        })
    }

    /// Periodically drop parked sessions past the recovery window.
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let registry = Arc::clone(&self.ctx.registry);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                registry.sweep().await;
            }
        })
    }

    /// Accept WebSocket clients on `listener` until `shutdown` resolves.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<(), WorkerError>
    where
        F: Future<Output = ()>,
    {
        let sweep_every = self.ctx.registry.window().max(Duration::from_secs(1));
        let sweeper = self.spawn_sweeper(sweep_every);
        info!(worker = self.index, address = %listener.local_addr()?, "Accepting clients");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(worker = self.index, "Shutdown requested");
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(a) => a,
                        Err(e) => {
                            error!(error = %e, "Failed to accept client connection");
                            tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                            continue;
                        }
                    };
                    debug!(%peer, "Client connected");

                    let ctx = self.ctx.clone();
                    tokio::spawn(async move {
                        let (source, sink) = match websocket::accept(stream).await {
                            Ok(halves) => halves,
                            Err(e) => {
                                warn!(%peer, error = %e, "WebSocket handshake failed");
                                return;
                            }
                        };
                        if let Err(e) = run_session(ctx, source, sink).await {
                            warn!(%peer, error = %e, "Session ended with error");
                        }
                    });
                }
            }
        }

        sweeper.abort();
        Ok(())
    }
}
