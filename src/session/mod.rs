//! Client sessions.
//!
//! A session starts with an `attach` frame. Fresh sessions subscribe to the
//! worker's hub first and then replay everything after the client's last
//! known sequence from the store, so nothing committed in between is lost;
//! resumed sessions pick up their parked hub receiver and skip replay.
//! Every delivery passes through the session's [`DeliveryCursor`], which
//! suppresses entries it has already sent, and a live entry that arrives
//! ahead of a gap first pulls the gap from the store, so clients see the
//! log in sequence order.
//!
//! Publishes run on their own tasks: a disconnect never cancels one, and
//! the acknowledgment is sent only if the originator is still connected.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::storage::LogEntry;
use crate::transport::{ClientFrame, FrameSink, FrameSource, ServerFrame, TransportError};

pub mod cursor;
pub mod publish;
pub mod recovery;
pub mod registry;

pub use cursor::DeliveryCursor;
pub use publish::{PublishHandler, PublishOutcome};
pub use recovery::{RecoveryEngine, RecoveryReport};
pub use registry::{SessionRegistry, Subscriber};

/// Errors that end a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol violation: {0}")]
    Protocol(String),
}

/// Shared services a session runs against.
#[derive(Clone)]
pub struct SessionContext {
    pub registry: Arc<SessionRegistry>,
    pub recovery: Arc<RecoveryEngine>,
    pub publisher: Arc<PublishHandler>,
}

enum ReplayEnd {
    Finished,
    Disconnected,
}

enum LiveEnd {
    ClientLeft,
    HubClosed,
}

/// Drive one client connection until it closes.
///
/// A session that ends because the client left is parked for resume. One
/// that ends on a transport error is dropped.
pub async fn run_session<R, W>(ctx: SessionContext, mut source: R, mut sink: W) -> Result<(), SessionError>
where
    R: FrameSource,
    W: FrameSink,
{
    let (session_id, last_sequence) = match source.recv().await {
        Some(Ok(ClientFrame::Attach {
            session_id,
            last_sequence,
        })) => (session_id, last_sequence),
        Some(Ok(other)) => {
            warn!(?other, "First frame was not attach, closing");
            let _ = sink.close().await;
            return Err(SessionError::Protocol("expected attach".to_string()));
        }
        Some(Err(e)) => return Err(e.into()),
        None => return Ok(()),
    };

    let mut subscriber = ctx
        .registry
        .attach(session_id.as_deref(), last_sequence)
        .await;
    info!(
        session = %subscriber.session_id,
        recovered = subscriber.recovered,
        last_sequence,
        "Session attached"
    );
    sink.send(ServerFrame::Attached {
        session_id: subscriber.session_id.clone(),
        recovered: subscriber.recovered,
    })
    .await?;

    let (acks, mut ack_rx) = mpsc::unbounded_channel();

    if !subscriber.recovered {
        if let ReplayEnd::Disconnected =
            replay(&ctx, &mut subscriber, &mut source, &mut sink, &acks).await?
        {
            debug!(session = %subscriber.session_id, "Client left during replay");
            return Ok(());
        }
    }

    match live(&ctx, &mut subscriber, &mut source, &mut sink, &acks, &mut ack_rx).await? {
        LiveEnd::ClientLeft => {
            info!(session = %subscriber.session_id, "Client disconnected");
            ctx.registry.park(subscriber).await;
        }
        LiveEnd::HubClosed => {
            info!(session = %subscriber.session_id, "Worker shutting down, closing session");
            let _ = sink.close().await;
        }
    }
    Ok(())
}

/// Replay from the store while still accepting publishes.
async fn replay<R, W>(
    ctx: &SessionContext,
    subscriber: &mut Subscriber,
    source: &mut R,
    sink: &mut W,
    acks: &mpsc::UnboundedSender<u64>,
) -> Result<ReplayEnd, SessionError>
where
    R: FrameSource,
    W: FrameSink,
{
    let recovery = ctx.recovery.recover(subscriber, sink);
    tokio::pin!(recovery);

    loop {
        tokio::select! {
            report = &mut recovery => {
                let report = report?;
                if !report.completed {
                    warn!(replayed = report.replayed, "Replay incomplete, continuing live");
                }
                return Ok(ReplayEnd::Finished);
            }
            frame = source.recv() => match frame {
                Some(frame) => handle_inbound(ctx, frame, acks)?,
                None => return Ok(ReplayEnd::Disconnected),
            },
        }
    }
}

/// Deliver live entries and acknowledgments until the client leaves.
async fn live<R, W>(
    ctx: &SessionContext,
    subscriber: &mut Subscriber,
    source: &mut R,
    sink: &mut W,
    acks: &mpsc::UnboundedSender<u64>,
    ack_rx: &mut mpsc::UnboundedReceiver<u64>,
) -> Result<LiveEnd, SessionError>
where
    R: FrameSource,
    W: FrameSink,
{
    loop {
        // Entries first, so a publisher sees its own message before its ack.
        tokio::select! {
            biased;

            received = subscriber.receiver.recv() => match received {
                Ok(entry) => deliver_live(ctx, subscriber, sink, &entry).await?,
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Session fell behind, repairing from store");
                    ctx.recovery.recover(subscriber, sink).await?;
                }
                Err(RecvError::Closed) => return Ok(LiveEnd::HubClosed),
            },
            Some(ack_id) = ack_rx.recv() => {
                sink.send(ServerFrame::Ack { ack_id }).await?;
            }
            frame = source.recv() => match frame {
                Some(frame) => handle_inbound(ctx, frame, acks)?,
                None => return Ok(LiveEnd::ClientLeft),
            },
        }
    }
}

/// Deliver one live entry in sequence order.
///
/// Entries committed on other workers can arrive ahead of earlier ones.
/// Everything before a gap is committed already, so the gap is filled from
/// the store first. If that read fails the entry goes out anyway and the
/// gap is lost to this session.
async fn deliver_live<W>(
    ctx: &SessionContext,
    subscriber: &mut Subscriber,
    sink: &mut W,
    entry: &LogEntry,
) -> Result<(), SessionError>
where
    W: FrameSink,
{
    let sequence = entry.sequence;
    if !subscriber.cursor.is_delivered(sequence) && !subscriber.cursor.is_next(sequence) {
        debug!(
            sequence,
            last_delivered = subscriber.cursor.last_delivered(),
            "Entry arrived ahead of a gap, filling from store"
        );
        ctx.recovery.recover(subscriber, sink).await?;
    }

    if subscriber.cursor.mark(sequence) {
        sink.send(ServerFrame::deliver(entry)).await?;
    } else {
        trace!(sequence, "Suppressed repeat delivery");
    }
    Ok(())
}

fn handle_inbound(
    ctx: &SessionContext,
    frame: crate::transport::Result<ClientFrame>,
    acks: &mpsc::UnboundedSender<u64>,
) -> Result<(), SessionError> {
    match frame {
        Ok(ClientFrame::Publish {
            content,
            idempotency_key,
            ack_id,
        }) => {
            ctx.publisher
                .spawn(content, idempotency_key, ack_id, acks.clone());
            Ok(())
        }
        Ok(ClientFrame::Attach { .. }) => {
            warn!("Ignoring repeated attach");
            Ok(())
        }
        Err(e) if !e.is_fatal() => {
            warn!(error = %e, "Ignoring malformed frame");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
