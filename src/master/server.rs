use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{HeraError, Result};
use crate::master::context::MasterContext;
use crate::protocol::{frame, framed, Frame};

const REGISTER_TIMEOUT: Duration = Duration::from_secs(10);
const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

/// Accepts worker connections.
pub struct MasterServer {
    listener: TcpListener,
    ctx: Arc<MasterContext>,
}

impl MasterServer {
    pub async fn bind(addr: SocketAddr, ctx: Arc<MasterContext>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, ctx })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(addr = ?self.listener.local_addr().ok(), "Master listening for workers");
        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, addr)) => {
                    let ctx = self.ctx.clone();
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(ctx, stream, addr, cancel).await {
                            tracing::warn!(addr = %addr, error = %e, "Worker connection ended with error");
                        }
                    });
                }
                Err(e) => tracing::warn!(error = %e, "Failed to accept connection"),
            }
        }
        tracing::info!("Master server stopped");
    }
}

/// Serve one worker connection: registration, then responses and heartbeats
/// until the socket closes, the registry drops the worker, or shutdown.
async fn handle_connection(
    ctx: Arc<MasterContext>,
    stream: TcpStream,
    addr: SocketAddr,
    cancel: CancellationToken,
) -> Result<()> {
    let mut conn = framed(stream);

    let info = match tokio::time::timeout(REGISTER_TIMEOUT, conn.next()).await {
        Err(_) => return Err(HeraError::Timeout(REGISTER_TIMEOUT.as_millis() as u64)),
        Ok(None) => return Err(HeraError::ConnectionClosed),
        Ok(Some(frame)) => match frame?.payload {
            Some(frame::Payload::Register(info)) => info,
            other => {
                return Err(HeraError::InvalidRequest(format!(
                    "expected registration, got {:?}",
                    other
                )))
            }
        },
    };

    let id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::channel::<Frame>(OUTBOUND_CHANNEL_CAPACITY);
    let closed = ctx.registry.on_connect(id, addr, info, tx).await;

    let (mut sink, mut stream) = conn.split();
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = sink.send(frame).await {
                tracing::warn!(connection = %id, error = %e, "Failed to write to worker");
                break;
            }
        }
    });

    let result = loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            _ = closed.cancelled() => break Ok(()),
            next = stream.next() => next,
        };
        match next {
            None => break Ok(()),
            Some(Err(e)) => break Err(e),
            Some(Ok(Frame { payload })) => match payload {
                Some(frame::Payload::Response(response)) => {
                    ctx.dispatcher.on_response(id, response).await;
                }
                Some(frame::Payload::Heartbeat(heartbeat)) => {
                    tracing::trace!(connection = %id, running = heartbeat.running, "Heartbeat");
                    ctx.registry.heartbeat(id).await;
                }
                other => {
                    tracing::warn!(connection = %id, frame = ?other, "Unexpected frame from worker");
                }
            },
        }
    };

    writer.abort();
    ctx.dispatcher.on_disconnect(id).await;
    result
}
