use std::time::Duration;

use futures::{SinkExt, StreamExt};
use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::error::Result;
use crate::protocol::{frame, framed, Frame, WorkerInfo};
use crate::worker::engine::ExecutionEngine;
use crate::worker::heartbeat::HeartbeatSender;

const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

/// Worker process: keeps a connection to the master open and feeds its
/// requests to the execution engine.
pub struct WorkerNode {
    config: WorkerConfig,
    engine: ExecutionEngine,
}

impl WorkerNode {
    pub fn new(config: WorkerConfig, engine: ExecutionEngine) -> Self {
        Self { config, engine }
    }

    pub fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    /// Connect, serve, and reconnect with jittered backoff until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            match self.connect_and_serve(&cancel).await {
                Ok(()) => tracing::info!(master = %self.config.master_addr, "Connection to master closed"),
                Err(e) => tracing::warn!(master = %self.config.master_addr, error = %e, "Connection to master failed"),
            }
            if cancel.is_cancelled() {
                break;
            }

            let delay = reconnect_delay(self.config.reconnect_delay_ms);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        tracing::info!("Worker stopped");
    }

    async fn connect_and_serve(&self, cancel: &CancellationToken) -> Result<()> {
        let stream = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            stream = TcpStream::connect(&self.config.master_addr) => stream?,
        };
        tracing::info!(master = %self.config.master_addr, host = %self.config.host, "Connected to master");
        self.serve(stream, cancel).await
    }

    /// Serve one master connection until it closes or `cancel` fires.
    ///
    /// Runs already accepted keep going after the connection is gone; their
    /// responses are dropped but their history is still written.
    pub async fn serve(&self, stream: TcpStream, cancel: &CancellationToken) -> Result<()> {
        let mut conn = framed(stream);
        conn.send(Frame::from(WorkerInfo {
            host: self.config.host.clone(),
            host_groups: self.config.host_groups.clone(),
            max_parallel: self.config.max_parallel as u32,
        }))
        .await?;

        let (mut sink, mut stream) = conn.split();
        let (tx, mut rx) = mpsc::channel::<Frame>(OUTBOUND_CHANNEL_CAPACITY);

        let writer = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = sink.send(frame).await {
                    tracing::warn!(error = %e, "Failed to write to master");
                    break;
                }
            }
        });

        let heartbeat_tx = tx.clone();
        let heartbeat_engine = self.engine.clone();
        let heartbeat_interval = self.config.heartbeat_interval_ms;
        let heartbeat = tokio::spawn(async move {
            HeartbeatSender::new(heartbeat_interval)
                .run(heartbeat_tx, heartbeat_engine)
                .await;
        });

        let result = loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                next = stream.next() => next,
            };
            match next {
                None => break Ok(()),
                Some(Err(e)) => break Err(e),
                Some(Ok(Frame {
                    payload: Some(frame::Payload::Request(request)),
                })) => {
                    let engine = self.engine.clone();
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let response = engine.execute(request).await.wait().await;
                        if tx.send(Frame::from(response)).await.is_err() {
                            tracing::warn!("Connection closed before response could be sent");
                        }
                    });
                }
                Some(Ok(other)) => {
                    tracing::debug!(frame = ?other.payload, "Ignoring unexpected frame from master");
                }
            }
        };

        heartbeat.abort();
        writer.abort();
        result
    }
}

fn reconnect_delay(base_ms: u64) -> Duration {
    let base = base_ms.max(1);
    let jitter = rand::thread_rng().gen_range(0..=base / 2);
    Duration::from_millis(base + jitter)
}

