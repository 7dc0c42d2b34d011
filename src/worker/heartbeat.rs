use std::time::Duration;
use tokio::sync::mpsc;

use crate::protocol::{Frame, Heartbeat};
use crate::worker::engine::ExecutionEngine;

/// Periodically tells the master this worker is alive and how busy it is.
pub struct HeartbeatSender {
    interval: Duration,
}

impl HeartbeatSender {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval: Duration::from_millis(interval_ms.max(1)),
        }
    }

    /// Send heartbeats on the connection's outbound channel until it closes.
    pub async fn run(&self, tx: mpsc::Sender<Frame>, engine: ExecutionEngine) {
        let mut interval = tokio::time::interval(self.interval);

        loop {
            interval.tick().await;
            let heartbeat = Heartbeat {
                running: engine.running_count() as u32,
            };
            if tx.send(Frame::from(heartbeat)).await.is_err() {
                // Connection closed, stop sending
                break;
            }
        }
    }
}
