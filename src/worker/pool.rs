use std::future::Future;
use std::sync::Arc;

use tokio::sync::{oneshot, Semaphore};

use crate::protocol::Response;

/// Bounded set of concurrently executing runs.
///
/// `submit` waits for a free slot, then spawns the run and returns at once.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Slots in use.
    pub fn busy(&self) -> usize {
        self.size - self.permits.available_permits()
    }

    pub async fn submit<F>(&self, request_id: u64, operation: i32, run: F) -> RunHandle
    where
        F: Future<Output = Response> + Send + 'static,
    {
        let permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return RunHandle::ready(Response::error(
                    request_id,
                    operation,
                    "worker pool is shut down",
                ))
            }
        };

        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let response = run.await;
            drop(permit);
            let _ = tx.send(response);
        });
        RunHandle {
            request_id,
            operation,
            rx,
        }
    }
}

/// Completion channel of a submitted run.
#[derive(Debug)]
pub struct RunHandle {
    request_id: u64,
    operation: i32,
    rx: oneshot::Receiver<Response>,
}

impl RunHandle {
    /// A handle that is already resolved, for requests answered without
    /// running anything.
    pub fn ready(response: Response) -> Self {
        let (tx, rx) = oneshot::channel();
        let handle = Self {
            request_id: response.request_id,
            operation: response.operation,
            rx,
        };
        let _ = tx.send(response);
        handle
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Wait for the run's response. A run task that died without answering
    /// still yields an ERROR response.
    pub async fn wait(self) -> Response {
        match self.rx.await {
            Ok(response) => response,
            Err(_) => Response::error(self.request_id, self.operation, "run aborted before responding"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Operation;
    use std::time::Duration;

    #[tokio::test]
    async fn submit_returns_before_run_finishes() {
        let pool = WorkerPool::new(2);
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let handle = pool
            .submit(1, Operation::Manual as i32, async move {
                let _ = release_rx.await;
                Response::ok(1, Operation::Manual as i32)
            })
            .await;
        assert_eq!(pool.busy(), 1);
        release_tx.send(()).unwrap();
        assert!(handle.wait().await.succeeded());
    }

    #[tokio::test]
    async fn saturated_pool_delays_submission() {
        let pool = WorkerPool::new(1);
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let first = pool
            .submit(1, Operation::Schedule as i32, async move {
                let _ = release_rx.await;
                Response::ok(1, Operation::Schedule as i32)
            })
            .await;

        let second = tokio::time::timeout(
            Duration::from_millis(50),
            pool.submit(2, Operation::Schedule as i32, async {
                Response::ok(2, Operation::Schedule as i32)
            }),
        )
        .await;
        assert!(second.is_err(), "submission should wait for a free slot");

        release_tx.send(()).unwrap();
        assert!(first.wait().await.succeeded());
    }

    #[tokio::test]
    async fn panicking_run_still_yields_a_response() {
        let pool = WorkerPool::new(1);
        let handle = pool
            .submit(9, Operation::Debug as i32, async {
                let fail = true;
                if fail {
                    panic!("boom");
                }
                Response::ok(9, Operation::Debug as i32)
            })
            .await;
        let response = handle.wait().await;
        assert_eq!(response.request_id, 9);
        assert!(!response.succeeded());
    }
}
