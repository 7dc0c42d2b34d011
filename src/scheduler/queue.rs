use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use tokio::sync::{Mutex, Notify};

use crate::config::QueueConfig;
use crate::error::{HeraError, Result};
use crate::scheduler::job::{ExecuteKind, JobElement};

/// The four queues feeding the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Schedule,
    Manual,
    Debug,
    Exception,
}

impl QueueKind {
    pub const ALL: [QueueKind; 4] = [
        QueueKind::Schedule,
        QueueKind::Manual,
        QueueKind::Debug,
        QueueKind::Exception,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            QueueKind::Schedule => "schedule",
            QueueKind::Manual => "manual",
            QueueKind::Debug => "debug",
            QueueKind::Exception => "exception",
        }
    }
}

impl From<ExecuteKind> for QueueKind {
    fn from(kind: ExecuteKind) -> Self {
        match kind {
            ExecuteKind::Schedule => QueueKind::Schedule,
            ExecuteKind::Manual => QueueKind::Manual,
            ExecuteKind::Debug => QueueKind::Debug,
        }
    }
}

/// Heap entry ordered so the max-heap pops the lowest priority level first,
/// then the earliest enqueued.
#[derive(Debug)]
struct Prioritized {
    seq: u64,
    element: JobElement,
}

impl PartialEq for Prioritized {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Prioritized {}

impl PartialOrd for Prioritized {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Prioritized {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .element
            .priority
            .cmp(&self.element.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug)]
struct Fifo {
    items: VecDeque<JobElement>,
    capacity: Option<usize>,
}

impl Fifo {
    fn bounded(capacity: usize) -> Self {
        Self {
            items: VecDeque::new(),
            capacity: Some(capacity),
        }
    }

    fn unbounded() -> Self {
        Self {
            items: VecDeque::new(),
            capacity: None,
        }
    }
}

/// Dispatch queues shared between trigger callers and dispatcher loops.
///
/// Each queue has its own lock and wake-up signal, so a backlog of schedule
/// runs never delays operator-initiated manual or debug runs.
#[derive(Debug)]
pub struct DispatchQueues {
    schedule: Mutex<BinaryHeap<Prioritized>>,
    schedule_capacity: usize,
    manual: Mutex<Fifo>,
    debug: Mutex<Fifo>,
    exception: Mutex<Fifo>,
    seq: AtomicU64,
    schedule_ready: Notify,
    manual_ready: Notify,
    debug_ready: Notify,
    exception_ready: Notify,
}

impl Default for DispatchQueues {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl DispatchQueues {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            schedule: Mutex::new(BinaryHeap::new()),
            schedule_capacity: config.schedule_capacity,
            manual: Mutex::new(Fifo::bounded(config.manual_capacity)),
            debug: Mutex::new(Fifo::bounded(config.debug_capacity)),
            exception: Mutex::new(Fifo::unbounded()),
            seq: AtomicU64::new(0),
            schedule_ready: Notify::new(),
            manual_ready: Notify::new(),
            debug_ready: Notify::new(),
            exception_ready: Notify::new(),
        }
    }

    fn ready(&self, kind: QueueKind) -> &Notify {
        match kind {
            QueueKind::Schedule => &self.schedule_ready,
            QueueKind::Manual => &self.manual_ready,
            QueueKind::Debug => &self.debug_ready,
            QueueKind::Exception => &self.exception_ready,
        }
    }

    fn fifo(&self, kind: QueueKind) -> Option<&Mutex<Fifo>> {
        match kind {
            QueueKind::Schedule => None,
            QueueKind::Manual => Some(&self.manual),
            QueueKind::Debug => Some(&self.debug),
            QueueKind::Exception => Some(&self.exception),
        }
    }

    /// Enqueue a fresh element on the queue matching its execute kind.
    /// Fails with [`HeraError::QueueFull`] when that queue is at capacity.
    pub async fn push(&self, element: JobElement) -> Result<()> {
        self.push_to(QueueKind::from(element.kind), element).await
    }

    /// Enqueue an element on the retry queue. Never rejects.
    pub async fn push_retry(&self, element: JobElement) {
        let mut fifo = self.exception.lock().await;
        fifo.items.push_back(element);
        drop(fifo);
        self.exception_ready.notify_one();
    }

    async fn push_to(&self, kind: QueueKind, element: JobElement) -> Result<()> {
        match self.fifo(kind) {
            None => {
                let mut heap = self.schedule.lock().await;
                if heap.len() >= self.schedule_capacity {
                    return Err(HeraError::QueueFull {
                        queue: kind.name(),
                        capacity: self.schedule_capacity,
                    });
                }
                let seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
                heap.push(Prioritized { seq, element });
            }
            Some(fifo) => {
                let mut fifo = fifo.lock().await;
                if let Some(capacity) = fifo.capacity {
                    if fifo.items.len() >= capacity {
                        return Err(HeraError::QueueFull {
                            queue: kind.name(),
                            capacity,
                        });
                    }
                }
                fifo.items.push_back(element);
            }
        }
        self.ready(kind).notify_one();
        Ok(())
    }

    pub async fn try_pop(&self, kind: QueueKind) -> Option<JobElement> {
        match self.fifo(kind) {
            None => self.schedule.lock().await.pop().map(|p| p.element),
            Some(fifo) => fifo.lock().await.items.pop_front(),
        }
    }

    /// Wait for and remove the next element of a queue.
    pub async fn pop(&self, kind: QueueKind) -> JobElement {
        loop {
            if let Some(element) = self.try_pop(kind).await {
                return element;
            }
            // notify_one stores a permit when nobody is waiting, so a push
            // between try_pop and here is not lost.
            self.ready(kind).notified().await;
        }
    }

    pub async fn len(&self, kind: QueueKind) -> usize {
        match self.fifo(kind) {
            None => self.schedule.lock().await.len(),
            Some(fifo) => fifo.lock().await.items.len(),
        }
    }

    pub async fn is_empty(&self, kind: QueueKind) -> bool {
        self.len(kind).await == 0
    }
}
