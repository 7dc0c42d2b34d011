pub mod dispatcher;
pub mod job;
pub mod queue;
pub mod registry;

pub use dispatcher::{DispatchEvent, DispatchOutcome, Dispatcher};
pub use job::{ExecuteKind, JobElement};
pub use queue::{DispatchQueues, QueueKind};
pub use registry::{Assignment, ConnectionId, ConnectionRegistry, WorkerHandle, WorkerSummary};
