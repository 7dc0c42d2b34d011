//! Worker side: executes runs requested by the master.
//!
//! - [`WorkerNode`] holds the connection to the master, answers each
//!   Request with exactly one Response and sends heartbeats.
//! - [`ExecutionEngine`] turns a Request into a run on the bounded
//!   [`WorkerPool`], tracking it in one of three [`RunRegistry`]s.
//! - [`ShellRunner`] is the default [`JobRunner`](crate::service::JobRunner).
//!
//! # Run lifecycle
//!
//! 1. Decode the request; malformed bodies are answered with ERROR
//! 2. Claim the registry slot (schedule runs: one per job id)
//! 3. Mark the history RUNNING, prepare `<work_dir>/<date>/<run dir>`
//! 4. Resolve and run the job, capturing errors and panics
//! 5. Stamp SUCCESS/FAILED from the exit code, flush the log, free the slot

pub mod client;
pub mod engine;
pub mod executor;
pub mod heartbeat;
pub mod pool;
pub mod registry;
pub mod workspace;

pub use client::WorkerNode;
pub use engine::{ExecutionEngine, WorkContext};
pub use executor::ShellRunner;
pub use pool::{RunHandle, WorkerPool};
pub use registry::{RunGuard, RunRegistry, RunningJob};
