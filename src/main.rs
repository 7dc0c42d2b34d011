use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use hera_lite::config::{MasterConfig, QueueConfig, WorkerConfig};
use hera_lite::master::Master;
use hera_lite::service::{Fixtures, MemoryServices};
use hera_lite::shutdown::install_shutdown_handler;
use hera_lite::worker::{ExecutionEngine, ShellRunner, WorkContext, WorkerNode};

#[derive(Parser, Debug)]
#[command(name = "hera-lite")]
#[command(version)]
#[command(about = "Master/worker job dispatch engine")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start a master that accepts workers and dispatches runs
    Master(MasterArgs),

    /// Start a worker that connects to a master
    Worker(WorkerArgs),

    /// Run a master and local workers in one process, sharing the
    /// in-memory stores
    Standalone {
        #[command(flatten)]
        master: MasterArgs,

        /// Number of local workers
        #[arg(long, default_value = "1")]
        workers: usize,

        /// Host groups served by every local worker (comma-separated)
        #[arg(long, default_value = "0")]
        host_groups: String,

        /// Concurrent runs per local worker
        #[arg(long, default_value = "8")]
        max_parallel: usize,

        /// Root directory for run workspaces
        #[arg(long)]
        work_dir: Option<PathBuf>,
    },
}

// =============================================================================
// Master Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct MasterArgs {
    /// Address workers connect to
    #[arg(long, default_value = "0.0.0.0:9887")]
    listen: SocketAddr,

    /// Port for the HTTP trigger/status API (optional)
    #[arg(long)]
    api_port: Option<u16>,

    /// Dispatch attempts per run before it is marked failed
    #[arg(long, default_value = "3")]
    max_attempts: u32,

    /// Delay before a failed dispatch is retried (ms)
    #[arg(long, default_value = "1000")]
    retry_delay_ms: u64,

    /// Bounded wait for web-triggered runs (ms)
    #[arg(long, default_value = "3000")]
    ack_timeout_ms: u64,

    /// Workers silent for this long are dropped (ms)
    #[arg(long, default_value = "30000")]
    worker_timeout_ms: u64,

    /// Capacity of the schedule queue
    #[arg(long, default_value = "10000")]
    schedule_capacity: usize,

    /// JSON file seeding the in-memory stores
    #[arg(long)]
    fixtures: Option<PathBuf>,
}

impl MasterArgs {
    fn to_config(&self) -> MasterConfig {
        let mut config = MasterConfig::new(self.listen);
        if let Some(port) = self.api_port {
            config = config.with_api_addr(SocketAddr::from(([0, 0, 0, 0], port)));
        }
        config.max_dispatch_attempts = self.max_attempts;
        config.retry_delay_ms = self.retry_delay_ms;
        config.ack_timeout_ms = self.ack_timeout_ms;
        config.worker_timeout_ms = self.worker_timeout_ms;
        config.queues = QueueConfig {
            schedule_capacity: self.schedule_capacity,
            ..QueueConfig::default()
        };
        config
    }
}

// =============================================================================
// Worker Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct WorkerArgs {
    /// Master address
    #[arg(long, short = 'm', default_value = "127.0.0.1:9887")]
    master: String,

    /// Host name reported to the master
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Host groups this worker serves (comma-separated)
    #[arg(long, default_value = "0")]
    host_groups: String,

    /// Concurrent runs
    #[arg(long, default_value = "8")]
    max_parallel: usize,

    /// Root directory for run workspaces
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Shell used to run job scripts
    #[arg(long, default_value = "sh")]
    shell: String,

    /// JSON file seeding the in-memory stores
    #[arg(long)]
    fixtures: Option<PathBuf>,
}

fn parse_host_groups(s: &str) -> Result<Vec<i32>, std::num::ParseIntError> {
    s.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::parse)
        .collect()
}

fn worker_config(
    master: impl Into<String>,
    host: impl Into<String>,
    host_groups: &str,
    max_parallel: usize,
    work_dir: Option<&PathBuf>,
) -> Result<WorkerConfig, Box<dyn std::error::Error>> {
    let mut config = WorkerConfig::new(master, host).with_max_parallel(max_parallel);
    for group in parse_host_groups(host_groups)? {
        config = config.with_host_group(group);
    }
    if let Some(dir) = work_dir {
        config = config.with_work_dir(dir.clone());
    }
    Ok(config)
}

async fn seeded_services(
    fixtures: Option<&PathBuf>,
) -> Result<MemoryServices, Box<dyn std::error::Error>> {
    let services = MemoryServices::new();
    if let Some(path) = fixtures {
        Fixtures::load(path).await?.install(&services).await;
    }
    Ok(services)
}

fn build_master(config: MasterConfig, services: &MemoryServices) -> Master {
    Master::new(
        config,
        services.history.clone(),
        services.debug_history.clone(),
        services.host_groups.clone(),
    )
}

fn build_worker(config: WorkerConfig, services: &MemoryServices, shell: &str) -> WorkerNode {
    let ctx = WorkContext::new(
        config.clone(),
        services.history.clone(),
        services.debug_history.clone(),
        services.jobs.clone(),
        Arc::new(ShellRunner::new(shell)),
    );
    WorkerNode::new(config, ExecutionEngine::new(ctx))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let cancel = install_shutdown_handler()?;

    match args.command {
        Commands::Master(args) => run_master(args, cancel).await,
        Commands::Worker(args) => run_worker(args, cancel).await,
        Commands::Standalone {
            master,
            workers,
            host_groups,
            max_parallel,
            work_dir,
        } => {
            run_standalone(
                master,
                workers,
                &host_groups,
                max_parallel,
                work_dir.as_ref(),
                cancel,
            )
            .await
        }
    }
}

async fn run_master(
    args: MasterArgs,
    cancel: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.to_config();
    tracing::info!(
        listen_addr = %config.listen_addr,
        api_addr = ?config.api_addr,
        max_attempts = config.max_dispatch_attempts,
        "Starting hera-lite master"
    );

    let services = seeded_services(args.fixtures.as_ref()).await?;
    build_master(config, &services).run(cancel).await?;
    Ok(())
}

async fn run_worker(
    args: WorkerArgs,
    cancel: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = worker_config(
        args.master.clone(),
        args.host.clone(),
        &args.host_groups,
        args.max_parallel,
        args.work_dir.as_ref(),
    )?;
    tracing::info!(
        master = %config.master_addr,
        host = %config.host,
        host_groups = ?config.host_groups,
        max_parallel = config.max_parallel,
        work_dir = %config.work_dir.display(),
        "Starting hera-lite worker"
    );

    let services = seeded_services(args.fixtures.as_ref()).await?;
    build_worker(config, &services, &args.shell).run(cancel).await;
    Ok(())
}

async fn run_standalone(
    args: MasterArgs,
    workers: usize,
    host_groups: &str,
    max_parallel: usize,
    work_dir: Option<&PathBuf>,
    cancel: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let services = seeded_services(args.fixtures.as_ref()).await?;
    let master = build_master(args.to_config(), &services);
    let addr = master.start(cancel.clone()).await?;
    tracing::info!(addr = %addr, workers, "Starting hera-lite standalone");

    let mut handles = Vec::with_capacity(workers);
    for i in 0..workers {
        let config = worker_config(
            SocketAddr::from(([127, 0, 0, 1], addr.port())).to_string(),
            format!("local-{}", i + 1),
            host_groups,
            max_parallel,
            work_dir,
        )?;
        let worker = build_worker(config, &services, "sh");
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move { worker.run(cancel).await }));
    }

    cancel.cancelled().await;
    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}
