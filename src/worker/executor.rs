use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use crate::error::Result;
use crate::service::{JobBundle, JobRunner, RunContext, RunLog};

/// Runs a job's script with `sh -c` inside the run's working directory.
///
/// Stdout and stderr are streamed line by line into the run log while the
/// job runs; the bundle's properties become environment variables.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new("sh")
    }
}

impl ShellRunner {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

#[async_trait]
impl JobRunner for ShellRunner {
    async fn run(&self, job: &JobBundle, ctx: &RunContext) -> Result<i32> {
        tracing::info!(
            job_id = %job.job_id,
            history_id = %ctx.history_id,
            dir = %ctx.work_dir.display(),
            "Executing job"
        );

        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(&job.script)
            .current_dir(&ctx.work_dir)
            .envs(&job.properties)
            .env("HERA_HISTORY_ID", &ctx.history_id)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        tokio::join!(
            pump(stdout, &ctx.log, ""),
            pump(stderr, &ctx.log, "[stderr] ")
        );

        let status = child.wait().await?;
        let exit_code = status.code().unwrap_or(-1);
        tracing::info!(
            job_id = %job.job_id,
            history_id = %ctx.history_id,
            exit_code,
            "Job process exited"
        );
        Ok(exit_code)
    }
}

async fn pump<R: AsyncRead + Unpin>(reader: Option<R>, log: &RunLog, prefix: &str) {
    let Some(reader) = reader else {
        return;
    };
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => log.append(format!("{}{}", prefix, line)).await,
            Ok(None) => break,
            Err(e) => {
                log.append(format!("{}<unreadable output: {}>", prefix, e)).await;
                break;
            }
        }
    }
}
