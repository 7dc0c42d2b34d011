use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use crate::error::Result;
use crate::scheduler::ExecuteKind;

/// Directory name of a run inside its date partition.
pub fn run_dir_name(kind: ExecuteKind, run_id: &str) -> String {
    match kind {
        ExecuteKind::Schedule => run_id.to_string(),
        ExecuteKind::Manual => format!("manual-{}", run_id),
        ExecuteKind::Debug => format!("debug-{}", run_id),
    }
}

/// Create (or reuse) `<root>/<yyyy-mm-dd>/<run dir>` for a run.
pub async fn prepare_run_dir(
    root: &Path,
    date: NaiveDate,
    kind: ExecuteKind,
    run_id: &str,
) -> Result<PathBuf> {
    let dir = root
        .join(date.format("%Y-%m-%d").to_string())
        .join(run_dir_name(kind, run_id));
    tokio::fs::create_dir_all(&dir).await?;
    Ok(dir)
}
