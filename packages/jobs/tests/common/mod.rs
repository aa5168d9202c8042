use std::error::Error;
use std::time::Duration;

use jobs::{JobId, JobRecord, Orchestrator, RuntimeConfig};
use tempfile::TempDir;

/// An orchestrator with its snapshot directory. The directory lives as long as this.
pub struct TestRuntime {
    pub orchestrator: Orchestrator,
    pub dir: TempDir,
}

pub fn test_config(dir: &TempDir) -> RuntimeConfig {
    RuntimeConfig::with_snapshot_dir(dir.path()).with_poll_interval(Duration::from_millis(5))
}

pub async fn start_with(
    configure: impl FnOnce(RuntimeConfig) -> RuntimeConfig,
) -> Result<TestRuntime, Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let orchestrator = Orchestrator::start(configure(test_config(&dir))).await?;
    Ok(TestRuntime { orchestrator, dir })
}

pub async fn start() -> Result<TestRuntime, Box<dyn Error>> {
    start_with(|c| c).await
}

/// Poll until the job reaches a terminal status.
pub async fn wait_for_terminal(orchestrator: &Orchestrator, job_id: &JobId) -> JobRecord {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(record) = orchestrator.get_job(job_id) {
            if record.status.is_terminal() {
                return record;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {job_id} did not finish in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
