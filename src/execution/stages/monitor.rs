use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::execution::context::{ExecutionContext, ProcessResult};
use crate::execution::stage::{StageError, StageName};
use crate::job::JobStatus;
use crate::services::{AgentJobService, JobLauncher, LaunchedJob, ProcessState};

const STAGE: StageName = StageName::MonitorJob;

/// Waits for the job process to exit, enforcing the job timeout, and reports
/// the terminal job status.
pub struct MonitorJobStage {
    launcher: Arc<dyn JobLauncher>,
    job_service: Arc<dyn AgentJobService>,
    poll_interval: Duration,
}

impl MonitorJobStage {
    pub fn new(launcher: Arc<dyn JobLauncher>, job_service: Arc<dyn AgentJobService>, poll_interval: Duration) -> Self {
        Self {
            launcher,
            job_service,
            poll_interval,
        }
    }

    async fn wait_for_exit(&self, job: &LaunchedJob, timeout_secs: Option<u64>) -> Result<ProcessResult, StageError> {
        loop {
            match self.launcher.poll(job).await.map_err(|e| StageError::from_launch(STAGE, e))? {
                ProcessState::Exited { code } => return Ok(ProcessResult::Exited { code }),
                ProcessState::Running => {}
            }

            if let Some(limit) = timeout_secs {
                let elapsed = Utc::now().signed_duration_since(job.started_at);
                if elapsed.num_seconds() >= limit as i64 {
                    tracing::warn!(pid = ?job.pid, timeout_secs = limit, "Job exceeded its timeout, killing");
                    self.launcher.kill(job).await.map_err(|e| StageError::from_launch(STAGE, e))?;
                    return Ok(ProcessResult::TimedOut { after_secs: limit });
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    pub async fn attempt(&self, ctx: &mut ExecutionContext) -> Result<(), StageError> {
        if ctx.current_job_status().is_some_and(|s| s.is_terminal()) {
            return Ok(());
        }
        let fatal = |e| StageError::fatal(STAGE, e);
        let job_id = ctx.require_job_id().map_err(fatal)?.to_string();

        let result = match ctx.process_result() {
            Some(result) => result,
            None => {
                let launched = ctx
                    .launched_job()
                    .cloned()
                    .ok_or_else(|| StageError::fatal(STAGE, "job was never launched"))?;
                let timeout_secs = ctx.job_specification().and_then(|s| s.timeout_secs);
                let result = self.wait_for_exit(&launched, timeout_secs).await?;
                ctx.set_process_result(result).map_err(fatal)?;
                result
            }
        };

        let status = result.job_status();
        tracing::info!(job_id = %job_id, %status, result = %result, "Job process finished");
        self.job_service
            .change_job_status(&job_id, JobStatus::Running, status, Some(&result.to_string()))
            .await
            .map_err(|e| StageError::from_service(STAGE, e))?;
        ctx.set_job_status(status).map_err(fatal)
    }
}
