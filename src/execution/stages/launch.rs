use std::sync::Arc;

use crate::execution::context::ExecutionContext;
use crate::execution::stage::{StageError, StageName};
use crate::job::JobStatus;
use crate::services::{AgentJobService, JobLauncher, LaunchRequest};

const STAGE: StageName = StageName::LaunchJob;

/// Starts the job process and moves the job to `Running`.
pub struct LaunchJobStage {
    launcher: Arc<dyn JobLauncher>,
    job_service: Arc<dyn AgentJobService>,
}

impl LaunchJobStage {
    pub fn new(launcher: Arc<dyn JobLauncher>, job_service: Arc<dyn AgentJobService>) -> Self {
        Self {
            launcher,
            job_service,
        }
    }

    fn launch_request(ctx: &ExecutionContext) -> Result<LaunchRequest, StageError> {
        let fatal = |e| StageError::fatal(STAGE, e);
        let spec = ctx.require_job_specification().map_err(fatal)?;
        Ok(LaunchRequest {
            job_id: spec.job_id.clone(),
            working_dir: ctx.require_job_directory().map_err(fatal)?.to_path_buf(),
            argv: spec.argv(),
            environment: ctx
                .job_environment()
                .cloned()
                .unwrap_or_else(|| spec.environment.clone()),
            setup_files: ctx.setup_files().map(<[_]>::to_vec).unwrap_or_default(),
        })
    }

    pub async fn attempt(&self, ctx: &mut ExecutionContext) -> Result<(), StageError> {
        if ctx.current_job_status() == Some(JobStatus::Running) {
            return Ok(());
        }
        let job_id = ctx
            .require_job_id()
            .map_err(|e| StageError::fatal(STAGE, e))?
            .to_string();

        // A retry after a failed status update must not start a second process.
        if ctx.launched_job().is_none() {
            let request = Self::launch_request(ctx)?;
            let launched = self.launcher.launch(&request).await.map_err(|e| StageError::from_launch(STAGE, e))?;
            tracing::info!(job_id = %job_id, pid = ?launched.pid, "Job launched");
            ctx.set_launched_job(launched)
                .map_err(|e| StageError::fatal(STAGE, e))?;
        }

        self.job_service
            .change_job_status(&job_id, JobStatus::Init, JobStatus::Running, None)
            .await
            .map_err(|e| StageError::from_service(STAGE, e))?;
        ctx.set_job_status(JobStatus::Running)
            .map_err(|e| StageError::fatal(STAGE, e))
    }
}
