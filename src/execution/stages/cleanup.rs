use std::io::ErrorKind;
use std::sync::Arc;

use crate::execution::context::ExecutionContext;
use crate::execution::stage::{StageError, StageName};
use crate::services::JobLauncher;

const STAGE: StageName = StageName::Cleanup;

/// Releases what the job holds locally. Runs last in the pipeline and again
/// as the finalizer after a fatal failure or a kill, so it must tolerate any
/// partially populated context.
pub struct CleanupStage {
    launcher: Arc<dyn JobLauncher>,
    delete_job_directory: bool,
}

impl CleanupStage {
    pub fn new(launcher: Arc<dyn JobLauncher>, delete_job_directory: bool) -> Self {
        Self {
            launcher,
            delete_job_directory,
        }
    }

    pub async fn attempt(&self, ctx: &mut ExecutionContext) -> Result<(), StageError> {
        // Still running means the pipeline was cut short: stop the process.
        if let (Some(launched), None) = (ctx.launched_job(), ctx.process_result()) {
            tracing::info!(job_id = ?ctx.reserved_job_id(), pid = ?launched.pid, "Stopping job process");
            self.launcher.kill(launched).await.map_err(|e| StageError::from_launch(STAGE, e))?;
        }

        if self.delete_job_directory {
            if let Some(dir) = ctx.job_directory() {
                match tokio::fs::remove_dir_all(dir).await {
                    Ok(()) => tracing::debug!(dir = %dir.display(), "Job directory removed"),
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => {
                        return Err(StageError::retryable(
                            STAGE,
                            format!("cannot remove {}: {e}", dir.display()),
                        ))
                    }
                }
            }
        }

        Ok(())
    }
}
