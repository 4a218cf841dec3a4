use std::io::ErrorKind;
use std::path::PathBuf;

use crate::execution::context::ExecutionContext;
use crate::execution::stage::{StageError, StageName};
use crate::execution::stages::configure::job_directory_for;

const STAGE: StageName = StageName::CreateJobDirectory;

pub struct CreateJobDirectoryStage {
    jobs_root: PathBuf,
}

impl CreateJobDirectoryStage {
    pub fn new(jobs_root: impl Into<PathBuf>) -> Self {
        Self {
            jobs_root: jobs_root.into(),
        }
    }

    pub async fn attempt(&self, ctx: &mut ExecutionContext) -> Result<(), StageError> {
        let job_id = ctx.require_job_id().map_err(|e| StageError::fatal(STAGE, e))?;
        let dir = job_directory_for(&self.jobs_root, job_id)
            .ok_or_else(|| StageError::fatal(STAGE, format!("job id {job_id:?} is not usable as a directory name")))?;

        // create_dir_all succeeds on an existing directory, so retries are safe.
        tokio::fs::create_dir_all(&dir).await.map_err(|e| match e.kind() {
            ErrorKind::PermissionDenied | ErrorKind::AlreadyExists => {
                StageError::fatal(STAGE, format!("cannot create {}: {e}", dir.display()))
            }
            _ => StageError::retryable(STAGE, format!("cannot create {}: {e}", dir.display())),
        })?;

        tracing::info!(job_id, dir = %dir.display(), "Job directory ready");
        ctx.set_job_directory(dir)
            .map_err(|e| StageError::fatal(STAGE, e))
    }
}
