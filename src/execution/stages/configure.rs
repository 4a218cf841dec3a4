use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::execution::context::ExecutionContext;
use crate::execution::stage::{StageError, StageName};

const STAGE: StageName = StageName::ConfigureAgent;

pub const ENV_JOB_ID: &str = "DISPATCH_JOB_ID";
pub const ENV_JOB_NAME: &str = "DISPATCH_JOB_NAME";
pub const ENV_USER: &str = "DISPATCH_USER";
pub const ENV_JOB_DIR: &str = "DISPATCH_JOB_DIR";
pub const ENV_CLUSTER_ID: &str = "DISPATCH_CLUSTER_ID";
pub const ENV_CLUSTER_NAME: &str = "DISPATCH_CLUSTER_NAME";
pub const ENV_COMMAND_ID: &str = "DISPATCH_COMMAND_ID";
pub const ENV_COMMAND_NAME: &str = "DISPATCH_COMMAND_NAME";
pub const ENV_AGENT_HOSTNAME: &str = "DISPATCH_AGENT_HOSTNAME";

/// Directory a job runs in. Rejects ids that would escape `jobs_root`.
pub fn job_directory_for(jobs_root: &Path, job_id: &str) -> Option<PathBuf> {
    let valid = !job_id.is_empty()
        && job_id != "."
        && job_id != ".."
        && !job_id.contains(['/', '\\']);
    valid.then(|| jobs_root.join(job_id))
}

/// Builds the environment the job process runs with: the request's variables
/// plus agent-provided ones describing the job and its resources.
pub struct ConfigureAgentStage {
    jobs_root: PathBuf,
}

impl ConfigureAgentStage {
    pub fn new(jobs_root: impl Into<PathBuf>) -> Self {
        Self {
            jobs_root: jobs_root.into(),
        }
    }

    pub async fn attempt(&self, ctx: &mut ExecutionContext) -> Result<(), StageError> {
        if ctx.job_environment().is_some() {
            return Ok(());
        }
        let spec = ctx
            .require_job_specification()
            .map_err(|e| StageError::fatal(STAGE, e))?;

        let job_dir = job_directory_for(&self.jobs_root, &spec.job_id).ok_or_else(|| {
            StageError::fatal(STAGE, format!("job id {:?} is not usable as a directory name", spec.job_id))
        })?;

        let request = ctx.request();
        let mut environment: BTreeMap<String, String> = spec.environment.clone();
        for (key, value) in [
            (ENV_JOB_ID, spec.job_id.clone()),
            (ENV_JOB_NAME, request.name.clone()),
            (ENV_USER, request.user.clone()),
            (ENV_JOB_DIR, job_dir.to_string_lossy().into_owned()),
            (ENV_CLUSTER_ID, spec.cluster.id.clone()),
            (ENV_CLUSTER_NAME, spec.cluster.name.clone()),
            (ENV_COMMAND_ID, spec.command.id.clone()),
            (ENV_COMMAND_NAME, spec.command.name.clone()),
            (ENV_AGENT_HOSTNAME, ctx.client_metadata().hostname.clone()),
        ] {
            environment.insert(key.to_string(), value);
        }

        tracing::debug!(job_id = %spec.job_id, variables = environment.len(), "Job environment configured");
        ctx.set_job_environment(environment)
            .map_err(|e| StageError::fatal(STAGE, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_directory_rejects_traversal() {
        let root = Path::new("/jobs");
        assert_eq!(job_directory_for(root, "abc"), Some(PathBuf::from("/jobs/abc")));
        assert_eq!(job_directory_for(root, ".."), None);
        assert_eq!(job_directory_for(root, "a/b"), None);
        assert_eq!(job_directory_for(root, ""), None);
    }
}
