use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::execution::context::ExecutionContext;
use crate::execution::stage::{StageError, StageName};
use crate::job::{JobSpecification, JobStatus};
use crate::services::{AgentJobService, FileStager};

const STAGE: StageName = StageName::SetUpJob;

/// Directory inside the job directory that holds staged resource files.
pub const RESOURCES_DIR: &str = "resources";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileRole {
    Setup,
    Config,
    Dependency,
}

/// One file to stage: where it comes from and where it goes.
#[derive(Debug, Clone)]
struct StagingEntry {
    source: String,
    destination: PathBuf,
    role: FileRole,
}

impl StagingEntry {
    fn key(&self) -> String {
        format!("{}|{}", self.destination.display(), self.source)
    }
}

/// Lays out every resource file for the job. Cluster files come first, then
/// command files, then the job's own. Setup scripts are sourced in that order.
fn staging_plan(spec: &JobSpecification, job_dir: &Path) -> Vec<StagingEntry> {
    let resources = job_dir.join(RESOURCES_DIR);
    let cluster_dir = resources.join("clusters").join(&spec.cluster.id);
    let command_dir = resources.join("commands").join(&spec.command.id);
    let job_resources = resources.join("job");

    let mut plan = Vec::new();
    let mut add = |source: &str, destination: &Path, role: FileRole| {
        plan.push(StagingEntry {
            source: source.to_string(),
            destination: destination.to_path_buf(),
            role,
        });
    };

    for (dir, setup_file, configs, dependencies) in [
        (
            &cluster_dir,
            &spec.cluster.setup_file,
            &spec.cluster.configs,
            &spec.cluster.dependencies,
        ),
        (
            &command_dir,
            &spec.command.setup_file,
            &spec.command.configs,
            &spec.command.dependencies,
        ),
    ] {
        if let Some(setup_file) = setup_file {
            add(setup_file, dir, FileRole::Setup);
        }
        for config in configs {
            add(config, &dir.join("config"), FileRole::Config);
        }
        for dependency in dependencies {
            add(dependency, &dir.join("dependencies"), FileRole::Dependency);
        }
    }

    if let Some(setup_file) = &spec.setup_file {
        add(setup_file, &job_resources, FileRole::Setup);
    }
    // Job dependencies land in the working directory itself.
    for dependency in &spec.dependencies {
        add(dependency, job_dir, FileRole::Dependency);
    }
    plan
}

/// Stages setup scripts, configs and dependencies into the job directory and
/// moves the job to `Init`.
pub struct SetUpJobStage {
    file_stager: Arc<dyn FileStager>,
    job_service: Arc<dyn AgentJobService>,
}

impl SetUpJobStage {
    pub fn new(file_stager: Arc<dyn FileStager>, job_service: Arc<dyn AgentJobService>) -> Self {
        Self {
            file_stager,
            job_service,
        }
    }

    pub async fn attempt(&self, ctx: &mut ExecutionContext) -> Result<(), StageError> {
        if ctx.current_job_status() == Some(JobStatus::Init) {
            return Ok(());
        }
        let fatal = |e| StageError::fatal(STAGE, e);
        let job_id = ctx.require_job_id().map_err(fatal)?.to_string();
        let job_dir = ctx.require_job_directory().map_err(fatal)?.to_path_buf();
        let plan = staging_plan(ctx.require_job_specification().map_err(fatal)?, &job_dir);

        let mut setup_files = Vec::new();
        for entry in &plan {
            let key = entry.key();
            let local = match ctx.staged_file(&key) {
                Some(path) => path.to_path_buf(),
                None => {
                    let path = self
                        .file_stager
                        .fetch(&entry.source, &entry.destination)
                        .await
                        .map_err(|e| StageError::from_staging(STAGE, e))?;
                    ctx.record_staged_file(key, path.clone()).map_err(fatal)?;
                    path
                }
            };
            if entry.role == FileRole::Setup {
                setup_files.push(local);
            }
        }
        tracing::info!(job_id = %job_id, files = plan.len(), "Job resources staged");
        ctx.set_setup_files(setup_files).map_err(fatal)?;

        self.job_service
            .change_job_status(&job_id, JobStatus::Claimed, JobStatus::Init, None)
            .await
            .map_err(|e| StageError::from_service(STAGE, e))?;
        ctx.set_job_status(JobStatus::Init).map_err(fatal)
    }
}
