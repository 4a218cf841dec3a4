//! Concrete pipeline stages.
//!
//! The stage set is closed, so [`Stage`] is an enum rather than a trait
//! object. Every stage checks the context before acting and skips work an
//! earlier attempt already finished.

pub mod claim;
pub mod cleanup;
pub mod configure;
pub mod directory;
pub mod launch;
pub mod monitor;
pub mod reserve;
pub mod resolve;
pub mod setup;

pub use claim::ClaimJobStage;
pub use cleanup::CleanupStage;
pub use configure::ConfigureAgentStage;
pub use directory::CreateJobDirectoryStage;
pub use launch::LaunchJobStage;
pub use monitor::MonitorJobStage;
pub use reserve::ReserveJobIdStage;
pub use resolve::ResolveJobSpecificationStage;
pub use setup::SetUpJobStage;

use crate::config::AgentConfig;
use crate::execution::context::ExecutionContext;
use crate::execution::stage::{StageError, StageName};
use crate::services::AgentServices;

pub enum Stage {
    ReserveJobId(ReserveJobIdStage),
    ResolveJobSpecification(ResolveJobSpecificationStage),
    ConfigureAgent(ConfigureAgentStage),
    CreateJobDirectory(CreateJobDirectoryStage),
    ClaimJob(ClaimJobStage),
    SetUpJob(SetUpJobStage),
    LaunchJob(LaunchJobStage),
    MonitorJob(MonitorJobStage),
    Cleanup(CleanupStage),
}

impl Stage {
    pub fn name(&self) -> StageName {
        match self {
            Stage::ReserveJobId(_) => StageName::ReserveJobId,
            Stage::ResolveJobSpecification(_) => StageName::ResolveJobSpecification,
            Stage::ConfigureAgent(_) => StageName::ConfigureAgent,
            Stage::CreateJobDirectory(_) => StageName::CreateJobDirectory,
            Stage::ClaimJob(_) => StageName::ClaimJob,
            Stage::SetUpJob(_) => StageName::SetUpJob,
            Stage::LaunchJob(_) => StageName::LaunchJob,
            Stage::MonitorJob(_) => StageName::MonitorJob,
            Stage::Cleanup(_) => StageName::Cleanup,
        }
    }

    /// Run one attempt of the stage against the context.
    pub async fn attempt(&self, ctx: &mut ExecutionContext) -> Result<(), StageError> {
        match self {
            Stage::ReserveJobId(s) => s.attempt(ctx).await,
            Stage::ResolveJobSpecification(s) => s.attempt(ctx).await,
            Stage::ConfigureAgent(s) => s.attempt(ctx).await,
            Stage::CreateJobDirectory(s) => s.attempt(ctx).await,
            Stage::ClaimJob(s) => s.attempt(ctx).await,
            Stage::SetUpJob(s) => s.attempt(ctx).await,
            Stage::LaunchJob(s) => s.attempt(ctx).await,
            Stage::MonitorJob(s) => s.attempt(ctx).await,
            Stage::Cleanup(s) => s.attempt(ctx).await,
        }
    }

    /// Every stage, in pipeline order, wired to the given collaborators.
    pub fn standard_pipeline(services: &AgentServices, config: &AgentConfig) -> Vec<Stage> {
        vec![
            Stage::ReserveJobId(ReserveJobIdStage::new(services.job_service.clone())),
            Stage::ResolveJobSpecification(ResolveJobSpecificationStage::new(
                services.job_service.clone(),
            )),
            Stage::ConfigureAgent(ConfigureAgentStage::new(&config.jobs_root)),
            Stage::CreateJobDirectory(CreateJobDirectoryStage::new(&config.jobs_root)),
            Stage::ClaimJob(ClaimJobStage::new(services.job_service.clone())),
            Stage::SetUpJob(SetUpJobStage::new(
                services.file_stager.clone(),
                services.job_service.clone(),
            )),
            Stage::LaunchJob(LaunchJobStage::new(
                services.launcher.clone(),
                services.job_service.clone(),
            )),
            Stage::MonitorJob(MonitorJobStage::new(
                services.launcher.clone(),
                services.job_service.clone(),
                config.monitor_poll_interval(),
            )),
            Stage::Cleanup(CleanupStage::new(
                services.launcher.clone(),
                config.delete_job_directory,
            )),
        ]
    }
}
