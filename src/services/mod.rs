//! Collaborators the execution stages depend on.
//!
//! Each seam is a trait so the agent can be wired to real infrastructure or to
//! test doubles:
//!
//! - [`AgentJobService`]: reservation, resolution, claim and status updates
//! - [`FileStager`]: fetches setup scripts, configs and dependencies
//! - [`JobLauncher`]: starts, polls and kills the job process
//!
//! Local implementations ([`InMemoryJobService`], [`LocalFileStager`],
//! [`ProcessLauncher`]) back the command-line agent.

pub mod file_stager;
pub mod job_service;
pub mod launcher;
pub mod local_job_service;

use std::sync::Arc;

pub use file_stager::{FileStager, LocalFileStager, StagingError};
pub use job_service::{AgentJobService, JobServiceError};
pub use launcher::{JobLauncher, LaunchError, LaunchRequest, LaunchedJob, ProcessLauncher, ProcessState};
pub use local_job_service::{InMemoryJobService, JobRecord};

/// The collaborator set handed to the stage pipeline.
#[derive(Clone)]
pub struct AgentServices {
    pub job_service: Arc<dyn AgentJobService>,
    pub file_stager: Arc<dyn FileStager>,
    pub launcher: Arc<dyn JobLauncher>,
}

impl AgentServices {
    pub fn new(
        job_service: Arc<dyn AgentJobService>,
        file_stager: Arc<dyn FileStager>,
        launcher: Arc<dyn JobLauncher>,
    ) -> Self {
        Self {
            job_service,
            file_stager,
            launcher,
        }
    }
}
