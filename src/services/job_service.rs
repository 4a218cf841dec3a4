use async_trait::async_trait;
use thiserror::Error;

use crate::inventory::Criterion;
use crate::job::{ClientMetadata, JobRequest, JobSpecification, JobStatus};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobServiceError {
    /// Network, timeout or overload. The same call may succeed later.
    #[error("Transient job service failure: {0}")]
    Transient(String),

    #[error("Job id unavailable: {0}")]
    IdUnavailable(String),

    #[error("Job reservation rejected: {0}")]
    ReservationRejected(String),

    #[error("No cluster/command combination matched the job criteria")]
    NoMatchFound,

    #[error("Job {job_id} could not be claimed: {reason}")]
    ClaimConflict { job_id: String, reason: String },

    #[error("Job {job_id} cannot move from {from} to {to} (current status: {current})")]
    InvalidStatusTransition {
        job_id: String,
        current: JobStatus,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Job not found: {0}")]
    NotFound(String),
}

impl JobServiceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, JobServiceError::Transient(_))
    }
}

/// Server-side job operations used by the execution stages.
#[async_trait]
pub trait AgentJobService: Send + Sync {
    /// Reserve an id for a new job. Fails with `IdUnavailable` when the
    /// requested id is taken and `ReservationRejected` on policy grounds.
    async fn reserve_job_id(
        &self,
        request: &JobRequest,
        metadata: &ClientMetadata,
    ) -> Result<String, JobServiceError>;

    /// Resolve the job's criteria to a cluster and command and return the
    /// resulting specification.
    async fn resolve_job_specification(
        &self,
        job_id: &str,
        cluster_criteria: &[Criterion],
        command_criterion: &Criterion,
    ) -> Result<JobSpecification, JobServiceError>;

    /// Fetch the specification of a job that was resolved before this agent ran.
    async fn get_job_specification(&self, job_id: &str) -> Result<JobSpecification, JobServiceError>;

    /// Turn a reservation into an exclusive claim. Fails with `ClaimConflict`
    /// when the reservation is no longer valid or another agent claimed first.
    async fn claim_job(&self, job_id: &str, metadata: &ClientMetadata) -> Result<(), JobServiceError>;

    /// Compare-and-set the job status.
    async fn change_job_status(
        &self,
        job_id: &str,
        from: JobStatus,
        to: JobStatus,
        message: Option<&str>,
    ) -> Result<(), JobServiceError>;
}
