use std::sync::Arc;

use crate::execution::context::ExecutionContext;
use crate::execution::stage::{StageError, StageName};
use crate::job::JobStatus;
use crate::services::AgentJobService;

const STAGE: StageName = StageName::ReserveJobId;

/// Obtains the job id: reserves one with the job service, or confirms the id
/// of a pre-resolved job.
pub struct ReserveJobIdStage {
    job_service: Arc<dyn AgentJobService>,
}

impl ReserveJobIdStage {
    pub fn new(job_service: Arc<dyn AgentJobService>) -> Self {
        Self { job_service }
    }

    pub async fn attempt(&self, ctx: &mut ExecutionContext) -> Result<(), StageError> {
        if ctx.reserved_job_id().is_some() {
            return Ok(());
        }

        let (job_id, status) = if ctx.is_pre_resolved() {
            let job_id = ctx
                .requested_job_id()
                .ok_or_else(|| StageError::fatal(STAGE, "pre-resolved job has no id"))?
                .to_string();
            tracing::info!(job_id = %job_id, "Confirming pre-resolved job");
            (job_id, JobStatus::Accepted)
        } else {
            tracing::info!(requested_id = ?ctx.requested_job_id(), "Requesting job id reservation");
            let job_id = self
                .job_service
                .reserve_job_id(ctx.request(), ctx.client_metadata())
                .await
                .map_err(|e| StageError::from_service(STAGE, e))?;
            tracing::info!(job_id = %job_id, "Successfully reserved job id");
            (job_id, JobStatus::Reserved)
        };

        ctx.set_job_status(status)
            .map_err(|e| StageError::fatal(STAGE, e))?;
        ctx.set_reserved_job_id(job_id)
            .map_err(|e| StageError::fatal(STAGE, e))
    }
}
