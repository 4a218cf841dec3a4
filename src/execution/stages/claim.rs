use std::sync::Arc;

use crate::execution::context::ExecutionContext;
use crate::execution::stage::{StageError, StageName};
use crate::job::JobStatus;
use crate::services::AgentJobService;

const STAGE: StageName = StageName::ClaimJob;

/// Converts the reservation into an exclusive claim for this agent.
pub struct ClaimJobStage {
    job_service: Arc<dyn AgentJobService>,
}

impl ClaimJobStage {
    pub fn new(job_service: Arc<dyn AgentJobService>) -> Self {
        Self { job_service }
    }

    pub async fn attempt(&self, ctx: &mut ExecutionContext) -> Result<(), StageError> {
        if ctx.current_job_status() == Some(JobStatus::Claimed) {
            return Ok(());
        }
        let job_id = ctx
            .require_job_id()
            .map_err(|e| StageError::fatal(STAGE, e))?
            .to_string();

        self.job_service
            .claim_job(&job_id, ctx.client_metadata())
            .await
            .map_err(|e| StageError::from_service(STAGE, e))?;

        tracing::info!(job_id = %job_id, "Job claimed");
        ctx.set_job_status(JobStatus::Claimed)
            .map_err(|e| StageError::fatal(STAGE, e))
    }
}
