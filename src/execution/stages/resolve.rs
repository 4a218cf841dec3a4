use std::sync::Arc;

use crate::execution::context::ExecutionContext;
use crate::execution::stage::{StageError, StageName};
use crate::services::AgentJobService;

const STAGE: StageName = StageName::ResolveJobSpecification;

/// Turns the job's criteria into a concrete cluster and command. A
/// pre-resolved job fetches the specification stored at acceptance instead.
pub struct ResolveJobSpecificationStage {
    job_service: Arc<dyn AgentJobService>,
}

impl ResolveJobSpecificationStage {
    pub fn new(job_service: Arc<dyn AgentJobService>) -> Self {
        Self { job_service }
    }

    pub async fn attempt(&self, ctx: &mut ExecutionContext) -> Result<(), StageError> {
        if ctx.job_specification().is_some() {
            return Ok(());
        }
        let job_id = ctx
            .require_job_id()
            .map_err(|e| StageError::fatal(STAGE, e))?
            .to_string();

        let result = if ctx.is_pre_resolved() {
            self.job_service.get_job_specification(&job_id).await
        } else {
            let request = ctx.request();
            self.job_service
                .resolve_job_specification(&job_id, &request.cluster_criteria, &request.command_criterion)
                .await
        };

        let spec = result.map_err(|e| StageError::from_service(STAGE, e))?;

        if spec.job_id != job_id {
            return Err(StageError::fatal(
                STAGE,
                format!("received specification for job {} instead of {}", spec.job_id, job_id),
            ));
        }

        tracing::info!(
            job_id = %job_id,
            cluster_id = %spec.cluster.id,
            command_id = %spec.command.id,
            "Job specification resolved"
        );
        ctx.set_job_specification(spec)
            .map_err(|e| StageError::fatal(STAGE, e))
    }
}
