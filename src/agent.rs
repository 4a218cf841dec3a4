use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{AgentConfig, ResolverConfig};
use crate::execution::{ExecutionContext, ExecutionProgress, Stage, StageDriver};
use crate::inventory::{InventoryStore, ResolutionEngine};
use crate::job::{ClientMetadata, JobRequest};
use crate::services::{AgentServices, InMemoryJobService, LocalFileStager, ProcessLauncher};

/// A job execution running on its own task.
pub struct RunningJob {
    pub handle: JoinHandle<ExecutionContext>,
    pub progress: watch::Receiver<ExecutionProgress>,
    pub kill: CancellationToken,
}

/// Runs jobs through the standard stage pipeline. Every job gets its own
/// driver and context, so one agent may run many jobs concurrently.
pub struct JobAgent {
    config: AgentConfig,
    services: AgentServices,
}

impl JobAgent {
    pub fn new(config: AgentConfig, services: AgentServices) -> Self {
        Self { config, services }
    }

    /// Agent wired to in-process collaborators: an in-memory job service
    /// resolving against `inventory`, local file staging and `sh` processes.
    /// The job service is returned too so callers can inspect job records.
    pub fn local(
        config: AgentConfig,
        inventory: Arc<dyn InventoryStore>,
        resolver: ResolverConfig,
    ) -> (Self, Arc<InMemoryJobService>) {
        let job_service = Arc::new(InMemoryJobService::new(ResolutionEngine::new(inventory, resolver)));
        let services = AgentServices::new(
            job_service.clone(),
            Arc::new(LocalFileStager::new()),
            Arc::new(ProcessLauncher::new()),
        );
        (Self::new(config, services), job_service)
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn services(&self) -> &AgentServices {
        &self.services
    }

    pub fn client_metadata(&self) -> ClientMetadata {
        ClientMetadata::new(self.config.hostname.clone())
    }

    pub fn new_context(&self, request: JobRequest) -> ExecutionContext {
        ExecutionContext::new(request, self.client_metadata())
    }

    pub fn pre_resolved_context(&self, job_id: impl Into<String>, request: JobRequest) -> ExecutionContext {
        ExecutionContext::pre_resolved(job_id, request, self.client_metadata())
    }

    /// Fresh driver over the standard pipeline.
    pub fn driver(&self) -> StageDriver {
        StageDriver::new(
            Stage::standard_pipeline(&self.services, &self.config),
            &self.config.retry,
        )
        .with_cleanup_timeout(self.config.cleanup_timeout())
        .with_status_reporter(self.services.job_service.clone())
    }

    pub async fn execute(&self, ctx: ExecutionContext, kill: CancellationToken) -> ExecutionContext {
        self.driver().run(ctx, kill).await
    }

    pub fn spawn(&self, ctx: ExecutionContext) -> RunningJob {
        let driver = self.driver();
        let progress = driver.subscribe();
        let kill = CancellationToken::new();
        let token = kill.clone();
        let handle = tokio::spawn(async move { driver.run(ctx, token).await });
        RunningJob {
            handle,
            progress,
            kill,
        }
    }
}
