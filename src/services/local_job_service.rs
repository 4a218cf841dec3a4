use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::DispatchError;
use crate::inventory::{Criterion, ResolutionEngine};
use crate::job::{ClientMetadata, JobRequest, JobSpecification, JobStatus};
use crate::services::job_service::{AgentJobService, JobServiceError};

const DEFAULT_MAX_JOBS: usize = 10_000;

/// Server-side view of a job.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: String,
    pub request: JobRequest,
    pub status: JobStatus,
    pub status_message: Option<String>,
    pub specification: Option<JobSpecification>,
    pub reserved_by: Option<ClientMetadata>,
    pub claimed_by: Option<ClientMetadata>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    fn new(id: String, request: JobRequest, status: JobStatus) -> Self {
        let now = Utc::now();
        Self {
            id,
            request,
            status,
            status_message: None,
            specification: None,
            reserved_by: None,
            claimed_by: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// In-process job registry that resolves criteria with a [`ResolutionEngine`].
pub struct InMemoryJobService {
    jobs: RwLock<HashMap<String, JobRecord>>,
    engine: ResolutionEngine,
    max_jobs: usize,
}

impl InMemoryJobService {
    pub fn new(engine: ResolutionEngine) -> Self {
        Self::with_capacity(engine, DEFAULT_MAX_JOBS)
    }

    pub fn with_capacity(engine: ResolutionEngine, max_jobs: usize) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            engine,
            max_jobs,
        }
    }

    pub fn engine(&self) -> &ResolutionEngine {
        &self.engine
    }

    /// Accept a job whose resources are resolved up front. The job starts in
    /// `Accepted` with its specification stored, ready for a pre-resolved agent
    /// to confirm and claim.
    pub async fn accept_job(&self, request: JobRequest) -> Result<String, JobServiceError> {
        let mut jobs = self.jobs.write().await;
        let id = Self::allocate_id(&jobs, &request, self.max_jobs)?;

        let pair = self
            .engine
            .resolve(&request.cluster_criteria, &request.command_criterion)
            .map_err(resolution_error)?
            .preferred()
            .cloned()
            .ok_or(JobServiceError::NoMatchFound)?;

        let mut record = JobRecord::new(id.clone(), request, JobStatus::Accepted);
        record.specification = Some(JobSpecification::new(
            id.clone(),
            &record.request,
            pair.cluster,
            pair.command,
        ));
        jobs.insert(id.clone(), record);

        tracing::info!(job_id = %id, "Job accepted");
        Ok(id)
    }

    pub async fn job(&self, id: &str) -> Option<JobRecord> {
        self.jobs.read().await.get(id).cloned()
    }

    /// All jobs sorted chronologically by creation time.
    pub async fn all_jobs(&self) -> Vec<JobRecord> {
        let mut jobs: Vec<JobRecord> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    /// Drop jobs in a terminal status. Returns the number removed.
    pub async fn remove_finished_jobs(&self) -> usize {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, job| !job.status.is_terminal());
        before - jobs.len()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    fn allocate_id(
        jobs: &HashMap<String, JobRecord>,
        request: &JobRequest,
        max_jobs: usize,
    ) -> Result<String, JobServiceError> {
        if jobs.len() >= max_jobs {
            return Err(JobServiceError::ReservationRejected(format!(
                "job registry is at capacity ({} jobs)",
                max_jobs
            )));
        }

        match request.requested_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => {
                if jobs.contains_key(id) {
                    Err(JobServiceError::IdUnavailable(id.to_string()))
                } else {
                    Ok(id.to_string())
                }
            }
            _ => Ok(Uuid::new_v4().to_string()),
        }
    }
}

fn resolution_error(e: DispatchError) -> JobServiceError {
    match e {
        DispatchError::NoMatchFound { .. } => JobServiceError::NoMatchFound,
        other => JobServiceError::ReservationRejected(other.to_string()),
    }
}

#[async_trait]
impl AgentJobService for InMemoryJobService {
    async fn reserve_job_id(
        &self,
        request: &JobRequest,
        metadata: &ClientMetadata,
    ) -> Result<String, JobServiceError> {
        let mut jobs = self.jobs.write().await;
        let id = Self::allocate_id(&jobs, request, self.max_jobs)?;

        let mut record = JobRecord::new(id.clone(), request.clone(), JobStatus::Reserved);
        record.reserved_by = Some(metadata.clone());
        jobs.insert(id.clone(), record);

        tracing::info!(job_id = %id, hostname = %metadata.hostname, "Job id reserved");
        Ok(id)
    }

    async fn resolve_job_specification(
        &self,
        job_id: &str,
        cluster_criteria: &[Criterion],
        command_criterion: &Criterion,
    ) -> Result<JobSpecification, JobServiceError> {
        let mut jobs = self.jobs.write().await;
        let record = jobs
            .get_mut(job_id)
            .ok_or_else(|| JobServiceError::NotFound(job_id.to_string()))?;

        if let Some(spec) = &record.specification {
            return Ok(spec.clone());
        }

        let resolution = self
            .engine
            .resolve(cluster_criteria, command_criterion)
            .map_err(resolution_error)?;
        let pair = resolution
            .preferred()
            .cloned()
            .ok_or(JobServiceError::NoMatchFound)?;

        tracing::info!(
            job_id,
            cluster_id = %pair.cluster.id,
            command_id = %pair.command.id,
            candidates = resolution.len(),
            "Job specification resolved"
        );

        let spec = JobSpecification::new(job_id, &record.request, pair.cluster, pair.command);
        record.specification = Some(spec.clone());
        record.updated_at = Utc::now();
        Ok(spec)
    }

    async fn get_job_specification(&self, job_id: &str) -> Result<JobSpecification, JobServiceError> {
        let jobs = self.jobs.read().await;
        jobs.get(job_id)
            .and_then(|record| record.specification.clone())
            .ok_or_else(|| JobServiceError::NotFound(job_id.to_string()))
    }

    async fn claim_job(&self, job_id: &str, metadata: &ClientMetadata) -> Result<(), JobServiceError> {
        let mut jobs = self.jobs.write().await;
        let record = jobs
            .get_mut(job_id)
            .ok_or_else(|| JobServiceError::NotFound(job_id.to_string()))?;

        match &record.claimed_by {
            // A retried claim from the same agent whose first reply was lost.
            Some(claimant) if claimant == metadata => return Ok(()),
            Some(claimant) => {
                return Err(JobServiceError::ClaimConflict {
                    job_id: job_id.to_string(),
                    reason: format!("already claimed by {}", claimant.hostname),
                })
            }
            None => {}
        }

        if !record.status.is_entry() {
            return Err(JobServiceError::ClaimConflict {
                job_id: job_id.to_string(),
                reason: format!("job is {}", record.status),
            });
        }
        if record.specification.is_none() {
            return Err(JobServiceError::ClaimConflict {
                job_id: job_id.to_string(),
                reason: "job has not been resolved".to_string(),
            });
        }

        record.status = JobStatus::Claimed;
        record.claimed_by = Some(metadata.clone());
        record.updated_at = Utc::now();

        tracing::info!(job_id, hostname = %metadata.hostname, "Job claimed");
        Ok(())
    }

    async fn change_job_status(
        &self,
        job_id: &str,
        from: JobStatus,
        to: JobStatus,
        message: Option<&str>,
    ) -> Result<(), JobServiceError> {
        let mut jobs = self.jobs.write().await;
        let record = jobs
            .get_mut(job_id)
            .ok_or_else(|| JobServiceError::NotFound(job_id.to_string()))?;

        // A retried change whose first reply was lost finds the job already at `to`.
        if record.status == to && from.can_transition_to(to) {
            tracing::debug!(job_id, from = %from, to = %to, "Job status already updated");
            return Ok(());
        }

        if record.status != from || !from.can_transition_to(to) {
            return Err(JobServiceError::InvalidStatusTransition {
                job_id: job_id.to_string(),
                current: record.status,
                from,
                to,
            });
        }

        record.status = to;
        record.status_message = message.map(str::to_string);
        record.updated_at = Utc::now();

        tracing::debug!(job_id, from = %from, to = %to, "Job status updated");
        Ok(())
    }
}
