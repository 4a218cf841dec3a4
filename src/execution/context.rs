//! Per-job execution state shared by every stage.
//!
//! Every field has a single writing stage. Fields are write-once: writing the
//! same value again is accepted so that a retried stage attempt stays
//! idempotent, while writing a different value is a [`ContextError`]. The job
//! status is the exception: it moves along the [`JobStatus`] graph.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::execution::stage::StageName;
use crate::job::{ClientMetadata, JobRequest, JobSpecification, JobStatus};
use crate::services::LaunchedJob;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("{field} is already set to a different value")]
    AlreadySet { field: &'static str },

    #[error("Job status cannot move from {from:?} to {to}")]
    InvalidTransition { from: Option<JobStatus>, to: JobStatus },

    #[error("{0} is not available yet")]
    Missing(&'static str),
}

/// How the job process ended, as observed by the monitor stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProcessResult {
    /// `code` is `None` when the process was terminated by a signal.
    Exited { code: Option<i32> },
    /// The job exceeded its timeout and was killed.
    TimedOut { after_secs: u64 },
}

impl ProcessResult {
    /// Terminal job status this result maps to.
    pub fn job_status(&self) -> JobStatus {
        match self {
            ProcessResult::Exited { code: Some(0) } => JobStatus::Succeeded,
            _ => JobStatus::Failed,
        }
    }
}

impl std::fmt::Display for ProcessResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessResult::Exited { code: Some(code) } => write!(f, "job process exited with code {code}"),
            ProcessResult::Exited { code: None } => write!(f, "job process was terminated by a signal"),
            ProcessResult::TimedOut { after_secs } => write!(f, "job timed out after {after_secs}s"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminalStatus {
    Succeeded,
    Failed,
    Killed,
}

impl std::fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminalStatus::Succeeded => write!(f, "succeeded"),
            TerminalStatus::Failed => write!(f, "failed"),
            TerminalStatus::Killed => write!(f, "killed"),
        }
    }
}

/// Why an execution did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureCause {
    /// A stage kept failing with retryable errors until its attempt budget ran out.
    RetriesExhausted {
        stage: StageName,
        attempts: u32,
        last_error: String,
    },
    Fatal { stage: StageName, message: String },
    /// The pipeline ran to completion but the job process did not succeed.
    JobFailed { result: ProcessResult },
    KillRequested { stage: StageName },
    /// The pipeline completed without the job reaching a terminal status.
    Incomplete { job_status: Option<JobStatus> },
}

impl std::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureCause::RetriesExhausted {
                stage,
                attempts,
                last_error,
            } => write!(
                f,
                "retries exhausted in stage {stage} after {attempts} attempts: {last_error}"
            ),
            FailureCause::Fatal { stage, message } => write!(f, "fatal error in stage {stage}: {message}"),
            FailureCause::JobFailed { result } => write!(f, "{result}"),
            FailureCause::KillRequested { stage } => write!(f, "kill requested during stage {stage}"),
            FailureCause::Incomplete { job_status } => match job_status {
                Some(status) => write!(f, "pipeline finished with job status {status}"),
                None => write!(f, "pipeline finished without a job status"),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionOutcome {
    pub status: TerminalStatus,
    pub cause: Option<FailureCause>,
}

impl ExecutionOutcome {
    pub fn succeeded() -> Self {
        Self {
            status: TerminalStatus::Succeeded,
            cause: None,
        }
    }

    pub fn failed(cause: FailureCause) -> Self {
        Self {
            status: TerminalStatus::Failed,
            cause: Some(cause),
        }
    }

    pub fn killed(cause: FailureCause) -> Self {
        Self {
            status: TerminalStatus::Killed,
            cause: Some(cause),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TerminalStatus::Succeeded
    }
}

impl std::fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{}: {}", self.status, cause),
            None => write!(f, "{}", self.status),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "error", rename_all = "snake_case")]
pub enum AttemptResult {
    Succeeded,
    Retryable(String),
    Fatal(String),
    /// Cut short by a kill request or the cleanup timeout.
    Interrupted,
}

/// One entry of the attempt journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    pub stage: StageName,
    /// 1-based attempt number within the stage.
    pub attempt: u32,
    pub result: AttemptResult,
    /// Whether this was the cleanup finalizer run after a failure or kill.
    pub finalizer: bool,
}

fn set_once<T: PartialEq>(slot: &mut Option<T>, value: T, field: &'static str) -> Result<(), ContextError> {
    match slot {
        Some(existing) if *existing == value => Ok(()),
        Some(_) => Err(ContextError::AlreadySet { field }),
        None => {
            *slot = Some(value);
            Ok(())
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionContext {
    request: JobRequest,
    client_metadata: ClientMetadata,
    pre_resolved: bool,
    requested_job_id: Option<String>,
    reserved_job_id: Option<String>,
    job_specification: Option<JobSpecification>,
    job_environment: Option<BTreeMap<String, String>>,
    job_directory: Option<PathBuf>,
    staged_files: BTreeMap<String, PathBuf>,
    setup_files: Option<Vec<PathBuf>>,
    launched_job: Option<LaunchedJob>,
    process_result: Option<ProcessResult>,
    current_job_status: Option<JobStatus>,
    outcome: Option<ExecutionOutcome>,
    attempts: Vec<AttemptRecord>,
}

impl ExecutionContext {
    /// Context for a job the agent reserves and resolves itself.
    pub fn new(request: JobRequest, client_metadata: ClientMetadata) -> Self {
        let requested_job_id = request.requested_id.clone();
        Self {
            request,
            client_metadata,
            pre_resolved: false,
            requested_job_id,
            reserved_job_id: None,
            job_specification: None,
            job_environment: None,
            job_directory: None,
            staged_files: BTreeMap::new(),
            setup_files: None,
            launched_job: None,
            process_result: None,
            current_job_status: None,
            outcome: None,
            attempts: Vec::new(),
        }
    }

    /// Context for a job that was accepted and resolved before the agent ran.
    pub fn pre_resolved(job_id: impl Into<String>, request: JobRequest, client_metadata: ClientMetadata) -> Self {
        let mut ctx = Self::new(request, client_metadata);
        ctx.pre_resolved = true;
        ctx.requested_job_id = Some(job_id.into());
        ctx
    }

    pub fn request(&self) -> &JobRequest {
        &self.request
    }

    pub fn client_metadata(&self) -> &ClientMetadata {
        &self.client_metadata
    }

    pub fn is_pre_resolved(&self) -> bool {
        self.pre_resolved
    }

    pub fn requested_job_id(&self) -> Option<&str> {
        self.requested_job_id.as_deref()
    }

    pub fn reserved_job_id(&self) -> Option<&str> {
        self.reserved_job_id.as_deref()
    }

    pub fn set_reserved_job_id(&mut self, job_id: impl Into<String>) -> Result<(), ContextError> {
        set_once(&mut self.reserved_job_id, job_id.into(), "reserved job id")
    }

    pub fn require_job_id(&self) -> Result<&str, ContextError> {
        self.reserved_job_id().ok_or(ContextError::Missing("reserved job id"))
    }

    pub fn job_specification(&self) -> Option<&JobSpecification> {
        self.job_specification.as_ref()
    }

    pub fn require_job_specification(&self) -> Result<&JobSpecification, ContextError> {
        self.job_specification().ok_or(ContextError::Missing("job specification"))
    }

    pub fn set_job_specification(&mut self, spec: JobSpecification) -> Result<(), ContextError> {
        set_once(&mut self.job_specification, spec, "job specification")
    }

    pub fn cluster_id(&self) -> Option<&str> {
        self.job_specification.as_ref().map(|s| s.cluster.id.as_str())
    }

    pub fn command_id(&self) -> Option<&str> {
        self.job_specification.as_ref().map(|s| s.command.id.as_str())
    }

    pub fn job_environment(&self) -> Option<&BTreeMap<String, String>> {
        self.job_environment.as_ref()
    }

    pub fn set_job_environment(&mut self, environment: BTreeMap<String, String>) -> Result<(), ContextError> {
        set_once(&mut self.job_environment, environment, "job environment")
    }

    pub fn job_directory(&self) -> Option<&Path> {
        self.job_directory.as_deref()
    }

    pub fn require_job_directory(&self) -> Result<&Path, ContextError> {
        self.job_directory().ok_or(ContextError::Missing("job directory"))
    }

    pub fn set_job_directory(&mut self, dir: impl Into<PathBuf>) -> Result<(), ContextError> {
        set_once(&mut self.job_directory, dir.into(), "job directory")
    }

    /// Local path of a file already staged under `key`.
    pub fn staged_file(&self, key: &str) -> Option<&Path> {
        self.staged_files.get(key).map(PathBuf::as_path)
    }

    pub fn staged_files(&self) -> &BTreeMap<String, PathBuf> {
        &self.staged_files
    }

    pub fn record_staged_file(&mut self, key: impl Into<String>, path: PathBuf) -> Result<(), ContextError> {
        let key = key.into();
        match self.staged_files.get(&key) {
            Some(existing) if *existing == path => Ok(()),
            Some(_) => Err(ContextError::AlreadySet { field: "staged file" }),
            None => {
                self.staged_files.insert(key, path);
                Ok(())
            }
        }
    }

    pub fn setup_files(&self) -> Option<&[PathBuf]> {
        self.setup_files.as_deref()
    }

    pub fn set_setup_files(&mut self, files: Vec<PathBuf>) -> Result<(), ContextError> {
        set_once(&mut self.setup_files, files, "setup files")
    }

    pub fn launched_job(&self) -> Option<&LaunchedJob> {
        self.launched_job.as_ref()
    }

    pub fn set_launched_job(&mut self, job: LaunchedJob) -> Result<(), ContextError> {
        set_once(&mut self.launched_job, job, "launched job")
    }

    pub fn process_result(&self) -> Option<ProcessResult> {
        self.process_result
    }

    pub fn set_process_result(&mut self, result: ProcessResult) -> Result<(), ContextError> {
        set_once(&mut self.process_result, result, "process result")
    }

    pub fn current_job_status(&self) -> Option<JobStatus> {
        self.current_job_status
    }

    /// Move the local view of the job status along the transition graph. The
    /// first status must be an entry status.
    pub fn set_job_status(&mut self, to: JobStatus) -> Result<(), ContextError> {
        let allowed = match self.current_job_status {
            None => to.is_entry(),
            Some(from) => from.can_transition_to(to),
        };
        if !allowed {
            return Err(ContextError::InvalidTransition {
                from: self.current_job_status,
                to,
            });
        }
        self.current_job_status = Some(to);
        Ok(())
    }

    pub fn outcome(&self) -> Option<&ExecutionOutcome> {
        self.outcome.as_ref()
    }

    pub fn set_outcome(&mut self, outcome: ExecutionOutcome) -> Result<(), ContextError> {
        set_once(&mut self.outcome, outcome, "execution outcome")
    }

    pub fn attempts(&self) -> &[AttemptRecord] {
        &self.attempts
    }

    /// Journal entries for one stage, in order.
    pub fn attempts_for(&self, stage: StageName) -> impl Iterator<Item = &AttemptRecord> {
        self.attempts.iter().filter(move |a| a.stage == stage)
    }

    pub fn record_attempt(&mut self, stage: StageName, attempt: u32, result: AttemptResult, finalizer: bool) {
        self.attempts.push(AttemptRecord {
            stage,
            attempt,
            result,
            finalizer,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::Criterion;

    fn context() -> ExecutionContext {
        let request = JobRequest::new(
            "job",
            "user",
            vec!["tags=sched:adhoc".parse::<Criterion>().unwrap()],
            "tags=type:spark".parse::<Criterion>().unwrap(),
        )
        .unwrap();
        ExecutionContext::new(request, ClientMetadata::new("host-a"))
    }

    #[test]
    fn write_once_accepts_same_value() {
        let mut ctx = context();
        ctx.set_reserved_job_id("job-1").unwrap();
        ctx.set_reserved_job_id("job-1").unwrap();
        assert_eq!(
            ctx.set_reserved_job_id("job-2"),
            Err(ContextError::AlreadySet { field: "reserved job id" })
        );
        assert_eq!(ctx.reserved_job_id(), Some("job-1"));
    }

    #[test]
    fn status_must_start_at_entry_and_follow_graph() {
        let mut ctx = context();
        assert!(ctx.set_job_status(JobStatus::Claimed).is_err());
        ctx.set_job_status(JobStatus::Reserved).unwrap();
        ctx.set_job_status(JobStatus::Claimed).unwrap();
        ctx.set_job_status(JobStatus::Claimed).unwrap();
        assert!(ctx.set_job_status(JobStatus::Running).is_err());
        ctx.set_job_status(JobStatus::Killed).unwrap();
        assert!(ctx.set_job_status(JobStatus::Failed).is_err());
        assert_eq!(ctx.current_job_status(), Some(JobStatus::Killed));
    }

    #[test]
    fn pre_resolved_context_carries_job_id() {
        let ctx = ExecutionContext::pre_resolved("job-9", context().request().clone(), ClientMetadata::new("h"));
        assert!(ctx.is_pre_resolved());
        assert_eq!(ctx.requested_job_id(), Some("job-9"));
        assert_eq!(ctx.reserved_job_id(), None);
    }

    #[test]
    fn retries_exhausted_cause_display() {
        let cause = FailureCause::RetriesExhausted {
            stage: StageName::ClaimJob,
            attempts: 3,
            last_error: "timeout".to_string(),
        };
        let outcome = ExecutionOutcome::failed(cause);
        assert_eq!(
            outcome.to_string(),
            "failed: retries exhausted in stage claim_job after 3 attempts: timeout"
        );
    }

    #[test]
    fn process_result_maps_to_status() {
        assert_eq!(ProcessResult::Exited { code: Some(0) }.job_status(), JobStatus::Succeeded);
        assert_eq!(ProcessResult::Exited { code: Some(2) }.job_status(), JobStatus::Failed);
        assert_eq!(ProcessResult::Exited { code: None }.job_status(), JobStatus::Failed);
        assert_eq!(ProcessResult::TimedOut { after_secs: 5 }.job_status(), JobStatus::Failed);
    }
}
