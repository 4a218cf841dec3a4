use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::services::{JobServiceError, LaunchError, StagingError};

/// Pipeline positions. Declaration order is execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    ReserveJobId,
    ResolveJobSpecification,
    ConfigureAgent,
    CreateJobDirectory,
    ClaimJob,
    SetUpJob,
    LaunchJob,
    MonitorJob,
    Cleanup,
}

impl StageName {
    pub const PIPELINE: [StageName; 9] = [
        StageName::ReserveJobId,
        StageName::ResolveJobSpecification,
        StageName::ConfigureAgent,
        StageName::CreateJobDirectory,
        StageName::ClaimJob,
        StageName::SetUpJob,
        StageName::LaunchJob,
        StageName::MonitorJob,
        StageName::Cleanup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::ReserveJobId => "reserve_job_id",
            StageName::ResolveJobSpecification => "resolve_job_specification",
            StageName::ConfigureAgent => "configure_agent",
            StageName::CreateJobDirectory => "create_job_directory",
            StageName::ClaimJob => "claim_job",
            StageName::SetUpJob => "set_up_job",
            StageName::LaunchJob => "launch_job",
            StageName::MonitorJob => "monitor_job",
            StageName::Cleanup => "cleanup",
        }
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the driver must react to a stage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Transient infrastructure fault: back off and attempt the stage again.
    Retryable,
    /// Business-rule violation: retrying would observe the same result.
    Fatal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Retryable => write!(f, "retryable"),
            ErrorKind::Fatal => write!(f, "fatal"),
        }
    }
}

/// A classified failure raised by one stage attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} error in stage {stage}: {message}")]
pub struct StageError {
    pub stage: StageName,
    pub kind: ErrorKind,
    pub message: String,
}

impl StageError {
    pub fn retryable(stage: StageName, error: impl std::fmt::Display) -> Self {
        Self {
            stage,
            kind: ErrorKind::Retryable,
            message: error.to_string(),
        }
    }

    pub fn fatal(stage: StageName, error: impl std::fmt::Display) -> Self {
        Self {
            stage,
            kind: ErrorKind::Fatal,
            message: error.to_string(),
        }
    }

    /// Transient job service failures are retried, everything else is fatal.
    pub fn from_service(stage: StageName, error: JobServiceError) -> Self {
        if error.is_transient() {
            Self::retryable(stage, error)
        } else {
            Self::fatal(stage, error)
        }
    }

    pub fn from_launch(stage: StageName, error: LaunchError) -> Self {
        if error.is_permanent() {
            Self::fatal(stage, error)
        } else {
            Self::retryable(stage, error)
        }
    }

    pub fn from_staging(stage: StageName, error: StagingError) -> Self {
        if error.is_permanent() {
            Self::fatal(stage, error)
        } else {
            Self::retryable(stage, error)
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::Retryable
    }
}
