//! Drives one job's [`ExecutionContext`] through the stage pipeline.
//!
//! Each stage is attempted until it succeeds. Retryable failures back off and
//! try again up to the attempt budget, then escalate to a failed outcome.
//! A fatal failure or a kill request skips the remaining stages, runs the
//! cleanup stage once as a finalizer, and moves the job to its terminal
//! status.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::{AgentConfig, RetryConfig};
use crate::execution::backoff::Backoff;
use crate::execution::context::{AttemptResult, ExecutionContext, ExecutionOutcome, FailureCause};
use crate::execution::stage::{ErrorKind, StageName};
use crate::execution::stages::Stage;
use crate::job::JobStatus;
use crate::services::AgentJobService;

/// Where the driver is in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Pending,
    Stage(StageName),
    Done,
    Failed,
    Killed,
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Position::Pending => write!(f, "pending"),
            Position::Stage(stage) => write!(f, "{stage}"),
            Position::Done => write!(f, "done"),
            Position::Failed => write!(f, "failed"),
            Position::Killed => write!(f, "killed"),
        }
    }
}

/// Snapshot published to watchers after every position change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionProgress {
    pub position: Position,
    pub job_status: Option<JobStatus>,
    pub outcome: Option<ExecutionOutcome>,
}

impl Default for ExecutionProgress {
    fn default() -> Self {
        Self {
            position: Position::Pending,
            job_status: None,
            outcome: None,
        }
    }
}

/// Why a stage ended the pipeline early.
enum Abort {
    Failed(FailureCause),
    Killed,
}

pub struct StageDriver {
    stages: Vec<Stage>,
    max_attempts: u32,
    backoff: Backoff,
    cleanup_timeout: Duration,
    status_reporter: Option<Arc<dyn AgentJobService>>,
    progress: watch::Sender<ExecutionProgress>,
}

impl StageDriver {
    pub fn new(stages: Vec<Stage>, retry: &RetryConfig) -> Self {
        let (progress, _) = watch::channel(ExecutionProgress::default());
        Self {
            stages,
            max_attempts: retry.max_attempts.max(1),
            backoff: Backoff::from_config(retry),
            cleanup_timeout: AgentConfig::default().cleanup_timeout(),
            status_reporter: None,
            progress,
        }
    }

    pub fn with_cleanup_timeout(mut self, timeout: Duration) -> Self {
        self.cleanup_timeout = timeout;
        self
    }

    /// Job service told about the terminal status after a failure or kill.
    pub fn with_status_reporter(mut self, job_service: Arc<dyn AgentJobService>) -> Self {
        self.status_reporter = Some(job_service);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<ExecutionProgress> {
        self.progress.subscribe()
    }

    fn publish(&self, position: Position, ctx: &ExecutionContext) {
        self.progress.send_replace(ExecutionProgress {
            position,
            job_status: ctx.current_job_status(),
            outcome: ctx.outcome().cloned(),
        });
    }

    /// Run the pipeline to completion, failure or kill. The returned context
    /// always carries an outcome.
    pub async fn run(self, mut ctx: ExecutionContext, kill: CancellationToken) -> ExecutionContext {
        for stage in &self.stages {
            let name = stage.name();
            self.publish(Position::Stage(name), &ctx);

            if let Err(abort) = self.drive_stage(stage, &mut ctx, &kill).await {
                self.abort(&mut ctx, name, abort).await;
                return ctx;
            }
        }

        let outcome = completed_outcome(&ctx);
        tracing::info!(job_id = ?ctx.reserved_job_id(), %outcome, "Job execution finished");
        if let Err(e) = ctx.set_outcome(outcome) {
            tracing::error!(error = %e, "Failed to record execution outcome");
        }
        self.publish(Position::Done, &ctx);
        ctx
    }

    async fn drive_stage(&self, stage: &Stage, ctx: &mut ExecutionContext, kill: &CancellationToken) -> Result<(), Abort> {
        let name = stage.name();
        let mut attempt = 0u32;

        loop {
            if kill.is_cancelled() {
                return Err(Abort::Killed);
            }
            attempt += 1;
            tracing::debug!(stage = %name, attempt, "Attempting stage");

            let result = tokio::select! {
                biased;
                _ = kill.cancelled() => None,
                result = stage.attempt(ctx) => Some(result),
            };
            let Some(result) = result else {
                ctx.record_attempt(name, attempt, AttemptResult::Interrupted, false);
                tracing::info!(stage = %name, attempt, "Stage attempt interrupted by kill request");
                return Err(Abort::Killed);
            };

            let error = match result {
                Ok(()) => {
                    ctx.record_attempt(name, attempt, AttemptResult::Succeeded, false);
                    // A kill that raced the attempt still wins.
                    if kill.is_cancelled() {
                        return Err(Abort::Killed);
                    }
                    return Ok(());
                }
                Err(error) => error,
            };

            match error.kind {
                ErrorKind::Fatal => {
                    ctx.record_attempt(name, attempt, AttemptResult::Fatal(error.message.clone()), false);
                    tracing::error!(stage = %name, attempt, error = %error.message, "Fatal stage failure");
                    return Err(Abort::Failed(FailureCause::Fatal {
                        stage: name,
                        message: error.message,
                    }));
                }
                ErrorKind::Retryable => {
                    ctx.record_attempt(name, attempt, AttemptResult::Retryable(error.message.clone()), false);
                    if attempt >= self.max_attempts {
                        tracing::error!(stage = %name, attempts = attempt, error = %error.message, "Stage retries exhausted");
                        return Err(Abort::Failed(FailureCause::RetriesExhausted {
                            stage: name,
                            attempts: attempt,
                            last_error: error.message,
                        }));
                    }

                    let delay = self.backoff.delay_for(attempt);
                    tracing::warn!(
                        stage = %name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error.message,
                        "Retryable stage failure, backing off"
                    );
                    tokio::select! {
                        biased;
                        _ = kill.cancelled() => return Err(Abort::Killed),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn abort(&self, ctx: &mut ExecutionContext, stage: StageName, abort: Abort) {
        let (outcome, position, terminal) = match abort {
            Abort::Failed(cause) => (ExecutionOutcome::failed(cause), Position::Failed, JobStatus::Failed),
            Abort::Killed => (
                ExecutionOutcome::killed(FailureCause::KillRequested { stage }),
                Position::Killed,
                JobStatus::Killed,
            ),
        };
        tracing::warn!(job_id = ?ctx.reserved_job_id(), %stage, %outcome, "Job execution aborted");

        if stage != StageName::Cleanup {
            self.run_finalizer(ctx).await;
        }
        self.report_terminal_status(ctx, terminal, &outcome).await;

        if let Err(e) = ctx.set_outcome(outcome) {
            tracing::error!(error = %e, "Failed to record execution outcome");
        }
        self.publish(position, ctx);
    }

    /// Run the cleanup stage once, bounded by the cleanup timeout. Its errors
    /// are logged and never change the outcome.
    async fn run_finalizer(&self, ctx: &mut ExecutionContext) {
        let Some(cleanup) = self.stages.iter().find(|s| s.name() == StageName::Cleanup) else {
            return;
        };
        self.publish(Position::Stage(StageName::Cleanup), ctx);

        let result = match tokio::time::timeout(self.cleanup_timeout, cleanup.attempt(ctx)).await {
            Ok(Ok(())) => AttemptResult::Succeeded,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Cleanup finalizer failed");
                match e.kind {
                    ErrorKind::Retryable => AttemptResult::Retryable(e.message),
                    ErrorKind::Fatal => AttemptResult::Fatal(e.message),
                }
            }
            Err(_) => {
                tracing::warn!(timeout_ms = self.cleanup_timeout.as_millis() as u64, "Cleanup finalizer timed out");
                AttemptResult::Interrupted
            }
        };
        ctx.record_attempt(StageName::Cleanup, 1, result, true);
    }

    /// Move the job to `terminal`, remotely on a best-effort basis and locally
    /// when the transition is legal. A job that never got a status, or already
    /// reached a terminal one, is left alone.
    async fn report_terminal_status(&self, ctx: &mut ExecutionContext, terminal: JobStatus, outcome: &ExecutionOutcome) {
        let Some(current) = ctx.current_job_status() else {
            return;
        };
        if current.is_terminal() {
            return;
        }

        if let (Some(reporter), Some(job_id)) = (&self.status_reporter, ctx.reserved_job_id()) {
            let message = outcome.to_string();
            if let Err(e) = reporter
                .change_job_status(job_id, current, terminal, Some(&message))
                .await
            {
                tracing::warn!(job_id, error = %e, "Failed to report terminal job status");
            }
        }

        if let Err(e) = ctx.set_job_status(terminal) {
            tracing::warn!(error = %e, "Failed to record terminal job status");
        }
    }
}

fn completed_outcome(ctx: &ExecutionContext) -> ExecutionOutcome {
    match (ctx.current_job_status(), ctx.process_result()) {
        (Some(JobStatus::Succeeded), _) => ExecutionOutcome::succeeded(),
        (_, Some(result)) => ExecutionOutcome::failed(FailureCause::JobFailed { result }),
        (job_status, None) => ExecutionOutcome::failed(FailureCause::Incomplete { job_status }),
    }
}
