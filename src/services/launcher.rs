use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use uuid::Uuid;

pub const STDOUT_FILE: &str = "stdout";
pub const STDERR_FILE: &str = "stderr";

#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Job has no command line to run")]
    EmptyCommand,

    #[error("Failed to spawn job process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Unknown launched job: {0}")]
    UnknownJob(Uuid),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LaunchError {
    pub fn is_permanent(&self) -> bool {
        match self {
            LaunchError::EmptyCommand | LaunchError::UnknownJob(_) => true,
            LaunchError::Spawn(e) => matches!(
                e.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
            ),
            LaunchError::Io(_) => false,
        }
    }
}

/// What to start for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub job_id: String,
    pub working_dir: PathBuf,
    pub argv: Vec<String>,
    pub environment: BTreeMap<String, String>,
    /// Scripts sourced, in order, before the command runs.
    pub setup_files: Vec<PathBuf>,
}

/// Handle to a started job process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchedJob {
    pub handle: Uuid,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    /// `code` is `None` when the process was terminated by a signal.
    Exited { code: Option<i32> },
}

/// Starts and supervises job processes.
#[async_trait]
pub trait JobLauncher: Send + Sync {
    async fn launch(&self, request: &LaunchRequest) -> Result<LaunchedJob, LaunchError>;

    /// Once a job has been reported as exited the launcher forgets it, and
    /// later polls fail with `UnknownJob`.
    async fn poll(&self, job: &LaunchedJob) -> Result<ProcessState, LaunchError>;

    /// Terminate the process. A no-op for a process that already exited.
    async fn kill(&self, job: &LaunchedJob) -> Result<(), LaunchError>;
}

/// Runs jobs as local `sh -c` processes in the job directory, with stdout and
/// stderr captured to files there. Processes still running when their handle
/// is dropped are killed.
#[derive(Debug, Default)]
pub struct ProcessLauncher {
    children: Mutex<HashMap<Uuid, Child>>,
}

impl ProcessLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shell script that sources each setup file and then execs the command.
    pub fn build_script(setup_files: &[PathBuf], argv: &[String]) -> String {
        let mut script = String::new();
        for file in setup_files {
            script.push_str(". ");
            script.push_str(&shell_quote(&file.to_string_lossy()));
            script.push('\n');
        }
        let command: Vec<String> = argv.iter().map(|a| shell_quote(a)).collect();
        script.push_str("exec ");
        script.push_str(&command.join(" "));
        script
    }

    async fn output_file(dir: &Path, name: &str) -> Result<std::fs::File, LaunchError> {
        let file = tokio::fs::File::create(dir.join(name)).await?;
        Ok(file.into_std().await)
    }
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[async_trait]
impl JobLauncher for ProcessLauncher {
    async fn launch(&self, request: &LaunchRequest) -> Result<LaunchedJob, LaunchError> {
        if request.argv.is_empty() {
            return Err(LaunchError::EmptyCommand);
        }

        let script = Self::build_script(&request.setup_files, &request.argv);
        let stdout = Self::output_file(&request.working_dir, STDOUT_FILE).await?;
        let stderr = Self::output_file(&request.working_dir, STDERR_FILE).await?;

        tracing::info!(job_id = %request.job_id, argv = ?request.argv, "Launching job process");

        let child = Command::new("sh")
            .arg("-c")
            .arg(&script)
            .current_dir(&request.working_dir)
            .envs(&request.environment)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true)
            .spawn()
            .map_err(LaunchError::Spawn)?;

        let launched = LaunchedJob {
            handle: Uuid::new_v4(),
            pid: child.id(),
            started_at: Utc::now(),
        };
        self.children.lock().await.insert(launched.handle, child);

        tracing::info!(job_id = %request.job_id, pid = ?launched.pid, "Job process started");
        Ok(launched)
    }

    async fn poll(&self, job: &LaunchedJob) -> Result<ProcessState, LaunchError> {
        let mut children = self.children.lock().await;
        let child = children
            .get_mut(&job.handle)
            .ok_or(LaunchError::UnknownJob(job.handle))?;

        match child.try_wait()? {
            None => Ok(ProcessState::Running),
            Some(status) => {
                let state = ProcessState::Exited {
                    code: status.code(),
                };
                children.remove(&job.handle);
                tracing::info!(pid = ?job.pid, exit_code = ?status.code(), "Job process exited");
                Ok(state)
            }
        }
    }

    async fn kill(&self, job: &LaunchedJob) -> Result<(), LaunchError> {
        let mut children = self.children.lock().await;
        let Some(mut child) = children.remove(&job.handle) else {
            return Ok(());
        };
        drop(children);

        child.kill().await?;
        let status = child.wait().await?;
        tracing::info!(pid = ?job.pid, exit_code = ?status.code(), "Job process killed");
        Ok(())
    }
}
