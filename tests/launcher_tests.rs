use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dispatch_lite::services::launcher::{STDERR_FILE, STDOUT_FILE};
use dispatch_lite::services::{
    FileStager, JobLauncher, LaunchError, LaunchRequest, LaunchedJob, LocalFileStager, ProcessLauncher,
    ProcessState, StagingError,
};
use tempfile::TempDir;

fn request(dir: &Path, argv: &[&str]) -> LaunchRequest {
    LaunchRequest {
        job_id: "job-1".to_string(),
        working_dir: dir.to_path_buf(),
        argv: argv.iter().map(|a| a.to_string()).collect(),
        environment: BTreeMap::new(),
        setup_files: Vec::new(),
    }
}

/// Poll until the process exits, giving up after five seconds.
async fn wait_for_exit(launcher: &ProcessLauncher, job: &LaunchedJob) -> ProcessState {
    for _ in 0..500 {
        match launcher.poll(job).await.unwrap() {
            ProcessState::Running => tokio::time::sleep(Duration::from_millis(10)).await,
            exited => return exited,
        }
    }
    panic!("job process did not exit");
}

/// Whether `pid` is a live (non-zombie) process.
fn process_alive(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.trim_start().chars().next())
            .is_some_and(|state| state != 'Z' && state != 'X'),
        Err(_) => false,
    }
}

fn read(dir: &Path, name: &str) -> String {
    std::fs::read_to_string(dir.join(name)).unwrap()
}

#[tokio::test]
async fn test_launch_captures_stdout() {
    let dir = TempDir::new().unwrap();
    let launcher = ProcessLauncher::new();

    let job = launcher
        .launch(&request(dir.path(), &["echo", "hello"]))
        .await
        .unwrap();
    assert!(job.pid.is_some());

    assert_eq!(wait_for_exit(&launcher, &job).await, ProcessState::Exited { code: Some(0) });
    assert_eq!(read(dir.path(), STDOUT_FILE), "hello\n");
    assert_eq!(read(dir.path(), STDERR_FILE), "");
}

#[tokio::test]
async fn test_arguments_are_not_shell_expanded() {
    let dir = TempDir::new().unwrap();
    let launcher = ProcessLauncher::new();

    let job = launcher
        .launch(&request(dir.path(), &["echo", "$HOME", "it's"]))
        .await
        .unwrap();

    wait_for_exit(&launcher, &job).await;
    assert_eq!(read(dir.path(), STDOUT_FILE), "$HOME it's\n");
}

#[tokio::test]
async fn test_nonzero_exit_code() {
    let dir = TempDir::new().unwrap();
    let launcher = ProcessLauncher::new();

    let job = launcher
        .launch(&request(dir.path(), &["sh", "-c", "echo oops >&2; exit 3"]))
        .await
        .unwrap();

    assert_eq!(wait_for_exit(&launcher, &job).await, ProcessState::Exited { code: Some(3) });
    assert_eq!(read(dir.path(), STDERR_FILE), "oops\n");

    // Reaped processes are forgotten; killing one is a no-op.
    assert!(matches!(launcher.poll(&job).await, Err(LaunchError::UnknownJob(_))));
    launcher.kill(&job).await.unwrap();
}

#[tokio::test]
async fn test_environment_and_setup_files() {
    let dir = TempDir::new().unwrap();
    let setup = dir.path().join("setup.sh");
    std::fs::write(&setup, "export GREETING=\"hello $TARGET\"\n").unwrap();

    let launcher = ProcessLauncher::new();
    let mut req = request(dir.path(), &["sh", "-c", "echo \"$GREETING\"; pwd"]);
    req.environment.insert("TARGET".to_string(), "world".to_string());
    req.setup_files = vec![setup];

    let job = launcher.launch(&req).await.unwrap();
    assert_eq!(wait_for_exit(&launcher, &job).await, ProcessState::Exited { code: Some(0) });

    let stdout = read(dir.path(), STDOUT_FILE);
    let mut lines = stdout.lines();
    assert_eq!(lines.next(), Some("hello world"));
    let cwd = PathBuf::from(lines.next().unwrap());
    assert_eq!(cwd.canonicalize().unwrap(), dir.path().canonicalize().unwrap());
}

#[tokio::test]
async fn test_kill_running_process() {
    let dir = TempDir::new().unwrap();
    let launcher = ProcessLauncher::new();

    let job = launcher
        .launch(&request(dir.path(), &["sleep", "30"]))
        .await
        .unwrap();
    assert_eq!(launcher.poll(&job).await.unwrap(), ProcessState::Running);

    launcher.kill(&job).await.unwrap();
    assert!(!process_alive(job.pid.unwrap()));
    assert!(matches!(launcher.poll(&job).await, Err(LaunchError::UnknownJob(_))));

    // Killing again is a no-op.
    launcher.kill(&job).await.unwrap();
}

#[tokio::test]
async fn test_dropping_launcher_kills_running_processes() {
    let dir = TempDir::new().unwrap();
    let launcher = ProcessLauncher::new();

    let job = launcher
        .launch(&request(dir.path(), &["sleep", "30"]))
        .await
        .unwrap();
    let pid = job.pid.unwrap();
    assert!(process_alive(pid));

    drop(launcher);

    for _ in 0..500 {
        if !process_alive(pid) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job process {pid} survived its launcher");
}

#[tokio::test]
async fn test_empty_command_is_rejected() {
    let dir = TempDir::new().unwrap();
    let launcher = ProcessLauncher::new();

    let err = launcher.launch(&request(dir.path(), &[])).await.unwrap_err();
    assert!(matches!(err, LaunchError::EmptyCommand));
    assert!(err.is_permanent());
}

#[tokio::test]
async fn test_poll_unknown_job() {
    let launcher = ProcessLauncher::new();
    let job = LaunchedJob {
        handle: uuid::Uuid::new_v4(),
        pid: None,
        started_at: chrono::Utc::now(),
    };

    assert!(matches!(
        launcher.poll(&job).await,
        Err(LaunchError::UnknownJob(_))
    ));
}

#[tokio::test]
async fn test_stager_copies_local_files() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    let file = src.path().join("app.jar");
    std::fs::write(&file, b"jar-bytes").unwrap();

    let stager = LocalFileStager::new();
    let target = dest.path().join("resources/job");

    let staged = stager.fetch(file.to_str().unwrap(), &target).await.unwrap();
    assert_eq!(staged, target.join("app.jar"));
    assert_eq!(std::fs::read(&staged).unwrap(), b"jar-bytes");

    let uri = format!("file://{}", file.display());
    let staged = stager.fetch(&uri, dest.path()).await.unwrap();
    assert_eq!(staged, dest.path().join("app.jar"));
}

#[tokio::test]
async fn test_stager_rejects_missing_and_remote_sources() {
    let dest = TempDir::new().unwrap();
    let stager = LocalFileStager::new();

    let err = stager
        .fetch("/definitely/not/here.sh", dest.path())
        .await
        .unwrap_err();
    assert!(matches!(err, StagingError::NotFound(_)));
    assert!(err.is_permanent());

    for source in ["s3://bucket/setup.sh", "relative/setup.sh"] {
        let err = stager.fetch(source, dest.path()).await.unwrap_err();
        assert!(matches!(err, StagingError::UnsupportedSource(_)), "{source}");
    }
}
