
use dispatch_lite::execution::stages::configure::{ENV_CLUSTER_ID, ENV_JOB_DIR, ENV_JOB_ID};
use dispatch_lite::execution::{ErrorKind, ExecutionContext, StageName};
use dispatch_lite::job::JobStatus;
use dispatch_lite::services::JobServiceError;

use test_harness::{FakeLauncher, Harness, Op};

/// Run every stage before `until` once, in pipeline order.
async fn run_until(harness: &Harness, ctx: &mut ExecutionContext, until: StageName) {
    for stage in harness.pipeline() {
        if stage.name() == until {
            return;
        }
        stage.attempt(ctx).await.unwrap();
    }
}

#[tokio::test]
async fn test_reserve_skips_when_already_reserved() {
    let harness = Harness::new(FakeLauncher::exiting(0));
    let stage = harness.stage(StageName::ReserveJobId);
    let mut ctx = harness.context();

    stage.attempt(&mut ctx).await.unwrap();
    let id = ctx.reserved_job_id().unwrap().to_string();
    stage.attempt(&mut ctx).await.unwrap();

    assert_eq!(harness.job_service.calls(Op::Reserve), 1);
    assert_eq!(ctx.reserved_job_id(), Some(id.as_str()));
    assert_eq!(ctx.current_job_status(), Some(JobStatus::Reserved));
}

#[tokio::test]
async fn test_job_environment_and_directory() {
    let harness = Harness::new(FakeLauncher::exiting(0));
    let mut ctx = harness.context();
    run_until(&harness, &mut ctx, StageName::ClaimJob).await;

    let job_id = ctx.reserved_job_id().unwrap().to_string();
    let dir = ctx.job_directory().unwrap().to_path_buf();
    assert!(dir.starts_with(&harness.config.jobs_root));
    assert!(dir.ends_with(&job_id));
    assert!(dir.is_dir());

    let env = ctx.job_environment().unwrap();
    assert_eq!(env[ENV_JOB_ID], job_id);
    assert_eq!(env[ENV_CLUSTER_ID], "c-cpu");
    assert_eq!(env[ENV_JOB_DIR], dir.display().to_string());
}

#[tokio::test]
async fn test_claim_conflict_is_fatal() {
    let harness = Harness::new(FakeLauncher::exiting(0));
    let mut ctx = harness.context();
    run_until(&harness, &mut ctx, StageName::ClaimJob).await;

    harness.job_service.fail_next(
        Op::Claim,
        vec![JobServiceError::ClaimConflict {
            job_id: "x".to_string(),
            reason: "claimed elsewhere".to_string(),
        }],
    );
    let err = harness
        .stage(StageName::ClaimJob)
        .attempt(&mut ctx)
        .await
        .unwrap_err();

    assert_eq!(err.stage, StageName::ClaimJob);
    assert_eq!(err.kind, ErrorKind::Fatal);
    assert_eq!(ctx.current_job_status(), Some(JobStatus::Reserved));
}

#[tokio::test]
async fn test_launch_retry_does_not_start_second_process() {
    let harness = Harness::new(FakeLauncher::exiting(0));
    let mut ctx = harness.context();
    run_until(&harness, &mut ctx, StageName::LaunchJob).await;

    harness.job_service.fail_next(
        Op::ChangeStatus,
        vec![JobServiceError::Transient("timeout".to_string())],
    );
    let launch = harness.stage(StageName::LaunchJob);

    let err = launch.attempt(&mut ctx).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(harness.launcher.launch_count(), 1);
    assert_eq!(ctx.current_job_status(), Some(JobStatus::Init));

    launch.attempt(&mut ctx).await.unwrap();
    assert_eq!(harness.launcher.launch_count(), 1);
    assert_eq!(ctx.current_job_status(), Some(JobStatus::Running));
}

#[tokio::test]
async fn test_cleanup_stops_unfinished_process_and_removes_directory() {
    let mut harness = Harness::new(FakeLauncher::hanging());
    harness.config.delete_job_directory = true;
    let mut ctx = harness.context();
    run_until(&harness, &mut ctx, StageName::MonitorJob).await;

    let dir = ctx.job_directory().unwrap().to_path_buf();
    assert!(dir.is_dir());

    let cleanup = harness.stage(StageName::Cleanup);
    cleanup.attempt(&mut ctx).await.unwrap();
    assert_eq!(harness.launcher.kill_count(), 1);
    assert!(!dir.exists());

    // A second run finds nothing left to remove.
    cleanup.attempt(&mut ctx).await.unwrap();
}

#[tokio::test]
async fn test_cleanup_on_empty_context_is_noop() {
    let mut harness = Harness::new(FakeLauncher::exiting(0));
    harness.config.delete_job_directory = true;
    let mut ctx = harness.context();

    harness
        .stage(StageName::Cleanup)
        .attempt(&mut ctx)
        .await
        .unwrap();
    assert_eq!(harness.launcher.kill_count(), 0);
}

#[tokio::test]
async fn test_monitor_retry_after_lost_terminal_status_reply() {
    let harness = Harness::new(FakeLauncher::exiting(0));
    let mut ctx = harness.context();
    run_until(&harness, &mut ctx, StageName::MonitorJob).await;

    harness.job_service.lose_replies(Op::ChangeStatus, 1);
    let monitor = harness.stage(StageName::MonitorJob);

    let err = monitor.attempt(&mut ctx).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(ctx.current_job_status(), Some(JobStatus::Running));

    monitor.attempt(&mut ctx).await.unwrap();
    assert_eq!(ctx.current_job_status(), Some(JobStatus::Succeeded));
    let job_id = ctx.reserved_job_id().unwrap().to_string();
    assert_eq!(harness.server_status(&job_id).await, JobStatus::Succeeded);
    // The process result was kept, so the second attempt did not poll again.
    assert_eq!(harness.launcher.polls.load(std::sync::atomic::Ordering::SeqCst), 1);
}
