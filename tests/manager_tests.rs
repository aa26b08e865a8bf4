use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use worklet::job::{JobState, JobStatus, FAILED_TO_START_EXIT_CODE};
use worklet::limits::JobLimiter;
use worklet::{JobManager, WorkerConfig, WorkerError};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Manager with a short grace period so kill tests run fast.
fn test_manager() -> JobManager {
    init_tracing();
    JobManager::new(WorkerConfig::default().with_grace_period(Duration::from_millis(500)))
}

/// Poll until the job reaches a terminal state.
async fn wait_until_exited(manager: &JobManager, job_id: &Uuid) -> JobStatus {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let status = manager.query(job_id).await.expect("job must exist");
            if status.exited {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("job did not reach a terminal state in time")
}

async fn collect_output(manager: &JobManager, job_id: &Uuid) -> Vec<u8> {
    let mut reader = manager.open_stream(job_id).await.expect("job must exist");
    let mut out = Vec::new();
    while let Some(chunk) = reader.next_chunk().await {
        out.extend_from_slice(&chunk.data);
    }
    out
}

#[tokio::test]
async fn start_returns_unique_ids() {
    let manager = test_manager();

    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(manager.start("true", &[]).await.unwrap());
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 5);
}

#[tokio::test]
async fn query_immediately_after_start_reports_running() {
    let manager = test_manager();
    let job_id = manager.start("sleep", &["5".to_string()]).await.unwrap();

    let status = manager.query(&job_id).await.unwrap();
    assert_eq!(status.state, JobState::Running);
    assert!(!status.exited);
    assert!(status.pid.is_some());
    assert!(status.exit_code.is_none());

    manager.stop(&job_id).await.unwrap();
}

#[tokio::test]
async fn echo_job_exits_zero_with_output() {
    let manager = test_manager();
    let job_id = manager.start("echo", &["hello".to_string()]).await.unwrap();

    let status = wait_until_exited(&manager, &job_id).await;
    assert_eq!(status.state, JobState::Exited);
    assert!(status.exited);
    assert_eq!(status.exit_code, Some(0));
    assert!(status.pid.is_some());
    assert!(status.completed_at.is_some());

    let output = collect_output(&manager, &job_id).await;
    assert_eq!(output, b"hello\n");
}

#[tokio::test]
async fn failing_command_reports_its_exit_code() {
    let manager = test_manager();
    let job_id = manager
        .start("sh", &["-c".to_string(), "exit 7".to_string()])
        .await
        .unwrap();

    let status = wait_until_exited(&manager, &job_id).await;
    assert_eq!(status.state, JobState::Exited);
    assert_eq!(status.exit_code, Some(7));
}

#[tokio::test]
async fn stderr_is_part_of_the_combined_stream() {
    let manager = test_manager();
    let job_id = manager
        .start(
            "sh",
            &["-c".to_string(), "echo out; echo err 1>&2".to_string()],
        )
        .await
        .unwrap();

    wait_until_exited(&manager, &job_id).await;
    let output = String::from_utf8(collect_output(&manager, &job_id).await).unwrap();
    assert!(output.contains("out\n"));
    assert!(output.contains("err\n"));
}

#[tokio::test]
async fn stop_kills_a_sleeping_job() {
    let manager = test_manager();
    let job_id = manager.start("sleep", &["30".to_string()]).await.unwrap();

    manager.stop(&job_id).await.unwrap();

    let status = wait_until_exited(&manager, &job_id).await;
    assert_eq!(status.state, JobState::Killed);
    assert!(status.pid.is_some());
    // sleep does not catch SIGTERM: 128 + 15.
    assert_eq!(status.exit_code, Some(143));
}

#[tokio::test]
async fn stop_on_terminal_job_is_idempotent() {
    let manager = test_manager();
    let job_id = manager.start("sleep", &["30".to_string()]).await.unwrap();

    manager.stop(&job_id).await.unwrap();
    let first = wait_until_exited(&manager, &job_id).await;

    // Stopping again must not change anything already recorded.
    manager.stop(&job_id).await.unwrap();
    let second = manager.query(&job_id).await.unwrap();
    assert_eq!(second.state, first.state);
    assert_eq!(second.exit_code, first.exit_code);
    assert_eq!(second.completed_at, first.completed_at);
}

#[tokio::test]
async fn stop_racing_natural_exit_settles_on_one_state() {
    let manager = test_manager();
    let job_id = manager
        .start("sh", &["-c".to_string(), "exit 0".to_string()])
        .await
        .unwrap();

    // The process exits almost immediately; stop may land before or after.
    manager.stop(&job_id).await.unwrap();

    let status = wait_until_exited(&manager, &job_id).await;
    assert!(matches!(status.state, JobState::Exited | JobState::Killed));

    // Whatever won, the recorded outcome never changes afterwards.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let later = manager.query(&job_id).await.unwrap();
    assert_eq!(later.state, status.state);
    assert_eq!(later.exit_code, status.exit_code);
}

#[tokio::test]
async fn unknown_job_is_not_found_everywhere() {
    let manager = test_manager();
    let job_id = Uuid::new_v4();

    assert!(matches!(
        manager.query(&job_id).await,
        Err(WorkerError::JobNotFound(id)) if id == job_id
    ));
    assert!(matches!(
        manager.stop(&job_id).await,
        Err(WorkerError::JobNotFound(_))
    ));
    assert!(matches!(
        manager.open_stream(&job_id).await,
        Err(WorkerError::JobNotFound(_))
    ));
}

#[tokio::test]
async fn empty_name_is_rejected_before_any_job_exists() {
    let manager = test_manager();

    assert!(matches!(
        manager.start("", &[]).await,
        Err(WorkerError::InvalidArgument(_))
    ));
    assert!(matches!(
        manager.start("   ", &[]).await,
        Err(WorkerError::InvalidArgument(_))
    ));
    assert!(manager.list().await.is_empty());
}

#[tokio::test]
async fn spawn_failure_leaves_a_queryable_terminal_job() {
    let manager = test_manager();
    let job_id = manager
        .start("worklet-no-such-binary-48151623", &[])
        .await
        .unwrap();

    let status = manager.query(&job_id).await.unwrap();
    assert_eq!(status.state, JobState::FailedToStart);
    assert!(status.exited);
    assert_eq!(status.exit_code, Some(FAILED_TO_START_EXIT_CODE));
    assert!(status.pid.is_none());

    // Stream ends immediately with zero chunks.
    let output = collect_output(&manager, &job_id).await;
    assert!(output.is_empty());

    // And stop is a benign no-op.
    manager.stop(&job_id).await.unwrap();
    assert_eq!(
        manager.query(&job_id).await.unwrap().state,
        JobState::FailedToStart
    );
}

#[tokio::test]
async fn list_returns_jobs_in_creation_order() {
    let manager = test_manager();
    let first = manager.start("true", &[]).await.unwrap();
    let second = manager.start("false", &[]).await.unwrap();

    wait_until_exited(&manager, &first).await;
    wait_until_exited(&manager, &second).await;

    let jobs = manager.list().await;
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0].id, first);
    assert_eq!(jobs[1].id, second);
}

struct EnvLimiter;

impl JobLimiter for EnvLimiter {
    fn apply(&self, cmd: &mut tokio::process::Command) -> std::io::Result<()> {
        cmd.env("WORKLET_MARKER", "applied");
        Ok(())
    }
}

#[tokio::test]
async fn limiter_is_applied_before_spawn() {
    init_tracing();
    let manager = JobManager::new(WorkerConfig::default()).with_limiter(Arc::new(EnvLimiter));
    let job_id = manager
        .start(
            "sh",
            &["-c".to_string(), "echo marker=$WORKLET_MARKER".to_string()],
        )
        .await
        .unwrap();

    wait_until_exited(&manager, &job_id).await;
    let output = collect_output(&manager, &job_id).await;
    assert_eq!(output, b"marker=applied\n");
}

struct RefusingLimiter;

impl JobLimiter for RefusingLimiter {
    fn apply(&self, _cmd: &mut tokio::process::Command) -> std::io::Result<()> {
        Err(std::io::Error::other("limits unavailable"))
    }
}

#[tokio::test]
async fn limiter_failure_is_a_spawn_failure() {
    init_tracing();
    let manager = JobManager::new(WorkerConfig::default()).with_limiter(Arc::new(RefusingLimiter));
    let job_id = manager.start("true", &[]).await.unwrap();

    let status = manager.query(&job_id).await.unwrap();
    assert_eq!(status.state, JobState::FailedToStart);
}

#[tokio::test]
async fn shutdown_terminates_all_running_jobs() {
    let manager = test_manager();
    let first = manager.start("sleep", &["30".to_string()]).await.unwrap();
    let second = manager.start("sleep", &["30".to_string()]).await.unwrap();

    manager.shutdown().await;

    for job_id in [first, second] {
        let status = manager.query(&job_id).await.unwrap();
        assert_eq!(status.state, JobState::Killed);
        assert!(status.exited);
    }
}
