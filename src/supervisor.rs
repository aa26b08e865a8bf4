//! Process supervision: spawn, output capture, reaping, termination.
//!
//! A [`ProcessSupervisor`] is the only component that touches the OS
//! process. It launches the command with piped stdout/stderr in its own
//! process group, pumps both pipes into the job's [`OutputBuffer`], and
//! runs a background wait task that reaps the child, performs the job's
//! single terminal transition, and closes the buffer.

use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Result, WorkerError};
use crate::job::JobTable;
use crate::limits::JobLimiter;
use crate::output::OutputBuffer;

/// Exit code reported when the process was reaped but no status could be
/// read, or the wait itself failed. The job is still forced terminal so
/// callers never hang on it.
const UNKNOWN_EXIT_CODE: i32 = -1;

/// Supervises one job's OS process from spawn to terminal transition.
#[derive(Debug)]
pub struct ProcessSupervisor {
    job_id: Uuid,
    table: Arc<RwLock<JobTable>>,
    output: Arc<OutputBuffer>,
    capture_buf_bytes: usize,
    /// Pid of the spawned process; 0 until spawn succeeds. With
    /// `process_group(0)` this doubles as the process group id.
    pid: AtomicU32,
    /// Cancelled by the wait task once the job reaches a terminal state.
    exited: CancellationToken,
}

impl ProcessSupervisor {
    pub fn new(
        job_id: Uuid,
        table: Arc<RwLock<JobTable>>,
        output: Arc<OutputBuffer>,
        capture_buf_bytes: usize,
    ) -> Self {
        Self {
            job_id,
            table,
            output,
            capture_buf_bytes,
            pid: AtomicU32::new(0),
            exited: CancellationToken::new(),
        }
    }

    /// Launch the command and start the capture and wait tasks.
    ///
    /// Returns the pid once the OS launch itself has succeeded; whether the
    /// program later fails is a separate matter observed through the job's
    /// exit code. On success the job has already transitioned to Running
    /// when this returns.
    pub async fn spawn(
        self: &Arc<Self>,
        name: &str,
        args: &[String],
        limiter: Option<&dyn JobLimiter>,
    ) -> Result<u32> {
        let mut cmd = Command::new(name);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Own process group, so termination signals reach any children the
        // job spawns as well.
        cmd.process_group(0);

        if let Some(limiter) = limiter {
            limiter.apply(&mut cmd).map_err(WorkerError::Spawn)?;
        }

        let mut child = cmd.spawn().map_err(WorkerError::Spawn)?;
        let pid = child
            .id()
            .ok_or_else(|| WorkerError::Internal("spawned child has no pid".to_string()))?;
        self.pid.store(pid, Ordering::SeqCst);

        // Transition to Running before the wait task starts, so even an
        // instantly exiting process observes a legal Running -> terminal
        // path.
        self.table.write().await.mark_running(&self.job_id, pid);

        let stdout_task = child.stdout.take().map(|out| {
            tokio::spawn(pump_stream(
                out,
                Arc::clone(&self.output),
                self.capture_buf_bytes,
            ))
        });
        let stderr_task = child.stderr.take().map(|err| {
            tokio::spawn(pump_stream(
                err,
                Arc::clone(&self.output),
                self.capture_buf_bytes,
            ))
        });

        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            supervisor
                .wait_for_exit(child, stdout_task, stderr_task)
                .await;
        });

        Ok(pid)
    }

    /// Request termination: SIGTERM to the process group now, SIGKILL if it
    /// has not exited within `grace`. Fire-and-forget; the terminal state
    /// becomes observable through the job table once the wait task reaps
    /// the process.
    pub fn terminate(&self, grace: Duration) {
        let pid = self.pid.load(Ordering::SeqCst);
        if pid == 0 || self.exited.is_cancelled() {
            return;
        }

        let job_id = self.job_id;
        let exited = self.exited.clone();
        tokio::spawn(async move {
            let pgid = Pid::from_raw(pid as i32);
            if let Err(e) = killpg(pgid, Signal::SIGTERM) {
                tracing::debug!(job_id = %job_id, error = %e, "SIGTERM delivery failed");
            }

            tokio::select! {
                _ = exited.cancelled() => {
                    tracing::debug!(job_id = %job_id, "Process exited within grace period");
                }
                _ = tokio::time::sleep(grace) => {
                    tracing::info!(job_id = %job_id, "Grace period expired, sending SIGKILL");
                    let _ = killpg(pgid, Signal::SIGKILL);
                }
            }
        });
    }

    /// Token cancelled once the job has reached a terminal state.
    pub fn exited(&self) -> CancellationToken {
        self.exited.clone()
    }

    async fn wait_for_exit(
        self: Arc<Self>,
        mut child: Child,
        stdout_task: Option<JoinHandle<()>>,
        stderr_task: Option<JoinHandle<()>>,
    ) {
        // Drain both pipes to EOF first so no tail output is lost.
        if let Some(task) = stdout_task {
            let _ = task.await;
        }
        if let Some(task) = stderr_task {
            let _ = task.await;
        }

        let exit_code = match child.wait().await {
            Ok(status) => exit_code_of(status),
            Err(e) => {
                tracing::error!(job_id = %self.job_id, error = %e, "Failed to reap process");
                UNKNOWN_EXIT_CODE
            }
        };

        if let Some(state) = self.table.write().await.complete(&self.job_id, exit_code) {
            tracing::info!(job_id = %self.job_id, state = %state, exit_code, "Job completed");
        }

        self.output.close().await;
        self.exited.cancel();
    }
}

/// Read one pipe to EOF, appending each read as one chunk. Per-pipe order
/// is preserved; interleaving between stdout and stderr follows arrival at
/// the buffer.
async fn pump_stream<R>(mut reader: R, sink: Arc<OutputBuffer>, buf_bytes: usize)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = vec![0u8; buf_bytes];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => sink.append(Bytes::copy_from_slice(&buf[..n])).await,
            Err(e) => {
                tracing::warn!(error = %e, "Output capture read failed");
                break;
            }
        }
    }
}

/// Exit code for a reaped process: the real code when it exited, or the
/// shell convention `128 + signal` when a signal terminated it.
fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(UNKNOWN_EXIT_CODE)
}
