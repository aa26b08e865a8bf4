//! The job manager: the worker's four-operation service surface.
//!
//! One [`JobManager`] instance is shared by every caller context for the
//! life of the worker process. It owns the job table and mediates all
//! concurrent access to it; per-job output traffic runs on each job's own
//! buffer lock so output-heavy jobs do not contend with table operations.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::error::{Result, WorkerError};
use crate::job::{Job, JobStatus, JobTable};
use crate::limits::JobLimiter;
use crate::output::OutputReader;
use crate::supervisor::ProcessSupervisor;

pub struct JobManager {
    config: WorkerConfig,
    table: Arc<RwLock<JobTable>>,
    supervisors: Arc<RwLock<HashMap<Uuid, Arc<ProcessSupervisor>>>>,
    limiter: Option<Arc<dyn JobLimiter>>,
}

impl JobManager {
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            table: Arc::new(RwLock::new(JobTable::new())),
            supervisors: Arc::new(RwLock::new(HashMap::new())),
            limiter: None,
        }
    }

    /// Install a resource-limit hook applied to every command before spawn.
    pub fn with_limiter(mut self, limiter: Arc<dyn JobLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Launch a command as a new job and return its identity.
    ///
    /// Returns as soon as the OS launch outcome is known; it never waits
    /// for the process to finish. A spawn failure still returns `Ok` with
    /// the job identity: the job lands in the terminal failed-to-start
    /// state, and the caller learns about it through [`query`](Self::query)
    /// or [`open_stream`](Self::open_stream).
    pub async fn start(&self, name: &str, args: &[String]) -> Result<Uuid> {
        if name.trim().is_empty() {
            return Err(WorkerError::InvalidArgument(
                "command name cannot be empty".to_string(),
            ));
        }

        let job = Job::new(name.to_string(), args.to_vec());
        let job_id = job.id;
        let output = Arc::clone(&job.output);
        self.table.write().await.insert(job);

        let supervisor = Arc::new(ProcessSupervisor::new(
            job_id,
            Arc::clone(&self.table),
            Arc::clone(&output),
            self.config.capture_buf_bytes,
        ));
        // Registered before spawn so a concurrent stop of a job that just
        // went Running always finds its supervisor.
        self.supervisors
            .write()
            .await
            .insert(job_id, Arc::clone(&supervisor));

        match supervisor.spawn(name, args, self.limiter.as_deref()).await {
            Ok(pid) => {
                tracing::info!(job_id = %job_id, command = name, pid, "Job started");
            }
            Err(e) => {
                self.supervisors.write().await.remove(&job_id);
                self.table.write().await.mark_failed_to_start(&job_id);
                // Close with zero chunks so streams observe end-of-stream.
                output.close().await;
                tracing::warn!(job_id = %job_id, command = name, error = %e, "Job failed to start");
            }
        }

        Ok(job_id)
    }

    /// Request termination of a running job.
    ///
    /// Returns once the termination request has been issued; it does not
    /// wait for the process to die. Stopping a job that is already in a
    /// terminal state succeeds as a no-op. The eventual terminal state is
    /// Killed, unless the natural exit won the race.
    pub async fn stop(&self, job_id: &Uuid) -> Result<()> {
        // Existence check and kill-request mark happen under one write
        // lock, so they cannot interleave with the terminal transition.
        {
            let mut table = self.table.write().await;
            if !table.contains(job_id) {
                return Err(WorkerError::JobNotFound(*job_id));
            }
            if !table.request_kill(job_id) {
                tracing::debug!(job_id = %job_id, "Stop on non-running job is a no-op");
                return Ok(());
            }
        }

        if let Some(supervisor) = self.supervisors.read().await.get(job_id) {
            supervisor.terminate(self.config.grace_period);
            tracing::info!(job_id = %job_id, "Termination requested");
        }
        Ok(())
    }

    /// Consistent snapshot of a job's pid, exit code, and exited flag.
    pub async fn query(&self, job_id: &Uuid) -> Result<JobStatus> {
        self.table
            .read()
            .await
            .snapshot(job_id)
            .ok_or(WorkerError::JobNotFound(*job_id))
    }

    /// Open an independent output stream for a job, replaying from the
    /// first chunk and following live output until the process ends.
    /// Works the same whether the job is still pending, running, or long
    /// exited.
    pub async fn open_stream(&self, job_id: &Uuid) -> Result<OutputReader> {
        let output = self
            .table
            .read()
            .await
            .output(job_id)
            .ok_or(WorkerError::JobNotFound(*job_id))?;
        tracing::debug!(job_id = %job_id, "Output stream opened");
        Ok(output.reader())
    }

    /// All jobs in creation order.
    pub async fn list(&self) -> Vec<JobStatus> {
        self.table.read().await.all_jobs()
    }

    /// Terminate every running job and wait for each to reach a terminal
    /// state. Used when the worker itself shuts down.
    pub async fn shutdown(&self) {
        let running = self.table.read().await.running_jobs();
        if running.is_empty() {
            return;
        }
        tracing::info!(jobs = running.len(), "Stopping running jobs for shutdown");

        let mut exits = Vec::new();
        for job_id in &running {
            if self.table.write().await.request_kill(job_id) {
                if let Some(supervisor) = self.supervisors.read().await.get(job_id) {
                    supervisor.terminate(self.config.grace_period);
                    exits.push(supervisor.exited());
                }
            }
        }

        for exit in exits {
            exit.cancelled().await;
        }
    }
}
