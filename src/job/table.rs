use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::job::record::{Job, JobState, JobStatus, FAILED_TO_START_EXIT_CODE};
use crate::output::OutputBuffer;

/// In-memory table of all jobs for the worker's lifetime.
///
/// Entries are never removed: status and output of an exited job stay
/// queryable until the worker itself shuts down. All mutation goes through
/// the methods here, under the single table lock held by the manager, so
/// the lifecycle state machine is never observed mid-transition.
#[derive(Debug, Default)]
pub struct JobTable {
    jobs: HashMap<Uuid, Job>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, job: Job) {
        self.jobs.insert(job.id, job);
    }

    pub fn get(&self, id: &Uuid) -> Option<&Job> {
        self.jobs.get(id)
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.jobs.contains_key(id)
    }

    /// Snapshot a job's externally visible status.
    pub fn snapshot(&self, id: &Uuid) -> Option<JobStatus> {
        self.jobs.get(id).map(Job::status)
    }

    /// The job's output buffer, shared with the supervisor and any readers.
    pub fn output(&self, id: &Uuid) -> Option<Arc<OutputBuffer>> {
        self.jobs.get(id).map(|job| Arc::clone(&job.output))
    }

    /// Pending -> Running, recording the pid. Returns false if the job is
    /// unknown or not in Pending.
    pub fn mark_running(&mut self, id: &Uuid, pid: u32) -> bool {
        match self.jobs.get_mut(id) {
            Some(job) if job.state == JobState::Pending => {
                job.state = JobState::Running;
                job.pid = Some(pid);
                true
            }
            _ => false,
        }
    }

    /// Pending -> FailedToStart. The process never launched, so there is no
    /// pid and the exit code is a sentinel.
    pub fn mark_failed_to_start(&mut self, id: &Uuid) -> bool {
        match self.jobs.get_mut(id) {
            Some(job) if job.state == JobState::Pending => {
                job.state = JobState::FailedToStart;
                job.exit_code = Some(FAILED_TO_START_EXIT_CODE);
                job.completed_at = Some(Utc::now());
                true
            }
            _ => false,
        }
    }

    /// Record that an explicit termination was requested. Only meaningful
    /// while the job is running; returns false otherwise, which callers
    /// treat as a benign no-op.
    pub fn request_kill(&mut self, id: &Uuid) -> bool {
        match self.jobs.get_mut(id) {
            Some(job) if job.state == JobState::Running => {
                job.kill_requested = true;
                true
            }
            _ => false,
        }
    }

    /// Terminal transition for a reaped process: Running -> Killed when a
    /// kill was requested beforehand, Running -> Exited otherwise. First
    /// terminal transition wins; attempts on an already-terminal job are
    /// no-ops. Returns the state recorded, if any transition happened.
    pub fn complete(&mut self, id: &Uuid, exit_code: i32) -> Option<JobState> {
        match self.jobs.get_mut(id) {
            Some(job) if job.state == JobState::Running => {
                let state = if job.kill_requested {
                    JobState::Killed
                } else {
                    JobState::Exited
                };
                job.state = state;
                job.exit_code = Some(exit_code);
                job.completed_at = Some(Utc::now());
                Some(state)
            }
            _ => None,
        }
    }

    /// All jobs sorted chronologically by creation time.
    pub fn all_jobs(&self) -> Vec<JobStatus> {
        let mut jobs: Vec<JobStatus> = self.jobs.values().map(Job::status).collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    /// Ids of jobs currently in Running.
    pub fn running_jobs(&self) -> Vec<Uuid> {
        self.jobs
            .values()
            .filter(|j| j.state == JobState::Running)
            .map(|j| j.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
