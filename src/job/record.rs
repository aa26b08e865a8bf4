use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::output::OutputBuffer;

/// Exit code reported for jobs whose process never launched.
pub const FAILED_TO_START_EXIT_CODE: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Running,
    Exited,
    Killed,
    FailedToStart,
}

impl JobState {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Exited | JobState::Killed | JobState::FailedToStart
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::Running => write!(f, "running"),
            JobState::Exited => write!(f, "exited"),
            JobState::Killed => write!(f, "killed"),
            JobState::FailedToStart => write!(f, "failed_to_start"),
        }
    }
}

/// One tracked invocation of an external command.
///
/// State, pid, and exit code are only ever mutated through
/// [`JobTable`](crate::job::JobTable) methods, under the table lock.
#[derive(Debug)]
pub struct Job {
    pub id: Uuid,
    pub command: String,
    pub args: Vec<String>,
    pub state: JobState,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    /// Set while the job is running when an explicit termination has been
    /// requested; decides Killed vs Exited at the terminal transition.
    pub kill_requested: bool,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub output: Arc<OutputBuffer>,
}

impl Job {
    pub fn new(command: String, args: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            command,
            args,
            state: JobState::Pending,
            pid: None,
            exit_code: None,
            kill_requested: false,
            created_at: Utc::now(),
            completed_at: None,
            output: Arc::new(OutputBuffer::new()),
        }
    }

    /// Whether the job has reached a terminal state.
    pub fn exited(&self) -> bool {
        self.state.is_terminal()
    }

    /// Point-in-time snapshot of the job. Taken under the table lock, so a
    /// caller never observes a half-applied transition.
    pub fn status(&self) -> JobStatus {
        JobStatus {
            id: self.id,
            command: self.command.clone(),
            args: self.args.clone(),
            state: self.state,
            pid: self.pid,
            exit_code: self.exit_code,
            exited: self.exited(),
            created_at: self.created_at,
            completed_at: self.completed_at,
        }
    }
}

/// Consistent snapshot of a job, safe to hand to a transport layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub id: Uuid,
    pub command: String,
    pub args: Vec<String>,
    pub state: JobState,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    pub exited: bool,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}
