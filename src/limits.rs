//! Resource-limit extension point.
//!
//! The worker does not implement process isolation itself. A [`JobLimiter`]
//! installed via [`JobManager::with_limiter`](crate::manager::JobManager::with_limiter)
//! gets a chance to configure the command (cgroup placement, rlimits,
//! namespaces, environment scrubbing) right before it is spawned.

use tokio::process::Command;

/// Hook applied to every job's command immediately before spawn.
///
/// Returning an error aborts the launch; the job ends up in the
/// failed-to-start terminal state, same as any other spawn failure.
pub trait JobLimiter: Send + Sync {
    fn apply(&self, cmd: &mut Command) -> std::io::Result<()>;
}
