use std::time::Duration;

/// Configuration for the worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How long to wait after a graceful termination signal before
    /// escalating to a forced kill.
    pub grace_period: Duration,

    /// Read-chunk size for capturing process output. Each read of up to
    /// this many bytes becomes one output chunk.
    pub capture_buf_bytes: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(5),
            capture_buf_bytes: 8 * 1024,
        }
    }
}

impl WorkerConfig {
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_capture_buf_bytes(mut self, capture_buf_bytes: usize) -> Self {
        self.capture_buf_bytes = capture_buf_bytes;
        self
    }
}
