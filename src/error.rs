use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Failed to spawn process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
