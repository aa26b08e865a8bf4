pub mod config;
pub mod error;
pub mod job;
pub mod limits;
pub mod manager;
pub mod output;
pub mod supervisor;

pub use config::WorkerConfig;
pub use error::{Result, WorkerError};
pub use manager::JobManager;
