pub mod record;
pub mod table;

pub use record::{Job, JobState, JobStatus, FAILED_TO_START_EXIT_CODE};
pub use table::JobTable;
