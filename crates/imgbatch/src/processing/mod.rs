//! Background processing with job queue and progress tracking

mod job_queue;
mod worker;

pub use job_queue::{BatchJob, BatchProgress, BatchStatus, ImageError, JobQueue, QueueStats};
pub use worker::{BatchOutcome, BatchWorker, RecordOutcome};
