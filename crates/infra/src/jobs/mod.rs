//! Background jobs with declared retry, discard and dead-letter handling.
//!
//! ## Design
//!
//! - Jobs are named, typed and carry JSON arguments
//! - Each job definition declares its retry/discard rules once, at registration
//! - Attempt counters live in the job's execution state and survive retries
//! - Escalated jobs are moved to the dead-letter queue for inspection/replay
//!
//! ## Components
//!
//! - `Job`: execution state of one lineage
//! - `JobDefinition`: body plus declarations
//! - `JobStore`: persistence for jobs and dead letters
//! - `JobExecutor`: runs jobs and applies retry decisions
//! - `JobBuffer`: ordered side-effect log

pub mod arguments;
pub mod buffer;
pub mod definition;
pub mod executor;
pub mod store;
pub mod types;

pub use arguments::{SerializationError, deserialize_arguments, serialize_arguments};
pub use buffer::JobBuffer;
pub use definition::{JobContext, JobDefinition, PerformFn};
pub use executor::{ExecutorError, ExecutorStats, JobExecutor, JobExecutorHandle, JobResult};
pub use store::{InMemoryJobStore, JobStats, JobStore, JobStoreError};
pub use types::{
    DEFAULT_QUEUE, DeadLetterEntry, Job, JobAttemptRecord, JobId, JobOutcome, JobStatus,
};
