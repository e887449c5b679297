//! Job lifecycle: records, the store that owns them and the delivery queue.

pub mod job;
pub mod queue;
pub mod store;

pub use job::{FailureCode, Job, JobState, JobStatus, Progress};
pub use queue::{Delivery, JobQueue, MemoryJobQueue};
pub use store::{JobStore, MemoryJobStore};
