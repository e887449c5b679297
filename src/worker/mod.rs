//! Worker side of the engine.
//!
//! - [`JobExecutor`]: runs the registry against one job and drives its state
//!   machine (PENDING → PROGRESS → SUCCESS | FAILURE)
//! - [`heartbeat`]: renews the queue lease of the delivery being worked on
//! - [`janitor`]: requeues expired leases and purges expired jobs
//! - [`retry`]: backoff for transient store and queue failures
//!
//! # Execution Flow
//!
//! 1. A worker loop (see [`crate::engine`]) dequeues a delivery
//! 2. [`JobExecutor::execute`] publishes progress before each model and
//!    evaluates it on the blocking pool
//! 3. Results are ranked by MAPE and written once as SUCCESS
//! 4. The worker acks, or nacks when state could not be recorded

pub mod executor;
pub mod heartbeat;
pub mod janitor;
pub mod retry;

pub use executor::{ExecutionResult, JobExecutor, Outcome};
pub use heartbeat::LeaseHeartbeat;
pub use janitor::Janitor;
