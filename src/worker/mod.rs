//! Worker loops that drain the job queue.
//!
//! - **Polling**: each loop wakes every `poll_interval` and runs queued jobs
//!   until none are left
//! - **Execution**: the job's [`Task`](crate::pipeline::Task) is handed to a
//!   [`TaskHandler`] under the job's timeout
//! - **Completion**: the outcome is written back to the queue, which releases
//!   or cancels dependent jobs
//! - **Retention**: terminal jobs past their retention are purged on each tick
//!
//! Several loops may share one queue; a job is only ever handed to one of them.

pub mod executor;

pub use executor::{ExecutionResult, TaskHandler, Worker};
