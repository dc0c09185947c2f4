pub mod job;
pub mod queue;

use std::sync::Arc;

use tokio::sync::RwLock;

pub use job::{Dependency, Job, JobStatus};
pub use queue::{JobQueue, RunnableJob};

/// Queue handle shared between the scheduler and the worker loops.
pub type SharedQueue = Arc<RwLock<JobQueue>>;
