//! Per-project job graph.
//!
//! A submission enqueues a fixed chain of jobs:
//!
//! ```text
//! assign ──┬──> sublineage_assign        (only when the species has a sub-lineage db)
//!          └──> visualise ──> cluster 1 ──> cluster 2 ──> ... ──> cluster N (cleanup)
//! ```
//!
//! Every edge tolerates failure of its upstream job, so a failed stage still
//! lets downstream stages produce whatever partial output they can.
//!
//! - [`Scheduler`]: submit projects and aggregate their status
//! - [`Task`]: the payload carried by each queued job
//! - [`TaskRunner`]: executes a task on behalf of a worker
//! - [`Pipeline`]: wires the scheduler to a pool of worker loops

pub mod scheduler;
pub mod tasks;
pub mod visualise;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::{ClusteringBackend, RenderingBackend, SubLineageBackend};
use crate::config::PipelineConfig;
use crate::filestore::FileStore;
use crate::jobs::{JobQueue, SharedQueue};
use crate::status::StatusRepository;
use crate::store::SharedState;
use crate::worker::Worker;

pub use scheduler::{ProjectStatus, Scheduler, SubmitRequest, SubmitResponse};
pub use tasks::{Task, TaskRunner};
pub use visualise::{ChainLink, VisualisationChain};

/// External collaborators used by the task bodies.
#[derive(Clone)]
pub struct Backends {
    pub clustering: Arc<dyn ClusteringBackend>,
    pub rendering: Arc<dyn RenderingBackend>,
    pub sublineage: Option<Arc<dyn SubLineageBackend>>,
}

/// Everything a task needs, shared by the scheduler and every worker.
pub struct PipelineContext {
    pub config: PipelineConfig,
    pub files: FileStore,
    pub status: StatusRepository,
    pub queue: SharedQueue,
    pub backends: Backends,
}

impl PipelineContext {
    pub fn new(config: PipelineConfig, store: Arc<dyn SharedState>, backends: Backends) -> Self {
        Self {
            files: FileStore::new(config.storage_location.clone()),
            status: StatusRepository::new(store),
            queue: Arc::new(tokio::sync::RwLock::new(JobQueue::new())),
            config,
            backends,
        }
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.config.result_retention_secs)
    }
}

/// Scheduler plus worker pool over one shared context.
pub struct Pipeline {
    ctx: Arc<PipelineContext>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, store: Arc<dyn SharedState>, backends: Backends) -> Self {
        Self {
            ctx: Arc::new(PipelineContext::new(config, store, backends)),
        }
    }

    pub fn context(&self) -> Arc<PipelineContext> {
        self.ctx.clone()
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(self.ctx.clone())
    }

    /// Spawn `worker_count` worker loops. They run until `shutdown` is
    /// cancelled.
    pub fn spawn_workers(&self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let runner = Arc::new(TaskRunner::new(self.ctx.clone()));
        let interval = Duration::from_millis(self.ctx.config.poll_interval_ms);
        (0..self.ctx.config.worker_count.max(1))
            .map(|id| {
                let worker = Worker::new(id, self.ctx.queue.clone(), runner.clone(), interval);
                let token = shutdown.clone();
                tokio::spawn(async move { worker.run(token).await })
            })
            .collect()
    }

    /// True once no job is queued, running or deferred.
    pub async fn is_idle(&self) -> bool {
        self.ctx.queue.read().await.is_idle()
    }
}
