use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::Result;
use crate::jobs::{JobStatus, RunnableJob, SharedQueue};
use crate::pipeline::Task;

/// Runs the body of a task.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task) -> Result<()>;

    /// Runs once `handle` has returned, failed or timed out.
    async fn after(&self, _task: &Task) {}
}

/// Result of job execution
#[derive(Debug)]
pub struct ExecutionResult {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub error: Option<String>,
}

pub struct Worker {
    id: usize,
    queue: SharedQueue,
    handler: Arc<dyn TaskHandler>,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(
        id: usize,
        queue: SharedQueue,
        handler: Arc<dyn TaskHandler>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            id,
            queue,
            handler,
            poll_interval,
        }
    }

    /// Poll the queue until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.poll_interval);
        tracing::info!(worker_id = self.id, "Worker started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(worker_id = self.id, "Worker stopping");
                    break;
                }
                _ = interval.tick() => {
                    let purged = self.queue.write().await.purge_expired(Utc::now());
                    if purged > 0 {
                        tracing::debug!(worker_id = self.id, purged, "Expired jobs purged");
                    }
                    while self.run_next().await.is_some() {
                        if shutdown.is_cancelled() {
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Execute the oldest queued job, if any.
    pub async fn run_next(&self) -> Option<ExecutionResult> {
        let job = self.queue.write().await.next_runnable()?;
        let result = self.execute(job).await;
        self.queue
            .write()
            .await
            .complete(&result.job_id, result.error.clone().map_or(Ok(()), Err));
        Some(result)
    }

    async fn execute(&self, job: RunnableJob) -> ExecutionResult {
        tracing::info!(worker_id = self.id, job_id = %job.id, task = %job.task, "Executing job");

        let outcome = match tokio::time::timeout(job.timeout, self.handler.handle(&job.task)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("job timed out after {}s", job.timeout.as_secs())),
        };
        self.handler.after(&job.task).await;

        match outcome {
            Ok(()) => {
                tracing::info!(worker_id = self.id, job_id = %job.id, "Job finished");
                ExecutionResult {
                    job_id: job.id,
                    status: JobStatus::Finished,
                    error: None,
                }
            }
            Err(e) => {
                tracing::error!(worker_id = self.id, job_id = %job.id, error = %e, "Job failed");
                ExecutionResult {
                    job_id: job.id,
                    status: JobStatus::Failed,
                    error: Some(e),
                }
            }
        }
    }
}
