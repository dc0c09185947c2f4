use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::filestore::AmrRecord;
use crate::jobs::{Dependency, Job, JobStatus};
use crate::model::{AssignmentResult, QcFailure};
use crate::pipeline::{PipelineContext, Task};
use crate::status::{JobHandle, Stage};

/// One project submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub project_hash: String,
    pub species: String,
    /// Sample hash -> sketch payload. Result indices follow hash order.
    pub sketches: BTreeMap<String, serde_json::Value>,
    /// Sample hash -> user-facing file name
    #[serde(default)]
    pub names: BTreeMap<String, String>,
    #[serde(default)]
    pub amr_metadata: Vec<AmrRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubmitResponse {
    pub assign: JobHandle,
    pub visualise: JobHandle,
    pub sub_lineage: Option<JobHandle>,
}

/// Aggregated status of a project's jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectStatus {
    pub assign: JobStatus,
    pub visualise: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sublineage_assign: Option<JobStatus>,
    pub visualise_clusters: BTreeMap<String, JobStatus>,
}

/// Submits projects as a chain of dependent jobs and reports their status.
#[derive(Clone)]
pub struct Scheduler {
    ctx: Arc<PipelineContext>,
}

impl Scheduler {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    /// Persist the inputs and enqueue the project's job chain.
    ///
    /// Configuration and connectivity are checked before anything is
    /// written. Resubmitting a project hash replaces its outputs and forgets
    /// its previous per-cluster and sub-lineage jobs.
    pub async fn submit(&self, request: SubmitRequest) -> Result<SubmitResponse> {
        let ctx = &self.ctx;
        let species = ctx.config.species(&request.species)?;
        ctx.status.ping().await?;

        let project_hash = request.project_hash.as_str();
        ctx.files.reset_output(project_hash)?;
        ctx.files.write_sketches(&request.sketches)?;
        ctx.files.persist_assignment(
            project_hash,
            &AssignmentResult::placeholder(request.sketches.keys().cloned()),
        )?;
        ctx.files.write_metadata(project_hash, &request.amr_metadata)?;
        ctx.status.clear_cluster_jobs(project_hash).await?;

        let timeouts = ctx.config.job_timeouts;
        let assign = self
            .enqueue(
                project_hash,
                Task::Assign {
                    project_hash: project_hash.to_string(),
                    species: request.species.clone(),
                },
                timeouts.assign,
                None,
            )
            .await?;

        let sub_lineage = match species.sublineage_db {
            Some(_) => Some(
                self.enqueue(
                    project_hash,
                    Task::SubLineage {
                        project_hash: project_hash.to_string(),
                        species: request.species.clone(),
                    },
                    timeouts.sub_lineage,
                    Some(Dependency::tolerant(assign.id)),
                )
                .await?,
            ),
            None => {
                ctx.status.clear_job(project_hash, Stage::SubLineage).await?;
                None
            }
        };

        let visualise = self
            .enqueue(
                project_hash,
                Task::Visualise {
                    project_hash: project_hash.to_string(),
                    species: request.species.clone(),
                    names: request.names.clone(),
                },
                timeouts.visualise,
                Some(Dependency::tolerant(assign.id)),
            )
            .await?;

        tracing::info!(
            project_hash,
            samples = request.sketches.len(),
            assign_job = %assign.id,
            visualise_job = %visualise.id,
            "Project submitted"
        );
        Ok(SubmitResponse {
            assign,
            visualise,
            sub_lineage,
        })
    }

    async fn enqueue(
        &self,
        project_hash: &str,
        task: Task,
        timeout_secs: u64,
        dependency: Option<Dependency>,
    ) -> Result<JobHandle> {
        let stage = task.stage();
        let job = Job::new(task, Duration::from_secs(timeout_secs), self.ctx.retention())
            .depending_on(dependency);
        let handle = JobHandle::new(job.id, stage);

        if !self.ctx.queue.write().await.enqueue(job) {
            return Err(PipelineError::Internal("job queue is at capacity".to_string()));
        }
        self.ctx.status.set_job(project_hash, handle).await?;
        Ok(handle)
    }

    async fn job_status(&self, id: &Uuid) -> Result<JobStatus> {
        self.ctx
            .queue
            .read()
            .await
            .status(id)
            .ok_or_else(|| PipelineError::NotFound(format!("job {}", id)))
    }

    /// Aggregate the status of every job belonging to `project_hash`.
    ///
    /// Until assignment has finished, visualisation reports `waiting` and no
    /// per-cluster statuses are looked up.
    pub async fn get_status(&self, project_hash: &str) -> Result<ProjectStatus> {
        let status = &self.ctx.status;
        let assign_job = status
            .get_job(project_hash, Stage::Assign)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("project {}", project_hash)))?;
        let assign = self.job_status(&assign_job.id).await?;

        let sublineage_assign = match status.get_job(project_hash, Stage::SubLineage).await? {
            Some(handle) => Some(self.job_status(&handle.id).await?),
            None => None,
        };

        if assign != JobStatus::Finished {
            return Ok(ProjectStatus {
                assign,
                visualise: JobStatus::Waiting,
                sublineage_assign,
                visualise_clusters: BTreeMap::new(),
            });
        }

        let visualise = match status.get_job(project_hash, Stage::Visualise).await? {
            Some(handle) => self.job_status(&handle.id).await?,
            None => JobStatus::Waiting,
        };

        let mut visualise_clusters = BTreeMap::new();
        for (cluster, handle) in status.cluster_jobs(project_hash).await? {
            visualise_clusters.insert(cluster, self.job_status(&handle.id).await?);
        }

        Ok(ProjectStatus {
            assign,
            visualise,
            sublineage_assign,
            visualise_clusters,
        })
    }

    /// Persisted assignment result for a project.
    pub fn results(&self, project_hash: &str) -> Result<AssignmentResult> {
        self.ctx.files.load_assignment(project_hash)
    }

    /// Samples recorded in the project's QC-failure report.
    pub fn failed_samples(&self, project_hash: &str) -> Result<Vec<QcFailure>> {
        self.ctx.files.read_qc_failures(project_hash)
    }
}
