use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::backend::SubLineageRequest;
use crate::error::{PipelineError, Result};
use crate::pipeline::{visualise, PipelineContext};
use crate::reconcile::Reconciler;
use crate::status::Stage;
use crate::worker::TaskHandler;

/// Payload of a queued job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Task {
    Assign {
        project_hash: String,
        species: String,
    },
    SubLineage {
        project_hash: String,
        species: String,
    },
    /// Fan out one [`Task::VisualiseCluster`] per assigned cluster
    Visualise {
        project_hash: String,
        species: String,
        /// Sample hash -> user-facing file name
        names: BTreeMap<String, String>,
    },
    VisualiseCluster {
        project_hash: String,
        species: String,
        cluster: String,
        names: BTreeMap<String, String>,
        /// Last job of the chain; removes the project's temporary metadata
        is_last: bool,
    },
}

impl Task {
    pub fn stage(&self) -> Stage {
        match self {
            Task::Assign { .. } => Stage::Assign,
            Task::SubLineage { .. } => Stage::SubLineage,
            Task::Visualise { .. } => Stage::Visualise,
            Task::VisualiseCluster { .. } => Stage::VisualiseCluster,
        }
    }

    pub fn project_hash(&self) -> &str {
        match self {
            Task::Assign { project_hash, .. }
            | Task::SubLineage { project_hash, .. }
            | Task::Visualise { project_hash, .. }
            | Task::VisualiseCluster { project_hash, .. } => project_hash,
        }
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Task::VisualiseCluster { cluster, .. } => {
                write!(f, "{}[{}]:{}", self.stage(), self.project_hash(), cluster)
            }
            _ => write!(f, "{}[{}]", self.stage(), self.project_hash()),
        }
    }
}

/// Executes tasks against the shared pipeline context.
pub struct TaskRunner {
    ctx: Arc<PipelineContext>,
}

impl TaskRunner {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl TaskHandler for TaskRunner {
    async fn handle(&self, task: &Task) -> Result<()> {
        match task {
            Task::Assign {
                project_hash,
                species,
            } => assign_clusters(&self.ctx, project_hash, species).await,
            Task::SubLineage {
                project_hash,
                species,
            } => assign_sublineages(&self.ctx, project_hash, species).await,
            Task::Visualise {
                project_hash,
                species,
                names,
            } => visualise::schedule_clusters(&self.ctx, project_hash, species, names).await,
            Task::VisualiseCluster {
                project_hash,
                species,
                cluster,
                names,
                ..
            } => visualise::visualise_cluster(&self.ctx, project_hash, species, cluster, names).await,
        }
    }

    async fn after(&self, task: &Task) {
        if let Task::VisualiseCluster {
            project_hash,
            is_last: true,
            ..
        } = task
        {
            visualise::finish_project(&self.ctx, project_hash);
        }
    }
}

/// Assign every submitted sample and persist the reconciled result over the
/// submission placeholder. Unassignable samples go to the QC report.
pub async fn assign_clusters(ctx: &PipelineContext, project_hash: &str, species: &str) -> Result<()> {
    let species_cfg = ctx.config.species(species)?;
    let placeholder = ctx.files.load_assignment(project_hash)?;
    let samples: Vec<String> = placeholder
        .records()
        .iter()
        .map(|r| r.hash.clone())
        .collect();
    let sketches = ctx.files.read_sketches(samples.iter().map(String::as_str))?;
    let output_dir = ctx.files.output(project_hash);

    let reconciliation = Reconciler::new(
        ctx.backends.clustering.as_ref(),
        species_cfg,
        project_hash,
        &output_dir,
    )
    .reconcile(&samples, &sketches)
    .await?;

    ctx.files
        .append_qc_failures(project_hash, &reconciliation.failures)?;
    if let Some(index) = &reconciliation.external_index {
        ctx.files.persist_external_index(project_hash, index)?;
    }
    ctx.files
        .persist_assignment(project_hash, &reconciliation.result)?;

    tracing::info!(
        project_hash,
        assigned = reconciliation.result.len(),
        failed = reconciliation.failures.len(),
        clusters = reconciliation.result.cluster_labels().len(),
        "Cluster assignment complete"
    );
    Ok(())
}

/// Refine each assigned cluster into sub-lineages.
pub async fn assign_sublineages(
    ctx: &PipelineContext,
    project_hash: &str,
    species: &str,
) -> Result<()> {
    let species_cfg = ctx.config.species(species)?;
    let database = species_cfg.sublineage_db.clone().ok_or_else(|| {
        PipelineError::Configuration(format!("species {} has no sub-lineage database", species))
    })?;
    let backend = ctx.backends.sublineage.as_ref().ok_or_else(|| {
        PipelineError::Configuration("no sub-lineage collaborator configured".to_string())
    })?;

    let result = ctx.files.load_assignment(project_hash)?;
    if !result.is_complete() {
        return Err(PipelineError::NotFound(format!(
            "cluster assignment for project {} has not completed",
            project_hash
        )));
    }
    let clusters = result
        .records()
        .iter()
        .filter_map(|r| r.cluster.clone().map(|c| (r.hash.clone(), c)))
        .collect();

    backend
        .assign_sublineages(SubLineageRequest {
            project_hash: project_hash.to_string(),
            database,
            output_dir: ctx.files.output(project_hash),
            clusters,
        })
        .await?;
    tracing::info!(project_hash, "Sub-lineage assignment complete");
    Ok(())
}
