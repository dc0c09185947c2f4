use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::store::SharedState;

/// Pipeline stage a job belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Assign,
    SubLineage,
    Visualise,
    VisualiseCluster,
}

impl Stage {
    fn registry_key(&self) -> &'static str {
        match self {
            Stage::Assign => "beebop:hash:job:assign",
            Stage::SubLineage => "beebop:hash:job:sublineage_assign",
            Stage::Visualise => "beebop:hash:job:visualise",
            Stage::VisualiseCluster => "beebop:hash:job:visualise",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Assign => write!(f, "assign"),
            Stage::SubLineage => write!(f, "sublineage_assign"),
            Stage::Visualise => write!(f, "visualise"),
            Stage::VisualiseCluster => write!(f, "visualise_cluster"),
        }
    }
}

/// Project-local reference to a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: Uuid,
    pub stage: Stage,
}

impl JobHandle {
    pub fn new(id: Uuid, stage: Stage) -> Self {
        Self { id, stage }
    }
}

/// Typed job registry over the shared store.
///
/// Project-level stages live under one hash per stage, keyed by project
/// hash. Per-cluster visualisation jobs live under one hash per project,
/// keyed by cluster label.
#[derive(Clone)]
pub struct StatusRepository {
    store: Arc<dyn SharedState>,
}

impl StatusRepository {
    pub fn new(store: Arc<dyn SharedState>) -> Self {
        Self { store }
    }

    fn cluster_key(project_hash: &str) -> String {
        format!("{}:{}", Stage::VisualiseCluster.registry_key(), project_hash)
    }

    pub async fn ping(&self) -> Result<()> {
        self.store.ping().await
    }

    pub async fn set_job(&self, project_hash: &str, handle: JobHandle) -> Result<()> {
        if handle.stage == Stage::VisualiseCluster {
            return Err(PipelineError::Internal(
                "cluster jobs are registered with set_cluster_job".to_string(),
            ));
        }
        self.store
            .hset(handle.stage.registry_key(), project_hash, &handle.id.to_string())
            .await
    }

    pub async fn get_job(&self, project_hash: &str, stage: Stage) -> Result<Option<JobHandle>> {
        let raw = self.store.hget(stage.registry_key(), project_hash).await?;
        raw.map(|id| parse_job_id(&id).map(|id| JobHandle::new(id, stage)))
            .transpose()
    }

    /// Forget the job registered for `stage`, if any.
    pub async fn clear_job(&self, project_hash: &str, stage: Stage) -> Result<()> {
        self.store.hdel(stage.registry_key(), project_hash).await
    }

    pub async fn set_cluster_job(&self, project_hash: &str, cluster: &str, id: Uuid) -> Result<()> {
        self.store
            .hset(&Self::cluster_key(project_hash), cluster, &id.to_string())
            .await
    }

    pub async fn cluster_jobs(&self, project_hash: &str) -> Result<BTreeMap<String, JobHandle>> {
        self.store
            .hgetall(&Self::cluster_key(project_hash))
            .await?
            .into_iter()
            .map(|(cluster, id)| {
                parse_job_id(&id).map(|id| (cluster, JobHandle::new(id, Stage::VisualiseCluster)))
            })
            .collect()
    }

    pub async fn clear_cluster_jobs(&self, project_hash: &str) -> Result<()> {
        self.store.delete(&Self::cluster_key(project_hash)).await
    }
}

fn parse_job_id(raw: &str) -> Result<Uuid> {
    Uuid::from_str(raw)
        .map_err(|e| PipelineError::Internal(format!("corrupt job id {:?}: {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn repo() -> StatusRepository {
        StatusRepository::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn stage_jobs_round_trip() {
        let repo = repo();
        let handle = JobHandle::new(Uuid::new_v4(), Stage::Assign);
        repo.set_job("p1", handle).await.unwrap();

        assert_eq!(repo.get_job("p1", Stage::Assign).await.unwrap(), Some(handle));
        assert_eq!(repo.get_job("p1", Stage::Visualise).await.unwrap(), None);
        assert_eq!(repo.get_job("p2", Stage::Assign).await.unwrap(), None);
    }

    #[tokio::test]
    async fn cleared_stage_is_forgotten() {
        let repo = repo();
        repo.set_job("p1", JobHandle::new(Uuid::new_v4(), Stage::SubLineage))
            .await
            .unwrap();
        repo.set_job("p2", JobHandle::new(Uuid::new_v4(), Stage::SubLineage))
            .await
            .unwrap();

        repo.clear_job("p1", Stage::SubLineage).await.unwrap();
        assert_eq!(repo.get_job("p1", Stage::SubLineage).await.unwrap(), None);
        assert!(repo.get_job("p2", Stage::SubLineage).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cluster_jobs_are_scoped_per_project() {
        let repo = repo();
        repo.set_cluster_job("p1", "GPSC1", Uuid::new_v4()).await.unwrap();
        repo.set_cluster_job("p1", "GPSC2", Uuid::new_v4()).await.unwrap();
        repo.set_cluster_job("p2", "GPSC1", Uuid::new_v4()).await.unwrap();

        assert_eq!(repo.cluster_jobs("p1").await.unwrap().len(), 2);
        repo.clear_cluster_jobs("p1").await.unwrap();
        assert!(repo.cluster_jobs("p1").await.unwrap().is_empty());
        assert_eq!(repo.cluster_jobs("p2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cluster_handles_go_through_set_cluster_job() {
        let repo = repo();
        let handle = JobHandle::new(Uuid::new_v4(), Stage::VisualiseCluster);
        assert!(repo.set_job("p1", handle).await.is_err());
    }
}
