//! Contracts for the external scientific collaborators.
//!
//! Clustering, sub-lineage assignment and rendering are black boxes. The
//! pipeline only depends on these traits; [`CommandBackend`] drives an
//! external program, tests provide in-process fakes.

pub mod command;

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::QcPolicy;
use crate::error::Result;

pub use command::CommandBackend;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterRequest {
    pub project_hash: String,
    pub database: PathBuf,
    /// Sample hash -> sketch payload
    pub sketches: BTreeMap<String, serde_json::Value>,
    pub qc: QcPolicy,
    pub output_dir: PathBuf,
    /// Curated naming table the collaborator uses to write its per-pass
    /// external cluster lookup
    pub external_clusters_file: Option<PathBuf>,
}

/// Parallel `names`/`clusters` vectors for samples that passed QC.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterAssignment {
    pub names: Vec<String>,
    pub clusters: Vec<String>,
    /// Samples rejected by QC: (hash, reason)
    #[serde(default)]
    pub qc_failures: Vec<(String, String)>,
}

impl ClusterAssignment {
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.clusters.iter().map(String::as_str))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderRequest {
    pub project_hash: String,
    pub cluster: String,
    pub database: PathBuf,
    pub include_file: PathBuf,
    pub output_dir: PathBuf,
    pub metadata_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubLineageRequest {
    pub project_hash: String,
    pub database: PathBuf,
    pub output_dir: PathBuf,
    /// Sample hash -> assigned cluster label
    pub clusters: BTreeMap<String, String>,
}

#[async_trait]
pub trait ClusteringBackend: Send + Sync {
    async fn assign(&self, request: ClusterRequest) -> Result<ClusterAssignment>;
}

#[async_trait]
pub trait RenderingBackend: Send + Sync {
    /// Write rendering artifacts, including the cluster network, to
    /// `request.output_dir`.
    async fn render(&self, request: RenderRequest) -> Result<()>;
}

#[async_trait]
pub trait SubLineageBackend: Send + Sync {
    async fn assign_sublineages(&self, request: SubLineageRequest) -> Result<()>;
}
