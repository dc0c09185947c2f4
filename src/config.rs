use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Quality-control thresholds handed to the clustering collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QcPolicy {
    /// Run QC at all. When false every sketch is passed through.
    pub run_qc: bool,
    /// Reject samples whose assignment would merge more than this many clusters
    pub max_merge: u32,
    /// Maximum proportion of zero distances tolerated
    pub prop_zero: f64,
    /// Maximum accessory/core distance ratio tolerated
    pub max_a_dist: f64,
    pub max_pi_dist: f64,
}

impl Default for QcPolicy {
    fn default() -> Self {
        Self {
            run_qc: true,
            max_merge: 3,
            prop_zero: 0.1,
            max_a_dist: 0.6,
            max_pi_dist: 0.1,
        }
    }
}

/// Databases and naming scheme configured for one species.
///
/// `refdb` is mandatory. External cluster naming is enabled only when
/// `external_cluster_prefix` is set; unresolved samples are then re-clustered
/// against `fulldb`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpeciesConfig {
    pub refdb: PathBuf,
    #[serde(default)]
    pub fulldb: Option<PathBuf>,
    #[serde(default)]
    pub external_clusters_file: Option<PathBuf>,
    #[serde(default)]
    pub external_cluster_prefix: Option<String>,
    #[serde(default)]
    pub sublineage_db: Option<PathBuf>,
    #[serde(default)]
    pub qc: QcPolicy,
}

impl SpeciesConfig {
    pub fn new(refdb: impl Into<PathBuf>) -> Self {
        Self {
            refdb: refdb.into(),
            ..Default::default()
        }
    }

    pub fn with_external_clusters(
        mut self,
        prefix: impl Into<String>,
        clusters_file: impl Into<PathBuf>,
        fulldb: impl Into<PathBuf>,
    ) -> Self {
        self.external_cluster_prefix = Some(prefix.into());
        self.external_clusters_file = Some(clusters_file.into());
        self.fulldb = Some(fulldb.into());
        self
    }

    pub fn with_sublineage_db(mut self, db: impl Into<PathBuf>) -> Self {
        self.sublineage_db = Some(db.into());
        self
    }

    /// External naming needs the curated clusters table the collaborator
    /// resolves labels from.
    pub fn validate(&self) -> Result<()> {
        if self.external_cluster_prefix.is_some() && self.external_clusters_file.is_none() {
            return Err(PipelineError::Configuration(
                "external cluster prefix set without an external clusters file".to_string(),
            ));
        }
        Ok(())
    }

    /// Full database for samples the reference database cannot name.
    pub fn require_fulldb(&self) -> Result<&Path> {
        self.fulldb.as_deref().ok_or_else(|| {
            PipelineError::Configuration(
                "samples need re-clustering but no full database is configured".to_string(),
            )
        })
    }
}

/// Per-stage job timeouts, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobTimeouts {
    pub assign: u64,
    pub sub_lineage: u64,
    pub visualise: u64,
    pub visualise_cluster: u64,
}

impl Default for JobTimeouts {
    fn default() -> Self {
        Self {
            assign: 600,
            sub_lineage: 600,
            visualise: 600,
            visualise_cluster: 600,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Root directory for sketches and per-project outputs
    pub storage_location: PathBuf,
    /// Upper bound on vertices in a pruned cluster network
    pub max_subgraph_nodes: usize,
    /// Number of concurrent worker loops
    pub worker_count: usize,
    pub poll_interval_ms: u64,
    pub job_timeouts: JobTimeouts,
    /// How long terminal jobs stay queryable
    pub result_retention_secs: u64,
    pub species: HashMap<String, SpeciesConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            storage_location: PathBuf::from("./storage"),
            max_subgraph_nodes: 25,
            worker_count: 2,
            poll_interval_ms: 100,
            job_timeouts: JobTimeouts::default(),
            result_retention_secs: 86_400,
            species: HashMap::new(),
        }
    }
}

impl PipelineConfig {
    pub fn new(storage_location: impl Into<PathBuf>) -> Self {
        Self {
            storage_location: storage_location.into(),
            ..Default::default()
        }
    }

    pub fn with_species(mut self, name: impl Into<String>, species: SpeciesConfig) -> Self {
        self.species.insert(name.into(), species);
        self
    }

    /// Replace the species table with the JSON document at `path`, keyed by
    /// species name.
    pub fn with_species_file(mut self, path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        self.species = serde_json::from_str(&raw)?;
        Ok(self)
    }

    pub fn species(&self, name: &str) -> Result<&SpeciesConfig> {
        let species = self.species.get(name).ok_or_else(|| {
            PipelineError::Configuration(format!("no database configured for species {}", name))
        })?;
        species.validate()?;
        Ok(species)
    }
}
