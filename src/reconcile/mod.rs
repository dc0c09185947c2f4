//! External cluster reconciliation.
//!
//! Internal clusters from the reference database are renamed through the
//! curated external scheme. Samples the reference pass cannot name are
//! re-clustered against the full database in a scratch directory; whatever
//! is still unnamed after that is reported, not thrown.

pub mod external;
pub mod merge;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use crate::backend::{ClusterAssignment, ClusterRequest, ClusteringBackend};
use crate::config::SpeciesConfig;
use crate::error::Result;
use crate::filestore::FileStore;
use crate::model::{
    AssignmentRecord, AssignmentResult, ExternalClusterMap, ExternalToInternalIndex, QcFailure,
    QcSeverity,
};

pub use external::{external_label, ExternalClusterTable};
pub use merge::combined_include_file;

pub const NOVEL_GENOTYPE_WARNING: &str =
    "unable to assign to an existing strain - potentially novel genotype";

const MISSING_FROM_OUTPUT: &str = "sample missing from clustering output";

/// Outcome of one project's assignment.
#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    pub result: AssignmentResult,
    /// Present only when the species uses an external naming scheme
    pub external_index: Option<ExternalToInternalIndex>,
    /// Every sample excluded from `result`, with the reason
    pub failures: Vec<QcFailure>,
}

impl Reconciliation {
    /// Hashes present in either the result or the failure report.
    pub fn accounted_samples(&self) -> HashSet<&str> {
        self.result
            .records()
            .iter()
            .map(|r| r.hash.as_str())
            .chain(self.failures.iter().map(|f| f.hash.as_str()))
            .collect()
    }
}

/// Per-sample outcome of a single clustering pass.
struct Pass {
    internal: HashMap<String, String>,
    failures: Vec<QcFailure>,
}

impl Pass {
    /// Record QC rejections and any submitted sample the collaborator
    /// silently dropped.
    fn from_assignment(assignment: &ClusterAssignment, submitted: &[String]) -> Self {
        let internal: HashMap<String, String> = assignment
            .pairs()
            .map(|(n, c)| (n.to_string(), c.to_string()))
            .collect();
        let mut failures: Vec<QcFailure> = assignment
            .qc_failures
            .iter()
            .map(|(hash, reason)| QcFailure::new(hash.as_str(), reason.as_str(), QcSeverity::Error))
            .collect();
        let rejected: HashSet<&str> = assignment
            .qc_failures
            .iter()
            .map(|(h, _)| h.as_str())
            .collect();
        failures.extend(
            submitted
                .iter()
                .filter(|h| !internal.contains_key(*h) && !rejected.contains(h.as_str()))
                .map(|h| QcFailure::new(h.as_str(), MISSING_FROM_OUTPUT, QcSeverity::Error)),
        );
        Self { internal, failures }
    }
}

pub struct Reconciler<'a> {
    clustering: &'a dyn ClusteringBackend,
    species: &'a SpeciesConfig,
    project_hash: &'a str,
    output_dir: &'a Path,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        clustering: &'a dyn ClusteringBackend,
        species: &'a SpeciesConfig,
        project_hash: &'a str,
        output_dir: &'a Path,
    ) -> Self {
        Self {
            clustering,
            species,
            project_hash,
            output_dir,
        }
    }

    fn request(
        &self,
        database: &Path,
        sketches: BTreeMap<String, serde_json::Value>,
        output_dir: &Path,
    ) -> ClusterRequest {
        ClusterRequest {
            project_hash: self.project_hash.to_string(),
            database: database.to_path_buf(),
            sketches,
            qc: self.species.qc.clone(),
            output_dir: output_dir.to_path_buf(),
            external_clusters_file: self.species.external_clusters_file.clone(),
        }
    }

    /// Assign every sample in `samples` (submission order) to a cluster.
    pub async fn reconcile(
        &self,
        samples: &[String],
        sketches: &BTreeMap<String, serde_json::Value>,
    ) -> Result<Reconciliation> {
        let primary = self
            .clustering
            .assign(self.request(&self.species.refdb, sketches.clone(), self.output_dir))
            .await?;
        let primary_pass = Pass::from_assignment(&primary, samples);
        tracing::info!(
            project_hash = %self.project_hash,
            assigned = primary.names.len(),
            failed = primary_pass.failures.len(),
            "Reference database assignment complete"
        );

        let Some(prefix) = self.species.external_cluster_prefix.as_deref() else {
            let result = samples
                .iter()
                .filter_map(|h| {
                    primary_pass
                        .internal
                        .get(h)
                        .map(|c| AssignmentRecord::assigned(h.as_str(), c.as_str(), c.as_str()))
                })
                .collect();
            return Ok(Reconciliation {
                result,
                external_index: None,
                failures: primary_pass.failures,
            });
        };

        let table = ExternalClusterTable::from_csv(&FileStore::external_clusters_csv(
            self.output_dir,
            self.project_hash,
        ))?;
        let (mut found, not_found) = table.resolve(primary.names.iter().map(String::as_str), prefix)?;
        let mut internal = primary_pass.internal;
        let mut failures = primary_pass.failures;

        if !not_found.is_empty() {
            let secondary = self.reconcile_unresolved(&not_found, sketches, prefix).await?;
            for hash in &not_found {
                internal.remove(hash);
            }
            found.extend(secondary.found);
            internal.extend(secondary.internal);
            failures.extend(secondary.failures);
        }

        let mut index = ExternalToInternalIndex::default();
        let mut result = AssignmentResult::default();
        for hash in samples {
            let (Some(ext), Some(int)) = (found.get(hash), internal.get(hash)) else {
                continue;
            };
            index.insert(ext.cluster.as_str(), int.as_str());
            result.push(AssignmentRecord::assigned(
                hash.as_str(),
                ext.cluster.as_str(),
                ext.raw_cluster_num.as_str(),
            ));
        }

        Ok(Reconciliation {
            result,
            external_index: Some(index),
            failures,
        })
    }

    /// Re-cluster samples the reference pass could not name against the full
    /// database. Runs in a scratch directory so the primary distance
    /// artifacts stay untouched; include-files and the partial query graph
    /// are merged back afterwards.
    async fn reconcile_unresolved(
        &self,
        not_found: &[String],
        sketches: &BTreeMap<String, serde_json::Value>,
        prefix: &str,
    ) -> Result<SecondaryPass> {
        let fulldb = self.species.require_fulldb()?;
        let scratch = tempfile::Builder::new()
            .prefix("full_db_")
            .tempdir_in(self.output_dir)?;

        tracing::info!(
            project_hash = %self.project_hash,
            samples = not_found.len(),
            "Re-clustering unresolved samples against full database"
        );

        let subset: BTreeMap<String, serde_json::Value> = not_found
            .iter()
            .filter_map(|h| sketches.get(h).map(|s| (h.clone(), s.clone())))
            .collect();
        let assignment = self
            .clustering
            .assign(self.request(fulldb, subset, scratch.path()))
            .await?;
        let pass = Pass::from_assignment(&assignment, not_found);

        let table = ExternalClusterTable::from_csv(&FileStore::external_clusters_csv(
            scratch.path(),
            self.project_hash,
        ))?;
        let (found, unresolved) = table.resolve(assignment.names.iter().map(String::as_str), prefix)?;

        let mut failures = pass.failures;
        for hash in &unresolved {
            tracing::warn!(project_hash = %self.project_hash, sample = %hash, "{}", NOVEL_GENOTYPE_WARNING);
            failures.push(QcFailure::new(
                hash.as_str(),
                NOVEL_GENOTYPE_WARNING,
                QcSeverity::Warning,
            ));
        }

        merge::merge_include_files(scratch.path(), self.output_dir)?;
        merge::merge_partial_query_graphs(scratch.path(), self.output_dir, self.project_hash)?;

        let internal = pass
            .internal
            .into_iter()
            .filter(|(h, _)| found.contains_key(h))
            .collect();
        Ok(SecondaryPass {
            found,
            internal,
            failures,
        })
    }
}

struct SecondaryPass {
    found: ExternalClusterMap,
    internal: HashMap<String, String>,
    failures: Vec<QcFailure>,
}
