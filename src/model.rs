//! Data model shared by every pipeline stage.
//!
//! - [`AssignmentResult`]: ordered per-sample cluster assignments for a project
//! - [`ExternalClusterMap`]: sample hash to reconciled external label
//! - [`ExternalToInternalIndex`]: external label to contributing internal clusters
//! - [`QcFailure`]: one line of the QC-failure report

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentRecord {
    pub hash: String,
    /// Externally visible label once assignment has run
    pub cluster: Option<String>,
    pub raw_cluster_num: Option<String>,
}

impl AssignmentRecord {
    pub fn pending(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            cluster: None,
            raw_cluster_num: None,
        }
    }

    pub fn assigned(
        hash: impl Into<String>,
        cluster: impl Into<String>,
        raw_cluster_num: impl Into<String>,
    ) -> Self {
        Self {
            hash: hash.into(),
            cluster: Some(cluster.into()),
            raw_cluster_num: Some(raw_cluster_num.into()),
        }
    }
}

/// Assignment records in submission order. The index of a record is its
/// position, so indices are always contiguous from zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentResult {
    records: Vec<AssignmentRecord>,
}

impl AssignmentResult {
    /// Placeholder written at submission: hashes only, clusters pending.
    pub fn placeholder<I, S>(hashes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            records: hashes.into_iter().map(AssignmentRecord::pending).collect(),
        }
    }

    pub fn push(&mut self, record: AssignmentRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[AssignmentRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, hash: &str) -> Option<&AssignmentRecord> {
        self.records.iter().find(|r| r.hash == hash)
    }

    /// Index-keyed view for report consumers.
    pub fn indexed(&self) -> BTreeMap<usize, &AssignmentRecord> {
        self.records.iter().enumerate().collect()
    }

    /// Distinct assigned cluster labels, sorted.
    pub fn cluster_labels(&self) -> Vec<String> {
        let labels: BTreeSet<&str> = self
            .records
            .iter()
            .filter_map(|r| r.cluster.as_deref())
            .collect();
        labels.into_iter().map(str::to_string).collect()
    }

    pub fn is_complete(&self) -> bool {
        self.records.iter().all(|r| r.cluster.is_some())
    }
}

impl FromIterator<AssignmentRecord> for AssignmentResult {
    fn from_iter<T: IntoIterator<Item = AssignmentRecord>>(iter: T) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalCluster {
    pub cluster: String,
    pub raw_cluster_num: String,
}

pub type ExternalClusterMap = BTreeMap<String, ExternalCluster>;

/// External label -> internal clusters that contributed samples to it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalToInternalIndex {
    entries: BTreeMap<String, BTreeSet<String>>,
}

impl ExternalToInternalIndex {
    pub fn insert(&mut self, external: impl Into<String>, internal: impl Into<String>) {
        self.entries
            .entry(external.into())
            .or_default()
            .insert(internal.into());
    }

    pub fn internal_clusters(&self, external: &str) -> Option<&BTreeSet<String>> {
        self.entries.get(external)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BTreeSet<String>)> {
        self.entries.iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QcSeverity {
    Error,
    Warning,
}

impl std::fmt::Display for QcSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QcSeverity::Error => write!(f, "error"),
            QcSeverity::Warning => write!(f, "warning"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QcFailure {
    pub hash: String,
    pub reason: String,
    pub severity: QcSeverity,
}

impl QcFailure {
    pub fn new(hash: impl Into<String>, reason: impl Into<String>, severity: QcSeverity) -> Self {
        Self {
            hash: hash.into(),
            reason: reason.into(),
            severity,
        }
    }

    pub fn to_line(&self) -> String {
        format!("{}\t{}\t{}", self.hash, self.reason, self.severity)
    }

    /// Parse `hash \t reason [\t severity]`; severity defaults to error.
    pub fn from_line(line: &str) -> Option<Self> {
        let mut parts = line.splitn(3, '\t');
        let hash = parts.next()?.trim();
        let reason = parts.next()?.trim();
        if hash.is_empty() {
            return None;
        }
        let severity = match parts.next().map(str::trim) {
            Some("warning") => QcSeverity::Warning,
            _ => QcSeverity::Error,
        };
        Some(Self::new(hash, reason, severity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_has_pending_records() {
        let result = AssignmentResult::placeholder(["a", "b"]);
        assert_eq!(result.len(), 2);
        assert!(!result.is_complete());
        assert!(result.cluster_labels().is_empty());
        let indexed = result.indexed();
        assert_eq!(indexed[&1].hash, "b");
    }

    #[test]
    fn cluster_labels_are_distinct_and_sorted() {
        let result: AssignmentResult = [
            AssignmentRecord::assigned("a", "PRE7", "7"),
            AssignmentRecord::assigned("b", "PRE2", "2;9"),
            AssignmentRecord::assigned("c", "PRE7", "7"),
        ]
        .into_iter()
        .collect();
        assert_eq!(result.cluster_labels(), vec!["PRE2", "PRE7"]);
        assert!(result.is_complete());
    }

    #[test]
    fn index_keeps_every_internal_cluster() {
        let mut index = ExternalToInternalIndex::default();
        index.insert("PRE3", "10");
        index.insert("PRE3", "4");
        index.insert("PRE3", "10");
        let internal = index.internal_clusters("PRE3").unwrap();
        assert_eq!(internal.len(), 2);
    }

    #[test]
    fn qc_line_parsing() {
        let f = QcFailure::from_line("abc\tbad sketch").unwrap();
        assert_eq!(f.severity, QcSeverity::Error);
        let w = QcFailure::new("xyz", "novel", QcSeverity::Warning);
        assert_eq!(QcFailure::from_line(&w.to_line()), Some(w));
        assert!(QcFailure::from_line("").is_none());
    }
}
