//! On-disk layout for sketches and per-project outputs.
//!
//! ```text
//! <root>/json/<sample_hash>.json
//! <root>/poppunk_output/<project_hash>/
//!     cluster_assignments.bin
//!     external_to_internal.bin
//!     qc_report.txt
//!     include<cluster>.txt
//!     <project_hash>_query.subset
//!     <project_hash>_external_clusters.csv
//!     <project_hash>_metadata.csv
//!     visualise_<cluster>/visualise_<cluster>_cytoscape.graphml
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{PipelineError, Result};
use crate::model::{AssignmentResult, ExternalToInternalIndex, QcFailure};

/// One AMR metadata row: column name to value. The `ID` column holds the
/// sample hash.
pub type AmrRecord = BTreeMap<String, String>;

pub const METADATA_ID_COLUMN: &str = "ID";

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sketch_path(&self, sample_hash: &str) -> PathBuf {
        self.root.join("json").join(format!("{}.json", sample_hash))
    }

    pub fn write_sketches(&self, sketches: &BTreeMap<String, serde_json::Value>) -> Result<()> {
        fs::create_dir_all(self.root.join("json"))?;
        for (hash, sketch) in sketches {
            fs::write(self.sketch_path(hash), serde_json::to_vec(sketch)?)?;
        }
        Ok(())
    }

    pub fn read_sketches<'a, I>(&self, hashes: I) -> Result<BTreeMap<String, serde_json::Value>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        hashes
            .into_iter()
            .map(|hash| {
                let path = self.sketch_path(hash);
                let raw = read_existing(&path)?;
                Ok((hash.to_string(), serde_json::from_slice(&raw)?))
            })
            .collect()
    }

    pub fn output(&self, project_hash: &str) -> PathBuf {
        self.root.join("poppunk_output").join(project_hash)
    }

    /// Tear down any previous output for the project and start empty.
    pub fn reset_output(&self, project_hash: &str) -> Result<PathBuf> {
        let dir = self.output(project_hash);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    pub fn assignment_path(&self, project_hash: &str) -> PathBuf {
        self.output(project_hash).join("cluster_assignments.bin")
    }

    pub fn persist_assignment(&self, project_hash: &str, result: &AssignmentResult) -> Result<()> {
        write_blob(&self.assignment_path(project_hash), result)
    }

    pub fn load_assignment(&self, project_hash: &str) -> Result<AssignmentResult> {
        read_blob(&self.assignment_path(project_hash))
    }

    pub fn external_index_path(&self, project_hash: &str) -> PathBuf {
        self.output(project_hash).join("external_to_internal.bin")
    }

    pub fn persist_external_index(
        &self,
        project_hash: &str,
        index: &ExternalToInternalIndex,
    ) -> Result<()> {
        write_blob(&self.external_index_path(project_hash), index)
    }

    /// `None` when reconciliation did not run for this project.
    pub fn load_external_index(&self, project_hash: &str) -> Result<Option<ExternalToInternalIndex>> {
        let path = self.external_index_path(project_hash);
        if !path.exists() {
            return Ok(None);
        }
        read_blob(&path).map(Some)
    }

    pub fn qc_report_path(&self, project_hash: &str) -> PathBuf {
        self.output(project_hash).join("qc_report.txt")
    }

    pub fn append_qc_failures(&self, project_hash: &str, failures: &[QcFailure]) -> Result<()> {
        if failures.is_empty() {
            return Ok(());
        }
        let path = self.qc_report_path(project_hash);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
        for failure in failures {
            writeln!(file, "{}", failure.to_line())?;
        }
        Ok(())
    }

    pub fn read_qc_failures(&self, project_hash: &str) -> Result<Vec<QcFailure>> {
        let path = self.qc_report_path(project_hash);
        if !path.exists() {
            return Ok(Vec::new());
        }
        Ok(fs::read_to_string(path)?
            .lines()
            .filter_map(QcFailure::from_line)
            .collect())
    }

    pub fn include_file(dir: &Path, cluster: &str) -> PathBuf {
        dir.join(format!("include{}.txt", cluster))
    }

    pub fn partial_query_graph(dir: &Path, project_hash: &str) -> PathBuf {
        dir.join(format!("{}_query.subset", project_hash))
    }

    /// Per-pass external cluster lookup written by the clustering collaborator.
    pub fn external_clusters_csv(dir: &Path, project_hash: &str) -> PathBuf {
        dir.join(format!("{}_external_clusters.csv", project_hash))
    }

    pub fn metadata_path(&self, project_hash: &str) -> PathBuf {
        self.output(project_hash)
            .join(format!("{}_metadata.csv", project_hash))
    }

    /// Write the temporary metadata table consumed by rendering.
    pub fn write_metadata(&self, project_hash: &str, amr: &[AmrRecord]) -> Result<PathBuf> {
        let columns: BTreeSet<&str> = amr
            .iter()
            .flat_map(|r| r.keys().map(String::as_str))
            .filter(|c| *c != METADATA_ID_COLUMN)
            .collect();

        let path = self.metadata_path(project_hash);
        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(std::iter::once(METADATA_ID_COLUMN).chain(columns.iter().copied()))?;
        for record in amr {
            let id = record
                .get(METADATA_ID_COLUMN)
                .map(String::as_str)
                .unwrap_or_default();
            let row = std::iter::once(id).chain(
                columns
                    .iter()
                    .map(|c| record.get(*c).map(String::as_str).unwrap_or_default()),
            );
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(path)
    }

    /// Remove the temporary metadata table. Already removed is fine.
    pub fn remove_metadata(&self, project_hash: &str) -> Result<bool> {
        match fs::remove_file(self.metadata_path(project_hash)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn visualise_dir(&self, project_hash: &str, cluster: &str) -> PathBuf {
        self.output(project_hash)
            .join(format!("visualise_{}", cluster))
    }

    pub fn network_file(&self, project_hash: &str, cluster: &str) -> PathBuf {
        self.visualise_dir(project_hash, cluster)
            .join(format!("visualise_{}_cytoscape.graphml", cluster))
    }

    pub fn pruned_network_file(&self, project_hash: &str, cluster: &str) -> PathBuf {
        self.visualise_dir(project_hash, cluster)
            .join(format!("pruned_visualise_{}_cytoscape.graphml", cluster))
    }
}

fn read_existing(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => PipelineError::NotFound(path.display().to_string()),
        _ => e.into(),
    })
}

fn write_blob<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, bincode::serialize(value)?)?;
    Ok(())
}

fn read_blob<T: DeserializeOwned>(path: &Path) -> Result<T> {
    Ok(bincode::deserialize(&read_existing(path)?)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AssignmentRecord, QcSeverity};
    use tempfile::TempDir;

    #[test]
    fn assignment_blob_round_trip() {
        let tmp = TempDir::new().unwrap();
        let fs = FileStore::new(tmp.path());
        let result: AssignmentResult = [AssignmentRecord::assigned("h1", "PRE1", "1")]
            .into_iter()
            .collect();
        fs.persist_assignment("p", &result).unwrap();
        assert_eq!(fs.load_assignment("p").unwrap(), result);
    }

    #[test]
    fn missing_blob_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let fs = FileStore::new(tmp.path());
        assert!(matches!(
            fs.load_assignment("nope"),
            Err(PipelineError::NotFound(_))
        ));
        assert!(fs.load_external_index("nope").unwrap().is_none());
    }

    #[test]
    fn qc_report_appends() {
        let tmp = TempDir::new().unwrap();
        let fs = FileStore::new(tmp.path());
        assert!(fs.read_qc_failures("p").unwrap().is_empty());
        fs.append_qc_failures("p", &[QcFailure::new("a", "bad", QcSeverity::Error)])
            .unwrap();
        fs.append_qc_failures("p", &[QcFailure::new("b", "novel", QcSeverity::Warning)])
            .unwrap();
        let failures = fs.read_qc_failures("p").unwrap();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[1].severity, QcSeverity::Warning);
    }

    #[test]
    fn metadata_written_and_removed_once() {
        let tmp = TempDir::new().unwrap();
        let fs = FileStore::new(tmp.path());
        fs.reset_output("p").unwrap();
        let amr = vec![AmrRecord::from([
            ("ID".to_string(), "h1".to_string()),
            ("Penicillin".to_string(), "R".to_string()),
        ])];
        let path = fs.write_metadata("p", &amr).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "ID,Penicillin\nh1,R\n");

        assert!(fs.remove_metadata("p").unwrap());
        assert!(!fs.remove_metadata("p").unwrap());
    }
}
