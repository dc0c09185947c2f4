
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::Path;

use tempfile::TempDir;

use beebop_lite::config::SpeciesConfig;
use beebop_lite::error::PipelineError;
use beebop_lite::filestore::FileStore;
use beebop_lite::model::QcSeverity;
use beebop_lite::reconcile::{Reconciler, NOVEL_GENOTYPE_WARNING};
use test_harness::{cluster, external_species, plain_species, qc_fail, FakeClustering, FULLDB, REFDB};

const PROJECT: &str = "proj1";

fn sketches(samples: &[&str]) -> BTreeMap<String, serde_json::Value> {
    samples
        .iter()
        .map(|s| (s.to_string(), serde_json::json!({ "sketch": s })))
        .collect()
}

fn sample_list(samples: &[&str]) -> Vec<String> {
    samples.iter().map(|s| s.to_string()).collect()
}

fn lines(path: &Path) -> BTreeSet<String> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

fn scratch_dirs(output: &Path) -> Vec<String> {
    fs::read_dir(output)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("full_db_"))
        .collect()
}

#[tokio::test]
async fn test_internal_labels_without_external_scheme() {
    let output = TempDir::new().unwrap();
    let clustering = FakeClustering::new()
        .with(REFDB, "a", cluster("5", None))
        .with(REFDB, "b", cluster("5", None))
        .with(REFDB, "c", qc_fail("high proportion of zero distances"));
    let species = plain_species();
    let samples = sample_list(&["a", "b", "c"]);

    let reconciliation = Reconciler::new(&clustering, &species, PROJECT, output.path())
        .reconcile(&samples, &sketches(&["a", "b", "c"]))
        .await
        .unwrap();

    assert!(reconciliation.external_index.is_none());
    let records = reconciliation.result.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].hash, "a");
    assert_eq!(records[0].cluster.as_deref(), Some("5"));
    assert_eq!(records[0].raw_cluster_num.as_deref(), Some("5"));
    assert_eq!(records[1].hash, "b");

    assert_eq!(reconciliation.failures.len(), 1);
    assert_eq!(reconciliation.failures[0].hash, "c");
    assert_eq!(reconciliation.failures[0].severity, QcSeverity::Error);
    assert_eq!(clustering.calls().len(), 1);
}

#[tokio::test]
async fn test_unresolved_samples_fall_back_to_full_database() {
    let output = TempDir::new().unwrap();
    let clustering = FakeClustering::new()
        .with(REFDB, "X", cluster("4", None))
        .with(REFDB, "Y", cluster("4", None))
        .with(REFDB, "Z", cluster("3", Some("309;20;101")))
        .with(FULLDB, "X", cluster("30", Some("7")))
        .with(FULLDB, "Y", cluster("31", None));
    let species = external_species("PRE");
    let samples = sample_list(&["X", "Y", "Z"]);

    let reconciliation = Reconciler::new(&clustering, &species, PROJECT, output.path())
        .reconcile(&samples, &sketches(&["X", "Y", "Z"]))
        .await
        .unwrap();

    let result = &reconciliation.result;
    assert_eq!(result.len(), 2);
    let x = result.get("X").unwrap();
    assert_eq!(x.cluster.as_deref(), Some("PRE7"));
    assert_eq!(x.raw_cluster_num.as_deref(), Some("7"));
    let z = result.get("Z").unwrap();
    assert_eq!(z.cluster.as_deref(), Some("PRE20"));
    assert_eq!(z.raw_cluster_num.as_deref(), Some("309;20;101"));
    // Submission order, contiguous indices
    assert_eq!(result.indexed().keys().copied().collect::<Vec<_>>(), vec![0, 1]);
    assert_eq!(result.records()[0].hash, "X");
    assert!(result.get("Y").is_none());

    assert_eq!(reconciliation.failures.len(), 1);
    let y = &reconciliation.failures[0];
    assert_eq!(y.hash, "Y");
    assert_eq!(y.reason, NOVEL_GENOTYPE_WARNING);
    assert_eq!(y.severity, QcSeverity::Warning);

    let calls = clustering.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].database, Path::new(FULLDB));
    assert_eq!(calls[1].samples, vec!["X".to_string(), "Y".to_string()]);
    assert!(calls[1].output_dir.starts_with(output.path()));
    assert_ne!(calls[1].output_dir, output.path());
    // Scratch directory is gone once reconciliation returns
    assert!(scratch_dirs(output.path()).is_empty());

    let index = reconciliation.external_index.unwrap();
    assert_eq!(
        index.internal_clusters("PRE20").unwrap(),
        &BTreeSet::from(["3".to_string()])
    );
    assert_eq!(
        index.internal_clusters("PRE7").unwrap(),
        &BTreeSet::from(["30".to_string()])
    );

    // Full-database artifacts are merged into the project output
    assert_eq!(
        lines(&FileStore::include_file(output.path(), "30")),
        BTreeSet::from(["X".to_string()])
    );
    let query_graph = lines(&FileStore::partial_query_graph(output.path(), PROJECT));
    assert!(query_graph.contains("X") && query_graph.contains("Z"));
}

#[tokio::test]
async fn test_every_sample_accounted_for_exactly_once() {
    let output = TempDir::new().unwrap();
    let clustering = FakeClustering::new()
        .with(REFDB, "a", cluster("1", Some("10")))
        .with(REFDB, "b", qc_fail("too many merges"))
        .with(REFDB, "c", cluster("2", None))
        .with(REFDB, "e", cluster("2", None))
        .with(FULLDB, "c", cluster("20", Some("11")));
    let species = external_species("GPSC");
    let all = ["a", "b", "c", "d", "e"];
    let samples = sample_list(&all);

    let reconciliation = Reconciler::new(&clustering, &species, PROJECT, output.path())
        .reconcile(&samples, &sketches(&all))
        .await
        .unwrap();

    let assigned: HashSet<&str> = reconciliation
        .result
        .records()
        .iter()
        .map(|r| r.hash.as_str())
        .collect();
    let failed: Vec<&str> = reconciliation
        .failures
        .iter()
        .map(|f| f.hash.as_str())
        .collect();
    let failed_set: HashSet<&str> = failed.iter().copied().collect();

    assert_eq!(failed.len(), failed_set.len(), "duplicate failure entries");
    assert!(assigned.is_disjoint(&failed_set));
    assert_eq!(
        reconciliation.accounted_samples(),
        all.iter().copied().collect::<HashSet<&str>>()
    );
    assert_eq!(assigned, HashSet::from(["a", "c"]));
    // "d" was dropped by the collaborator, "e" is unknown to the full database
    assert!(failed_set.contains("b") && failed_set.contains("d") && failed_set.contains("e"));
}

#[tokio::test]
async fn test_merged_external_cluster_keeps_all_internal_clusters() {
    let output = TempDir::new().unwrap();
    let clustering = FakeClustering::new()
        .with(REFDB, "a", cluster("1", Some("12")))
        .with(REFDB, "b", cluster("2", Some("40;12")));
    let species = external_species("GPSC");
    let samples = sample_list(&["a", "b"]);

    let reconciliation = Reconciler::new(&clustering, &species, PROJECT, output.path())
        .reconcile(&samples, &sketches(&["a", "b"]))
        .await
        .unwrap();

    assert_eq!(reconciliation.result.cluster_labels(), vec!["GPSC12".to_string()]);
    let index = reconciliation.external_index.unwrap();
    assert_eq!(index.len(), 1);
    assert_eq!(
        index.internal_clusters("GPSC12").unwrap(),
        &BTreeSet::from(["1".to_string(), "2".to_string()])
    );
}

#[tokio::test]
async fn test_no_fallback_when_everything_resolves() {
    let output = TempDir::new().unwrap();
    let clustering = FakeClustering::new()
        .with(REFDB, "a", cluster("1", Some("3")))
        .with(REFDB, "b", cluster("1", Some("3")));
    let species = external_species("GPSC");
    let samples = sample_list(&["a", "b"]);

    let reconciliation = Reconciler::new(&clustering, &species, PROJECT, output.path())
        .reconcile(&samples, &sketches(&["a", "b"]))
        .await
        .unwrap();

    assert_eq!(reconciliation.result.len(), 2);
    assert!(reconciliation.failures.is_empty());
    assert_eq!(clustering.calls().len(), 1);
    assert!(scratch_dirs(output.path()).is_empty());
}

#[tokio::test]
async fn test_missing_full_database_is_configuration_error() {
    let output = TempDir::new().unwrap();
    let clustering = FakeClustering::new().with(REFDB, "a", cluster("1", None));
    let mut species = SpeciesConfig::new(REFDB);
    species.external_cluster_prefix = Some("GPSC".to_string());
    species.external_clusters_file = Some("/db/external_clusters.csv".into());
    let samples = sample_list(&["a"]);

    let err = Reconciler::new(&clustering, &species, PROJECT, output.path())
        .reconcile(&samples, &sketches(&["a"]))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Configuration(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_malformed_external_value_is_rejected() {
    let output = TempDir::new().unwrap();
    let clustering = FakeClustering::new().with(REFDB, "a", cluster("1", Some("12;x")));
    let species = external_species("GPSC");
    let samples = sample_list(&["a"]);

    let err = Reconciler::new(&clustering, &species, PROJECT, output.path())
        .reconcile(&samples, &sketches(&["a"]))
        .await
        .unwrap_err();
    assert!(
        matches!(err, PipelineError::InvalidExternalClusters(_)),
        "got {:?}",
        err
    );
}
