//! End-to-end tests: submit a project and let the worker pool run the whole
//! job graph against fake collaborators.


use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use beebop_lite::graph::{graphml, Graph, QUERY_LABEL, REF_QUERY_ATTR};
use beebop_lite::jobs::JobStatus;
use beebop_lite::model::QcSeverity;
use tempfile::TempDir;
use test_harness::{
    cluster, external_species, plain_species, qc_fail, submission, test_config, FakeClustering,
    FakeRenderer, TestPipeline, FULLDB, REFDB, SUBLINEAGE_DB,
};

const H1: &str = "3f9a1c20";
const H2: &str = "7b2e4d91";
const H3: &str = "c8d05e67";

fn query_count(graph: &Graph) -> usize {
    graph
        .nodes
        .iter()
        .filter(|n| graph.node_attr(n, REF_QUERY_ATTR) == Some(QUERY_LABEL))
        .count()
}

fn read_network(path: &Path) -> Graph {
    graphml::read(path).unwrap()
}

#[tokio::test]
async fn test_project_runs_to_completion() {
    let clustering = FakeClustering::new()
        .with(REFDB, H1, cluster("1", None))
        .with(REFDB, H2, cluster("1", None))
        .with(REFDB, H3, cluster("2", None));
    let tp = TestPipeline::start(
        plain_species(),
        clustering,
        FakeRenderer::new(20).with_delay(Duration::from_millis(20)),
    );
    let scheduler = tp.pipeline.scheduler();

    scheduler
        .submit(submission("p1", &[H1, H2, H3]))
        .await
        .unwrap();
    tp.wait_idle().await;

    let status = scheduler.get_status("p1").await.unwrap();
    assert_eq!(status.assign, JobStatus::Finished);
    assert_eq!(status.visualise, JobStatus::Finished);
    assert_eq!(
        status.visualise_clusters,
        BTreeMap::from([
            ("1".to_string(), JobStatus::Finished),
            ("2".to_string(), JobStatus::Finished),
        ])
    );

    let results = scheduler.results("p1").unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results.get(H3).unwrap().cluster.as_deref(), Some("2"));
    assert!(scheduler.failed_samples("p1").unwrap().is_empty());

    // One render at a time, in cluster order, all before metadata cleanup
    let calls = tp.renderer.calls();
    let order: Vec<&str> = calls.iter().map(|c| c.cluster.as_str()).collect();
    assert_eq!(order, vec!["1", "2"]);
    assert_eq!(tp.renderer.max_concurrent(), 1);
    assert!(calls.iter().all(|c| c.had_metadata));
    assert!(calls.iter().all(|c| c.database == Path::new(REFDB)));
    let files = tp.files();
    assert!(!files.metadata_path("p1").exists());

    // Two queries with 20 neighbours each: pruned down to the bound
    let big = read_network(&files.pruned_network_file("p1", "1"));
    assert_eq!(big.node_count(), 25);
    assert_eq!(query_count(&big), 2);
    assert_eq!(big.edge_count(), 23);
    assert_eq!(read_network(&files.network_file("p1", "1")).node_count(), 42);

    // Already within the bound: only annotated
    let small = read_network(&files.pruned_network_file("p1", "2"));
    assert_eq!(small.node_count(), 21);
    assert_eq!(query_count(&small), 1);

    // Hashes replaced by file names in every rendering artifact
    let tree = fs::read_to_string(files.visualise_dir("p1", "2").join("visualise_2.nwk")).unwrap();
    assert_eq!(tree, format!("({}.fa);", H3));

    tp.shutdown().await;
}

#[tokio::test]
async fn test_external_labels_drive_visualisation() {
    let clustering = FakeClustering::new()
        .with(REFDB, H1, cluster("1", Some("12")))
        .with(REFDB, H2, cluster("2", Some("40;12")))
        .with(REFDB, H3, cluster("3", None))
        .with(FULLDB, H3, cluster("33", Some("5")));
    let tp = TestPipeline::start(external_species("GPSC"), clustering, FakeRenderer::new(2));
    let scheduler = tp.pipeline.scheduler();

    scheduler
        .submit(submission("p1", &[H1, H2, H3]))
        .await
        .unwrap();
    tp.wait_idle().await;

    let status = scheduler.get_status("p1").await.unwrap();
    assert_eq!(
        status.visualise_clusters.keys().cloned().collect::<Vec<_>>(),
        vec!["GPSC12".to_string(), "GPSC5".to_string()]
    );
    assert!(status
        .visualise_clusters
        .values()
        .all(|s| *s == JobStatus::Finished));

    let results = scheduler.results("p1").unwrap();
    assert_eq!(results.get(H2).unwrap().cluster.as_deref(), Some("GPSC12"));
    assert_eq!(results.get(H2).unwrap().raw_cluster_num.as_deref(), Some("40;12"));
    assert_eq!(results.get(H3).unwrap().cluster.as_deref(), Some("GPSC5"));

    let calls = tp.renderer.calls();
    let merged = calls.iter().find(|c| c.cluster == "GPSC12").unwrap();
    assert!(merged.include_file.ends_with("include1_2.txt"));
    assert_eq!(merged.database, Path::new(FULLDB));
    let fallback = calls.iter().find(|c| c.cluster == "GPSC5").unwrap();
    assert!(fallback.include_file.ends_with("include33.txt"));

    let network = read_network(&tp.files().pruned_network_file("p1", "GPSC12"));
    assert_eq!(query_count(&network), 2);

    tp.shutdown().await;
}

#[tokio::test]
async fn test_failed_render_does_not_stop_chain() {
    let clustering = FakeClustering::new()
        .with(REFDB, H1, cluster("1", None))
        .with(REFDB, H2, cluster("2", None))
        .with(REFDB, H3, cluster("3", None));
    let tp = TestPipeline::start(
        plain_species(),
        clustering,
        FakeRenderer::new(1).failing_on("1"),
    );
    let scheduler = tp.pipeline.scheduler();

    scheduler
        .submit(submission("p1", &[H1, H2, H3]))
        .await
        .unwrap();
    tp.wait_idle().await;

    let status = scheduler.get_status("p1").await.unwrap();
    assert_eq!(status.visualise, JobStatus::Finished);
    assert_eq!(status.visualise_clusters["1"], JobStatus::Failed);
    assert_eq!(status.visualise_clusters["2"], JobStatus::Finished);
    assert_eq!(status.visualise_clusters["3"], JobStatus::Finished);
    assert!(!tp.files().metadata_path("p1").exists());

    tp.shutdown().await;
}

#[tokio::test]
async fn test_last_render_failure_still_cleans_up() {
    let clustering = FakeClustering::new()
        .with(REFDB, H1, cluster("1", None))
        .with(REFDB, H2, cluster("2", None));
    let tp = TestPipeline::start(
        plain_species(),
        clustering,
        FakeRenderer::new(1).failing_on("2"),
    );
    let scheduler = tp.pipeline.scheduler();

    scheduler.submit(submission("p1", &[H1, H2])).await.unwrap();
    tp.wait_idle().await;

    let status = scheduler.get_status("p1").await.unwrap();
    assert_eq!(status.visualise_clusters["2"], JobStatus::Failed);
    assert!(!tp.files().metadata_path("p1").exists());

    tp.shutdown().await;
}

#[tokio::test]
async fn test_timed_out_last_render_still_cleans_up() {
    let clustering = FakeClustering::new().with(REFDB, H1, cluster("1", None));
    let storage = TempDir::new().unwrap();
    let mut config = test_config(storage.path(), plain_species());
    config.job_timeouts.visualise_cluster = 1;
    let tp = TestPipeline::start_with_config(
        config,
        storage,
        clustering,
        FakeRenderer::new(1).with_delay(Duration::from_secs(3)),
    );
    let scheduler = tp.pipeline.scheduler();

    scheduler.submit(submission("p1", &[H1])).await.unwrap();
    tp.wait_idle().await;

    let status = scheduler.get_status("p1").await.unwrap();
    assert_eq!(status.visualise_clusters["1"], JobStatus::Failed);
    assert!(!tp.files().metadata_path("p1").exists());

    tp.shutdown().await;
}

#[tokio::test]
async fn test_unnamed_samples_are_kept_as_queries() {
    let clustering = FakeClustering::new().with(REFDB, H1, cluster("1", None));
    let tp = TestPipeline::start(plain_species(), clustering, FakeRenderer::new(30));
    let scheduler = tp.pipeline.scheduler();

    let mut request = submission("p1", &[H1]);
    request.names.clear();
    scheduler.submit(request).await.unwrap();
    tp.wait_idle().await;

    let status = scheduler.get_status("p1").await.unwrap();
    assert_eq!(status.visualise_clusters["1"], JobStatus::Finished);

    let network = read_network(&tp.files().pruned_network_file("p1", "1"));
    assert_eq!(network.node_count(), 25);
    assert_eq!(query_count(&network), 1);
    let query = network
        .nodes
        .iter()
        .find(|n| network.node_attr(n, REF_QUERY_ATTR) == Some(QUERY_LABEL))
        .unwrap();
    assert_eq!(network.node_attr(query, "id"), Some(H1));

    tp.shutdown().await;
}

#[tokio::test]
async fn test_failed_assignment_leaves_visualisation_waiting() {
    // No outcome table for the reference database: clustering fails
    let tp = TestPipeline::start(plain_species(), FakeClustering::new(), FakeRenderer::new(1));
    let scheduler = tp.pipeline.scheduler();

    scheduler.submit(submission("p1", &[H1])).await.unwrap();
    tp.wait_idle().await;

    let status = scheduler.get_status("p1").await.unwrap();
    assert_eq!(status.assign, JobStatus::Failed);
    assert_eq!(status.visualise, JobStatus::Waiting);
    assert!(status.visualise_clusters.is_empty());
    assert!(tp.renderer.calls().is_empty());
    assert!(!scheduler.results("p1").unwrap().is_complete());
    assert!(!tp.files().metadata_path("p1").exists());

    tp.shutdown().await;
}

#[tokio::test]
async fn test_qc_failures_and_sublineages() {
    let clustering = FakeClustering::new()
        .with(REFDB, H1, cluster("1", None))
        .with(REFDB, H2, cluster("1", None))
        .with(REFDB, H3, qc_fail("high accessory distance"));
    let tp = TestPipeline::start(
        plain_species().with_sublineage_db(SUBLINEAGE_DB),
        clustering,
        FakeRenderer::new(1),
    );
    let scheduler = tp.pipeline.scheduler();

    let response = scheduler
        .submit(submission("p1", &[H1, H2, H3]))
        .await
        .unwrap();
    assert!(response.sub_lineage.is_some());
    tp.wait_idle().await;

    let status = scheduler.get_status("p1").await.unwrap();
    assert_eq!(status.sublineage_assign, Some(JobStatus::Finished));

    let failed = scheduler.failed_samples("p1").unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].hash, H3);
    assert_eq!(failed[0].reason, "high accessory distance");
    assert_eq!(failed[0].severity, QcSeverity::Error);

    let results = scheduler.results("p1").unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.get(H3).is_none());

    let calls = tp.sublineages.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0],
        BTreeMap::from([
            (H1.to_string(), "1".to_string()),
            (H2.to_string(), "1".to_string()),
        ])
    );

    tp.shutdown().await;
}

#[tokio::test]
async fn test_projects_are_independent() {
    let clustering = FakeClustering::new()
        .with(REFDB, H1, cluster("1", None))
        .with(REFDB, H2, cluster("2", None));
    let tp = TestPipeline::start(plain_species(), clustering, FakeRenderer::new(1));
    let scheduler = tp.pipeline.scheduler();

    scheduler.submit(submission("p1", &[H1])).await.unwrap();
    scheduler.submit(submission("p2", &[H2])).await.unwrap();
    tp.wait_idle().await;

    let p1 = scheduler.get_status("p1").await.unwrap();
    let p2 = scheduler.get_status("p2").await.unwrap();
    assert_eq!(p1.visualise_clusters.keys().collect::<Vec<_>>(), vec!["1"]);
    assert_eq!(p2.visualise_clusters.keys().collect::<Vec<_>>(), vec!["2"]);
    assert!(tp.files().pruned_network_file("p1", "1").exists());
    assert!(tp.files().pruned_network_file("p2", "2").exists());

    tp.shutdown().await;
}
