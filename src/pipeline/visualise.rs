use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::backend::RenderRequest;
use crate::error::{PipelineError, Result};
use crate::filestore::FileStore;
use crate::graph::{graphml, prune};
use crate::jobs::{Dependency, Job};
use crate::pipeline::{PipelineContext, Task};
use crate::reconcile::combined_include_file;

/// One step of the per-cluster visualisation chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainLink {
    pub cluster: String,
    /// Waits for the previous link, tolerating its failure
    pub depends_on_previous: bool,
    /// Performs project cleanup once done
    pub is_last: bool,
}

/// Serial chain over cluster labels: each link waits for the one before it,
/// so at most one render runs per project, and only the final link cleans up.
#[derive(Debug, Clone, Default)]
pub struct VisualisationChain {
    links: Vec<ChainLink>,
}

impl VisualisationChain {
    pub fn new<I, S>(clusters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let clusters: Vec<String> = clusters.into_iter().map(Into::into).collect();
        let last = clusters.len().saturating_sub(1);
        let links = clusters
            .into_iter()
            .enumerate()
            .map(|(i, cluster)| ChainLink {
                cluster,
                depends_on_previous: i > 0,
                is_last: i == last,
            })
            .collect();
        Self { links }
    }

    pub fn links(&self) -> &[ChainLink] {
        &self.links
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

/// Enqueue the visualisation chain for every cluster in the project's
/// assignment result.
pub async fn schedule_clusters(
    ctx: &PipelineContext,
    project_hash: &str,
    species: &str,
    names: &BTreeMap<String, String>,
) -> Result<()> {
    let result = ctx.files.load_assignment(project_hash)?;
    let chain = VisualisationChain::new(result.cluster_labels());

    if chain.is_empty() {
        // Nothing will run after us, so nobody else would clean up
        ctx.files.remove_metadata(project_hash)?;
        tracing::warn!(project_hash, "No assigned clusters to visualise");
        return Ok(());
    }

    let timeout = std::time::Duration::from_secs(ctx.config.job_timeouts.visualise_cluster);
    let mut previous = None;
    for link in chain.links() {
        let task = Task::VisualiseCluster {
            project_hash: project_hash.to_string(),
            species: species.to_string(),
            cluster: link.cluster.clone(),
            names: names.clone(),
            is_last: link.is_last,
        };
        let job = Job::new(task, timeout, ctx.retention())
            .depending_on(previous.filter(|_| link.depends_on_previous).map(Dependency::tolerant));
        let job_id = job.id;

        if !ctx.queue.write().await.enqueue(job) {
            return Err(PipelineError::Internal("job queue is at capacity".to_string()));
        }
        ctx.status
            .set_cluster_job(project_hash, &link.cluster, job_id)
            .await?;
        previous = Some(job_id);
    }

    tracing::info!(
        project_hash,
        clusters = chain.links().len(),
        "Cluster visualisations scheduled"
    );
    Ok(())
}

/// Render one cluster and write its pruned network.
pub async fn visualise_cluster(
    ctx: &PipelineContext,
    project_hash: &str,
    species: &str,
    cluster: &str,
    names: &BTreeMap<String, String>,
) -> Result<()> {
    let species_cfg = ctx.config.species(species)?;
    let include_file = resolve_include_file(&ctx.files, project_hash, cluster)?;
    let output_dir = ctx.files.visualise_dir(project_hash, cluster);
    fs::create_dir_all(&output_dir)?;

    let metadata = ctx.files.metadata_path(project_hash);
    ctx.backends
        .rendering
        .render(RenderRequest {
            project_hash: project_hash.to_string(),
            cluster: cluster.to_string(),
            database: species_cfg
                .fulldb
                .clone()
                .unwrap_or_else(|| species_cfg.refdb.clone()),
            include_file,
            output_dir: output_dir.clone(),
            metadata_file: metadata.exists().then_some(metadata),
        })
        .await?;

    // Names must be in place before pruning: queries are matched by name
    replace_hashes(&output_dir, names)?;

    let result = ctx.files.load_assignment(project_hash)?;
    let queries = query_names(result.records().iter().map(|r| r.hash.as_str()), names);
    let network = graphml::read(&ctx.files.network_file(project_hash, cluster))?;
    let pruned = prune(
        &network,
        &queries,
        ctx.config.max_subgraph_nodes,
        &mut rand::thread_rng(),
    );
    graphml::write(&pruned, &ctx.files.pruned_network_file(project_hash, cluster))?;

    tracing::info!(
        project_hash,
        cluster,
        nodes = network.node_count(),
        pruned_nodes = pruned.node_count(),
        "Cluster visualised"
    );
    Ok(())
}

/// Remove the project's temporary metadata once the last cluster job has
/// ended, whatever its outcome.
pub fn finish_project(ctx: &PipelineContext, project_hash: &str) {
    match ctx.files.remove_metadata(project_hash) {
        Ok(_) => tracing::debug!(project_hash, "Temporary metadata removed"),
        Err(e) => tracing::warn!(project_hash, error = %e, "Failed to remove metadata"),
    }
}

/// Node labels of the submitted samples once hashes have been replaced:
/// the user-facing name where one was given, the hash otherwise.
pub fn query_names<'a, I>(hashes: I, names: &BTreeMap<String, String>) -> HashSet<String>
where
    I: IntoIterator<Item = &'a str>,
{
    hashes
        .into_iter()
        .map(|hash| names.get(hash).map_or(hash, String::as_str).to_string())
        .collect()
}

/// Include-file scoping the render of `cluster`. External labels backed by
/// several internal clusters get a combined include-file.
pub fn resolve_include_file(files: &FileStore, project_hash: &str, cluster: &str) -> Result<PathBuf> {
    let output = files.output(project_hash);
    match files.load_external_index(project_hash)? {
        Some(index) => {
            let internal = index.internal_clusters(cluster).ok_or_else(|| {
                PipelineError::NotFound(format!(
                    "cluster {} in external cluster index for project {}",
                    cluster, project_hash
                ))
            })?;
            combined_include_file(&output, internal)
        }
        None => {
            let path = FileStore::include_file(&output, cluster);
            if !path.exists() {
                return Err(PipelineError::NotFound(path.display().to_string()));
            }
            Ok(path)
        }
    }
}

/// Replace sample hashes with user-facing names in every text file of `dir`.
/// Returns the number of files rewritten.
pub fn replace_hashes(dir: &Path, names: &BTreeMap<String, String>) -> Result<usize> {
    // Longest first so a hash that prefixes another cannot clobber it
    let mut pairs: Vec<(&String, &String)> = names.iter().collect();
    pairs.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    let mut rewritten = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Ok(content) = fs::read_to_string(&path) else {
            continue;
        };
        let replaced = pairs
            .iter()
            .fold(content.clone(), |acc, (hash, name)| acc.replace(hash.as_str(), name.as_str()));
        if replaced != content {
            fs::write(&path, replaced)?;
            rewritten += 1;
        }
    }
    Ok(rewritten)
}
