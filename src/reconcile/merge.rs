//! Line-set merging for include-files and partial query graphs.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};
use crate::filestore::FileStore;

/// Separator used to name combined include-files.
pub const COMBINED_CLUSTER_SEPARATOR: &str = "_";

fn read_lines(path: &Path) -> Result<Vec<String>> {
    Ok(fs::read_to_string(path)?
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

fn write_lines(path: &Path, lines: &[String]) -> Result<()> {
    let mut content = lines.join("\n");
    if !content.is_empty() {
        content.push('\n');
    }
    fs::write(path, content)?;
    Ok(())
}

/// Union the lines of `src` into `dst`. Existing lines keep their order;
/// new lines are appended. `dst` is created if absent.
pub fn merge_line_set(src: &Path, dst: &Path) -> Result<()> {
    let mut lines = if dst.exists() {
        read_lines(dst)?
    } else {
        Vec::new()
    };
    let mut seen: HashSet<String> = lines.iter().cloned().collect();
    for line in read_lines(src)? {
        if seen.insert(line.clone()) {
            lines.push(line);
        }
    }
    write_lines(dst, &lines)
}

fn is_include_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with("include") && n.ends_with(".txt"))
        .unwrap_or(false)
}

/// Merge every include-file of `from` into `into`. Same-named files are
/// unioned by line. Returns the number of files merged.
pub fn merge_include_files(from: &Path, into: &Path) -> Result<usize> {
    let mut merged = 0;
    for entry in fs::read_dir(from)? {
        let path = entry?.path();
        if !path.is_file() || !is_include_file(&path) {
            continue;
        }
        let Some(name) = path.file_name() else {
            continue;
        };
        merge_line_set(&path, &into.join(name))?;
        merged += 1;
    }
    Ok(merged)
}

/// Union the partial query graph of a secondary pass into the primary one.
pub fn merge_partial_query_graphs(from: &Path, into: &Path, project_hash: &str) -> Result<bool> {
    let src = FileStore::partial_query_graph(from, project_hash);
    if !src.exists() {
        return Ok(false);
    }
    merge_line_set(&src, &FileStore::partial_query_graph(into, project_hash))?;
    Ok(true)
}

/// Include-file covering every internal cluster in `clusters`.
///
/// A single cluster resolves to its own include-file. Several clusters are
/// concatenated into `include<a>_<b>....txt`, rewritten on every call.
pub fn combined_include_file(dir: &Path, clusters: &BTreeSet<String>) -> Result<PathBuf> {
    let mut iter = clusters.iter();
    let (Some(first), None) = (iter.next(), iter.next()) else {
        return synthesize_combined(dir, clusters);
    };
    let path = FileStore::include_file(dir, first);
    if !path.exists() {
        return Err(PipelineError::NotFound(path.display().to_string()));
    }
    Ok(path)
}

fn synthesize_combined(dir: &Path, clusters: &BTreeSet<String>) -> Result<PathBuf> {
    if clusters.is_empty() {
        return Err(PipelineError::Internal(
            "no internal clusters to combine".to_string(),
        ));
    }
    let name: Vec<&str> = clusters.iter().map(String::as_str).collect();
    let combined = FileStore::include_file(dir, &name.join(COMBINED_CLUSTER_SEPARATOR));

    let mut content = String::new();
    for cluster in clusters {
        let path = FileStore::include_file(dir, cluster);
        if !path.exists() {
            return Err(PipelineError::NotFound(path.display().to_string()));
        }
        content.push_str(&fs::read_to_string(&path)?);
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
    }
    fs::write(&combined, content)?;
    tracing::debug!(path = %combined.display(), "Combined include-file written");
    Ok(combined)
}
