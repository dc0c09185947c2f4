use std::collections::HashMap;
use std::path::Path;

use crate::error::{PipelineError, Result};
use crate::model::{ExternalCluster, ExternalClusterMap};

/// Values the curated tables use for "no cluster".
const MISSING_VALUES: [&str; 4] = ["", "NA", "nan", "NaN"];

/// Derive the external label for a raw cluster value.
///
/// Merged clusters are recorded as a `;`-joined list; the lowest numeric
/// member names the merged cluster.
pub fn external_label(prefix: &str, raw: &str) -> Result<String> {
    let lowest = raw
        .split(';')
        .map(|part| {
            part.trim().parse::<u64>().map_err(|_| {
                PipelineError::InvalidExternalClusters(format!(
                    "cluster value {:?} is not a ;-separated list of integers",
                    raw
                ))
            })
        })
        .collect::<Result<Vec<u64>>>()?
        .into_iter()
        .min()
        .ok_or_else(|| PipelineError::InvalidExternalClusters("empty cluster value".to_string()))?;
    Ok(format!("{}{}", prefix, lowest))
}

/// Sample -> raw external cluster value, as read from a two-column CSV
/// (`sample,<cluster column>`) with a header row.
#[derive(Debug, Clone, Default)]
pub struct ExternalClusterTable {
    clusters: HashMap<String, String>,
}

impl ExternalClusterTable {
    pub fn from_csv(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PipelineError::NotFound(format!(
                "external cluster table {}",
                path.display()
            )));
        }
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)?;

        let mut clusters = HashMap::new();
        for row in reader.records() {
            let row = row?;
            let Some(sample) = row.get(0).map(str::trim).filter(|s| !s.is_empty()) else {
                continue;
            };
            let value = row.get(1).map(str::trim).unwrap_or_default();
            if !MISSING_VALUES.contains(&value) {
                clusters.insert(sample.to_string(), value.to_string());
            }
        }
        Ok(Self { clusters })
    }

    pub fn raw_cluster(&self, sample: &str) -> Option<&str> {
        self.clusters.get(sample).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Split `samples` into those with a cluster value (labelled) and those
    /// without, preserving input order for the latter.
    pub fn resolve<'a, I>(&self, samples: I, prefix: &str) -> Result<(ExternalClusterMap, Vec<String>)>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut found = ExternalClusterMap::new();
        let mut not_found = Vec::new();
        for sample in samples {
            match self.raw_cluster(sample) {
                Some(raw) => {
                    found.insert(
                        sample.to_string(),
                        ExternalCluster {
                            cluster: external_label(prefix, raw)?,
                            raw_cluster_num: raw.to_string(),
                        },
                    );
                }
                None => not_found.push(sample.to_string()),
            }
        }
        Ok((found, not_found))
    }
}

impl FromIterator<(String, String)> for ExternalClusterTable {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            clusters: iter.into_iter().collect(),
        }
    }
}
