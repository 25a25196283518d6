//! One clustering run over an event's embeddings.
//!
//! The run loads the embedding artifact, clusters it, optionally merges and
//! refines the result, and writes the cluster map next to the input. When
//! every image ends up as noise the run reports [`ClusteringOutcome::NoClusterData`]
//! and removes any cluster map an earlier run left behind. Structural failures are returned as errors and also
//! leave no artifact behind.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::cluster::{
    ClusterBuilder, ClusterMap, ClusterMerger, ClusteringPolicy, refine_by_highest_similarity,
};
use crate::config::{Settings, StorageConfig};
use crate::error::{ClusterError, ClusterResult};
use crate::vector::{EmbeddingSet, EmbeddingStore};

/// Result of a clustering run that did not fail.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ClusteringOutcome {
    /// Clusters were found and persisted.
    Clustered {
        clusters: ClusterMap,
        artifact_path: PathBuf,
    },
    /// Nothing could be grouped; every image is listed here.
    NoClusterData { unclustered: Vec<String> },
}

impl ClusteringOutcome {
    pub fn cluster_map(&self) -> Option<&ClusterMap> {
        match self {
            Self::Clustered { clusters, .. } => Some(clusters),
            Self::NoClusterData { .. } => None,
        }
    }
}

impl std::fmt::Display for ClusteringOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Clustered {
                clusters,
                artifact_path,
            } => {
                writeln!(
                    f,
                    "{} clusters written to {}",
                    clusters.cluster_count(),
                    artifact_path.display()
                )?;
                write!(f, "{clusters}")
            }
            Self::NoClusterData { unclustered } => {
                write!(f, "No cluster data: {} images unclustered", unclustered.len())
            }
        }
    }
}

/// A configured clustering run.
#[derive(Debug, Clone)]
pub struct ClusteringRun {
    builder: ClusterBuilder,
    merger: Option<ClusterMerger>,
    refine_threshold: Option<f64>,
    storage: StorageConfig,
}

impl ClusteringRun {
    /// Creates a run from validated settings.
    pub fn from_settings(settings: &Settings) -> ClusterResult<Self> {
        settings.validate()?;
        let clustering = &settings.clustering;
        let merger = if clustering.merge {
            Some(ClusterMerger::new(clustering.merge_threshold)?)
        } else {
            None
        };

        Ok(Self {
            builder: ClusterBuilder::new(ClusteringPolicy::from_config(clustering)),
            merger,
            refine_threshold: clustering.refine.then_some(clustering.refine_threshold),
            storage: settings.storage.clone(),
        })
    }

    pub fn with_policy(mut self, policy: ClusteringPolicy) -> Self {
        self.builder = ClusterBuilder::new(policy);
        self
    }

    /// Enables the merge pass with `merger`, or disables it with `None`.
    pub fn with_merger(mut self, merger: Option<ClusterMerger>) -> Self {
        self.merger = merger;
        self
    }

    pub fn with_refine(mut self, threshold: Option<f64>) -> Self {
        self.refine_threshold = threshold;
        self
    }

    pub fn policy(&self) -> ClusteringPolicy {
        self.builder.policy()
    }

    /// Embedding artifact and cluster map locations for `input`.
    ///
    /// `input` is either an event directory or the embedding artifact itself;
    /// the cluster map always lands next to the embedding artifact.
    pub fn artifact_paths(&self, input: &Path) -> (PathBuf, PathBuf) {
        let embeddings = if input.is_dir() {
            self.storage.embeddings_path(input)
        } else {
            input.to_path_buf()
        };
        let dir = match embeddings.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let cluster_map = self.storage.cluster_map_path(&dir);
        (embeddings, cluster_map)
    }

    /// Clusters an already loaded set without touching the filesystem.
    pub fn cluster_set(&self, set: &EmbeddingSet) -> ClusterResult<ClusterMap> {
        let mut map = self.builder.build(set)?;
        if let Some(merger) = &self.merger {
            map = merger.merge(&map, set);
        }
        if let Some(threshold) = self.refine_threshold {
            map = refine_by_highest_similarity(&map, set, threshold);
        }
        Ok(map)
    }

    /// Runs clustering for `input` and persists the cluster map.
    pub fn run(&self, input: impl AsRef<Path>) -> ClusterResult<ClusteringOutcome> {
        let (embeddings_path, map_path) = self.artifact_paths(input.as_ref());
        let set = EmbeddingStore::load(&embeddings_path)?;
        let map = self.cluster_set(&set)?;

        if map.is_all_noise() {
            warn!(
                "No clusters found among {} images in {}",
                set.len(),
                embeddings_path.display()
            );
            remove_stale_map(&map_path)?;
            return Ok(ClusteringOutcome::NoClusterData {
                unclustered: map.noise().to_vec(),
            });
        }

        map.save(&map_path)?;
        info!(
            "Clustering finished: {} clusters, {} unclustered",
            map.cluster_count(),
            map.noise().len()
        );
        Ok(ClusteringOutcome::Clustered {
            clusters: map,
            artifact_path: map_path,
        })
    }
}

/// Deletes a cluster map left by an earlier run. A missing file is fine.
fn remove_stale_map(map_path: &Path) -> ClusterResult<()> {
    match std::fs::remove_file(map_path) {
        Ok(()) => {
            info!("Removed stale cluster map at {}", map_path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(ClusterError::FileWrite {
            path: map_path.to_path_buf(),
            source,
        }),
    }
}
