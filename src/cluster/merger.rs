//! Centroid-based merging of clusters that describe the same person.

use tracing::{debug, info};

use crate::cluster::{ClusterMap, UnionFind};
use crate::error::{ClusterError, ClusterResult};
use crate::vector::{ClusterLabel, EmbeddingSet, centroid, pairwise_similarity_matrix};

/// Default centroid similarity at which clusters merge.
pub const DEFAULT_MERGE_THRESHOLD: f64 = 0.6;

/// Folds clusters with similar centroids into one.
#[derive(Debug, Clone, Copy)]
pub struct ClusterMerger {
    threshold: f64,
}

impl Default for ClusterMerger {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MERGE_THRESHOLD,
        }
    }
}

impl ClusterMerger {
    pub fn new(threshold: f64) -> ClusterResult<Self> {
        if !(-1.0..=1.0).contains(&threshold) {
            return Err(ClusterError::Config {
                reason: format!("merge threshold must be within [-1, 1], got {threshold}"),
            });
        }
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Merges every pair of non-noise clusters whose centroids are at least
    /// `threshold` similar, transitively.
    ///
    /// Each merged group is filed under its smallest label, with member lists
    /// concatenated in ascending source label order. Noise passes through.
    /// Members missing from `set` do not contribute to centroids.
    pub fn merge(&self, map: &ClusterMap, set: &EmbeddingSet) -> ClusterMap {
        let clusters: Vec<(ClusterLabel, &[String])> = map.clusters().collect();

        let centroids: Vec<Option<Vec<f32>>> = clusters
            .iter()
            .map(|(_, members)| {
                let vectors: Vec<&[f32]> = members.iter().filter_map(|m| set.get(m)).collect();
                centroid(&vectors)
            })
            .collect();

        // Compare only clusters that have a centroid
        let present: Vec<usize> = (0..clusters.len())
            .filter(|&i| centroids[i].is_some())
            .collect();
        let vectors: Vec<&[f32]> = present
            .iter()
            .filter_map(|&i| centroids[i].as_deref())
            .collect();
        let similarity = pairwise_similarity_matrix(&vectors);

        // Labels ascend in `clusters`, so the smallest index is the smallest label
        let mut groups = UnionFind::new(clusters.len());
        let mut edges = 0usize;
        for a in 0..present.len() {
            for b in (a + 1)..present.len() {
                if similarity.get(a, b) >= self.threshold {
                    groups.union(present[a], present[b]);
                    edges += 1;
                }
            }
        }

        let mut merged = ClusterMap::new();
        for noise in map.noise() {
            merged.insert(ClusterLabel::NOISE, noise.as_str());
        }
        for (index, (_, members)) in clusters.iter().enumerate() {
            let root_label = clusters[groups.find(index)].0;
            for member in members.iter() {
                merged.insert(root_label, member.as_str());
            }
        }

        debug!("Found {edges} merge edges at threshold {}", self.threshold);
        info!(
            "Merged {} clusters into {}",
            clusters.len(),
            merged.cluster_count()
        );
        merged
    }
}
