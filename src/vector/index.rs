//! Approximate nearest-neighbor index over face embeddings.
//!
//! The index uses IVFFlat (Inverted File with Flat vectors): a coarse
//! quantizer trained with K-means partitions the embeddings into `n_lists`
//! inverted lists, and a query only scans the `nprobe` lists whose
//! centroids are closest to it.
//!
//! The index is an explicit value owned by its caller. `build` either
//! replaces the whole trained state or leaves the previous state untouched.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::IndexConfig;
use crate::error::{ClusterError, ClusterResult};
use crate::io::write_atomic;
use crate::vector::kmeans::{KMeansParams, kmeans};
use crate::vector::similarity::cosine_similarity;
use crate::vector::store::EmbeddingSet;
use crate::vector::types::{Score, VectorDimension, validate_finite};

/// Current index artifact version.
const INDEX_VERSION: u32 = 1;

/// Trained index state. Only ever replaced as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TrainedIndex {
    dimension: VectorDimension,
    centroids: Vec<Vec<f32>>,
    /// Slot indices per inverted list.
    lists: Vec<Vec<u32>>,
    /// Flat vector storage indexed by slot.
    vectors: Vec<Vec<f32>>,
    /// External key (image id or group key) for each slot.
    keys: Vec<String>,
}

/// On-disk container for a trained index.
#[derive(Debug, Serialize, Deserialize)]
struct IndexArtifact {
    version: u32,
    count: usize,
    nprobe: usize,
    index: TrainedIndex,
}

/// IVFFlat approximate index with a build/search lifecycle.
#[derive(Debug, Clone)]
pub struct ApproxIndex {
    config: IndexConfig,
    trained: Option<TrainedIndex>,
}

impl ApproxIndex {
    /// Creates an empty, unbuilt index.
    #[must_use]
    pub fn new(config: IndexConfig) -> Self {
        Self {
            config,
            trained: None,
        }
    }

    /// Builds the index over every embedding in `set`, keyed by image id.
    pub fn build(&mut self, set: &EmbeddingSet) -> ClusterResult<()> {
        let entries = set
            .iter()
            .map(|(id, vector)| (id.to_string(), vector.to_vec()))
            .collect();
        self.build_from_entries(set.dimension(), entries)
    }

    /// Builds the index from `(key, embedding)` pairs.
    ///
    /// Keys need not be unique, which allows several embeddings per group
    /// (for example every face of one cluster under the cluster's label).
    ///
    /// # Errors
    /// * `InsufficientData` if there are fewer entries than `n_lists`
    /// * `Shape` / `InvalidEmbedding` for malformed entries
    ///
    /// On error the previously built state, if any, is kept.
    pub fn build_from_entries(
        &mut self,
        dimension: VectorDimension,
        entries: Vec<(String, Vec<f32>)>,
    ) -> ClusterResult<()> {
        let n_lists = self.config.n_lists;
        if entries.len() < n_lists {
            return Err(ClusterError::InsufficientData {
                operation: "train the index quantizer",
                required: n_lists,
                actual: entries.len(),
            });
        }
        for (key, vector) in &entries {
            dimension.validate_vector(vector)?;
            validate_finite(key, vector)?;
        }

        let (keys, vectors): (Vec<String>, Vec<Vec<f32>>) = entries.into_iter().unzip();
        let refs: Vec<&[f32]> = vectors.iter().map(|v| v.as_slice()).collect();

        let trained = kmeans(
            &refs,
            KMeansParams {
                k: n_lists,
                max_iterations: self.config.max_iterations,
                seed: self.config.seed,
            },
        )?;

        let mut lists = vec![Vec::new(); n_lists];
        for (slot, &list) in trained.assignments.iter().enumerate() {
            lists[list].push(slot as u32);
        }

        info!(
            "Built approximate index: {} vectors in {} lists ({} k-means iterations)",
            vectors.len(),
            n_lists,
            trained.iterations
        );

        self.trained = Some(TrainedIndex {
            dimension,
            centroids: trained.centroids,
            lists,
            vectors,
            keys,
        });
        Ok(())
    }

    /// Returns up to `k` nearest entries as `(key, score)` pairs.
    ///
    /// Scores are cosine similarities, highest first. Ties keep slot order.
    ///
    /// # Errors
    /// * `NotBuilt` before a successful build
    /// * `Shape` if the query dimension differs from the trained dimension
    #[must_use = "Search results should be processed to retrieve matches"]
    pub fn search(&self, query: &[f32], k: usize) -> ClusterResult<Vec<(String, Score)>> {
        let trained = self.trained.as_ref().ok_or(ClusterError::NotBuilt)?;
        trained.dimension.validate_vector(query)?;
        validate_finite("query", query)?;

        // Rank lists by centroid similarity, probe the closest nprobe
        let mut ranked: Vec<(usize, f64)> = trained
            .centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (i, cosine_similarity(query, c)))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        let nprobe = self.config.nprobe.clamp(1, trained.centroids.len());
        let mut candidates: Vec<(u32, Score)> = ranked
            .iter()
            .take(nprobe)
            .flat_map(|&(list, _)| trained.lists[list].iter().copied())
            .map(|slot| {
                let similarity = cosine_similarity(query, &trained.vectors[slot as usize]);
                (slot, Score::clamped(similarity))
            })
            .collect();

        candidates.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        candidates.truncate(k);

        debug!(
            "Approximate search probed {} lists, returning {} results",
            nprobe,
            candidates.len()
        );

        Ok(candidates
            .into_iter()
            .map(|(slot, score)| (trained.keys[slot as usize].clone(), score))
            .collect())
    }

    /// Whether `build` has succeeded.
    #[must_use]
    pub fn is_built(&self) -> bool {
        self.trained.is_some()
    }

    /// Number of indexed vectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.trained.as_ref().map_or(0, |t| t.vectors.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Trained dimension, if built.
    #[must_use]
    pub fn dimension(&self) -> Option<VectorDimension> {
        self.trained.as_ref().map(|t| t.dimension)
    }

    #[must_use]
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Persists the built index atomically.
    pub fn save(&self, path: impl AsRef<Path>) -> ClusterResult<()> {
        let path = path.as_ref();
        let trained = self.trained.as_ref().ok_or(ClusterError::NotBuilt)?;
        let artifact = IndexArtifact {
            version: INDEX_VERSION,
            count: trained.vectors.len(),
            nprobe: self.config.nprobe,
            index: trained.clone(),
        };
        let json = serde_json::to_vec(&artifact).map_err(|e| ClusterError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("failed to serialize index: {e}"),
        })?;
        write_atomic(path, &json)
    }

    /// Loads a persisted index, using `config` for search parameters.
    pub fn load(path: impl AsRef<Path>, config: IndexConfig) -> ClusterResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ClusterError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let bytes = std::fs::read(path).map_err(|source| ClusterError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let corrupt = |reason: String| ClusterError::Corrupt {
            path: path.to_path_buf(),
            reason,
        };

        let artifact: IndexArtifact =
            serde_json::from_slice(&bytes).map_err(|e| corrupt(format!("invalid index: {e}")))?;
        if artifact.version != INDEX_VERSION {
            return Err(corrupt(format!(
                "unsupported index version {}, expected {INDEX_VERSION}",
                artifact.version
            )));
        }

        let index = artifact.index;
        let dim = index.dimension.get();
        let slots = index.vectors.len();
        let listed: usize = index.lists.iter().map(Vec::len).sum();
        if artifact.count != slots
            || index.keys.len() != slots
            || listed != slots
            || index.lists.len() != index.centroids.len()
            || index.lists.iter().flatten().any(|&s| s as usize >= slots)
            || index.vectors.iter().any(|v| v.len() != dim)
            || index.centroids.iter().any(|c| c.len() != dim)
        {
            return Err(corrupt("index layout is inconsistent".to_string()));
        }

        Ok(Self {
            config,
            trained: Some(index),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(n_lists: usize, nprobe: usize) -> IndexConfig {
        IndexConfig {
            n_lists,
            nprobe,
            ..IndexConfig::default()
        }
    }

    /// Points on a circle in the first two dimensions, padded with small
    /// deterministic variation.
    fn circle_set(n: usize, dim: usize) -> EmbeddingSet {
        let mut set = EmbeddingSet::new(VectorDimension::new(dim).unwrap());
        for i in 0..n {
            let angle = i as f32 * std::f32::consts::PI * 2.0 / n as f32;
            let mut vector = vec![0.0; dim];
            vector[0] = angle.cos();
            vector[1] = angle.sin();
            for (j, value) in vector.iter_mut().enumerate().skip(2).take(8) {
                *value = ((i * j) as f32 / (n * dim) as f32).sin();
            }
            set.insert(format!("img_{i:03}.jpg"), vector).unwrap();
        }
        set
    }

    #[test]
    fn test_search_before_build() {
        let index = ApproxIndex::new(config(4, 2));
        assert!(!index.is_built());
        assert!(matches!(
            index.search(&[0.0; 16], 5),
            Err(ClusterError::NotBuilt)
        ));
    }

    #[test]
    fn test_insufficient_data() {
        let mut index = ApproxIndex::new(config(100, 10));
        let set = circle_set(20, 16);
        match index.build(&set) {
            Err(ClusterError::InsufficientData {
                required, actual, ..
            }) => {
                assert_eq!(required, 100);
                assert_eq!(actual, 20);
            }
            other => panic!("Expected InsufficientData, got {other:?}"),
        }
        assert!(!index.is_built());
    }

    #[test]
    fn test_full_probe_finds_exact_neighbor() {
        let set = circle_set(40, 16);
        let mut index = ApproxIndex::new(config(4, 4));
        index.build(&set).unwrap();
        assert_eq!(index.len(), 40);

        for (id, vector) in set.iter() {
            let results = index.search(vector, 3).unwrap();
            assert_eq!(results[0].0, id);
            assert!((results[0].1.get() - 1.0).abs() < 1e-6);
            for pair in results.windows(2) {
                assert!(pair[0].1 >= pair[1].1, "Results should be sorted by score");
            }
        }
    }

    #[test]
    fn test_partial_probe_returns_sorted_subset() {
        let set = circle_set(60, 16);
        let mut index = ApproxIndex::new(config(6, 1));
        index.build(&set).unwrap();

        let query = set.get("img_010.jpg").unwrap();
        let results = index.search(query, 100).unwrap();
        assert!(!results.is_empty());
        assert!(results.len() < 60);
        // The query's own list is always probed first
        assert_eq!(results[0].0, "img_010.jpg");
    }

    #[test]
    fn test_shape_error_leaves_index_unchanged() {
        let set = circle_set(30, 16);
        let mut index = ApproxIndex::new(config(3, 3));
        index.build(&set).unwrap();
        let before = index.search(set.get("img_005.jpg").unwrap(), 5).unwrap();

        assert!(matches!(
            index.search(&[0.5; 8], 5),
            Err(ClusterError::Shape {
                expected: 16,
                actual: 8
            })
        ));

        let after = index.search(set.get("img_005.jpg").unwrap(), 5).unwrap();
        assert_eq!(before, after);
        assert_eq!(index.len(), 30);
    }

    #[test]
    fn test_failed_rebuild_keeps_previous_state() {
        let mut index = ApproxIndex::new(config(3, 3));
        index.build(&circle_set(30, 16)).unwrap();

        let too_small = circle_set(2, 16);
        assert!(index.build(&too_small).is_err());
        assert!(index.is_built());
        assert_eq!(index.len(), 30);
    }

    #[test]
    fn test_grouped_keys() {
        let set = circle_set(12, 8);
        let entries: Vec<(String, Vec<f32>)> = set
            .iter()
            .enumerate()
            .map(|(i, (_, v))| (format!("cluster_{}", i / 4), v.to_vec()))
            .collect();

        let mut index = ApproxIndex::new(config(2, 2));
        index.build_from_entries(set.dimension(), entries).unwrap();

        let results = index.search(set.get("img_001.jpg").unwrap(), 1).unwrap();
        assert_eq!(results[0].0, "cluster_0");
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("approx_index.json");
        let set = circle_set(30, 16);

        let mut index = ApproxIndex::new(config(3, 3));
        assert!(matches!(index.save(&path), Err(ClusterError::NotBuilt)));
        index.build(&set).unwrap();
        index.save(&path).unwrap();

        let loaded = ApproxIndex::load(&path, config(3, 3)).unwrap();
        let query = set.get("img_007.jpg").unwrap();
        assert_eq!(loaded.search(query, 5).unwrap(), index.search(query, 5).unwrap());

        std::fs::write(&path, b"{\"version\": 1}").unwrap();
        assert!(matches!(
            ApproxIndex::load(&path, config(3, 3)),
            Err(ClusterError::Corrupt { .. })
        ));
        assert!(matches!(
            ApproxIndex::load(temp_dir.path().join("missing.json"), config(3, 3)),
            Err(ClusterError::NotFound { .. })
        ));
    }
}
