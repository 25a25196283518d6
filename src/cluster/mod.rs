//! Grouping face embeddings into per-identity clusters.
//!
//! A run builds a [`ClusterMap`] with one [`ClusteringPolicy`], optionally
//! merges clusters whose centroids are close, and optionally refines
//! individual assignments. Noise (label `-1`) is carried through every step.

mod builder;
mod density;
mod map;
mod merger;
mod refine;
mod threshold;
mod union_find;

pub use builder::{ClusterBuilder, ClusteringPolicy};
pub use density::{DensityParams, density_clusters, hdbscan};
pub use map::{CLUSTER_MAP_VERSION, ClusterMap};
pub use merger::{ClusterMerger, DEFAULT_MERGE_THRESHOLD};
pub use refine::refine_by_highest_similarity;
pub use threshold::threshold_chain;
pub use union_find::UnionFind;
