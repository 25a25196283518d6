//! Face embedding clustering and matching.
//!
//! Groups an event's face embeddings into per-person clusters and matches a
//! query face against them.

pub mod cluster;
pub mod config;
pub mod error;
pub mod io;
pub mod matching;
pub mod pipeline;
pub mod vector;

// Explicit exports for better API clarity
pub use cluster::{ClusterBuilder, ClusterMap, ClusterMerger, ClusteringPolicy, DensityParams};
pub use config::Settings;
pub use error::{ClusterError, ClusterResult};
pub use matching::{
    BestMatch, MatchOutcome, MatchResolver, find_best_match, resolve_cluster, top_matches,
};
pub use pipeline::{ClusteringOutcome, ClusteringRun};
pub use vector::{
    ApproxIndex, ClusterLabel, EmbeddingSet, EmbeddingStore, Score, VectorDimension,
    cosine_similarity, pairwise_similarity_matrix,
};
