//! Face embedding storage, similarity and approximate search.
//!
//! # Architecture
//! Embeddings live in an [`EmbeddingSet`] keyed by image id and persisted as
//! a versioned binary artifact that is memory-mapped on load. Similarity is
//! cosine throughout, accumulated in `f64`. The [`ApproxIndex`] uses IVFFlat
//! (Inverted File with Flat vectors) with a K-means trained quantizer to
//! answer queries without scanning every embedding.

mod index;
mod kmeans;
mod similarity;
mod store;
mod types;

// Re-export core types for public API
pub use index::ApproxIndex;
pub use kmeans::{KMeansParams, KMeansResult, kmeans, nearest_centroid};
pub use similarity::{
    DistanceMatrix, SimilarityMatrix, centroid, cosine_distance, cosine_similarity, l2_norm,
    normalize, normalized, pairwise_distance_matrix, pairwise_similarity_matrix,
};
pub use store::{EmbeddingSet, EmbeddingStore};
pub use types::{ClusterLabel, FACE_EMBEDDING_DIMENSION, Score, VectorDimension, validate_finite};
