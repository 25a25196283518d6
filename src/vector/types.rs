//! Type-safe wrappers and core types for embedding vectors and clusters.
//!
//! This module provides newtypes following the project's strict type safety
//! guidelines. All types implement the traits needed for ergonomic usage
//! while preventing primitive obsession.

use serde::{Deserialize, Serialize};

use crate::error::{ClusterError, ClusterResult};

/// Standard face embedding dimension (FaceNet-512 model).
pub const FACE_EMBEDDING_DIMENSION: usize = 512;

/// Type-safe wrapper for vector dimensions.
///
/// Ensures runtime validation of vector dimensions to prevent
/// dimension mismatches during operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct VectorDimension(usize);

impl VectorDimension {
    /// Creates a new `VectorDimension` with validation.
    ///
    /// Returns an error if the dimension is zero.
    pub fn new(dim: usize) -> ClusterResult<Self> {
        if dim == 0 {
            return Err(ClusterError::Config {
                reason: "Vector dimension cannot be zero".to_string(),
            });
        }
        Ok(Self(dim))
    }

    /// Creates the standard 512-dimensional face embedding dimension.
    #[must_use]
    pub const fn face_512() -> Self {
        Self(FACE_EMBEDDING_DIMENSION)
    }

    /// Returns the underlying dimension value.
    #[must_use]
    pub const fn get(&self) -> usize {
        self.0
    }

    /// Validates that a vector has the expected dimension.
    pub fn validate_vector(&self, vector: &[f32]) -> ClusterResult<()> {
        if vector.len() != self.0 {
            return Err(ClusterError::Shape {
                expected: self.0,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

impl Default for VectorDimension {
    fn default() -> Self {
        Self::face_512()
    }
}

impl TryFrom<usize> for VectorDimension {
    type Error = ClusterError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<VectorDimension> for usize {
    fn from(dim: VectorDimension) -> usize {
        dim.0
    }
}

/// Cosine similarity score in the range [-1.0, 1.0].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Score(f64);

impl Score {
    /// Creates a new `Score` with validation.
    ///
    /// Returns `None` if the value is NaN or outside [-1.0, 1.0].
    #[must_use]
    pub fn new(value: f64) -> Option<Self> {
        if value.is_nan() || !(-1.0..=1.0).contains(&value) {
            return None;
        }
        Some(Self(value))
    }

    /// Creates a score, clamping into range. NaN maps to 0.0.
    #[must_use]
    pub fn clamped(value: f64) -> Self {
        if value.is_nan() {
            Self(0.0)
        } else {
            Self(value.clamp(-1.0, 1.0))
        }
    }

    /// Returns the underlying value.
    #[must_use]
    pub fn get(&self) -> f64 {
        self.0
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl std::fmt::Display for Score {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4}", self.0)
    }
}

/// Identifier of a cluster in a [`ClusterMap`](crate::cluster::ClusterMap).
///
/// Label values carry no meaning beyond grouping, except [`ClusterLabel::NOISE`]
/// which marks images the density policy could not assign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterLabel(i64);

impl ClusterLabel {
    /// Reserved label for unclustered images.
    pub const NOISE: ClusterLabel = ClusterLabel(-1);

    #[must_use]
    pub const fn new(label: i64) -> Self {
        Self(label)
    }

    #[must_use]
    pub const fn get(&self) -> i64 {
        self.0
    }

    #[must_use]
    pub const fn is_noise(&self) -> bool {
        self.0 == Self::NOISE.0
    }
}

impl std::fmt::Display for ClusterLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ClusterLabel {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<i64>().map(Self)
    }
}

/// Checks that every component of an embedding is finite.
pub fn validate_finite(image_id: &str, vector: &[f32]) -> ClusterResult<()> {
    if let Some(pos) = vector.iter().position(|v| !v.is_finite()) {
        return Err(ClusterError::InvalidEmbedding {
            image_id: image_id.to_string(),
            reason: format!("component {pos} is not finite"),
        });
    }
    Ok(())
}
