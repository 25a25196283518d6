//! Cosine similarity and distance computation between embeddings.
//!
//! All accumulation happens in `f64` so that near-duplicate faces compare
//! stably regardless of vector length. Similarities are clamped into
//! [-1, 1]; a zero-norm vector has similarity 0.0 with everything,
//! including itself.
//!
//! Cosine distance (`1 - similarity`) is not a metric. It is clamped to be
//! non-negative where used and nothing here relies on the triangle
//! inequality.

use rayon::prelude::*;

/// Computes cosine similarity between two vectors.
///
/// Both slices must have the same length. Only debug builds check this;
/// in release builds the longer vector is silently truncated. Validate
/// external input with [`VectorDimension::validate_vector`] first, as
/// `find_best_match` and `ApproxIndex::search` do.
///
/// # Returns
/// * Cosine similarity in range [-1, 1], where 1 is most similar.
///   Returns 0.0 when either vector has zero norm.
///
/// [`VectorDimension::validate_vector`]: crate::vector::VectorDimension::validate_vector
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    debug_assert_eq!(a.len(), b.len(), "Vectors must have same dimension");

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

/// Cosine distance, `1 - cosine_similarity`, clamped to be non-negative.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    (1.0 - cosine_similarity(a, b)).max(0.0)
}

/// Euclidean norm with f64 accumulation.
pub fn l2_norm(vector: &[f32]) -> f64 {
    vector
        .iter()
        .map(|&x| (x as f64) * (x as f64))
        .sum::<f64>()
        .sqrt()
}

/// Normalizes a vector in-place to unit length.
///
/// Zero vectors are left untouched.
pub fn normalize(vector: &mut [f32]) {
    let norm = l2_norm(vector);
    if norm > 0.0 {
        let scale = 1.0 / norm;
        for value in vector.iter_mut() {
            *value = (*value as f64 * scale) as f32;
        }
    }
}

/// Creates a normalized copy of a vector.
pub fn normalized(vector: &[f32]) -> Vec<f32> {
    let mut copy = vector.to_vec();
    normalize(&mut copy);
    copy
}

/// Elementwise mean of a set of vectors, accumulated in f64.
///
/// Returns `None` for an empty set.
pub fn centroid(vectors: &[&[f32]]) -> Option<Vec<f32>> {
    let first = vectors.first()?;
    let mut sums = vec![0.0f64; first.len()];
    for vector in vectors {
        for (sum, &value) in sums.iter_mut().zip(vector.iter()) {
            *sum += value as f64;
        }
    }
    let count = vectors.len() as f64;
    Some(sums.into_iter().map(|s| (s / count) as f32).collect())
}

/// Dense N×N similarity matrix stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityMatrix {
    size: usize,
    values: Vec<f64>,
}

impl SimilarityMatrix {
    /// Number of rows (and columns).
    #[must_use]
    pub fn len(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Similarity between items `i` and `j`.
    #[must_use]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.size + j]
    }

    /// Row `i` as a slice.
    #[must_use]
    pub fn row(&self, i: usize) -> &[f64] {
        &self.values[i * self.size..(i + 1) * self.size]
    }

    /// Converts to a cosine distance matrix, clamping negatives to zero.
    #[must_use]
    pub fn to_distances(&self) -> DistanceMatrix {
        DistanceMatrix {
            size: self.size,
            values: self.values.iter().map(|s| (1.0 - s).max(0.0)).collect(),
        }
    }
}

/// Dense N×N cosine distance matrix stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMatrix {
    size: usize,
    values: Vec<f64>,
}

impl DistanceMatrix {
    #[must_use]
    pub fn len(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    #[must_use]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.size + j]
    }

    #[must_use]
    pub fn row(&self, i: usize) -> &[f64] {
        &self.values[i * self.size..(i + 1) * self.size]
    }
}

/// Computes the full pairwise cosine similarity matrix.
///
/// Rows of the upper triangle are computed in parallel and mirrored, so
/// `M[i][j] == M[j][i]` holds bit-for-bit. The diagonal is 1.0, or 0.0
/// for zero-norm vectors.
pub fn pairwise_similarity_matrix(vectors: &[&[f32]]) -> SimilarityMatrix {
    let size = vectors.len();
    let norms: Vec<f64> = vectors.par_iter().map(|v| l2_norm(v)).collect();

    let upper: Vec<Vec<f64>> = (0..size)
        .into_par_iter()
        .map(|i| {
            ((i + 1)..size)
                .map(|j| {
                    if norms[i] == 0.0 || norms[j] == 0.0 {
                        return 0.0;
                    }
                    let dot: f64 = vectors[i]
                        .iter()
                        .zip(vectors[j].iter())
                        .map(|(&x, &y)| x as f64 * y as f64)
                        .sum();
                    (dot / (norms[i] * norms[j])).clamp(-1.0, 1.0)
                })
                .collect()
        })
        .collect();

    let mut values = vec![0.0f64; size * size];
    for (i, row) in upper.into_iter().enumerate() {
        values[i * size + i] = if norms[i] == 0.0 { 0.0 } else { 1.0 };
        for (offset, similarity) in row.into_iter().enumerate() {
            let j = i + 1 + offset;
            values[i * size + j] = similarity;
            values[j * size + i] = similarity;
        }
    }

    SimilarityMatrix { size, values }
}

/// Computes the pairwise cosine distance matrix used by density clustering.
pub fn pairwise_distance_matrix(vectors: &[&[f32]]) -> DistanceMatrix {
    pairwise_similarity_matrix(vectors).to_distances()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-9;

    #[test]
    fn test_cosine_similarity() {
        // Identical vectors
        let a = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < TOLERANCE);

        // Orthogonal vectors
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < TOLERANCE);

        // Opposite vectors
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![-1.0, -2.0, -3.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < TOLERANCE);

        // Zero vector
        let zero = vec![0.0, 0.0, 0.0];
        assert_eq!(cosine_similarity(&a, &zero), 0.0);
        assert_eq!(cosine_similarity(&zero, &zero), 0.0);
    }

    #[test]
    fn test_self_similarity_on_face_sized_vectors() {
        let vector: Vec<f32> = (0..512).map(|i| ((i as f32) * 0.37).sin()).collect();
        let similarity = cosine_similarity(&vector, &vector);
        assert!((similarity - 1.0).abs() < TOLERANCE);
        assert!(similarity <= 1.0);
    }

    #[test]
    fn test_distance_is_non_negative() {
        let a = vec![0.3, 0.4, 0.5];
        assert!(cosine_distance(&a, &a) >= 0.0);
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < TOLERANCE);
    }

    #[test]
    fn test_pairwise_matrix_symmetric_with_unit_diagonal() {
        let data: Vec<Vec<f32>> = (0..7)
            .map(|i| (0..16).map(|j| ((i * 16 + j) as f32 * 0.11).cos()).collect())
            .collect();
        let refs: Vec<&[f32]> = data.iter().map(|v| v.as_slice()).collect();
        let matrix = pairwise_similarity_matrix(&refs);

        assert_eq!(matrix.len(), 7);
        for i in 0..7 {
            assert_eq!(matrix.get(i, i), 1.0);
            for j in 0..7 {
                assert_eq!(matrix.get(i, j), matrix.get(j, i));
                assert!((matrix.get(i, j) - cosine_similarity(&data[i], &data[j])).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_pairwise_matrix_zero_norm_diagonal() {
        let data = [vec![0.0f32, 0.0], vec![1.0, 1.0]];
        let refs: Vec<&[f32]> = data.iter().map(|v| v.as_slice()).collect();
        let matrix = pairwise_similarity_matrix(&refs);
        assert_eq!(matrix.get(0, 0), 0.0);
        assert_eq!(matrix.get(1, 1), 1.0);
        assert_eq!(matrix.get(0, 1), 0.0);

        let distances = matrix.to_distances();
        assert_eq!(distances.get(1, 1), 0.0);
        assert_eq!(distances.get(0, 0), 1.0);
    }

    #[test]
    fn test_empty_matrix() {
        let matrix = pairwise_similarity_matrix(&[]);
        assert!(matrix.is_empty());
    }

    #[test]
    fn test_normalize_and_centroid() {
        let mut vector = vec![3.0, 4.0];
        normalize(&mut vector);
        assert!((vector[0] - 0.6).abs() < 1e-6);
        assert!((vector[1] - 0.8).abs() < 1e-6);

        let a = [1.0f32, 0.0];
        let b = [0.0f32, 1.0];
        let mean = centroid(&[&a, &b]).unwrap();
        assert_eq!(mean, vec![0.5, 0.5]);
        assert!(centroid(&[]).is_none());
    }
}
