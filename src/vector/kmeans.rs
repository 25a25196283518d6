//! K-means training for the approximate index's coarse quantizer.
//!
//! Uses cosine similarity as the assignment metric and K-means++ for
//! centroid initialization. Randomness comes from a seeded generator so the
//! same embedding set always trains the same quantizer.
//!
//! # Algorithm Details
//! - Distance metric: Cosine similarity (not Euclidean)
//! - Initialization: K-means++ with a fixed seed
//! - Convergence: no assignment changes, or centroid movement below 1e-4

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::error::{ClusterError, ClusterResult};
use crate::vector::similarity::{cosine_similarity, normalize, normalized};

/// Convergence tolerance for centroid updates.
const CONVERGENCE_TOLERANCE: f64 = 1e-4;

/// Epsilon for floating-point comparisons.
const EPSILON: f64 = 1e-10;

/// Parameters for K-means training.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KMeansParams {
    pub k: usize,
    pub max_iterations: usize,
    pub seed: u64,
}

/// Result of K-means clustering operation.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansResult {
    /// Unit-length cluster centroids.
    pub centroids: Vec<Vec<f32>>,

    /// Zero-based centroid index for each input vector.
    pub assignments: Vec<usize>,

    /// Number of iterations until convergence.
    pub iterations: usize,
}

/// Performs K-means clustering on a set of vectors using cosine similarity.
///
/// # Errors
/// * `Empty` for an empty input
/// * `InsufficientData` when there are fewer vectors than `k`
/// * `Shape` when the vectors disagree on dimension
#[must_use = "clustering results should be used or the computation is wasted"]
pub fn kmeans(vectors: &[&[f32]], params: KMeansParams) -> ClusterResult<KMeansResult> {
    if vectors.is_empty() {
        return Err(ClusterError::Empty {
            source_name: "quantizer training set".to_string(),
        });
    }
    if params.k == 0 {
        return Err(ClusterError::Config {
            reason: "k-means requires at least one centroid".to_string(),
        });
    }
    if params.k > vectors.len() {
        return Err(ClusterError::InsufficientData {
            operation: "train the index quantizer",
            required: params.k,
            actual: vectors.len(),
        });
    }

    let dimension = vectors[0].len();
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
        return Err(ClusterError::Shape {
            expected: dimension,
            actual: bad.len(),
        });
    }

    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut centroids = initialize_centroids_kmeans_plus_plus(vectors, params.k, &mut rng);
    let mut assignments = vec![usize::MAX; vectors.len()];
    let mut iterations = 0;

    loop {
        iterations += 1;

        let new_assignments: Vec<usize> = vectors
            .par_iter()
            .map(|vector| nearest_centroid(vector, &centroids).0)
            .collect();

        let converged = new_assignments == assignments;
        assignments = new_assignments;

        if converged || iterations >= params.max_iterations {
            break;
        }

        let new_centroids = update_centroids(vectors, &assignments, params.k, &mut rng);
        let movement = centroid_movement(&centroids, &new_centroids);
        centroids = new_centroids;

        if movement < CONVERGENCE_TOLERANCE {
            break;
        }
    }

    if iterations >= params.max_iterations {
        warn!(
            "K-means did not fully converge after {} iterations",
            params.max_iterations
        );
    }
    debug!(
        "Trained {} centroids over {} vectors in {} iterations",
        params.k,
        vectors.len(),
        iterations
    );

    Ok(KMeansResult {
        centroids,
        assignments,
        iterations,
    })
}

/// Finds the centroid with the highest cosine similarity to `vector`.
///
/// Ties resolve to the lowest centroid index.
pub fn nearest_centroid(vector: &[f32], centroids: &[Vec<f32>]) -> (usize, f64) {
    let mut best = (0, f64::NEG_INFINITY);
    for (i, centroid) in centroids.iter().enumerate() {
        let similarity = cosine_similarity(vector, centroid);
        if similarity > best.1 {
            best = (i, similarity);
        }
    }
    best
}

/// Recomputes centroids as the normalized mean of their assigned vectors.
fn update_centroids(
    vectors: &[&[f32]],
    assignments: &[usize],
    k: usize,
    rng: &mut StdRng,
) -> Vec<Vec<f32>> {
    let dimension = vectors[0].len();
    let mut sums = vec![vec![0.0f64; dimension]; k];
    let mut sizes = vec![0usize; k];

    for (vector, &cluster) in vectors.iter().zip(assignments.iter()) {
        for (sum, &value) in sums[cluster].iter_mut().zip(vector.iter()) {
            *sum += value as f64;
        }
        sizes[cluster] += 1;
    }

    sums.into_iter()
        .zip(sizes)
        .map(|(sum, size)| {
            if size == 0 {
                // Empty cluster: reseed from a random vector
                let idx = rng.random_range(0..vectors.len());
                normalized(vectors[idx])
            } else {
                let mut centroid: Vec<f32> =
                    sum.into_iter().map(|s| (s / size as f64) as f32).collect();
                normalize(&mut centroid);
                centroid
            }
        })
        .collect()
}

/// Selects initial centroids far apart from each other (K-means++).
///
/// Coincident inputs can leave fewer distinct candidates than `k`; the
/// remaining slots are filled with the farthest-first fallback so the
/// quantizer always has exactly `k` lists.
fn initialize_centroids_kmeans_plus_plus(
    vectors: &[&[f32]],
    k: usize,
    rng: &mut StdRng,
) -> Vec<Vec<f32>> {
    let mut centroids = Vec::with_capacity(k);
    let first = rng.random_range(0..vectors.len());
    centroids.push(normalized(vectors[first]));

    // Squared cosine distance from each vector to its nearest chosen centroid
    let mut min_distances: Vec<f64> = vectors
        .iter()
        .map(|v| squared_distance(v, &centroids[0]))
        .collect();

    while centroids.len() < k {
        let total: f64 = min_distances.iter().sum();

        let chosen = if total < EPSILON {
            // All remaining points coincide with existing centroids
            centroids.len() % vectors.len()
        } else {
            let target = rng.random::<f64>() * total;
            let mut cumulative = 0.0;
            min_distances
                .iter()
                .position(|&d| {
                    cumulative += d;
                    cumulative >= target
                })
                .unwrap_or(vectors.len() - 1)
        };

        let centroid = normalized(vectors[chosen]);
        for (distance, vector) in min_distances.iter_mut().zip(vectors.iter()) {
            *distance = distance.min(squared_distance(vector, &centroid));
        }
        centroids.push(centroid);
    }

    centroids
}

fn squared_distance(vector: &[f32], centroid: &[f32]) -> f64 {
    let d = (1.0 - cosine_similarity(vector, centroid)).max(0.0);
    d * d
}

/// Mean cosine distance between matching old and new centroids.
fn centroid_movement(old: &[Vec<f32>], new: &[Vec<f32>]) -> f64 {
    old.iter()
        .zip(new.iter())
        .map(|(a, b)| 1.0 - cosine_similarity(a, b))
        .sum::<f64>()
        / old.len() as f64
}
