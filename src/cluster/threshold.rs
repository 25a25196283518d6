//! Threshold-chain ("first match wins") clustering.
//!
//! Images are visited in the set's canonical order. Each image not yet
//! assigned seeds a new cluster and pulls in every later unassigned image
//! whose similarity to the seed is strictly greater than the threshold.
//! Assigned images are never compared against later seeds, so the result
//! depends on the visiting order. That order is the sorted image id order
//! and is therefore reproducible.

use tracing::debug;

use crate::cluster::ClusterMap;
use crate::vector::{ClusterLabel, EmbeddingSet, pairwise_similarity_matrix};

/// Groups `set` by seed similarity. Labels are `0, 1, 2, …` in seed order.
pub fn threshold_chain(set: &EmbeddingSet, threshold: f64) -> ClusterMap {
    let ids = set.ids();
    let matrix = pairwise_similarity_matrix(&set.vectors());

    let mut assigned = vec![false; ids.len()];
    let mut map = ClusterMap::new();
    let mut next_label = 0i64;

    for seed in 0..ids.len() {
        if assigned[seed] {
            continue;
        }
        let label = ClusterLabel::new(next_label);
        next_label += 1;

        assigned[seed] = true;
        map.insert(label, ids[seed]);

        let row = matrix.row(seed);
        for candidate in (seed + 1)..ids.len() {
            if !assigned[candidate] && row[candidate] > threshold {
                assigned[candidate] = true;
                map.insert(label, ids[candidate]);
            }
        }
    }

    debug!(
        "Threshold chain at {threshold} formed {} clusters from {} images",
        next_label,
        ids.len()
    );
    map
}
