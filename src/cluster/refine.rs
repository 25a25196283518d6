//! Highest-similarity reassignment pass.
//!
//! Each clustered face is compared against every other clustered face.
//! When its single most similar face lives in another cluster and that
//! similarity exceeds the threshold, the face moves there. All
//! comparisons use the input assignment, so the result does not depend on
//! the order faces are visited in. Noise is neither moved nor a target.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::cluster::ClusterMap;
use crate::vector::{ClusterLabel, EmbeddingSet, pairwise_similarity_matrix};

/// Returns a copy of `map` with faces moved to their most similar cluster.
///
/// Member lists of the result are in canonical (sorted id) order. Clusters
/// left without members are dropped.
pub fn refine_by_highest_similarity(map: &ClusterMap, set: &EmbeddingSet, threshold: f64) -> ClusterMap {
    // Clustered faces that have embeddings, with their current label
    let faces: Vec<(&str, ClusterLabel)> = map
        .clusters()
        .flat_map(|(label, members)| {
            members
                .iter()
                .filter(|m| set.contains(m))
                .map(move |m| (m.as_str(), label))
        })
        .collect();
    let vectors: Vec<&[f32]> = faces.iter().filter_map(|(id, _)| set.get(id)).collect();
    let similarity = pairwise_similarity_matrix(&vectors);

    let mut target: BTreeMap<&str, ClusterLabel> = BTreeMap::new();
    let mut moved = 0usize;
    for (i, &(face, current)) in faces.iter().enumerate() {
        let mut own_best = f64::NEG_INFINITY;
        let mut best: Option<(ClusterLabel, f64)> = None;
        for (j, &(_, other)) in faces.iter().enumerate() {
            let score = similarity.get(i, j);
            if other == current {
                if j != i {
                    own_best = own_best.max(score);
                }
            } else if best.is_none_or(|(_, s)| score > s) {
                best = Some((other, score));
            }
        }

        match best {
            Some((label, score)) if score > threshold && score > own_best => {
                debug!("Reassigned {face} from cluster {current} to {label} ({score:.4})");
                target.insert(face, label);
                moved += 1;
            }
            _ => {
                target.insert(face, current);
            }
        }
    }

    let mut refined = ClusterMap::new();
    for (label, members) in map.iter() {
        for member in members {
            let label = target.get(member.as_str()).copied().unwrap_or(label);
            refined.insert(label, member.as_str());
        }
    }
    let labels: Vec<ClusterLabel> = refined.labels().collect();
    for label in labels {
        if let Some(members) = refined.members(label) {
            let mut sorted = members.to_vec();
            sorted.sort();
            refined.set_members(label, sorted);
        }
    }

    if moved == 0 {
        info!("No cluster reassignment occurred during refinement");
    } else {
        info!("Refinement moved {moved} faces");
    }
    refined
}
