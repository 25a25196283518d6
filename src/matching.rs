//! Matching a query face against an event's clustered faces.
//!
//! "No match" and "no cluster" are different outcomes: a query always has a
//! best match when the event has any embeddings, but that image may not be
//! part of any cluster.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cluster::ClusterMap;
use crate::config::{IndexConfig, Settings};
use crate::error::{ClusterError, ClusterResult};
use crate::vector::{
    ApproxIndex, ClusterLabel, EmbeddingSet, EmbeddingStore, Score, cosine_similarity,
    validate_finite,
};

/// Most similar candidate image for a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BestMatch {
    pub image_id: String,
    pub score: Score,
}

/// Full answer to a query: the best match and the cluster holding it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchOutcome {
    pub image_id: String,
    pub score: Score,
    /// `None` when the matched image was never clustered.
    pub cluster: Option<ClusterLabel>,
    /// Whether the approximate index answered the query.
    pub approximate: bool,
    /// Up to `top_k` nearest images, best first. The best match leads.
    pub candidates: Vec<BestMatch>,
}

impl std::fmt::Display for MatchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Best match: {} (score {})", self.image_id, self.score)?;
        match self.cluster {
            Some(label) if label.is_noise() => write!(f, "Cluster: unclustered")?,
            Some(label) => write!(f, "Cluster: {label}")?,
            None => write!(f, "Cluster: none")?,
        }
        if self.candidates.len() > 1 {
            write!(f, "\nCandidates:")?;
            for candidate in &self.candidates {
                write!(f, "\n  {} ({})", candidate.image_id, candidate.score)?;
            }
        }
        Ok(())
    }
}

/// Exact scan for the candidate most similar to `query`.
///
/// Ties go to the first candidate in canonical order.
///
/// # Errors
/// * `EmptyCandidates` if `candidates` is empty
/// * `Shape` if `query` has the wrong dimension
pub fn find_best_match(query: &[f32], candidates: &EmbeddingSet) -> ClusterResult<BestMatch> {
    if candidates.is_empty() {
        return Err(ClusterError::EmptyCandidates);
    }
    candidates.dimension().validate_vector(query)?;
    validate_finite("query", query)?;

    let mut best: Option<(&str, f64)> = None;
    for (image_id, vector) in candidates.iter() {
        let similarity = cosine_similarity(query, vector);
        if best.is_none_or(|(_, s)| similarity > s) {
            best = Some((image_id, similarity));
        }
    }

    let (image_id, similarity) = best.ok_or(ClusterError::EmptyCandidates)?;
    Ok(BestMatch {
        image_id: image_id.to_string(),
        score: Score::clamped(similarity),
    })
}

/// Exact scan for the `k` candidates most similar to `query`, best first.
///
/// Equal scores keep canonical order, so the first entry is the
/// [`find_best_match`] answer.
///
/// # Errors
/// Same as [`find_best_match`].
pub fn top_matches(
    query: &[f32],
    candidates: &EmbeddingSet,
    k: usize,
) -> ClusterResult<Vec<BestMatch>> {
    if candidates.is_empty() {
        return Err(ClusterError::EmptyCandidates);
    }
    candidates.dimension().validate_vector(query)?;
    validate_finite("query", query)?;

    let mut scored: Vec<BestMatch> = candidates
        .iter()
        .map(|(image_id, vector)| BestMatch {
            image_id: image_id.to_string(),
            score: Score::clamped(cosine_similarity(query, vector)),
        })
        .collect();
    // Stable sort keeps canonical order among ties
    scored.sort_by(|a, b| b.score.cmp(&a.score));
    scored.truncate(k.max(1));
    Ok(scored)
}

/// Cluster holding `image_id`, if it was clustered.
pub fn resolve_cluster(image_id: &str, map: &ClusterMap) -> Option<ClusterLabel> {
    map.cluster_of(image_id)
}

/// Picks the primary embedding of a query artifact: its first entry in
/// canonical order.
pub fn primary_embedding(query: &EmbeddingSet) -> ClusterResult<(&str, &[f32])> {
    query.first().ok_or_else(|| ClusterError::Empty {
        source_name: "query embeddings".to_string(),
    })
}

/// Answers queries against one event directory.
#[derive(Debug)]
pub struct MatchResolver {
    event_dir: PathBuf,
    candidates: EmbeddingSet,
    clusters: ClusterMap,
    index: Option<ApproxIndex>,
    top_k: usize,
}

impl MatchResolver {
    /// Opens the event's artifacts.
    ///
    /// A missing cluster map is treated as empty, so every match resolves to
    /// no cluster. The approximate index is loaded when enabled and present.
    pub fn open(event_dir: impl AsRef<Path>, settings: &Settings) -> ClusterResult<Self> {
        let event_dir = event_dir.as_ref();
        let storage = &settings.storage;

        let candidates = EmbeddingStore::load(storage.embeddings_path(event_dir))?;

        let clusters = match ClusterMap::load(storage.cluster_map_path(event_dir)) {
            Ok(map) => map,
            Err(ClusterError::NotFound { path }) => {
                warn!("No cluster map at {}, matches will have no cluster", path.display());
                ClusterMap::new()
            }
            Err(e) => return Err(e),
        };

        let index_path = storage.index_path(event_dir);
        let index = if settings.index.enabled && index_path.exists() {
            Some(ApproxIndex::load(&index_path, settings.index.clone())?)
        } else {
            None
        };

        info!(
            "Opened event {}: {} candidates, {} clusters, index {}",
            event_dir.display(),
            candidates.len(),
            clusters.cluster_count(),
            if index.is_some() { "loaded" } else { "absent" }
        );

        Ok(Self {
            event_dir: event_dir.to_path_buf(),
            candidates,
            clusters,
            index,
            top_k: settings.index.top_k,
        })
    }

    /// Builds a resolver from values already in memory.
    pub fn from_parts(
        candidates: EmbeddingSet,
        clusters: ClusterMap,
        index: Option<ApproxIndex>,
    ) -> Self {
        Self {
            event_dir: PathBuf::new(),
            candidates,
            clusters,
            index,
            top_k: IndexConfig::default().top_k,
        }
    }

    /// Sets how many candidates each outcome lists.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub fn event_dir(&self) -> &Path {
        &self.event_dir
    }

    pub fn has_index(&self) -> bool {
        self.index.as_ref().is_some_and(ApproxIndex::is_built)
    }

    /// Drops the approximate index so queries use the exact scan.
    pub fn without_index(mut self) -> Self {
        self.index = None;
        self
    }

    /// Finds the best match for `query` and the cluster it belongs to.
    ///
    /// Takes the `top_k` nearest images from the approximate index when one
    /// is loaded, falling back to the exact scan when the index returns
    /// nothing. The first candidate is the best match.
    pub fn resolve(&self, query: &[f32]) -> ClusterResult<MatchOutcome> {
        let from_index: Vec<BestMatch> = match &self.index {
            Some(index) if index.is_built() => index
                .search(query, self.top_k)?
                .into_iter()
                .map(|(image_id, score)| BestMatch { image_id, score })
                .collect(),
            _ => Vec::new(),
        };

        let approximate = !from_index.is_empty();
        let candidates = if approximate {
            from_index
        } else {
            top_matches(query, &self.candidates, self.top_k)?
        };
        let best = candidates
            .first()
            .cloned()
            .ok_or(ClusterError::EmptyCandidates)?;

        let cluster = resolve_cluster(&best.image_id, &self.clusters);
        debug!(
            "Query matched {} with score {} (cluster {:?})",
            best.image_id, best.score, cluster
        );

        Ok(MatchOutcome {
            image_id: best.image_id,
            score: best.score,
            cluster,
            approximate,
            candidates,
        })
    }
}
