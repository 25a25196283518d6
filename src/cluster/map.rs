//! Cluster assignments and their on-disk artifact.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ClusterError, ClusterResult};
use crate::io::write_atomic;
use crate::vector::ClusterLabel;

/// Current cluster map artifact version.
pub const CLUSTER_MAP_VERSION: u32 = 1;

/// Mapping from cluster label to the image ids it holds.
///
/// Labels iterate in ascending order, so noise (`-1`) comes first. Every
/// image appears under exactly one label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterMap {
    clusters: BTreeMap<ClusterLabel, Vec<String>>,
}

#[derive(Serialize)]
struct ArtifactRef<'a> {
    version: u32,
    image_count: usize,
    clusters: &'a ClusterMap,
}

#[derive(Deserialize)]
struct Artifact {
    version: u32,
    image_count: usize,
    clusters: ClusterMap,
}

impl ClusterMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `image_id` to the members of `label`.
    pub fn insert(&mut self, label: ClusterLabel, image_id: impl Into<String>) {
        self.clusters.entry(label).or_default().push(image_id.into());
    }

    /// Replaces the members of `label`.
    pub fn set_members(&mut self, label: ClusterLabel, members: Vec<String>) {
        if members.is_empty() {
            self.clusters.remove(&label);
        } else {
            self.clusters.insert(label, members);
        }
    }

    pub fn members(&self, label: ClusterLabel) -> Option<&[String]> {
        self.clusters.get(&label).map(Vec::as_slice)
    }

    /// Images the density policy left unassigned.
    pub fn noise(&self) -> &[String] {
        self.members(ClusterLabel::NOISE).unwrap_or(&[])
    }

    /// All labels in ascending order, noise included.
    pub fn labels(&self) -> impl Iterator<Item = ClusterLabel> + '_ {
        self.clusters.keys().copied()
    }

    /// Non-noise clusters in ascending label order.
    pub fn clusters(&self) -> impl Iterator<Item = (ClusterLabel, &[String])> {
        self.iter().filter(|(label, _)| !label.is_noise())
    }

    pub fn iter(&self) -> impl Iterator<Item = (ClusterLabel, &[String])> {
        self.clusters
            .iter()
            .map(|(label, members)| (*label, members.as_slice()))
    }

    /// Label holding `image_id`, if any.
    pub fn cluster_of(&self, image_id: &str) -> Option<ClusterLabel> {
        self.clusters
            .iter()
            .find(|(_, members)| members.iter().any(|m| m == image_id))
            .map(|(label, _)| *label)
    }

    /// Number of labels, noise included.
    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Number of non-noise clusters.
    pub fn cluster_count(&self) -> usize {
        self.clusters().count()
    }

    /// Total number of images across all labels.
    pub fn total_images(&self) -> usize {
        self.clusters.values().map(Vec::len).sum()
    }

    /// True when every image is noise (or there are none).
    pub fn is_all_noise(&self) -> bool {
        self.cluster_count() == 0
    }

    /// Writes the map as a versioned JSON artifact, atomically.
    pub fn save(&self, path: impl AsRef<Path>) -> ClusterResult<()> {
        let path = path.as_ref();
        let artifact = ArtifactRef {
            version: CLUSTER_MAP_VERSION,
            image_count: self.total_images(),
            clusters: self,
        };
        let json = serde_json::to_vec_pretty(&artifact).map_err(|e| ClusterError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("failed to serialize cluster map: {e}"),
        })?;
        write_atomic(path, &json)?;
        tracing::info!(
            "Saved {} clusters ({} images) to {}",
            self.cluster_count(),
            artifact.image_count,
            path.display()
        );
        Ok(())
    }

    /// Reads a cluster map artifact.
    ///
    /// # Errors
    /// * `NotFound` if `path` does not exist
    /// * `Corrupt` for malformed JSON, an unknown version, a count mismatch
    ///   or an image listed under more than one label
    pub fn load(path: impl AsRef<Path>) -> ClusterResult<Self> {
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

        let artifact: Artifact = serde_json::from_slice(&bytes)
            .map_err(|e| corrupt(format!("invalid cluster map: {e}")))?;
        if artifact.version != CLUSTER_MAP_VERSION {
            return Err(corrupt(format!(
                "unsupported cluster map version {}, expected {CLUSTER_MAP_VERSION}",
                artifact.version
            )));
        }

        let map = artifact.clusters;
        if map.total_images() != artifact.image_count {
            return Err(corrupt(format!(
                "image_count is {} but {} images are listed",
                artifact.image_count,
                map.total_images()
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for (_, members) in map.iter() {
            for member in members {
                if !seen.insert(member.as_str()) {
                    return Err(corrupt(format!("image '{member}' appears more than once")));
                }
            }
        }

        Ok(map)
    }
}

impl std::fmt::Display for ClusterMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (label, members) in self.iter() {
            if label.is_noise() {
                write!(f, "Unclustered ({} images):", members.len())?;
            } else {
                write!(f, "Cluster {label} ({} images):", members.len())?;
            }
            writeln!(f, " {}", members.join(", "))?;
        }
        Ok(())
    }
}

impl FromIterator<(ClusterLabel, Vec<String>)> for ClusterMap {
    fn from_iter<T: IntoIterator<Item = (ClusterLabel, Vec<String>)>>(iter: T) -> Self {
        let mut map = Self::new();
        for (label, members) in iter {
            for member in members {
                map.insert(label, member);
            }
        }
        map
    }
}
