//! Policy dispatch for a clustering run.

use tracing::info;

use crate::cluster::ClusterMap;
use crate::cluster::density::{DensityParams, density_clusters};
use crate::cluster::threshold::threshold_chain;
use crate::config::{ClusteringConfig, PolicyKind};
use crate::error::{ClusterError, ClusterResult};
use crate::vector::EmbeddingSet;

/// How faces are grouped, chosen per run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClusteringPolicy {
    /// A face joins the first earlier seed it is more than `threshold` similar to.
    ThresholdChain { threshold: f64 },
    /// HDBSCAN over cosine distances; unassigned faces become noise.
    Density(DensityParams),
}

impl Default for ClusteringPolicy {
    fn default() -> Self {
        Self::ThresholdChain { threshold: 0.575 }
    }
}

impl ClusteringPolicy {
    pub fn from_config(config: &ClusteringConfig) -> Self {
        match config.policy {
            PolicyKind::Threshold => Self::ThresholdChain {
                threshold: config.threshold,
            },
            PolicyKind::Density => Self::Density(DensityParams {
                min_cluster_size: config.min_cluster_size,
                min_samples: config.min_samples,
                cluster_selection_epsilon: config.cluster_selection_epsilon,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ThresholdChain { .. } => "threshold",
            Self::Density(_) => "density",
        }
    }
}

/// Builds a [`ClusterMap`] from an embedding set under one policy.
#[derive(Debug, Clone, Default)]
pub struct ClusterBuilder {
    policy: ClusteringPolicy,
}

impl ClusterBuilder {
    pub fn new(policy: ClusteringPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> ClusteringPolicy {
        self.policy
    }

    /// Clusters every image in `set`.
    ///
    /// # Errors
    /// * `Empty` if `set` has no embeddings
    /// * `Config` for invalid policy parameters
    pub fn build(&self, set: &EmbeddingSet) -> ClusterResult<ClusterMap> {
        if set.is_empty() {
            return Err(ClusterError::Empty {
                source_name: "embedding set".to_string(),
            });
        }

        let map = match &self.policy {
            ClusteringPolicy::ThresholdChain { threshold } => {
                if !(-1.0..=1.0).contains(threshold) {
                    return Err(ClusterError::Config {
                        reason: format!("threshold must be within [-1, 1], got {threshold}"),
                    });
                }
                threshold_chain(set, *threshold)
            }
            ClusteringPolicy::Density(params) => density_clusters(set, params)?,
        };

        info!(
            "{} policy grouped {} images into {} clusters ({} noise)",
            self.policy.name(),
            set.len(),
            map.cluster_count(),
            map.noise().len()
        );
        Ok(map)
    }
}
