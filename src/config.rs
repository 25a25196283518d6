//! Configuration module for the face clustering engine.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//! - CLI argument overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `FC_` and use double underscores
//! to separate nested levels:
//! - `FC_CLUSTERING__THRESHOLD=0.6` sets `clustering.threshold`
//! - `FC_INDEX__NPROBE=20` sets `index.nprobe`
//! - `FC_CLUSTERING__POLICY=density` sets `clustering.policy`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ClusterError, ClusterResult};
use crate::vector::{FACE_EMBEDDING_DIMENSION, VectorDimension};

/// Directory holding the workspace configuration.
pub const CONFIG_DIR: &str = ".facecluster";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Global debug mode
    #[serde(default = "default_false")]
    pub debug: bool,

    /// Embedding dimension expected from the extractor
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Clustering run settings
    #[serde(default)]
    pub clustering: ClusteringConfig,

    /// Approximate index settings
    #[serde(default)]
    pub index: IndexConfig,

    /// Artifact file names inside an event directory
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Which clustering policy a run uses.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    /// Greedy threshold chain over seed order
    #[default]
    Threshold,
    /// HDBSCAN over cosine distances
    Density,
}

impl std::str::FromStr for PolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "threshold" => Ok(Self::Threshold),
            "density" | "hdbscan" => Ok(Self::Density),
            other => Err(format!(
                "unknown clustering policy '{other}', expected 'threshold' or 'density'"
            )),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ClusteringConfig {
    /// Policy used to group faces
    #[serde(default)]
    pub policy: PolicyKind,

    /// Similarity a face must exceed to join a seed (threshold policy)
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    /// Run the centroid merge pass after clustering
    #[serde(default = "default_true")]
    pub merge: bool,

    /// Centroid similarity at which two clusters are merged
    #[serde(default = "default_merge_threshold")]
    pub merge_threshold: f64,

    /// Smallest group the density policy reports as a cluster
    #[serde(default = "default_min_cluster_size")]
    pub min_cluster_size: usize,

    /// Neighborhood size for core distances (defaults to min_cluster_size)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_samples: Option<usize>,

    /// Distance below which density clusters are not split further
    #[serde(default)]
    pub cluster_selection_epsilon: f64,

    /// Reassign faces to the cluster holding their most similar face
    #[serde(default = "default_false")]
    pub refine: bool,

    /// Similarity a face must exceed to be reassigned during refinement
    #[serde(default = "default_threshold")]
    pub refine_threshold: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct IndexConfig {
    /// Build and use the approximate index
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Number of inverted lists (quantizer centroids)
    #[serde(default = "default_n_lists")]
    pub n_lists: usize,

    /// Number of lists probed per query
    #[serde(default = "default_nprobe")]
    pub nprobe: usize,

    /// Candidates returned per query
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Seed for quantizer training
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// K-means iteration cap
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct StorageConfig {
    #[serde(default = "default_embeddings_file")]
    pub embeddings_file: String,

    #[serde(default = "default_cluster_map_file")]
    pub cluster_map_file: String,

    #[serde(default = "default_index_file")]
    pub index_file: String,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_dimension() -> usize {
    FACE_EMBEDDING_DIMENSION
}
fn default_threshold() -> f64 {
    0.575
}
fn default_merge_threshold() -> f64 {
    0.6
}
fn default_min_cluster_size() -> usize {
    3
}
fn default_n_lists() -> usize {
    100
}
fn default_nprobe() -> usize {
    10
}
fn default_top_k() -> usize {
    5
}
fn default_seed() -> u64 {
    42
}
fn default_max_iterations() -> usize {
    25
}
fn default_embeddings_file() -> String {
    "face_embeddings.vec".to_string()
}
fn default_cluster_map_file() -> String {
    "clustered_faces.json".to_string()
}
fn default_index_file() -> String {
    "approx_index.json".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            debug: false,
            dimension: default_dimension(),
            clustering: ClusteringConfig::default(),
            index: IndexConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            policy: PolicyKind::default(),
            threshold: default_threshold(),
            merge: true,
            merge_threshold: default_merge_threshold(),
            min_cluster_size: default_min_cluster_size(),
            min_samples: None,
            cluster_selection_epsilon: 0.0,
            refine: false,
            refine_threshold: default_threshold(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            n_lists: default_n_lists(),
            nprobe: default_nprobe(),
            top_k: default_top_k(),
            seed: default_seed(),
            max_iterations: default_max_iterations(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            embeddings_file: default_embeddings_file(),
            cluster_map_file: default_cluster_map_file(),
            index_file: default_index_file(),
        }
    }
}

impl StorageConfig {
    pub fn embeddings_path(&self, event_dir: &Path) -> PathBuf {
        event_dir.join(&self.embeddings_file)
    }

    pub fn cluster_map_path(&self, event_dir: &Path) -> PathBuf {
        event_dir.join(&self.cluster_map_file)
    }

    pub fn index_path(&self, event_dir: &Path) -> PathBuf {
        event_dir.join(&self.index_file)
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        // Try to find the workspace root by looking for .facecluster directory
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join("settings.toml"));
        Self::load_from(config_path)
    }

    /// Load configuration from a specific file, still honoring env overrides
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Self::figment(path.as_ref()).extract().map_err(Box::new)
    }

    /// The layered provider chain: defaults, then TOML, then `FC_` env vars.
    pub fn figment(config_path: &Path) -> Figment {
        Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Settings::default()))
            // Layer in config file if it exists
            .merge(Toml::file(config_path))
            // Double underscore separates nested levels
            .merge(Env::prefixed("FC_").map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
    }

    /// Find the workspace config by looking for a .facecluster directory
    /// from the current directory up to the filesystem root
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(CONFIG_DIR);
            if config_dir.is_dir() {
                return Some(config_dir.join("settings.toml"));
            }
        }

        None
    }

    /// Rejects parameter combinations the clustering engine cannot run with.
    pub fn validate(&self) -> ClusterResult<()> {
        let reject = |reason: String| Err(ClusterError::Config { reason });

        VectorDimension::new(self.dimension)?;
        let c = &self.clustering;
        for (name, value) in [
            ("clustering.threshold", c.threshold),
            ("clustering.merge_threshold", c.merge_threshold),
            ("clustering.refine_threshold", c.refine_threshold),
        ] {
            if !(-1.0..=1.0).contains(&value) {
                return reject(format!("{name} must be within [-1, 1], got {value}"));
            }
        }
        if c.min_cluster_size < 2 {
            return reject(format!(
                "clustering.min_cluster_size must be at least 2, got {}",
                c.min_cluster_size
            ));
        }
        if c.min_samples == Some(0) {
            return reject("clustering.min_samples must be at least 1".to_string());
        }
        if !c.cluster_selection_epsilon.is_finite() || c.cluster_selection_epsilon < 0.0 {
            return reject(format!(
                "clustering.cluster_selection_epsilon must be non-negative, got {}",
                c.cluster_selection_epsilon
            ));
        }
        if self.index.n_lists == 0 || self.index.nprobe == 0 || self.index.top_k == 0 {
            return reject("index.n_lists, index.nprobe and index.top_k must be positive".into());
        }
        Ok(())
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file with helpful comments
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = PathBuf::from(CONFIG_DIR).join("settings.toml");
        Self::write_template(&config_path, force)?;
        Ok(config_path)
    }

    /// Writes the commented settings template to `config_path`.
    pub fn write_template(config_path: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(config_path, TEMPLATE)?;
        tracing::info!("Wrote configuration template to {}", config_path.display());
        Ok(())
    }
}

const TEMPLATE: &str = r#"# facecluster configuration file

# Version of the configuration schema
version = 1

# Global debug mode
debug = false

# Embedding dimension produced by the face extractor
dimension = 512

[clustering]
# "threshold": a face joins the first seed it exceeds `threshold` against
# "density": HDBSCAN over cosine distances, unassigned faces become noise (-1)
policy = "threshold"

# Similarity a face must exceed to join a seed (strictly greater)
threshold = 0.575

# Merge clusters whose centroids are at least `merge_threshold` similar
merge = true
merge_threshold = 0.6

# Density policy parameters
min_cluster_size = 3
# min_samples = 3
cluster_selection_epsilon = 0.0

# Move each face to the cluster holding its most similar face
refine = false
refine_threshold = 0.575

[index]
# Approximate index used by `match --approx`
enabled = true

# Inverted lists; the index needs at least this many embeddings
n_lists = 100

# Lists scanned per query
nprobe = 10

top_k = 5
seed = 42
max_iterations = 25

[storage]
embeddings_file = "face_embeddings.vec"
cluster_map_file = "clustered_faces.json"
index_file = "approx_index.json"
"#;
