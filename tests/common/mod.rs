//! Shared fixtures for integration tests.

#![allow(dead_code)]

use facecluster::config::StorageConfig;
use facecluster::{EmbeddingSet, EmbeddingStore, Settings, VectorDimension};
use std::path::{Path, PathBuf};

pub const DIM: usize = 4;

/// Two tight groups of five faces plus one face unlike either.
///
/// Group `a` sits near `[1, 0, 0, 0]`, group `b` near `[0.2, 0.98, 0, 0]`
/// and `outlier.jpg` points along the third axis.
pub fn two_people_and_a_stranger() -> EmbeddingSet {
    let mut set = EmbeddingSet::new(VectorDimension::new(DIM).unwrap());
    for i in 0..5 {
        let jitter = 0.01 * i as f32;
        set.insert(format!("a{i}.jpg"), vec![1.0, 0.0, 0.0, jitter])
            .unwrap();
        set.insert(format!("b{i}.jpg"), vec![0.2, 0.98, 0.0, jitter])
            .unwrap();
    }
    set.insert("outlier.jpg", vec![0.0, 0.0, 1.0, 0.0]).unwrap();
    set
}

/// Writes `set` as the event's embedding artifact and returns its path.
pub fn write_event(event_dir: &Path, set: &EmbeddingSet) -> PathBuf {
    let path = StorageConfig::default().embeddings_path(event_dir);
    EmbeddingStore::save(set, &path).unwrap();
    path
}

/// Default settings sized for the fixtures.
pub fn settings() -> Settings {
    Settings {
        dimension: DIM,
        ..Settings::default()
    }
}
