//! Approximate index build, search and persistence.

use crate::common;
use facecluster::config::IndexConfig;
use facecluster::{ApproxIndex, ClusterError};
use tempfile::TempDir;

fn small_config() -> IndexConfig {
    IndexConfig {
        n_lists: 2,
        nprobe: 2,
        ..IndexConfig::default()
    }
}

fn built_index() -> ApproxIndex {
    let mut index = ApproxIndex::new(small_config());
    index.build(&common::two_people_and_a_stranger()).unwrap();
    index
}

#[test]
fn full_probe_search_ranks_like_exact_scan() {
    let index = built_index();
    let results = index.search(&[1.0, 0.0, 0.0, 0.0], 5).unwrap();

    assert_eq!(results.len(), 5);
    assert_eq!(results[0].0, "a0.jpg");
    assert!(results.iter().all(|(id, _)| id.starts_with('a')));
    assert!(results.windows(2).all(|w| w[0].1 >= w[1].1));
}

#[test]
fn wrong_dimension_search_leaves_index_usable() {
    let index = built_index();
    let before = index.len();

    assert!(matches!(
        index.search(&[1.0, 0.0, 0.0], 1),
        Err(ClusterError::Shape { .. })
    ));
    assert_eq!(index.len(), before);
    assert_eq!(index.search(&[1.0, 0.0, 0.0, 0.0], 1).unwrap().len(), 1);
}

#[test]
fn unbuilt_index_refuses_queries() {
    let index = ApproxIndex::new(small_config());
    assert!(!index.is_built());
    assert!(matches!(
        index.search(&[1.0, 0.0, 0.0, 0.0], 1),
        Err(ClusterError::NotBuilt)
    ));
}

#[test]
fn too_few_vectors_for_the_lists() {
    let mut index = ApproxIndex::new(IndexConfig::default());
    let result = index.build(&common::two_people_and_a_stranger());
    assert!(matches!(result, Err(ClusterError::InsufficientData { .. })));
    assert!(!index.is_built());
}

#[test]
fn saved_index_loads_with_same_answers() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("approx_index.json");
    let index = built_index();
    index.save(&path).unwrap();

    let loaded = ApproxIndex::load(&path, small_config()).unwrap();
    assert_eq!(loaded.len(), index.len());
    let query = [0.2, 0.98, 0.0, 0.0];
    assert_eq!(
        loaded.search(&query, 3).unwrap(),
        index.search(&query, 3).unwrap()
    );
}

#[test]
fn damaged_index_artifact_is_corrupt() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("approx_index.json");

    assert!(matches!(
        ApproxIndex::load(&path, small_config()),
        Err(ClusterError::NotFound { .. })
    ));

    std::fs::write(&path, "{\"version\": 1").unwrap();
    assert!(matches!(
        ApproxIndex::load(&path, small_config()),
        Err(ClusterError::Corrupt { .. })
    ));
}
