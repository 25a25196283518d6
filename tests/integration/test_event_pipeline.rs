//! End-to-end clustering runs over an event directory.

use crate::common::{self, DIM};
use facecluster::cluster::UnionFind;
use facecluster::config::PolicyKind;
use facecluster::{
    ClusterError, ClusterLabel, ClusterMap, ClusterMerger, ClusteringOutcome, ClusteringRun,
    EmbeddingSet, EmbeddingStore, MatchResolver, VectorDimension,
};
use std::collections::BTreeSet;
use tempfile::TempDir;

fn clustered(outcome: ClusteringOutcome) -> ClusterMap {
    match outcome {
        ClusteringOutcome::Clustered { clusters, .. } => clusters,
        other => panic!("Expected clusters, got {other:?}"),
    }
}

/// Every input image shows up exactly once in the map.
fn assert_partition(map: &ClusterMap, set: &EmbeddingSet) {
    let listed: Vec<&str> = map
        .iter()
        .flat_map(|(_, members)| members.iter().map(String::as_str))
        .collect();
    let unique: BTreeSet<&str> = listed.iter().copied().collect();
    assert_eq!(listed.len(), unique.len(), "an image is listed twice");
    assert_eq!(unique, set.ids().into_iter().collect::<BTreeSet<_>>());
}

#[test]
fn threshold_run_groups_people_and_keeps_singletons() {
    let temp_dir = TempDir::new().unwrap();
    let set = common::two_people_and_a_stranger();
    common::write_event(temp_dir.path(), &set);

    let run = ClusteringRun::from_settings(&common::settings()).unwrap();
    let map = clustered(run.run(temp_dir.path()).unwrap());

    assert_partition(&map, &set);
    assert_eq!(map.cluster_count(), 3);
    assert!(map.noise().is_empty());
    assert_eq!(map.cluster_of("a3.jpg"), Some(ClusterLabel::new(0)));
    assert_eq!(map.cluster_of("b1.jpg"), Some(ClusterLabel::new(1)));
    assert_eq!(map.cluster_of("outlier.jpg"), Some(ClusterLabel::new(2)));

    let on_disk = ClusterMap::load(temp_dir.path().join("clustered_faces.json")).unwrap();
    assert_eq!(on_disk, map);
}

#[test]
fn density_run_marks_the_stranger_as_noise() {
    let temp_dir = TempDir::new().unwrap();
    let set = common::two_people_and_a_stranger();
    common::write_event(temp_dir.path(), &set);

    let mut settings = common::settings();
    settings.clustering.policy = PolicyKind::Density;
    let run = ClusteringRun::from_settings(&settings).unwrap();
    let map = clustered(run.run(temp_dir.path()).unwrap());

    assert_partition(&map, &set);
    assert_eq!(map.noise(), ["outlier.jpg".to_string()]);
    assert_eq!(map.cluster_count(), 2);

    let a = map.cluster_of("a0.jpg").unwrap();
    let b = map.cluster_of("b0.jpg").unwrap();
    assert_ne!(a, b);
    for i in 0..5 {
        assert_eq!(map.cluster_of(&format!("a{i}.jpg")), Some(a));
        assert_eq!(map.cluster_of(&format!("b{i}.jpg")), Some(b));
    }
    let labels: Vec<i64> = map.labels().map(|l| l.get()).collect();
    assert_eq!(labels, vec![-1, 0, 1]);
}

#[test]
fn repeated_runs_write_identical_artifacts() {
    let temp_dir = TempDir::new().unwrap();
    common::write_event(temp_dir.path(), &common::two_people_and_a_stranger());
    let map_path = temp_dir.path().join("clustered_faces.json");

    for policy in [PolicyKind::Threshold, PolicyKind::Density] {
        let mut settings = common::settings();
        settings.clustering.policy = policy;
        let run = ClusteringRun::from_settings(&settings).unwrap();

        run.run(temp_dir.path()).unwrap();
        let first = std::fs::read(&map_path).unwrap();
        run.run(temp_dir.path()).unwrap();
        let second = std::fs::read(&map_path).unwrap();
        assert_eq!(first, second, "{policy:?} run is not reproducible");
    }
}

#[test]
fn empty_event_fails_without_writing() {
    let temp_dir = TempDir::new().unwrap();
    let empty = EmbeddingSet::new(VectorDimension::new(DIM).unwrap());
    common::write_event(temp_dir.path(), &empty);

    let run = ClusteringRun::from_settings(&common::settings()).unwrap();
    let result = run.run(temp_dir.path());

    assert!(matches!(result, Err(ClusterError::Empty { .. })));
    assert!(!temp_dir.path().join("clustered_faces.json").exists());
}

#[test]
fn corrupt_embeddings_are_reported() {
    let temp_dir = TempDir::new().unwrap();
    let path = facecluster::config::StorageConfig::default().embeddings_path(temp_dir.path());
    std::fs::write(&path, b"FEMB but not really").unwrap();

    let run = ClusteringRun::from_settings(&common::settings()).unwrap();
    let error = run.run(temp_dir.path()).unwrap_err();
    assert!(matches!(error, ClusterError::Corrupt { .. }));
    assert_eq!(
        facecluster::io::ExitCode::from_error(&error),
        facecluster::io::ExitCode::ArtifactCorrupted
    );
}

#[test]
fn saving_twice_keeps_the_union() {
    let temp_dir = TempDir::new().unwrap();
    let dim = VectorDimension::new(DIM).unwrap();

    let mut first = EmbeddingSet::new(dim);
    first.insert("a.jpg", vec![1.0, 0.0, 0.0, 0.0]).unwrap();
    first.insert("b.jpg", vec![0.0, 1.0, 0.0, 0.0]).unwrap();
    let path = common::write_event(temp_dir.path(), &first);

    let mut second = EmbeddingSet::new(dim);
    second.insert("b.jpg", vec![0.0, 0.0, 1.0, 0.0]).unwrap();
    second.insert("c.jpg", vec![0.0, 0.0, 0.0, 1.0]).unwrap();
    EmbeddingStore::save(&second, &path).unwrap();

    let loaded = EmbeddingStore::load(&path).unwrap();
    assert_eq!(loaded.ids(), vec!["a.jpg", "b.jpg", "c.jpg"]);
    assert_eq!(loaded.get("b.jpg"), Some(&[0.0, 0.0, 1.0, 0.0][..]));
}

#[test]
fn merging_is_idempotent_over_a_run() {
    let set = common::two_people_and_a_stranger();
    let run = ClusteringRun::from_settings(&common::settings())
        .unwrap()
        .with_merger(None);
    let map = run.cluster_set(&set).unwrap();

    let merger = ClusterMerger::default();
    let once = merger.merge(&map, &set);
    let twice = merger.merge(&once, &set);
    assert_eq!(once, twice);
    assert_partition(&twice, &set);
}

#[test]
fn refine_never_drops_images() {
    let set = common::two_people_and_a_stranger();
    let run = ClusteringRun::from_settings(&common::settings())
        .unwrap()
        .with_refine(Some(0.575));
    let map = run.cluster_set(&set).unwrap();
    assert_partition(&map, &set);
}

#[test]
fn union_find_groups_transitively() {
    let mut sets = UnionFind::new(4);
    sets.union(3, 1);
    sets.union(1, 2);
    assert!(sets.connected(2, 3));
    assert!(!sets.connected(0, 3));
    assert_eq!(sets.find(3), 1);
}

#[test]
fn no_cluster_rerun_clears_stale_map_for_matching() {
    let temp_dir = TempDir::new().unwrap();
    let mut set = EmbeddingSet::new(VectorDimension::new(DIM).unwrap());
    set.insert("a.jpg", vec![1.0, 0.0, 0.0, 0.0]).unwrap();
    set.insert("b.jpg", vec![0.0, 1.0, 0.0, 0.0]).unwrap();
    common::write_event(temp_dir.path(), &set);
    let map_path = temp_dir.path().join("clustered_faces.json");

    let threshold = ClusteringRun::from_settings(&common::settings()).unwrap();
    clustered(threshold.run(temp_dir.path()).unwrap());
    assert!(map_path.exists());

    let mut settings = common::settings();
    settings.clustering.policy = PolicyKind::Density;
    let density = ClusteringRun::from_settings(&settings).unwrap();
    assert!(matches!(
        density.run(temp_dir.path()).unwrap(),
        ClusteringOutcome::NoClusterData { .. }
    ));
    assert!(!map_path.exists());

    let resolver = MatchResolver::open(temp_dir.path(), &settings).unwrap();
    let outcome = resolver.resolve(&[1.0, 0.0, 0.0, 0.0]).unwrap();
    assert_eq!(outcome.image_id, "a.jpg");
    assert_eq!(outcome.cluster, None);
}
