//! Matching query faces against a clustered event.

use crate::common::{self, DIM};
use facecluster::config::{IndexConfig, StorageConfig};
use facecluster::matching::primary_embedding;
use facecluster::{
    ApproxIndex, ClusterError, ClusterLabel, ClusteringRun, EmbeddingStore, MatchResolver,
    VectorDimension, find_best_match,
};
use tempfile::TempDir;

fn clustered_event() -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    common::write_event(temp_dir.path(), &common::two_people_and_a_stranger());
    ClusteringRun::from_settings(&common::settings())
        .unwrap()
        .run(temp_dir.path())
        .unwrap();
    temp_dir
}

#[test]
fn every_face_matches_itself() {
    let set = common::two_people_and_a_stranger();
    for (image_id, vector) in set.iter() {
        let best = find_best_match(vector, &set).unwrap();
        assert_eq!(best.image_id, image_id);
        assert!((best.score.get() - 1.0).abs() < 1e-6);
    }
}

#[test]
fn query_resolves_to_its_cluster() {
    let event = clustered_event();
    let resolver = MatchResolver::open(event.path(), &common::settings()).unwrap();
    assert!(!resolver.has_index());

    let outcome = resolver.resolve(&[0.2, 0.98, 0.0, 0.02]).unwrap();
    assert_eq!(outcome.image_id, "b2.jpg");
    assert_eq!(outcome.cluster, Some(ClusterLabel::new(1)));
    assert!(!outcome.approximate);
}

#[test]
fn missing_cluster_map_means_no_cluster() {
    let temp_dir = TempDir::new().unwrap();
    common::write_event(temp_dir.path(), &common::two_people_and_a_stranger());

    let resolver = MatchResolver::open(temp_dir.path(), &common::settings()).unwrap();
    let outcome = resolver.resolve(&[1.0, 0.0, 0.0, 0.0]).unwrap();
    assert_eq!(outcome.image_id, "a0.jpg");
    assert_eq!(outcome.cluster, None);
}

#[test]
fn missing_event_is_not_found() {
    let temp_dir = TempDir::new().unwrap();
    let result = MatchResolver::open(temp_dir.path(), &common::settings());
    assert!(matches!(result, Err(ClusterError::NotFound { .. })));
}

#[test]
fn selfie_json_query() {
    let event = clustered_event();
    let selfie = event.path().join("selfie.json");
    std::fs::write(&selfie, r#"{"selfie.jpg": [0.99, 0.0, 0.0, 0.01]}"#).unwrap();

    let queries = EmbeddingStore::import_json(&selfie, VectorDimension::new(DIM).unwrap()).unwrap();
    let (query_id, embedding) = primary_embedding(&queries).unwrap();
    assert_eq!(query_id, "selfie.jpg");

    let resolver = MatchResolver::open(event.path(), &common::settings()).unwrap();
    let outcome = resolver.resolve(embedding).unwrap();
    assert_eq!(outcome.image_id, "a1.jpg");
    assert_eq!(outcome.cluster, Some(ClusterLabel::new(0)));
}

#[test]
fn wrong_query_dimension_is_rejected() {
    let event = clustered_event();
    let resolver = MatchResolver::open(event.path(), &common::settings()).unwrap();
    assert!(matches!(
        resolver.resolve(&[1.0, 0.0]),
        Err(ClusterError::Shape {
            expected: 4,
            actual: 2
        })
    ));
}

#[test]
fn saved_index_answers_queries() {
    let event = clustered_event();
    let mut settings = common::settings();
    settings.index = IndexConfig {
        n_lists: 2,
        nprobe: 2,
        ..IndexConfig::default()
    };

    let set = EmbeddingStore::load(StorageConfig::default().embeddings_path(event.path())).unwrap();
    let mut index = ApproxIndex::new(settings.index.clone());
    index.build(&set).unwrap();
    index.save(settings.storage.index_path(event.path())).unwrap();

    let resolver = MatchResolver::open(event.path(), &settings).unwrap();
    assert!(resolver.has_index());
    let outcome = resolver.resolve(&[0.0, 0.0, 1.0, 0.0]).unwrap();
    assert_eq!(outcome.image_id, "outlier.jpg");
    assert_eq!(outcome.cluster, Some(ClusterLabel::new(2)));
    assert!(outcome.approximate);

    let exact = resolver.without_index();
    assert!(!exact.resolve(&[0.0, 0.0, 1.0, 0.0]).unwrap().approximate);
}
