//! Exit codes and JSON output of the command-line binary.

use crate::common;
use facecluster::io::ExitCode;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn facecluster(cwd: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_facecluster"))
        .current_dir(cwd)
        .args(args)
        .output()
        .expect("failed to launch facecluster")
}

fn exit_code(output: &Output) -> i32 {
    output.status.code().expect("terminated by signal")
}

fn write_extractor_json(path: &Path) {
    let mut entries = serde_json::Map::new();
    for (id, vector) in common::two_people_and_a_stranger().iter() {
        entries.insert(id.to_string(), serde_json::json!(vector));
    }
    std::fs::write(path, serde_json::Value::Object(entries).to_string()).unwrap();
}

fn init_workspace(root: &Path) {
    std::fs::create_dir_all(root.join(".facecluster")).unwrap();
    std::fs::write(root.join(".facecluster/settings.toml"), "dimension = 4\n").unwrap();
}

#[test]
fn import_cluster_match_round() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    init_workspace(root);
    std::fs::create_dir(root.join("event")).unwrap();
    write_extractor_json(&root.join("faces.json"));

    let import = facecluster(root, &["import", "faces.json", "event"]);
    assert_eq!(exit_code(&import), 0, "{import:?}");
    assert!(root.join("event/face_embeddings.vec").exists());

    let cluster = facecluster(root, &["cluster", "event", "--json"]);
    assert_eq!(exit_code(&cluster), 0, "{cluster:?}");
    let response: serde_json::Value = serde_json::from_slice(&cluster.stdout).unwrap();
    assert_eq!(response["status"], "success");
    assert_eq!(response["data"]["status"], "clustered");
    assert_eq!(response["data"]["clusters"]["2"][0], "outlier.jpg");

    std::fs::write(root.join("selfie.json"), r#"{"me.jpg": [0.0, 0.0, 1.0, 0.0]}"#).unwrap();
    let matched = facecluster(root, &["match", "event", "--query", "selfie.json", "--json"]);
    assert_eq!(exit_code(&matched), 0, "{matched:?}");
    let response: serde_json::Value = serde_json::from_slice(&matched.stdout).unwrap();
    assert_eq!(response["data"]["image_id"], "outlier.jpg");
    assert_eq!(response["data"]["cluster"], 2);
}

#[test]
fn missing_event_exits_not_found() {
    let temp_dir = TempDir::new().unwrap();
    init_workspace(temp_dir.path());

    let output = facecluster(temp_dir.path(), &["cluster", "nowhere"]);
    assert_eq!(exit_code(&output), i32::from(ExitCode::NotFound));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Suggestion"));
}

#[test]
fn all_noise_exits_no_cluster_data() {
    let temp_dir = TempDir::new().unwrap();
    init_workspace(temp_dir.path());
    std::fs::create_dir(temp_dir.path().join("event")).unwrap();
    std::fs::write(
        temp_dir.path().join("faces.json"),
        r#"{"a.jpg": [1, 0, 0, 0], "b.jpg": [0, 1, 0, 0]}"#,
    )
    .unwrap();

    let import = facecluster(temp_dir.path(), &["import", "faces.json", "event"]);
    assert_eq!(exit_code(&import), 0, "{import:?}");

    let output = facecluster(
        temp_dir.path(),
        &["cluster", "event", "--policy", "density", "--json"],
    );
    assert_eq!(exit_code(&output), i32::from(ExitCode::NoClusterData));
    let response: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(response["status"], "no_data");
    assert!(!temp_dir.path().join("event/clustered_faces.json").exists());
}

#[test]
fn invalid_config_exits_config_error() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::create_dir_all(temp_dir.path().join(".facecluster")).unwrap();
    std::fs::write(
        temp_dir.path().join(".facecluster/settings.toml"),
        "[clustering]\nthreshold = 7.5\n",
    )
    .unwrap();

    let output = facecluster(temp_dir.path(), &["config"]);
    assert_eq!(exit_code(&output), i32::from(ExitCode::ConfigError));
}

#[test]
fn import_into_new_event_directory() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    init_workspace(root);
    write_extractor_json(&root.join("faces.json"));

    let import = facecluster(root, &["import", "faces.json", "events/42"]);
    assert_eq!(exit_code(&import), 0, "{import:?}");
    assert!(root.join("events/42").is_dir());
    assert!(root.join("events/42/face_embeddings.vec").is_file());

    let index = facecluster(root, &["index", "events/42", "--lists", "1"]);
    assert_eq!(exit_code(&index), 0, "{index:?}");
    assert!(root.join("events/42/approx_index.json").is_file());

    // A path with an extension names the artifact itself
    let explicit = facecluster(root, &["import", "faces.json", "other/faces.vec"]);
    assert_eq!(exit_code(&explicit), 0, "{explicit:?}");
    assert!(root.join("other/faces.vec").is_file());
}

#[test]
fn match_lists_candidates_and_honors_disabled_index() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    std::fs::create_dir_all(root.join(".facecluster")).unwrap();
    std::fs::write(
        root.join(".facecluster/settings.toml"),
        "dimension = 4\n\n[index]\nenabled = false\ntop_k = 3\n",
    )
    .unwrap();
    write_extractor_json(&root.join("faces.json"));

    assert_eq!(exit_code(&facecluster(root, &["import", "faces.json", "event"])), 0);
    assert_eq!(
        exit_code(&facecluster(root, &["index", "event", "--lists", "2"])),
        0
    );
    std::fs::write(root.join("selfie.json"), r#"{"me.jpg": [1.0, 0.0, 0.0, 0.0]}"#).unwrap();

    let matched = facecluster(
        root,
        &["match", "event", "--query", "selfie.json", "--approx", "--json"],
    );
    assert_eq!(exit_code(&matched), 0, "{matched:?}");
    let response: serde_json::Value = serde_json::from_slice(&matched.stdout).unwrap();
    assert_eq!(response["data"]["approximate"], false);
    assert_eq!(response["data"]["image_id"], "a0.jpg");
    let candidates = response["data"]["candidates"].as_array().unwrap();
    assert_eq!(candidates.len(), 3);
    assert_eq!(candidates[0]["image_id"], "a0.jpg");
}
