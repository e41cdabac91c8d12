use std::path::Path;
use std::process::Command;

use serde_json::{json, Value};
use tempfile::tempdir;

fn discourse(config: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_discourse"));
    cmd.arg("--config").arg(config).env_remove("DISCOURSE_CONFIG");
    cmd
}

fn write_fixture(root: &Path) -> std::path::PathBuf {
    let data = root.join("data");
    let raw = data.join("raw");
    std::fs::create_dir_all(&raw).unwrap();

    let posts = json!([
        { "post_id": "p1", "post_title": "Hostage deal talks", "post_body": "Discussion thread" }
    ]);
    let comments: Vec<Value> = (1..=8)
        .map(|i| json!({ "comment_id": format!("c{i}"), "post_id": "p1", "comment_body": format!("opinion {i}") }))
        .collect();
    std::fs::write(raw.join("posts.json"), serde_json::to_vec(&posts).unwrap()).unwrap();
    std::fs::write(raw.join("comments.json"), serde_json::to_vec(&comments).unwrap()).unwrap();

    let config_path = root.join("pipeline.json");
    let config = json!({
        "data_dir": data,
        "sampling": { "sample_size": 4, "validation_ratio": 0.5, "seed": 7 }
    });
    std::fs::write(&config_path, serde_json::to_vec_pretty(&config).unwrap()).unwrap();
    config_path
}

#[test]
fn help_lists_every_stage() {
    let output = Command::new(env!("CARGO_BIN_EXE_discourse"))
        .arg("--help")
        .output()
        .unwrap();
    assert!(output.status.success());
    let text = String::from_utf8_lossy(&output.stdout);
    for stage in [
        "prepare",
        "sample",
        "validate",
        "generate",
        "assemble",
        "cache-export",
        "cache-prune",
    ] {
        assert!(text.contains(stage), "missing {stage} in help");
    }
}

#[test]
fn prepare_then_sample_writes_labeling_files_once() {
    let dir = tempdir().unwrap();
    let config = write_fixture(dir.path());
    let data = dir.path().join("data");

    let status = discourse(&config).arg("prepare").status().unwrap();
    assert!(status.success());
    let records: Vec<Value> =
        serde_json::from_slice(&std::fs::read(data.join("processed").join("records.json")).unwrap()).unwrap();
    assert_eq!(records.len(), 8);

    let status = discourse(&config).arg("sample").status().unwrap();
    assert!(status.success());
    let train_path = data.join("labeled").join("train_sample.json");
    let train_before = std::fs::read(&train_path).unwrap();
    let train: Vec<Value> = serde_json::from_slice(&train_before).unwrap();
    assert_eq!(train.len(), 2);
    assert!(train[0]["political_stance"].is_null());

    let output = discourse(&config).arg("sample").output().unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("already exist"));
    assert_eq!(std::fs::read(&train_path).unwrap(), train_before);
}

#[test]
fn assemble_without_corpus_fails() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("pipeline.json");
    let data = dir.path().join("empty");
    std::fs::write(&config, serde_json::to_vec(&json!({ "data_dir": data })).unwrap()).unwrap();

    let status = discourse(&config).arg("assemble").status().unwrap();
    assert!(!status.success());
}

#[test]
fn cache_prune_requires_a_limit() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("scores.sqlite");
    let status = Command::new(env!("CARGO_BIN_EXE_discourse"))
        .args(["cache-prune", "--db"])
        .arg(&db)
        .status()
        .unwrap();
    assert!(!status.success());

    let status = Command::new(env!("CARGO_BIN_EXE_discourse"))
        .args(["cache-prune", "--max-rows", "10", "--db"])
        .arg(&db)
        .status()
        .unwrap();
    assert!(status.success());
}
