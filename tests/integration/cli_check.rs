#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use tempfile::TempDir;

struct Workspace {
    dir: TempDir,
    db: PathBuf,
}

impl Workspace {
    fn config(&self) -> PathBuf {
        self.dir.path().join("config.toml")
    }
}

fn seeded(name: &str, extra: &[&str]) -> Workspace {
    let dir = TempDir::new().expect("tempdir");
    let db = dir.path().join(format!("{name}.store"));
    let ws = Workspace { dir, db };
    cargo_bin_cmd!("sombra-check")
        .arg("--config")
        .arg(ws.config())
        .args(["--quiet", "seed-demo", "--nodes", "400", "--relationships", "900"])
        .args(extra)
        .arg(&ws.db)
        .assert()
        .success();
    assert!(ws.db.exists());
    ws
}

fn check_json(ws: &Workspace, db: &Path, extra: &[&str], code: i32) -> Value {
    let output = cargo_bin_cmd!("sombra-check")
        .arg("--config")
        .arg(ws.config())
        .args(["--format", "json", "check"])
        .args(extra)
        .arg(db)
        .assert()
        .code(code)
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&output).expect("valid json")
}

#[test]
fn seeded_store_is_consistent() {
    let ws = seeded("clean", &[]);
    let json = check_json(&ws, &ws.db, &["--threads", "2"], 0);
    assert_eq!(json["findings"].as_array().map(Vec::len), Some(0));
    assert_eq!(json["limited"], false);
    assert!(json["cache"]["faults"].as_u64().unwrap_or(0) > 0);
}

#[test]
fn corrupted_store_exits_inconsistent() {
    let ws = seeded("corrupt", &["--corrupt"]);
    let json = check_json(&ws, &ws.db, &[], 2);
    assert_eq!(json["counts"]["counts"], 1);
    assert_eq!(json["counts"]["index"], 1);
    let types: Vec<&str> = json["findings"]
        .as_array()
        .expect("findings array")
        .iter()
        .filter_map(|f| f["record_type"].as_str())
        .collect();
    assert!(types.contains(&"counts"));
    assert!(types.contains(&"index"));
}

#[test]
fn disabled_checks_hide_seeded_corruption() {
    let ws = seeded("corrupt-skip", &["--corrupt"]);
    check_json(&ws, &ws.db, &["--no-counts", "--no-indexes"], 0);
}

#[test]
fn limited_ranges_skip_store_wide_checks() {
    let ws = seeded("limited", &["--corrupt"]);
    let json = check_json(&ws, &ws.db, &["--range", "node:0..100", "--range", "rel:0..50"], 0);
    assert_eq!(json["limited"], true);
}

#[test]
fn text_output_reports_the_verdict() {
    let ws = seeded("text", &[]);
    let output = cargo_bin_cmd!("sombra-check")
        .arg("--config")
        .arg(ws.config())
        .args(["--theme", "plain", "check"])
        .arg(&ws.db)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf8");
    assert!(text.contains("consistent"), "unexpected output: {text}");
}

#[test]
fn ranges_follow_the_memory_budget() {
    let ws = seeded("ranges", &[]);
    let output = cargo_bin_cmd!("sombra-check")
        .arg("--config")
        .arg(ws.config())
        .args(["--format", "json", "ranges", "--cache-pages", "4"])
        .args(["--memory", &(4 * 8192 + 100 * 64).to_string()])
        .arg(&ws.db)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["entities_per_range"], 100);
    let ranges = json["ranges"].as_array().expect("ranges array");
    // 400 nodes and 900 relationships in strides of 100.
    assert_eq!(ranges.len(), 4 + 9);
    assert_eq!(ranges[0]["entity_type"], "node");
    assert_eq!(ranges[0]["high"], 100);
}

#[test]
fn missing_store_is_incomplete() {
    let dir = TempDir::new().expect("tempdir");
    cargo_bin_cmd!("sombra-check")
        .arg("--config")
        .arg(dir.path().join("config.toml"))
        .arg("check")
        .arg(dir.path().join("absent.store"))
        .assert()
        .code(1);
}

#[test]
fn bad_range_is_rejected() {
    let ws = seeded("bad-range", &[]);
    cargo_bin_cmd!("sombra-check")
        .arg("--config")
        .arg(ws.config())
        .args(["check", "--range", "node:10..2"])
        .arg(&ws.db)
        .assert()
        .failure();
}

#[test]
fn config_write_persists_defaults() {
    let dir = TempDir::new().expect("tempdir");
    let config = dir.path().join("nested").join("config.toml");
    cargo_bin_cmd!("sombra-check")
        .arg("--config")
        .arg(&config)
        .args(["--quiet", "config", "--write"])
        .assert()
        .success();
    let written = std::fs::read_to_string(&config).expect("config written");
    assert!(written.contains("[check]"), "unexpected config: {written}");
}
