//! `datafix` binary tests

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::{json, Value};

fn fixtures() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests").join("fixtures")
}

/// Run the binary from `cwd` so no stray datafixers.toml is picked up
fn datafix(cwd: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_datafix"))
        .current_dir(cwd)
        .env_remove("RUST_LOG")
        .args(args)
        .output()
        .unwrap()
}

fn plan_arg() -> String {
    fixtures().join("plan.json").display().to_string()
}

#[test]
fn test_migrate_directory_to_out() {
    let dir = tempfile::tempdir().unwrap();
    let out_dir = dir.path().join("out");
    let records = fixtures().join("records");

    let output = datafix(
        dir.path(),
        &[
            "migrate",
            "--plan",
            &plan_arg(),
            &records.display().to_string(),
            "--out",
            &out_dir.display().to_string(),
        ],
    );

    // The potion record has no Potion field and fails
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("potion.json"));
    assert!(stderr.contains("1 migrated, 1 failed"));

    let written = std::fs::read_to_string(out_dir.join("zombie.json")).unwrap();
    let migrated: Value = serde_json::from_str(&written).unwrap();
    assert_eq!(
        migrated,
        json!({
            "Level": {"Entities": [
                {"id": "minecraft:zombie", "variant": 0},
                {"id": "minecraft:pig", "variant": 0, "Passengers": [{"id": "minecraft:zombie", "variant": 0}]}
            ]},
            "example_DataVersion": 3
        })
    );
    assert!(!out_dir.join("region").join("potion.json").exists());
}

#[test]
fn test_migrate_in_place_and_diff() {
    let dir = tempfile::tempdir().unwrap();
    let record = dir.path().join("zombie.json");
    std::fs::copy(fixtures().join("records").join("zombie.json"), &record).unwrap();

    let output = datafix(
        dir.path(),
        &["migrate", "--plan", &plan_arg(), &record.display().to_string(), "--in-place", "--diff"],
    );
    assert_eq!(output.status.code(), Some(0));

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("a/"));
    assert!(stdout
        .lines()
        .any(|l| l.starts_with('+') && l.contains("\"id\": \"minecraft:zombie\"")));
    assert!(stdout
        .lines()
        .any(|l| l.starts_with('-') && l.contains("\"example_DataVersion\": 1")));

    let rewritten: Value =
        serde_json::from_str(&std::fs::read_to_string(&record).unwrap()).unwrap();
    assert_eq!(rewritten["example_DataVersion"], json!(3));
}

#[test]
fn test_check_reports_cycles() {
    let dir = tempfile::tempdir().unwrap();
    let output = datafix(dir.path(), &["check", "--plan", &plan_arg()]);
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("cycle: entity -> item_stack"));
    assert!(stdout.contains("1 namespace(s), 2 fixer(s)"));
}

#[test]
fn test_describe_suggests_types() {
    let dir = tempfile::tempdir().unwrap();
    let output = datafix(
        dir.path(),
        &["describe", "--plan", &plan_arg(), "--version", "2", "--type", "entty"],
    );
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Did you mean: entity"));

    let output = datafix(
        dir.path(),
        &["describe", "--plan", &plan_arg(), "--version", "2", "--choices", "entities"],
    );
    assert_eq!(output.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&output.stdout).contains("minecraft:potion"));
}

#[test]
fn test_config_init() {
    let dir = tempfile::tempdir().unwrap();
    let output = datafix(dir.path(), &["config", "--init", "datafixers.toml"]);
    assert_eq!(output.status.code(), Some(0));

    let written = std::fs::read_to_string(dir.path().join("datafixers.toml")).unwrap();
    assert!(written.contains("[migration]"));

    let again = datafix(dir.path(), &["config", "--init", "datafixers.toml"]);
    assert_eq!(again.status.code(), Some(1));
}
