//! End-to-end CLI tests for configuration handling and checkpoint commands

use assert_cmd::Command;
use tempfile::TempDir;

/// Binary with an empty environment, run from a directory without a `.env`.
fn cli(workdir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("index-backfill").unwrap();
    cmd.env_clear().current_dir(workdir.path());
    cmd
}

fn combined_output(output: &std::process::Output) -> String {
    format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    )
}

#[test]
fn test_run_reports_every_missing_variable() {
    let workdir = TempDir::new().unwrap();
    let output = cli(&workdir).args(["run", "created-at"]).output().unwrap();

    assert!(!output.status.success());
    let text = combined_output(&output);
    for name in [
        "DB_HOST",
        "DB_DATABASE",
        "DB_USER",
        "DB_PASSWORD",
        "DB_PORT",
        "MONGO_URI",
        "TYPESENSE_HOST",
        "TYPESENSE_PORT",
        "TYPESENSE_API_KEY",
    ] {
        assert!(text.contains(name), "{name} not reported in: {text}");
    }
}

#[test]
fn test_status_requires_mongo_uri_for_mongo_store() {
    let workdir = TempDir::new().unwrap();
    let output = cli(&workdir).args(["status", "deleted-at"]).output().unwrap();

    assert!(!output.status.success());
    assert!(combined_output(&output).contains("MONGO_URI"));
}

#[test]
fn test_status_and_reset_with_file_store() {
    let workdir = TempDir::new().unwrap();
    let dir = workdir.path().join("checkpoints");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("backfill_created_at.json"),
        r#"{"_id":"backfill_created_at","phase":2,"last_id":"e","last_page":3,"batch_no":7}"#,
    )
    .unwrap();
    let dir_arg = dir.to_string_lossy().to_string();

    let status = cli(&workdir)
        .args([
            "status",
            "created-at",
            "--checkpoint-store",
            "file",
            "--checkpoint-dir",
            &dir_arg,
            "--output-format",
            "json",
        ])
        .output()
        .unwrap();
    assert!(status.status.success(), "{}", combined_output(&status));
    let stdout = String::from_utf8_lossy(&status.stdout);
    let json_start = stdout.find('{').unwrap();
    let value: serde_json::Value = serde_json::from_str(&stdout[json_start..]).unwrap();
    assert_eq!(value["phase"], 2);
    assert_eq!(value["last_page"], 3);

    let reset = cli(&workdir)
        .args(["reset", "created-at", "--checkpoint-store", "file", "--checkpoint-dir", &dir_arg])
        .output()
        .unwrap();
    assert!(reset.status.success(), "{}", combined_output(&reset));
    assert!(!dir.join("backfill_created_at.json").exists());

    let after = cli(&workdir)
        .args(["status", "created-at", "--checkpoint-store", "file", "--checkpoint-dir", &dir_arg])
        .output()
        .unwrap();
    assert!(after.status.success());
    assert!(String::from_utf8_lossy(&after.stdout).contains("No checkpoint stored for backfill_created_at"));
}

#[test]
fn test_unknown_job_is_rejected() {
    let workdir = TempDir::new().unwrap();
    let output = cli(&workdir).args(["run", "updated-at"]).output().unwrap();

    assert!(!output.status.success());
    assert!(combined_output(&output).contains("updated-at"));
}
