//! CLI-level checks: exit codes for the no-flags entry point (spec.md §6).

use assert_cmd::Command;
use predicates::str::contains;

#[test]
fn exits_nonzero_when_config_file_is_missing() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = Command::cargo_bin("edgefeed").unwrap();
    cmd.current_dir(&dir).env("EDGEFEED_CONFIG", "does-not-exist.yaml");
    cmd.assert().failure().stderr(contains("Failed to load config"));
}

#[test]
fn exits_nonzero_on_invalid_config() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("config.yaml"), "market_queries: []\n").unwrap();

    let mut cmd = Command::cargo_bin("edgefeed").unwrap();
    cmd.current_dir(&dir);
    cmd.assert().failure().stderr(contains("Failed to load config"));
}
