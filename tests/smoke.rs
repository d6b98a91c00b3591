//! Smoke tests -- verify the binary runs and lists tests offline.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_cli_help() {
    Command::cargo_bin("wdlci")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains(
            "Continuous-integration runner for WDL workflows",
        ));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("wdlci")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("wdlci"));
}

#[test]
fn test_list_marks_disabled_tests() {
    let dir = tempfile::tempdir().unwrap();
    let tests = dir.path().join("test_json");
    std::fs::create_dir_all(&tests).unwrap();
    std::fs::write(tests.join("Alpha.json"), "{}").unwrap();
    std::fs::write(tests.join("Beta.json"), "{}").unwrap();
    std::fs::write(tests.join("notes.txt"), "not a test").unwrap();
    std::fs::write(tests.join("disabled.txt"), "Beta\n").unwrap();

    let config = dir.path().join("wdlci.toml");
    std::fs::write(
        &config,
        format!(
            "[paths]\ntest_inputs_dir = {:?}\ndisabled_tests = {:?}\n",
            tests.display().to_string(),
            tests.join("disabled.txt").display().to_string()
        ),
    )
    .unwrap();

    Command::cargo_bin("wdlci")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .arg("--list")
        .env_remove("RUST_LOG")
        .assert()
        .success()
        .stdout(predicates::str::contains("[*]").and(predicates::str::contains("Alpha.json")))
        .stdout(predicates::str::contains("[ ]").and(predicates::str::contains("Beta.json")))
        .stdout(predicates::str::contains("2 tests, 1 disabled."))
        .stdout(predicates::str::contains("notes.txt").not());
}

#[test]
fn test_missing_config_file_is_an_error() {
    Command::cargo_bin("wdlci")
        .unwrap()
        .args(["--config", "/nonexistent/wdlci.toml", "--list"])
        .assert()
        .failure();
}

#[test]
fn test_broken_env_config_warns_and_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    let broken = dir.path().join("broken.toml");
    std::fs::write(&broken, "[paths\ntest_inputs_dir = 3\n").unwrap();

    Command::cargo_bin("wdlci")
        .unwrap()
        .current_dir(dir.path())
        .env("WDLCI_CONFIG", &broken)
        .env_remove("RUST_LOG")
        .arg("--list")
        .assert()
        .success()
        .stdout(predicates::str::contains("0 tests, 0 disabled."))
        .stderr(predicates::str::contains(
            "WDLCI_CONFIG set but file could not be loaded",
        ));
}
