use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;

fn json_stdout(args: &[&str]) -> Value {
    let output = cargo_bin_cmd!("lectern-cli")
        .args(args)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&output).expect("stdout should contain valid json")
}

#[test]
fn windows_emits_idle_window_contract() {
    let value = json_stdout(&["windows", "--center", "15000"]);

    assert_eq!(value["total_rows"], 31_102);
    assert_eq!(value["scroll"]["device"], "desktop");
    assert_eq!(value["render"]["first"], 14_940);
    assert_eq!(value["render"]["last"], 15_060);
    assert_eq!(value["safety"]["first"], 14_690);
    assert_eq!(value["safety"]["last"], 15_310);
    assert_eq!(value["background"]["first"], 14_240);
    assert_eq!(value["background"]["last"], 15_760);
    assert_eq!(value["background"]["len"], 1_521);
}

#[test]
fn windows_lean_toward_travel() {
    let value = json_stdout(&[
        "windows",
        "--center",
        "15000",
        "--velocity",
        "10",
        "--direction",
        "down",
    ]);

    assert_eq!(value["render"]["first"], 14_960);
    assert_eq!(value["render"]["last"], 15_080);
    assert_eq!(value["safety"]["last"], 15_480);
    assert_eq!(value["background"]["last"], 16_380);
}

#[test]
fn windows_clamp_at_dataset_start() {
    let value = json_stdout(&[
        "windows",
        "--center",
        "10",
        "--velocity",
        "50",
        "--direction",
        "up",
        "--device",
        "mobile",
    ]);

    assert_eq!(value["render"]["first"], 0);
    assert_eq!(value["safety"]["first"], 0);
    assert_eq!(value["background"]["first"], 0);
}

#[test]
fn windows_rejects_unknown_direction() {
    cargo_bin_cmd!("lectern-cli")
        .args(["windows", "--center", "5", "--direction", "sideways"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}

#[test]
fn simulate_prints_diagnostics() {
    let value = json_stdout(&[
        "simulate",
        "--total",
        "5000",
        "--steps",
        "10",
        "--rows-per-step",
        "20",
        "--dataset",
        "WEB",
    ]);

    assert_eq!(value["dataset"], "WEB");
    assert_eq!(value["device"], "desktop");
    assert_eq!(value["concurrency_cap"], 8);
    assert_eq!(value["cache"]["in_flight_count"], 0);
    assert!(value["cache"]["per_dataset_size"]["WEB"].as_u64().unwrap() > 0);
    assert!(value["scheduler"]["total_batches_processed"].as_u64().unwrap() > 0);
    assert_eq!(value["scheduler"]["records_failed"], 0);
    assert!(!value["recent_batches"].as_array().unwrap().is_empty());
}

#[test]
fn simulate_reports_failures() {
    let value = json_stdout(&["simulate", "--total", "2000", "--steps", "3", "--fail-every", "7"]);

    assert!(value["scheduler"]["records_failed"].as_u64().unwrap() > 0);
    assert!(value["cache"]["failed_count"].as_u64().unwrap() > 0);
    assert_eq!(value["cache"]["in_flight_count"], 0);
}

#[test]
fn simulate_mobile_uses_mobile_cap() {
    let value = json_stdout(&["simulate", "--total", "3000", "--steps", "2", "--device", "mobile"]);
    assert_eq!(value["device"], "mobile");
    assert_eq!(value["concurrency_cap"], 4);
    assert_eq!(value["cache"]["high_water_mark"], 4_000);
}

#[test]
fn config_prints_toml_tables() {
    cargo_bin_cmd!("lectern-cli")
        .arg("config")
        .env_remove("LECTERN_CACHE_HIGH_WATER")
        .env_remove("LECTERN_CACHE_TARGET")
        .assert()
        .success()
        .stdout(predicate::str::contains("[cache]"))
        .stdout(predicate::str::contains("[prefetch]"))
        .stdout(predicate::str::contains("high_water_mark = 6000"));
}

#[test]
fn config_reads_file() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let path = temp.path().join("lectern.toml");
    fs::write(
        &path,
        "[cache]\nhigh_water_mark = 1234\ntarget_size = 1000\n\n[prefetch]\ndebounce_ms = 50\n",
    )
    .expect("config file should be written");

    cargo_bin_cmd!("lectern-cli")
        .arg("config")
        .arg("--config")
        .arg(&path)
        .env_remove("LECTERN_CACHE_HIGH_WATER")
        .env_remove("LECTERN_CACHE_TARGET")
        .env_remove("LECTERN_PREFETCH_DEBOUNCE_MS")
        .assert()
        .success()
        .stdout(predicate::str::contains("high_water_mark = 1234"))
        .stdout(predicate::str::contains("debounce_ms = 50"));
}

#[test]
fn config_environment_overrides_defaults() {
    cargo_bin_cmd!("lectern-cli")
        .arg("config")
        .env("LECTERN_CACHE_HIGH_WATER", "7000")
        .env("LECTERN_CACHE_TARGET", "6500")
        .assert()
        .success()
        .stdout(predicate::str::contains("high_water_mark = 7000"))
        .stdout(predicate::str::contains("target_size = 6500"));
}

#[test]
fn config_fails_for_invalid_file() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let path = temp.path().join("broken.toml");
    fs::write(&path, "[cache]\nhigh_water_mark = 10\ntarget_size = 50\n")
        .expect("config file should be written");

    cargo_bin_cmd!("lectern-cli")
        .arg("config")
        .arg("--config")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load configuration"));
}

#[test]
fn config_fails_for_missing_file() {
    cargo_bin_cmd!("lectern-cli")
        .args(["config", "--config", "/nonexistent/lectern.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load configuration"));
}

#[test]
fn version_prints_package_version() {
    cargo_bin_cmd!("lectern-cli")
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}
