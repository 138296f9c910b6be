use crate::common::{harvestd, init_test_logging, write_config};
use harvest_common::test_log;

const VALID_CONFIG: &str = r#"
[general]
listen_addr = "127.0.0.1:0"

[runner]
timeout_secs = 5

[[runner.credentials]]
host = "validation.example.org"
username = "bot"
token = "secret-token"

[reporting]
url = "https://reports.example.org"

[reporting.tokens]
qa = "team-token"
"#;

#[test]
fn test_harvestd_help_includes_usage() {
    init_test_logging();
    test_log!("TEST START: test_harvestd_help_includes_usage");

    let output = harvestd(&["--help"]);
    assert!(output.status.success(), "harvestd --help failed");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("harvestd"), "unexpected help: {stdout}");
    assert!(stdout.contains("pull-job"), "unexpected help: {stdout}");
    assert!(stdout.contains("serve"), "unexpected help: {stdout}");

    test_log!("TEST PASS: test_harvestd_help_includes_usage");
}

#[test]
fn test_check_config_accepts_valid_file() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, VALID_CONFIG);

    let output = harvestd(&["--config", path.to_str().unwrap(), "check-config"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "check-config failed: {stdout}");
    assert!(stdout.contains("configuration ok"));
}

#[test]
fn test_check_config_rejects_bad_reporting_url() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "[reporting]\nurl = \"ftp://reports\"\n");

    let output = harvestd(&["--config", path.to_str().unwrap(), "check-config"]);
    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("reporting.url"), "unexpected output: {stdout}");
}

#[test]
fn test_missing_config_file_fails() {
    init_test_logging();
    let output = harvestd(&["--config", "/nonexistent/harvest.toml", "check-config"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not found"), "unexpected stderr: {stderr}");
}

#[test]
fn test_pull_job_without_credentials_reports_failure() {
    init_test_logging();
    test_log!("TEST START: test_pull_job_without_credentials_reports_failure");
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, VALID_CONFIG);

    let output = harvestd(&[
        "--config",
        path.to_str().unwrap(),
        "pull-job",
        "https://unknown-runner.example.org/RPC2/",
        "4242",
        "v6.1",
        "qa/linux-mainline",
    ]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "pull-job failed: {stdout}");

    let reports: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(reports[0]["job_id"], "4242");
    assert_eq!(reports[0]["outcome"], "failed");
    assert_eq!(reports[0]["code"], "HRV-E005");

    test_log!("TEST PASS: test_pull_job_without_credentials_reports_failure");
}

#[test]
fn test_pull_job_rejects_bad_project() {
    init_test_logging();
    let output = harvestd(&["pull-job", "https://runner/RPC2/", "1", "v1", "no-team"]);
    assert!(!output.status.success());
}
