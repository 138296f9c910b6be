#![allow(dead_code)]

pub use harvest_common::testing::init_test_logging;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};

pub const RUNNER: &str = "https://validation.example.org/RPC2/";
pub const TEST_REPO: &str = "https://git.example.org/qa/test-definitions.git";
pub const SMOKE_TESTDEF: &str = "ubuntu/smoke-tests-basic.yaml";
pub const SMOKE_YAML: &str = "\
metadata:
  name: smoke-tests-basic
  format: Lava-Test Test Definition 1.0
  os:
    - ubuntu
    - debian
run:
  steps:
    - ./smoke.sh
";

/// Legacy definition running `testdefs` through one `lava_test_shell`.
pub fn legacy_definition(device: &str, testdefs: &[&str]) -> Value {
    let repos: Vec<Value> = testdefs
        .iter()
        .map(|t| json!({"git-repo": TEST_REPO, "testdef": t}))
        .collect();
    json!({
        "job_name": format!("{device}-smoke"),
        "device_type": device,
        "timeout": 18000,
        "actions": [
            {"command": "deploy_linaro_kernel", "parameters": {"kernel": "http://snapshots/zImage"}},
            {"command": "lava_test_shell", "parameters": {"testdef_repos": repos}},
            {"command": "submit_results", "parameters": {"stream": "/private/team/qa/", "server": "http://x/RPC2/"}},
        ],
        "metadata": {"kernel-version": "v6.1", "build-url": "https://ci.example.org/job/1/"},
    })
}

pub fn boot_run(target: &str, kernel_times: &[f64]) -> Value {
    let results: Vec<Value> = kernel_times
        .iter()
        .map(|t| json!({"test_case_id": "test_kernel_boot_time", "result": "pass", "measurement": t.to_string(), "units": "seconds"}))
        .collect();
    json!({"test_id": "lava", "attributes": {"target": target}, "test_results": results})
}

pub fn smoke_run(revision: &str) -> Value {
    json!({
        "test_id": "smoke-tests-basic",
        "testdef_metadata": {
            "location": "GIT",
            "url": TEST_REPO,
            "version": revision,
            "name": "smoke-tests-basic",
            "os": "ubuntu,debian",
        },
        "software_context": {"sources": [{
            "branch_url": TEST_REPO,
            "branch_revision": revision,
            "branch_vcs": "git",
            "default_params": "",
            "test_params": "",
        }]},
        "test_results": [
            {"test_case_id": "linux-posix-pwd", "result": "pass"},
            {"test_case_id": "linux-posix-uname", "result": "pass", "measurement": "0.25", "units": "s"},
            {"test_case_id": "linux-posix-lsb_release", "result": "fail",
             "attachments": [{"pathname": "stdout.log", "content": "b2s="}]},
        ],
    })
}

pub fn bundle(runs: Vec<Value>) -> String {
    json!({"format": "Dashboard Bundle Format 1.7", "test_runs": runs}).to_string()
}

pub fn attachment(pathname: &str, content: &[u8]) -> Value {
    json!({"pathname": pathname, "content": STANDARD.encode(content), "mime_type": "application/octet-stream"})
}
