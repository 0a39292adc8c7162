//! Integration tests for Cmd commands via CLI.
//!
//! These tests verify the criteria-to-command pipeline:
//! - `tg cmd generate` creates one command stub per uncovered criteria node
//! - `tg cmd run` executes one or all command nodes and writes logs
//! - Failing commands fail the invocation after reporting

mod common;

use common::TestEnv;
use predicates::prelude::*;

fn create(env: &TestEnv, args: &[&str]) {
    env.tg().args(["node", "create"]).args(args).assert().success();
}

#[test]
fn test_cmd_generate_creates_stubs_once() {
    let env = TestEnv::new();
    create(&env, &["criteria", "All unit tests pass", "--id", "AC-UNIT"]);
    create(&env, &["criteria", "Looks nice", "--id", "AC-LOOK"]);

    let generated = env.json(&["cmd", "generate"]);
    assert_eq!(generated["count"], 2);
    let created: Vec<&str> = generated["created"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert!(created.contains(&"CMD-AC-UNIT"));
    assert!(created.contains(&"CMD-AC-LOOK"));

    let stub = env.json(&["node", "show", "CMD-AC-UNIT"]);
    assert_eq!(stub["layer"], "command");
    assert_eq!(stub["command"]["run"]["shell"], "cargo test");
    assert_eq!(stub["command"]["ac_ref"], "AC-UNIT");
    assert_eq!(stub["links"]["parents"], serde_json::json!(["AC-UNIT"]));

    let criteria = env.json(&["node", "show", "AC-UNIT"]);
    assert_eq!(criteria["links"]["children"], serde_json::json!(["CMD-AC-UNIT"]));

    assert_eq!(env.json(&["cmd", "generate"])["count"], 0);
    assert_eq!(env.json(&["check", "separation"])["valid"], true);
}

#[test]
fn test_cmd_generate_force_adds_second_stub() {
    let env = TestEnv::new();
    create(&env, &["criteria", "Looks nice", "--id", "AC-LOOK"]);
    env.json(&["cmd", "generate"]);

    let forced = env.json(&["cmd", "generate", "--force"]);
    assert_eq!(forced["count"], 1);
    let id = forced["created"][0].as_str().unwrap();
    assert!(id.starts_with("CMD-AC-LOOK-"), "got {}", id);
}

#[test]
fn test_cmd_run_single_writes_log() {
    let env = TestEnv::new();
    create(&env, &["criteria", "Looks nice", "--id", "AC-LOOK"]);
    env.json(&["cmd", "generate"]);

    let report = env.json(&["cmd", "run", "CMD-AC-LOOK"]);
    assert_eq!(report["passed"], 1);
    assert_eq!(report["failed"], 0);
    assert_eq!(report["results"][0]["exit_code"], 0);
    assert!(
        report["results"][0]["stdout"]
            .as_str()
            .unwrap()
            .contains("MANUAL: verify AC-LOOK")
    );

    let log = env.path().join(".tracegraph").join("logs").join("CMD-AC-LOOK.log");
    let content = std::fs::read_to_string(log).unwrap();
    assert!(content.contains("exit_code: 0"));
}

#[test]
fn test_cmd_run_failure_exits_nonzero() {
    let env = TestEnv::new();
    create(&env, &["command", "Fails", "--id", "CMD-FAIL", "--shell", "echo boom >&2; exit 3"]);

    let output = env
        .tg()
        .args(["cmd", "run", "CMD-FAIL"])
        .assert()
        .failure()
        .get_output()
        .stdout
        .clone();
    let report: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(report["failed"], 1);
    assert_eq!(report["results"][0]["exit_code"], 3);
    assert!(report["results"][0]["stderr"].as_str().unwrap().contains("boom"));

    env.tg()
        .args(["-H", "cmd", "run", "CMD-FAIL"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("FAIL CMD-FAIL (exit 3)"))
        .stdout(predicate::str::contains("0 passed, 1 failed"));
}

#[test]
fn test_cmd_run_all_dry_run_executes_nothing() {
    let env = TestEnv::new();
    create(&env, &["command", "One", "--id", "CMD-ONE", "--shell", "touch one.txt"]);
    create(&env, &["command", "Two", "--id", "CMD-TWO", "--shell", "touch two.txt"]);

    let report = env.json(&["cmd", "run", "--all", "--dry-run"]);
    assert_eq!(report["dry_run"], true);
    assert_eq!(report["results"].as_array().unwrap().len(), 2);
    assert!(!env.path().join("one.txt").exists());
    assert!(!env.path().join("two.txt").exists());
    assert!(!env.path().join(".tracegraph").join("logs").exists());
}

#[test]
fn test_cmd_run_all_in_parallel() {
    let env = TestEnv::new();
    create(&env, &["command", "One", "--id", "CMD-ONE", "--shell", "touch one.txt"]);
    create(&env, &["command", "Two", "--id", "CMD-TWO", "--shell", "touch two.txt"]);
    create(&env, &["command", "Plan", "--id", "CMD-PLAN"]);

    let report = env.json(&["cmd", "run", "--all", "-j", "2"]);
    assert_eq!(report["passed"], 2);
    assert!(env.path().join("one.txt").exists());
    assert!(env.path().join("two.txt").exists());
}

#[test]
fn test_cmd_run_jobs_flag_is_validated_with_config() {
    let env = TestEnv::new();
    create(&env, &["command", "One", "--id", "CMD-ONE", "--shell", "true"]);

    env.tg()
        .args(["cmd", "run", "--all", "-j", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration error"));
}

#[test]
fn test_cmd_run_requires_target() {
    let env = TestEnv::new();

    env.tg().args(["cmd", "run"]).assert().failure();
    env.tg()
        .args(["cmd", "run", "CMD-NONE"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Node not found: CMD-NONE"));
}
