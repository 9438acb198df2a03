#![allow(deprecated)] // Command::cargo_bin

mod common;

use assert_cmd::Command;
use common::TestProject;
use predicates::prelude::*;
use serde_json::json;

/// A VPC, a subnet in it and an instance in the subnet
fn network_project() -> TestProject {
    let project = TestProject::new();
    project.run(&[
        "resource", "add", "vpc-1", "--type", "vpc", "--name", "main-vpc",
        "-p", "cidr_block=10.0.0.0/16",
    ]);
    project.run(&[
        "resource", "add", "subnet-1", "--type", "subnet", "--name", "app-subnet",
        "-p", "cidr_block=10.0.1.0/24", "--depends-on", "vpc-1",
    ]);
    project.run(&[
        "resource", "add", "web-1", "--type", "ec2-instance", "--name", "web",
        "-p", "subnet_id=subnet-1",
    ]);
    project
}

#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("infraflow").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("resource"))
        .stdout(predicate::str::contains("order"))
        .stdout(predicate::str::contains("conflicts"))
        .stdout(predicate::str::contains("reconcile"));
}

#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("infraflow").unwrap();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("infraflow"));
}

#[test]
fn test_invalid_command() {
    let mut cmd = Command::cargo_bin("infraflow").unwrap();
    cmd.arg("invalid-command").assert().failure();
}

#[test]
fn test_add_and_list_resources() {
    let project = network_project();
    assert!(project.state_path().exists());

    project
        .cmd()
        .args(["resource", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("vpc-1"))
        .stdout(predicate::str::contains("subnet-1"))
        .stdout(predicate::str::contains("3 resource(s)"));

    project
        .cmd()
        .args(["resource", "list", "--type", "subnet"])
        .assert()
        .success()
        .stdout(predicate::str::contains("subnet-1"))
        .stdout(predicate::str::contains("vpc-1").not());

    let state = project.state();
    assert_eq!(state["resources"]["vpc-1"]["properties"]["cidr_block"], "10.0.0.0/16");
    assert_eq!(state["resources"]["subnet-1"]["dependencies"], json!(["vpc-1"]));
}

#[test]
fn test_duplicate_id_is_rejected() {
    let project = network_project();
    project
        .cmd()
        .args(["resource", "add", "vpc-1", "--type", "vpc"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("vpc-1"));
}

#[test]
fn test_show_unknown_resource_fails() {
    let project = TestProject::new();
    project
        .cmd()
        .args(["resource", "show", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("nope"));
}

#[test]
fn test_update_and_show_json() {
    let project = network_project();
    project.run(&[
        "resource", "update", "web-1", "--status", "created", "-p", "instance_type=t3.small",
    ]);

    let output = project
        .cmd()
        .args(["resource", "show", "web-1", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let resource: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(resource["status"], "created");
    assert_eq!(resource["properties"]["instance_type"], "t3.small");
    assert_eq!(resource["properties"]["subnet_id"], "subnet-1");
}

#[test]
fn test_order_follows_explicit_and_implicit_edges() {
    let project = network_project();
    let output = project.cmd().arg("order").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);

    let pos = |id: &str| stdout.find(id).unwrap();
    assert!(pos("vpc-1") < pos("subnet-1"));
    // web-1 reaches subnet-1 through its subnet_id property
    assert!(pos("subnet-1") < pos("web-1"));

    let output = project.cmd().args(["order", "--reverse"]).output().unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    let pos = |id: &str| stdout.find(id).unwrap();
    assert!(pos("web-1") < pos("vpc-1"));
}

#[test]
fn test_order_for_targets() {
    let project = network_project();
    project
        .cmd()
        .args(["order", "subnet-1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("vpc-1"))
        .stdout(predicate::str::contains("web-1").not());

    project
        .cmd()
        .args(["order", "ghost"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("ghost"));
}

#[test]
fn test_implicit_dependencies_can_be_disabled() {
    let project = network_project();
    project.write_config("logging:\n  level: warn\nengine:\n  implicit_dependencies: false\n");
    project
        .cmd()
        .arg("levels")
        .assert()
        .success()
        .stdout(predicate::str::contains("Level 0: vpc-1, web-1"));
}

#[test]
fn test_cycles_are_reported() {
    let project = TestProject::new();
    project.run(&["resource", "add", "a", "--type", "service"]);
    project.run(&["resource", "add", "b", "--type", "service", "--depends-on", "a"]);
    project.run(&["resource", "depend", "a", "b"]);

    project
        .cmd()
        .arg("cycles")
        .assert()
        .success()
        .stdout(predicate::str::contains("1 cycle(s) found"));

    project
        .cmd()
        .arg("order")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Cyclic dependency detected"));

    project.run(&["resource", "depend", "a", "b", "--remove"]);
    project
        .cmd()
        .arg("cycles")
        .assert()
        .success()
        .stdout(predicate::str::contains("No dependency cycles"));
}

#[test]
fn test_graph_mermaid() {
    let project = network_project();
    project
        .cmd()
        .args(["graph", "--format", "mermaid"])
        .assert()
        .success()
        .stdout(predicate::str::contains("graph"))
        .stdout(predicate::str::contains("subnet-1"));
}

#[test]
fn test_conflicts_apply_renames_duplicates() {
    let project = TestProject::new();
    project.run(&["resource", "add", "sg-aaaa1111", "--type", "security-group", "--name", "web-sg"]);
    project.run(&["resource", "add", "sg-bbbb2222", "--type", "security-group", "--name", "web-sg"]);

    project
        .cmd()
        .arg("conflicts")
        .assert()
        .success()
        .stdout(predicate::str::contains("duplicate-name"))
        .stdout(predicate::str::contains("needs manual resolution"));

    project
        .cmd()
        .args(["conflicts", "--apply"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 resource(s) updated"));

    let state = project.state();
    assert_eq!(state["resources"]["sg-aaaa1111"]["name"], "web-sg");
    assert_eq!(state["resources"]["sg-bbbb2222"]["name"], "web-sg-bbbb2222");
    assert_eq!(state["resources"]["sg-bbbb2222"]["status"], "updating");

    project
        .cmd()
        .arg("conflicts")
        .assert()
        .success()
        .stdout(predicate::str::contains("No conflicts"));
}

#[test]
fn test_impact_of_shared_network() {
    let project = network_project();
    project
        .cmd()
        .args(["impact", "vpc-1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("subnet-1"))
        .stdout(predicate::str::contains("web-1"));
}

#[test]
fn test_drift_against_observed_properties() {
    let project = network_project();
    let actual = project.write_json("actual.json", &json!({ "cidr_block": "10.9.0.0/16" }));

    project
        .cmd()
        .args(["drift", "vpc-1", "--actual"])
        .arg(&actual)
        .assert()
        .success()
        .stdout(predicate::str::contains("cidr_block"))
        .stdout(predicate::str::contains("high"));

    let same = project.write_json("same.json", &json!({ "cidr_block": "10.0.0.0/16" }));
    project
        .cmd()
        .args(["drift", "vpc-1", "--actual"])
        .arg(&same)
        .assert()
        .success()
        .stdout(predicate::str::contains("matches its recorded state"));
}

fn live_snapshot(project: &TestProject) -> std::path::PathBuf {
    project.write_json(
        "live.json",
        &json!({
            "resources": [
                { "id": "vpc-1", "type": "vpc", "name": "main-vpc",
                  "properties": { "cidr_block": "10.0.0.0/16" } },
                { "id": "subnet-1", "type": "subnet", "name": "app-subnet",
                  "properties": { "cidr_block": "10.0.1.0/24" } },
                { "id": "i-0abc", "type": "ec2-instance", "name": "stray",
                  "properties": { "subnet_id": "subnet-1" } }
            ]
        }),
    )
}

#[test]
fn test_reconcile_json_report() {
    let project = network_project();
    let live = live_snapshot(&project);
    let before = std::fs::read_to_string(project.state_path()).unwrap();

    let output = project
        .cmd()
        .args(["reconcile", "--json", "--live"])
        .arg(&live)
        .output()
        .unwrap();
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();

    assert_eq!(report["managed"], 3);
    assert_eq!(report["discovered"], 3);
    assert_eq!(report["correlation"]["missing"], json!(["web-1"]));
    assert_eq!(report["correlation"]["unmanaged"][0]["id"], "i-0abc");
    assert_eq!(report["correlation"]["correlations"]["vpc-1"]["basis"], "exact-id");
    assert_eq!(report["drift"], json!([]));

    // Reconciliation never writes
    assert_eq!(std::fs::read_to_string(project.state_path()).unwrap(), before);
}

#[test]
fn test_reconcile_missing_snapshot_fails() {
    let project = network_project();
    project
        .cmd()
        .args(["reconcile", "--live", "absent.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("absent.json"));
}

#[test]
fn test_adopt_unmanaged_resource() {
    let project = network_project();
    let live = live_snapshot(&project);

    project
        .cmd()
        .args(["adopt", "--live"])
        .arg(&live)
        .arg("i-0abc")
        .assert()
        .success()
        .stdout(predicate::str::contains("Adopted"));

    let state = project.state();
    assert_eq!(state["resources"]["i-0abc"]["resource_type"], "ec2-instance");
    assert_eq!(state["resources"]["i-0abc"]["status"], "created");

    project
        .cmd()
        .args(["adopt", "--live"])
        .arg(&live)
        .arg("vpc-1")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already managed"));
}

#[test]
fn test_state_flag_overrides_config() {
    let project = TestProject::new();
    let custom = project.path().join("custom-state.json");
    project
        .cmd()
        .arg("--state")
        .arg(&custom)
        .args(["resource", "add", "vpc-9", "--type", "vpc"])
        .assert()
        .success();
    assert!(custom.exists());
    assert!(!project.state_path().exists());
}
