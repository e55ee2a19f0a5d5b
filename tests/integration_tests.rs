//! Integration tests for the roadworks CLI
//!
//! Each test drives the binary against a fresh project directory holding
//! its own `roadworks.toml` and SQLite database.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::{Value, json};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// Helper to create a roadworks Command isolated from the caller's environment
fn roadworks(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("roadworks");
    cmd.current_dir(dir.path())
        .env_remove("ROADWORKS_CONFIG")
        .env_remove("ROADWORKS_USER")
        .env_remove("ROADWORKS_DB_PATH")
        .env_remove("ROADWORKS_MIN_AREA")
        .env_remove("ROADWORKS_MAX_AREA")
        .env_remove("ROADWORKS_LOG")
        .env_remove("ROADWORKS_LOG_FORMAT");
    cmd
}

/// Helper to create an initialized project directory
fn init_project() -> TempDir {
    let dir = TempDir::new().unwrap();
    roadworks(&dir).arg("init").assert().success();
    dir
}

fn stdout_json(output: &[u8]) -> Value {
    serde_json::from_slice(output).expect("stdout is JSON")
}

/// Add a user and return its uuid
fn add_user(dir: &TempDir, name: &str, role: &str) -> String {
    let output = roadworks(dir)
        .args(["user", "add", name, "--role", role])
        .output()
        .unwrap();
    assert!(output.status.success());
    stdout_json(&output.stdout)["uuid"]
        .as_str()
        .unwrap()
        .to_string()
}

fn write_json(dir: &TempDir, name: &str, value: &Value) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, serde_json::to_string_pretty(value).unwrap()).unwrap();
    path
}

/// Right triangle with an area of 50 square metres
fn triangle() -> Value {
    json!({ "coordinates": [
        { "x": 0.0, "y": 0.0 },
        { "x": 10.0, "y": 0.0 },
        { "x": 0.0, "y": 10.0 }
    ]})
}

fn milestones() -> Value {
    json!({
        "finish_early_to": "2027-03-01",
        "finish_optimum_to": "2027-06-01",
        "finish_late_to": "2027-09-30"
    })
}

fn activity_input() -> Value {
    json!({
        "name": "Main street resurfacing",
        "geometry": triangle(),
        "milestones": milestones(),
        "status": "review"
    })
}

fn need_input() -> Value {
    json!({
        "name": "Water main",
        "description": "Replace the water main",
        "priority": "high",
        "geometry": triangle(),
        "finish_early_to": "2027-03-01",
        "finish_optimum_to": "2027-06-01",
        "finish_late_to": "2027-09-30",
        "is_private": false
    })
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_roadworks_help() {
        cargo_bin_cmd!("roadworks").arg("--help").assert().success();
    }

    #[test]
    fn test_roadworks_version() {
        cargo_bin_cmd!("roadworks").arg("--version").assert().success();
    }

    #[test]
    fn test_init_creates_config_and_database() {
        let dir = TempDir::new().unwrap();

        roadworks(&dir)
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("Created"))
            .stdout(predicate::str::contains("Database ready"));

        assert!(dir.path().join("roadworks.toml").exists());
        assert!(dir.path().join("roadworks.db").exists());
    }

    #[test]
    fn test_init_idempotent() {
        let dir = init_project();

        roadworks(&dir)
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));
    }

    #[test]
    fn test_transitions_table() {
        let dir = TempDir::new().unwrap();

        roadworks(&dir)
            .arg("transitions")
            .assert()
            .success()
            .stdout(predicate::str::contains("review"))
            .stdout(predicate::str::contains("inconsult1"))
            .stdout(predicate::str::contains("(terminal)"));
    }

    #[test]
    fn test_activity_requires_acting_user() {
        let dir = init_project();

        roadworks(&dir)
            .args(["activity", "list"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("--user"));
    }

    #[test]
    fn test_unknown_user_is_unauthorized() {
        let dir = init_project();

        roadworks(&dir)
            .args(["activity", "list", "--user", "00000000-0000-0000-0000-000000000001"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("unknown user"));
    }
}

// =============================================================================
// Configuration Tests
// =============================================================================

mod configuration {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let dir = TempDir::new().unwrap();

        roadworks(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No config file"))
            .stdout(predicate::str::contains("min_area"));
    }

    #[test]
    fn test_config_validate_defaults() {
        let dir = TempDir::new().unwrap();

        roadworks(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid"));
    }

    #[test]
    fn test_config_validate_rejects_inverted_bounds() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("roadworks.toml"),
            "[areas]\nmin_area = 500.0\nmax_area = 100.0\n",
        )
        .unwrap();

        roadworks(&dir)
            .args(["config", "validate"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("must be smaller than max_area"));
    }

    #[test]
    fn test_config_init_refuses_to_overwrite() {
        let dir = init_project();

        roadworks(&dir)
            .args(["config", "init"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("already exists"));
    }

    #[test]
    fn test_env_overrides_area_bounds() {
        let dir = TempDir::new().unwrap();

        roadworks(&dir)
            .env("ROADWORKS_MIN_AREA", "42")
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("min_area = 42.0"));
    }
}

// =============================================================================
// Directory Tests
// =============================================================================

mod directory {
    use super::*;

    #[test]
    fn test_user_add_and_list() {
        let dir = init_project();
        let uuid = add_user(&dir, "Ada Admin", "administrator");

        roadworks(&dir)
            .args(["user", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains(uuid))
            .stdout(predicate::str::contains("administrator"));
    }

    #[test]
    fn test_user_add_rejects_unknown_role() {
        let dir = init_project();

        roadworks(&dir)
            .args(["user", "add", "Nobody", "--role", "mayor"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid role"));
    }

    #[test]
    fn test_activity_named_after_nearest_address() {
        let dir = init_project();
        let manager = add_user(&dir, "Max Manager", "territory_manager");
        roadworks(&dir)
            .args(["address", "add", "Bahnhofstrasse", "3.0", "3.0", "--number", "12"])
            .assert()
            .success();
        let mut input = activity_input();
        input["name"] = json!("");
        let input = write_json(&dir, "activity.json", &input);

        let output = roadworks(&dir)
            .args(["activity", "create", "--user", &manager])
            .arg(&input)
            .output()
            .unwrap();
        assert!(output.status.success());
        let created = stdout_json(&output.stdout);
        assert_eq!(created["name"], "Bahnhofstrasse 12");
    }
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

mod lifecycle {
    use super::*;

    #[test]
    fn test_create_then_publish_with_assigned_need() {
        let dir = init_project();
        let manager = add_user(&dir, "Max Manager", "territory_manager");
        let orderer = add_user(&dir, "Olga Orderer", "orderer");

        let need_file = write_json(&dir, "need.json", &need_input());
        let output = roadworks(&dir)
            .args(["need", "create", "--user", &orderer])
            .arg(&need_file)
            .output()
            .unwrap();
        assert!(output.status.success());
        let need = stdout_json(&output.stdout);
        assert_eq!(need["status"], "edited");

        let mut input = activity_input();
        input["need_uuids"] = json!([need["uuid"]]);
        let activity_file = write_json(&dir, "activity.json", &input);
        let output = roadworks(&dir)
            .args(["activity", "create", "--user", &manager])
            .arg(&activity_file)
            .output()
            .unwrap();
        assert!(output.status.success());
        let mut activity = stdout_json(&output.stdout);
        assert_eq!(activity["status"], "review");
        assert_eq!(activity["is_private"], true);

        activity["is_private"] = json!(false);
        let update_file = write_json(&dir, "publish.json", &activity);
        roadworks(&dir)
            .args(["activity", "update", "--user", &manager])
            .arg(&update_file)
            .assert()
            .success()
            .stdout(predicate::str::contains("\"is_private\": false"));

        let uuid = activity["uuid"].as_str().unwrap();
        roadworks(&dir)
            .args(["activity", "history", uuid, "--user", &manager])
            .assert()
            .success()
            .stdout(predicate::str::contains("Activity published"))
            .stdout(predicate::str::contains("Activity created as draft"));
    }

    #[test]
    fn test_rejected_input_reports_error_code() {
        let dir = init_project();
        let manager = add_user(&dir, "Max Manager", "territory_manager");

        let mut input = activity_input();
        input["geometry"] = json!({ "coordinates": [
            { "x": 0.0, "y": 0.0 },
            { "x": 1.0, "y": 0.0 },
            { "x": 0.0, "y": 1.0 }
        ]});
        let file = write_json(&dir, "tiny.json", &input);

        let output = roadworks(&dir)
            .args(["activity", "create", "--user", &manager])
            .arg(&file)
            .output()
            .unwrap();
        assert!(!output.status.success());
        let rejection = stdout_json(&output.stdout);
        assert_eq!(rejection["error_code"], "area_too_small");
        assert_eq!(rejection["name"], "Main street resurfacing");
    }

    #[test]
    fn test_orderer_cannot_create_activity() {
        let dir = init_project();
        let orderer = add_user(&dir, "Olga Orderer", "orderer");
        let file = write_json(&dir, "activity.json", &activity_input());

        roadworks(&dir)
            .args(["activity", "create", "--user", &orderer])
            .arg(&file)
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unauthorized").or(predicate::str::contains("unauthorized")));
    }

    #[test]
    fn test_public_delete_requires_reason() {
        let dir = init_project();
        let manager = add_user(&dir, "Max Manager", "territory_manager");
        let orderer = add_user(&dir, "Olga Orderer", "orderer");

        let need_file = write_json(&dir, "need.json", &need_input());
        let need = stdout_json(
            &roadworks(&dir)
                .args(["need", "create", "--user", &orderer])
                .arg(&need_file)
                .output()
                .unwrap()
                .stdout,
        );
        let mut input = activity_input();
        input["need_uuids"] = json!([need["uuid"]]);
        let file = write_json(&dir, "activity.json", &input);
        let mut activity = stdout_json(
            &roadworks(&dir)
                .args(["activity", "create", "--user", &manager])
                .arg(&file)
                .output()
                .unwrap()
                .stdout,
        );
        activity["is_private"] = json!(false);
        let publish = write_json(&dir, "publish.json", &activity);
        roadworks(&dir)
            .args(["activity", "update", "--user", &manager])
            .arg(&publish)
            .assert()
            .success();

        let uuid = activity["uuid"].as_str().unwrap();
        roadworks(&dir)
            .args(["activity", "delete", uuid, "--user", &manager])
            .assert()
            .failure()
            .stdout(predicate::str::contains("delete_reason_missing"));

        roadworks(&dir)
            .args(["activity", "delete", uuid, "--reason", "Merged", "--user", &manager])
            .assert()
            .success();

        let needs = stdout_json(
            &roadworks(&dir)
                .args(["need", "list", "--user", &orderer])
                .output()
                .unwrap()
                .stdout,
        );
        assert_eq!(needs[0]["status"], "edited");
        assert_eq!(needs[0]["delete_reason"], "Merged");
    }
}
