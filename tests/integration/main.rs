//! Integration tests for handlekeep

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::fs;
    use tempfile::TempDir;

    /// Command isolated from any user or project configuration
    fn handlekeep(home: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("handlekeep");
        cmd.arg("--no-local")
            .env("HANDLEKEEP_CONFIG", home.path().join("config.toml"))
            .env("CI", "1");
        cmd
    }

    fn project() -> TempDir {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("src")).unwrap();
        fs::create_dir_all(temp.path().join("docs")).unwrap();
        fs::write(temp.path().join("src/lib.rs"), "pub fn f() {}").unwrap();
        fs::write(temp.path().join("src/main.rs"), "fn main() {}").unwrap();
        fs::write(temp.path().join("docs/guide.md"), "# guide").unwrap();
        temp
    }

    #[test]
    fn help_displays() {
        let home = TempDir::new().unwrap();
        handlekeep(&home)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("lifecycle-tracked proxy handles"));
    }

    #[test]
    fn version_displays() {
        let home = TempDir::new().unwrap();
        handlekeep(&home)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("handlekeep"));
    }

    #[test]
    fn config_path_honors_env() {
        let home = TempDir::new().unwrap();
        handlekeep(&home)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains(
                home.path().join("config.toml").display().to_string(),
            ));
    }

    #[test]
    fn config_show() {
        let home = TempDir::new().unwrap();
        handlekeep(&home)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[general]"))
            .stdout(predicate::str::contains("source.changed"));
    }

    #[test]
    fn config_init_creates_file() {
        let home = TempDir::new().unwrap();
        handlekeep(&home)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration initialized"));
        assert!(home.path().join("config.toml").exists());
    }

    #[test]
    fn invalid_config_shows_hint() {
        let home = TempDir::new().unwrap();
        fs::write(home.path().join("config.toml"), "[scan\n").unwrap();
        handlekeep(&home)
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"))
            .stderr(predicate::str::contains("config init --force"));
    }

    #[test]
    fn scan_reports_topology() {
        let home = TempDir::new().unwrap();
        let project = project();
        handlekeep(&home)
            .args(["scan", "--format", "plain"])
            .arg(project.path())
            .assert()
            .success()
            .stdout(predicate::str::starts_with("fresh "))
            .stdout(predicate::str::contains("files=3 dirs=2"));
    }

    #[test]
    fn scan_json_includes_handle() {
        let home = TempDir::new().unwrap();
        let project = project();
        handlekeep(&home)
            .args(["scan", "--format", "json", "--label", "ci"])
            .arg(project.path())
            .assert()
            .success()
            .stdout(predicate::str::contains("\"computed_by\": \"ci\""))
            .stdout(predicate::str::contains("\"status\": \"fresh\""));
    }

    #[test]
    fn scan_missing_path_fails() {
        let home = TempDir::new().unwrap();
        let project = project();
        handlekeep(&home)
            .arg("scan")
            .arg(project.path().join("nope"))
            .assert()
            .failure()
            .stderr(predicate::str::contains("Path not found"));
    }

    #[test]
    fn simulate_marks_handle_stale() {
        let home = TempDir::new().unwrap();
        let project = project();
        let events = project.path().join("events.jsonl");
        fs::write(
            &events,
            "{\"topic\": \"source.changed\", \"payload\": {\"paths\": [\"src/lib.rs\"]}}\n",
        )
        .unwrap();

        handlekeep(&home)
            .args(["simulate", "--format", "plain", "--path"])
            .arg(project.path())
            .arg(&events)
            .assert()
            .success()
            .stdout(predicate::str::contains("computation_started topology"))
            .stdout(predicate::str::contains("handle_invalidated topology"))
            .stdout(predicate::str::ends_with("stale\n"));
    }

    #[test]
    fn simulate_refresh_recomputes() {
        let home = TempDir::new().unwrap();
        let project = project();
        let events = project.path().join("events.jsonl");
        fs::write(&events, "{\"topic\": \"source.changed\"}\n").unwrap();

        handlekeep(&home)
            .args(["simulate", "--refresh", "--format", "json", "--path"])
            .arg(project.path())
            .arg(&events)
            .assert()
            .success()
            .stdout(predicate::str::contains("\"refreshed\": true"))
            .stdout(predicate::str::contains("\"computation_count\": 2"));
    }

    #[test]
    fn simulate_ignores_unrelated_topics() {
        let home = TempDir::new().unwrap();
        let project = project();
        let events = project.path().join("events.jsonl");
        fs::write(&events, "{\"topic\": \"billing.updated\"}\n").unwrap();

        handlekeep(&home)
            .args(["simulate", "--format", "plain", "--path"])
            .arg(project.path())
            .arg(&events)
            .assert()
            .success()
            .stdout(predicate::str::contains("handle_invalidated").not())
            .stdout(predicate::str::ends_with("fresh\n"));
    }

    #[test]
    fn simulate_rejects_malformed_events() {
        let home = TempDir::new().unwrap();
        let project = project();
        let events = project.path().join("events.jsonl");
        fs::write(&events, "{not json}\n").unwrap();

        handlekeep(&home)
            .args(["simulate", "--path"])
            .arg(project.path())
            .arg(&events)
            .assert()
            .failure()
            .stderr(predicate::str::contains("line 1"));
    }
}
