use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn chaos_agent(config_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("chaos-agent").unwrap();
    // keep the user's config file out of the way
    let config = config_dir.path().join("config.toml");
    std::fs::write(&config, "").unwrap();
    cmd.arg("--config").arg(config);
    cmd
}

#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("chaos-agent").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("chaos-agent 0.1.0"));
}

#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("chaos-agent").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Inject faults into running containers",
        ));
}

#[test]
fn test_cli_inject_dry_run() {
    let dir = TempDir::new().unwrap();
    chaos_agent(&dir)
        .args([
            "inject",
            "--fault-type",
            "memory",
            "--target",
            "cluster-a",
            "--duration",
            "30",
            "--mode",
            "dry-run",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "[DRY-RUN] Would inject memory fault (memory_hog) for 30s",
        ));
}

#[test]
fn test_cli_inject_rejects_unknown_fault_type() {
    let dir = TempDir::new().unwrap();
    chaos_agent(&dir)
        .args([
            "inject",
            "--fault-type",
            "meteor",
            "--target",
            "x",
            "--duration",
            "10",
            "--mode",
            "dry-run",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value 'meteor'"));
}

#[test]
fn test_cli_run_rejects_unknown_fault() {
    let dir = TempDir::new().unwrap();
    chaos_agent(&dir)
        .args(["run", "--fault", "meteor"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown fault 'meteor'"));
}

#[test]
fn test_cli_missing_config_file() {
    let mut cmd = Command::cargo_bin("chaos-agent").unwrap();
    cmd.args(["--config", "/nonexistent/chaos-agent.toml", "targets"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}
