use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::io::Write;

fn quickvm() -> assert_cmd::Command {
    cargo_bin_cmd!("quickvm").into()
}

/// A command isolated from the user's home: config, logs and workspaces all
/// land in `home`.
fn isolated(home: &tempfile::TempDir) -> assert_cmd::Command {
    let mut cmd = quickvm();
    cmd.env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join(".config"))
        .env("XDG_DATA_HOME", home.path().join(".local/share"))
        .env_remove("RUST_LOG");
    cmd
}

fn write_config(dir: &tempfile::TempDir, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join("quickvm.toml");
    let mut f = std::fs::File::create(&path).unwrap();
    write!(f, "{contents}").unwrap();
    path
}

/// A stand-in for PowerShell: decodes `-EncodedCommand`, lists VMs `a` and
/// `b`, and fails any `Stop-VM` aimed at `b`.
#[cfg(unix)]
fn fake_shell(dir: &tempfile::TempDir) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.path().join("fake-powershell");
    std::fs::write(
        &path,
        r#"#!/bin/sh
script=$(printf '%s' "$4" | base64 -d | tr -d '\000')
case "$script" in
  *"Stop-VM -Name 'b'"*)
    echo "Stop-VM : The virtual machine is locked." >&2
    exit 1 ;;
  *"Start-VM"*|*"Stop-VM"*)
    exit 0 ;;
  *"Get-VM | Select-Object"*)
    echo '[{"name":"a","state":"Running"},{"name":"b","state":"Running"}]' ;;
esac
"#,
    )
    .unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[cfg(unix)]
fn stdout_lines(output: &std::process::Output) -> Vec<String> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(String::from)
        .collect()
}

#[test]
fn help_works() {
    quickvm()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Quick Hyper-V virtual machine management"));
}

#[test]
fn missing_config_shows_error() {
    quickvm()
        .args(["--config", "/nonexistent/quickvm.toml", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load config"));
}

#[test]
fn validation_rejects_empty_shell_program() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(&dir, "[shell]\nprogram = \"\"\n");

    quickvm()
        .args(["--config", config.to_str().unwrap(), "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("shell.program must not be empty"));
}

#[test]
fn validation_rejects_inverted_gpu_range() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(&dir, "[gpu]\nmin_vram = 500000000\n");

    quickvm()
        .args(["--config", config.to_str().unwrap(), "gpu", "status"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("gpu vram"));
}

#[test]
fn start_without_targets_fails_before_shell() {
    let home = tempfile::tempdir().unwrap();
    let config = write_config(&home, "[shell]\nprogram = \"/nonexistent/powershell\"\n");

    // A spawned shell would report "failed to launch" instead.
    isolated(&home)
        .args(["--config", config.to_str().unwrap(), "start"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no VMs specified"))
        .stderr(predicate::str::contains("failed to launch").not());
}

#[test]
fn empty_range_counts_as_no_targets() {
    let home = tempfile::tempdir().unwrap();
    isolated(&home)
        .args(["stop", "--range", ""])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no VMs specified"));
}

#[test]
fn json_errors_use_envelope() {
    let home = tempfile::tempdir().unwrap();
    isolated(&home)
        .args(["--output", "json", "restart"])
        .assert()
        .failure()
        .stdout(predicate::str::contains(
            r#"{"success":false,"error":"no VMs specified"}"#,
        ));
}

#[test]
fn unknown_output_format_rejected() {
    quickvm()
        .args(["--output", "xml", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value 'xml'"));
}

#[test]
fn missing_shell_reports_launch_failure() {
    let home = tempfile::tempdir().unwrap();
    let config = write_config(&home, "[shell]\nprogram = \"/nonexistent/powershell\"\n");

    isolated(&home)
        .args(["--config", config.to_str().unwrap(), "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to launch /nonexistent/powershell"));
}

#[test]
fn workspace_lifecycle_without_shell() {
    let home = tempfile::tempdir().unwrap();

    isolated(&home)
        .args(["ws", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No workspaces found"));

    isolated(&home)
        .args(["ws", "create", "lab", "--vms", "web, db"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Workspace 'lab' created with 2 VMs"));
    assert!(home.path().join(".quickvm/workspaces/lab.yaml").is_file());

    isolated(&home)
        .args(["workspace", "show", "lab"])
        .assert()
        .success()
        .stdout(predicate::str::contains("  - web"))
        .stdout(predicate::str::contains("  - db"));

    isolated(&home)
        .args(["ws", "delete", "lab"])
        .assert()
        .success();

    isolated(&home)
        .args(["ws", "show", "lab"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("workspace 'lab' does not exist"));
}

#[test]
fn workspace_name_is_validated() {
    let home = tempfile::tempdir().unwrap();
    isolated(&home)
        .args(["ws", "create", "../escape", "--vms", "web"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid workspace name"));
}

#[cfg(unix)]
#[test]
fn partial_batch_failure_prints_one_json_document() {
    let home = tempfile::tempdir().unwrap();
    let shell = fake_shell(&home);
    let config = write_config(&home, &format!("[shell]\nprogram = {:?}\n", shell.display().to_string()));

    let assert = isolated(&home)
        .args(["--config", config.to_str().unwrap(), "--output", "json", "stop", "--all"])
        .assert()
        .failure();

    let lines = stdout_lines(assert.get_output());
    assert_eq!(lines.len(), 1, "stdout: {lines:?}");
    let report = &lines[0];
    assert!(report.starts_with(r#"{"success":true,"data":{"operation":"stop""#));
    assert!(report.contains(r#""success_count":1"#));
    assert!(report.contains(r#""fail_count":1"#));
    assert!(report.contains("The virtual machine is locked."));
    assert!(!report.contains(r#""error":"#));
}

#[cfg(unix)]
#[test]
fn workspace_start_runs_members_that_exist() {
    let home = tempfile::tempdir().unwrap();
    let shell = fake_shell(&home);
    let config = write_config(&home, &format!("[shell]\nprogram = {:?}\n", shell.display().to_string()));

    isolated(&home)
        .args(["ws", "create", "lab", "--vms", "a, ghost"])
        .assert()
        .success();

    let assert = isolated(&home)
        .args(["--config", config.to_str().unwrap(), "--output", "json", "ws", "start", "lab"])
        .assert()
        .failure();

    let lines = stdout_lines(assert.get_output());
    assert_eq!(lines.len(), 1, "stdout: {lines:?}");
    let report = &lines[0];
    assert!(report.contains(r#""success_count":1"#));
    assert!(report.contains(r#""fail_count":1"#));
    assert!(report.contains(r#""total_count":2"#));
    assert!(report.contains(r#"{"index":1,"name":"a","success":true"#));
    assert!(report.contains("VM 'ghost' not found"));
}
