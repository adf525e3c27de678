//! Integration tests for core CLI contract behavior.

use {predicates::prelude::*, std::fs, tempfile::tempdir};

fn cli_cmd() -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("ubootflash");
    // Keep host env and config out of the way.
    cmd.env_remove("UBOOTFLASH_PORT")
        .env_remove("UBOOTFLASH_BAUD")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    cli_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("ubootflash").and(predicate::str::contains("Usage")))
        .stderr(predicate::str::is_empty());
}

#[test]
fn help_lists_commands_and_examples() {
    cli_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("load")
                .and(predicate::str::contains("list-ports"))
                .and(predicate::str::contains("Examples:")),
        );
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    cli_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("ubootflash"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn list_ports_json_is_a_clean_array() {
    let dir = tempdir().expect("tempdir should be created");
    let output = cli_cmd()
        .current_dir(dir.path())
        .args(["list-ports", "--json"])
        .assert()
        .success()
        .get_output()
        .clone();

    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf-8");
    let parsed: serde_json::Value = serde_json::from_str(&stdout).expect("stdout should be JSON");
    assert!(parsed.is_array(), "list-ports --json should return an array");
    assert!(
        output
            .stderr
            .is_empty(),
        "JSON output should not have stderr"
    );
}

#[test]
fn invalid_local_config_warns_but_continues() {
    let dir = tempdir().expect("tempdir should be created");
    fs::write(
        dir.path()
            .join("ubootflash.toml"),
        "invalid toml [[[",
    )
    .expect("write invalid config");

    let output = cli_cmd()
        .current_dir(dir.path())
        .arg("list-ports")
        .output()
        .expect("command should execute");
    assert!(
        output
            .status
            .success(),
        "command should succeed despite config warning"
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ubootflash.toml"), "should warn about the file: {stderr}");
}

#[test]
fn completions_command_writes_to_stdout() {
    cli_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .code(0)
        .stderr(predicate::str::is_empty())
        .stdout(predicate::str::contains("_ubootflash()"));
}

#[test]
fn completions_without_shell_is_usage_error() {
    cli_cmd()
        .arg("completions")
        .assert()
        .failure()
        .code(2)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Error"));
}

// ============================================================================
// Exit codes
// ============================================================================

#[test]
fn exit_code_two_for_unknown_command() {
    cli_cmd()
        .arg("unknown-command-xyz")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("unrecognized").or(predicate::str::contains("unknown")));
}

#[test]
fn exit_code_two_for_invalid_flag() {
    cli_cmd()
        .arg("--invalid-flag-xyz")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn exit_code_two_for_missing_addresses() {
    cli_cmd()
        .args(["load", "fw.bin"])
        .assert()
        .failure()
        .code(2)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("--load-addr"));
}

#[test]
fn exit_code_two_for_bad_address() {
    cli_cmd()
        .args(["load", "fw.bin", "--load-addr", "0xZZ", "--save-addr", "0"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("hex"));
}

#[test]
fn exit_code_two_for_bad_pattern() {
    let dir = tempdir().expect("tempdir should be created");
    let image = dir
        .path()
        .join("fw.bin");
    fs::write(&image, [0u8; 64]).expect("write image");

    cli_cmd()
        .current_dir(dir.path())
        .args(["-p", "/dev/ubootflash-missing", "load"])
        .arg(&image)
        .args(["--load-addr", "0x82000000", "--save-addr", "0", "--prompt", "re:("])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("invalid pattern"));
}

fn failure_object(stdout: Vec<u8>) -> serde_json::Value {
    let stdout = String::from_utf8(stdout).expect("stdout should be utf-8");
    assert_eq!(stdout.lines().count(), 1, "expected one JSON line: {stdout}");
    serde_json::from_str(&stdout).expect("stdout should be JSON")
}

#[test]
fn exit_code_six_for_missing_file() {
    let dir = tempdir().expect("tempdir should be created");
    let missing = dir
        .path()
        .join("not_exists.bin");

    cli_cmd()
        .current_dir(dir.path())
        .args(["--non-interactive", "-p", "/dev/ubootflash-missing", "load"])
        .arg(&missing)
        .args(["--load-addr", "0x82000000", "--save-addr", "0"])
        .assert()
        .failure()
        .code(6)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("not_exists.bin"));
}

#[test]
fn json_reports_missing_file_on_stdout() {
    let dir = tempdir().expect("tempdir should be created");
    let missing = dir
        .path()
        .join("not_exists.bin");

    let output = cli_cmd()
        .current_dir(dir.path())
        .args(["--non-interactive", "-p", "/dev/ubootflash-missing", "load"])
        .arg(&missing)
        .args(["--load-addr", "0x82000000", "--save-addr", "0", "--json"])
        .assert()
        .failure()
        .code(6)
        .get_output()
        .clone();

    let value = failure_object(output.stdout);
    assert_eq!(value["ok"], false);
    assert_eq!(value["state"], "Disconnected");
    assert_eq!(value["kind"], "io");
}

#[test]
fn json_reports_missing_port_on_stdout() {
    let dir = tempdir().expect("tempdir should be created");
    let image = dir
        .path()
        .join("fw.bin");
    fs::write(&image, [0u8; 64]).expect("write image");

    let output = cli_cmd()
        .current_dir(dir.path())
        .args(["--non-interactive", "-p", "/dev/ubootflash-missing", "load"])
        .arg(&image)
        .args(["--load-addr", "0x0", "--save-addr", "0x0", "--json"])
        .assert()
        .failure()
        .code(3)
        .get_output()
        .clone();

    let value = failure_object(output.stdout);
    assert_eq!(value["ok"], false);
    assert_eq!(value["state"], "Disconnected");
    assert_eq!(value["kind"], "connection");
    assert!(
        value["error"]
            .as_str()
            .expect("error should be a string")
            .contains("/dev/ubootflash-missing")
    );
}

#[test]
fn exit_code_three_for_missing_port() {
    let dir = tempdir().expect("tempdir should be created");
    let image = dir
        .path()
        .join("fw.bin");
    fs::write(&image, [0u8; 64]).expect("write image");

    cli_cmd()
        .current_dir(dir.path())
        .args(["--non-interactive", "-p", "/dev/ubootflash-missing", "load"])
        .arg(&image)
        .args(["--load-addr", "0x82000000", "--save-addr", "0"])
        .assert()
        .failure()
        .code(3)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("/dev/ubootflash-missing"));
}

#[test]
fn non_interactive_environment_variable_works() {
    cli_cmd()
        .env("UBOOTFLASH_NON_INTERACTIVE", "true")
        .arg("--version")
        .assert()
        .success();
}

#[test]
fn unknown_flag_suggests_similar() {
    cli_cmd()
        .arg("list-ports")
        .arg("--jason")
        .assert()
        .failure()
        .stderr(predicate::str::contains("json"));
}

#[test]
fn colors_disabled_when_not_tty() {
    let output = cli_cmd()
        .arg("--help")
        .assert()
        .success()
        .get_output()
        .clone();
    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf-8");
    assert!(
        !stdout.contains("\x1b["),
        "Colors should be disabled in non-TTY mode"
    );
}
