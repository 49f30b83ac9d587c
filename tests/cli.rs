use assert_cmd::Command;

fn econ_data(dir: &tempfile::TempDir) -> Command {
    let mut cmd = Command::cargo_bin("econ-data").unwrap();
    cmd.current_dir(dir.path())
        .arg("--db")
        .arg(dir.path().join("econ.db"));
    cmd
}

#[test]
fn missing_period_exits_with_one() {
    let dir = tempfile::tempdir().unwrap();
    econ_data(&dir)
        .args(["fetch", "gdp_per_capita"])
        .assert()
        .code(1);
}

#[test]
fn unknown_derived_metric_exits_with_one() {
    let dir = tempfile::tempdir().unwrap();
    econ_data(&dir).args(["derive", "nope"]).assert().code(1);
}

#[test]
fn list_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let output = econ_data(&dir).arg("list").assert().success().get_output().clone();
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("gdp_per_capita"));
}

#[test]
fn usage_errors_exit_with_one() {
    let dir = tempfile::tempdir().unwrap();
    econ_data(&dir)
        .args(["fetch", "gdp_per_capita", "--latest", "4", "--start", "2020-Q1"])
        .assert()
        .code(1);
}
