use assert_cmd::Command;
use csv::{ReaderBuilder, StringRecord};
use predicates::prelude::*;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tempfile::TempDir;

/// data directory with two `.smt2` files and one `.txt` file
fn setup_data() -> (TempDir, PathBuf) {
    let tmp = tempfile::tempdir().unwrap();
    let data = tmp.path().join("data");
    fs::create_dir_all(data.join("nested")).unwrap();
    fs::write(data.join("a.smt2"), "echo sat\n").unwrap();
    fs::write(data.join("nested/b.smt2"), "echo unsat\n").unwrap();
    fs::write(data.join("notes.txt"), "echo ignored\n").unwrap();

    let data = data.canonicalize().unwrap();
    (tmp, data)
}

fn testrun(tmp: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("testrun").unwrap();
    cmd.current_dir(tmp.path())
        .env("RUST_LOG", "warn")
        .arg("--output")
        .arg(tmp.path().join("out.txt"))
        .arg("--data-output")
        .arg(tmp.path().join("data-out.txt"));
    cmd
}

fn results(path: &Path) -> Vec<StringRecord> {
    ReaderBuilder::new()
        .quote(b'\'')
        .has_headers(false)
        .from_path(path)
        .unwrap()
        .records()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

#[test]
fn echo_program_over_two_files() {
    let (tmp, data) = setup_data();

    testrun(&tmp)
        .args(["--program", "/bin/echo", "--filetype", ".smt2"])
        .arg("--data")
        .arg(&data)
        .args(["-j", "2", "--timeout", "5"])
        .assert()
        .success();

    let rows = results(&tmp.path().join("out.txt"));
    assert_eq!(rows.len(), 2);

    let mut files = Vec::new();
    for row in rows.iter() {
        assert_eq!(row.len(), 4);
        assert_eq!(&row[0], "/bin/echo");
        // echo prints its argument, the absolute data path
        assert_eq!(&row[1], &row[2]);
        let duration: f64 = row[3].parse().unwrap();
        assert!((0.0..5.0).contains(&duration));
        files.push(row[1].to_string());
    }
    files.sort();

    let a = data.join("a.smt2").to_string_lossy().into_owned();
    let b = data.join("nested/b.smt2").to_string_lossy().into_owned();
    assert_eq!(files, vec![a.clone(), b.clone()]);

    let selection = fs::read_to_string(tmp.path().join("data-out.txt")).unwrap();
    assert_eq!(selection, format!("{a}\n{b}\n"));
}

#[test]
fn filetype_filter_excludes_other_files() {
    let (tmp, data) = setup_data();

    testrun(&tmp)
        .args(["--program", "/bin/sh", "--filetype", ".smt2", "-n", "2"])
        .arg("--data")
        .arg(&data)
        .assert()
        .success();

    let selection = fs::read_to_string(tmp.path().join("data-out.txt")).unwrap();
    assert_eq!(selection.lines().count(), 2);
    assert!(!selection.contains("notes.txt"));

    let rows = results(&tmp.path().join("out.txt"));
    assert_eq!(rows.len(), 4);
    assert!(rows.iter().all(|row| !row[1].ends_with(".txt")));
    assert_eq!(rows.iter().filter(|row| &row[2] == "sat").count(), 2);
    assert_eq!(rows.iter().filter(|row| &row[2] == "unsat").count(), 2);
}

#[test]
fn slow_program_is_recorded_as_timeout() {
    let tmp = tempfile::tempdir().unwrap();
    let data = tmp.path().join("data");
    fs::create_dir(&data).unwrap();
    fs::write(data.join("slow.smt2"), "sleep 30\n").unwrap();

    testrun(&tmp)
        .args(["--program", "/bin/sh", "--timeout", "1"])
        .arg("--data")
        .arg(&data)
        .assert()
        .success();

    let rows = results(&tmp.path().join("out.txt"));
    assert_eq!(rows.len(), 1);
    assert_eq!(&rows[0][2], "unknown");
    assert_eq!(&rows[0][3], "timeout");
}

#[test]
fn selection_can_be_replayed_as_data_file() {
    let (tmp, data) = setup_data();

    testrun(&tmp)
        .args(["--program", "/bin/echo", "--limit-data", "1", "--seed", "9"])
        .arg("--data")
        .arg(&data)
        .assert()
        .success();

    let first = fs::read_to_string(tmp.path().join("data-out.txt")).unwrap();
    assert_eq!(first.lines().count(), 1);

    let replay = tmp.path().join("replay.txt");
    fs::copy(tmp.path().join("data-out.txt"), &replay).unwrap();

    testrun(&tmp)
        .args(["--program", "/bin/echo", "--data-file"])
        .arg(&replay)
        .assert()
        .success();

    let second = fs::read_to_string(tmp.path().join("data-out.txt")).unwrap();
    assert_eq!(first, second);
}

#[test]
fn malformed_arguments_exit_with_usage() {
    let tmp = tempfile::tempdir().unwrap();

    testrun(&tmp)
        .args(["--program", "/bin/echo", "-j", "many"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}

#[test]
fn missing_program_exits_with_usage() {
    let tmp = tempfile::tempdir().unwrap();

    testrun(&tmp)
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("--program"));
}

#[test]
fn config_file_without_programs_is_a_configuration_error() {
    let tmp = tempfile::tempdir().unwrap();
    let config = tmp.path().join("run.yaml");
    fs::write(&config, "execution:\n  jobs: 2\n").unwrap();

    testrun(&tmp)
        .env("RUST_LOG", "error")
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("No program was defined"));
}

#[test]
fn missing_data_root_is_an_empty_run() {
    let tmp = tempfile::tempdir().unwrap();

    testrun(&tmp)
        .args(["--program", "/bin/echo", "--data", "/nonexistent/data"])
        .assert()
        .success();

    assert_eq!(fs::read_to_string(tmp.path().join("out.txt")).unwrap(), "");
    assert_eq!(
        fs::read_to_string(tmp.path().join("data-out.txt")).unwrap(),
        ""
    );
}
