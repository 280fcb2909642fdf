//! Command-line round trips through the shipped binaries.

use std::fs;
use std::str;

use assert_cmd::Command;

fn stdout_of(cmd: &mut Command) -> String {
    let assert = cmd.assert().success();
    str::from_utf8(&assert.get_output().stdout)
        .expect("valid UTF-8")
        .to_owned()
}

fn cardinality_line(stdout: &str) -> f64 {
    stdout
        .lines()
        .find_map(|line| line.strip_prefix("Estimated cardinality: "))
        .expect("cardinality line")
        .parse()
        .expect("numeric estimate")
}

#[test]
fn txt2bin_then_fileclient_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let txt = dir.path().join("tuples.txt");
    let bin = dir.path().join("tuples.bin");

    let mut text = String::new();
    for value in 0..5000u32 {
        text.push_str(&value.to_string());
        text.push(if value % 8 == 7 { '\n' } else { ' ' });
    }
    fs::write(&txt, text).expect("write text tuples");

    Command::cargo_bin("txt2bin")
        .expect("txt2bin binary")
        .args([txt.as_os_str(), bin.as_os_str()])
        .assert()
        .success();

    let raw = fs::read(&bin).expect("binary output");
    assert_eq!(raw.len(), 5000 * 4);
    assert_eq!(&raw[0..8], &[0, 0, 0, 0, 1, 0, 0, 0]);

    let stdout = stdout_of(
        Command::cargo_bin("fileclient")
            .expect("fileclient binary")
            .arg(&bin)
            .arg("2"),
    );
    let estimate = cardinality_line(&stdout);
    assert!(
        (estimate / 5000.0 - 1.0).abs() < 0.05,
        "estimate {} too far from 5000",
        estimate
    );

    // The sharded run must agree with a single-threaded run exactly.
    let single = stdout_of(
        Command::cargo_bin("fileclient")
            .expect("fileclient binary")
            .arg(&bin)
            .arg("1"),
    );
    assert_eq!(estimate, cardinality_line(&single));
}

#[test]
fn raw_sketches_merge_to_the_direct_estimate() {
    let dir = tempfile::tempdir().expect("tempdir");
    let bin_a = dir.path().join("a.bin");
    let bin_b = dir.path().join("b.bin");
    let bin_all = dir.path().join("all.bin");

    let tuples: Vec<u8> = (0..4000u32).flat_map(|v| v.to_le_bytes()).collect();
    fs::write(&bin_a, &tuples[..8000]).expect("first half");
    fs::write(&bin_b, &tuples[8000..]).expect("second half");
    fs::write(&bin_all, &tuples).expect("whole file");

    let mut raw_lines = String::new();
    for bin in [&bin_a, &bin_b] {
        let stdout = stdout_of(
            Command::cargo_bin("fileclient")
                .expect("fileclient binary")
                .arg(bin)
                .arg("1")
                .arg("--raw"),
        );
        raw_lines.push_str(stdout.lines().last().expect("sketch line"));
        raw_lines.push('\n');
    }

    let merged = stdout_of(
        Command::cargo_bin("fileclient")
            .expect("fileclient binary")
            .arg("--merge")
            .write_stdin(raw_lines),
    );

    let direct = stdout_of(
        Command::cargo_bin("fileclient")
            .expect("fileclient binary")
            .arg(&bin_all)
            .arg("1"),
    );
    assert_eq!(cardinality_line(&merged), cardinality_line(&direct));
}

#[test]
fn server_rejects_bad_arguments() {
    Command::cargo_bin("server")
        .expect("server binary")
        .assert()
        .failure();

    Command::cargo_bin("server")
        .expect("server binary")
        .args(["MD5", "2"])
        .assert()
        .failure();

    Command::cargo_bin("server")
        .expect("server binary")
        .args(["MURMUR3_128", "0"])
        .assert()
        .failure();

    Command::cargo_bin("server")
        .expect("server binary")
        .args(["MURMUR3_128", "2xbogus"])
        .assert()
        .failure();
}
