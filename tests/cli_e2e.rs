//! End-to-end tests for the CLI binary surface.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn no_input_exits_successfully_with_a_hint() {
    let mut cmd = Command::cargo_bin("bindery").unwrap();
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("No input provided"));
}

#[test]
fn unmatched_url_fails_with_a_summary() {
    let mut cmd = Command::cargo_bin("bindery").unwrap();
    cmd.arg("https://unknown.example.com/book/1")
        .assert()
        .failure()
        .stderr(predicate::str::contains("download(s) failed"));
}

#[test]
fn help_lists_the_output_template_flag() {
    let mut cmd = Command::cargo_bin("bindery").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--output"))
        .stdout(predicate::str::contains("--cookies"));
}

#[test]
fn links_file_with_unmatched_urls_counts_each_failure() {
    let dir = tempfile::tempdir().unwrap();
    let links = dir.path().join("links.txt");
    std::fs::write(
        &links,
        "# comment line\nhttps://unknown.example.com/a\n\nhttps://unknown.example.com/b\n",
    )
    .unwrap();

    let mut cmd = Command::cargo_bin("bindery").unwrap();
    cmd.arg("--file")
        .arg(&links)
        .assert()
        .failure()
        .stderr(predicate::str::contains("2 of 2 download(s) failed"));
}
