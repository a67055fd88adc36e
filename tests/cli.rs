//! CLI test cases.
//!
//! These use the `replay` driver, which streams a canned grader response
//! from a fixture file, so they need no network access or API keys.

use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;

/// A well-formed grader response.
static GRADED_RESPONSE: &str = "tests/fixtures/graded_response.md";
/// A grader response with no `language` score.
static MISSING_SCORE_RESPONSE: &str = "tests/fixtures/missing_score_response.md";

/// Create a new `Command` with our binary.
fn cmd() -> Command {
    let mut cmd = Command::cargo_bin("essay-grader").unwrap();
    cmd.env("RUST_LOG", "warn")
        .env_remove("GRADER_USER")
        .env_remove("GRADER_MODEL");
    cmd
}

/// A `grade` command using the replay driver.
fn grade_with(response: &str) -> Command {
    let mut cmd = cmd();
    cmd.arg("grade")
        .args(["--driver", "replay", "--replay-file", response])
        .args(["--topic", "proportionality"]);
    cmd
}

#[test]
fn test_help() {
    cmd().arg("--help").assert().success();
}

#[test]
fn test_version() {
    cmd().arg("--version").assert().success();
}

#[test]
fn test_schema_grading_record() {
    cmd()
        .args(["schema", "GradingRecord"])
        .assert()
        .success()
        .stdout(predicate::str::contains("created_at"));
}

#[test]
fn test_grade_json() {
    grade_with(GRADED_RESPONSE)
        .args(["--answer", "The policy addresses X.", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""relevance": 15"#))
        .stdout(predicate::str::contains(r#""language": 17"#))
        .stdout(predicate::str::contains(r#""total": 75"#))
        .stdout(predicate::str::contains("Good structure"));
}

#[test]
fn test_grade_streams_text_from_answer_file() {
    grade_with(GRADED_RESPONSE)
        .args(["--answer-file", "tests/fixtures/answer.txt"])
        .assert()
        .success()
        .stdout(predicate::str::contains("## Feedback"))
        .stdout(predicate::str::contains("Structure & Logic"))
        .stdout(predicate::str::contains("75/100"));
}

#[test]
fn test_grade_empty_answer_fails() {
    grade_with(GRADED_RESPONSE)
        .args(["--answer", "   "])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Please enter an answer."));
}

#[test]
fn test_grade_missing_score_fails() {
    grade_with(MISSING_SCORE_RESPONSE)
        .args(["--answer", "The policy addresses X.", "--json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("language"));
}

#[test]
fn test_grade_save_requires_user() {
    grade_with(GRADED_RESPONSE)
        .args(["--answer", "The policy addresses X.", "--save"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Sign in"));
}

#[test]
fn test_grade_unknown_topic() {
    cmd()
        .arg("grade")
        .args(["--driver", "replay", "--replay-file", GRADED_RESPONSE])
        .args(["--topic", "no-such-topic", "--answer", "A."])
        .assert()
        .failure()
        .stderr(predicate::str::contains("proportionality"));
}
