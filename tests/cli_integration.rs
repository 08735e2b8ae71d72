#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
//! Integration tests for the `dbtel-pipeline` binary: CLI flags and the
//! `--validate-only` path, exercised as a subprocess the way the binary's
//! actual users invoke it.

use std::io::Write;
use std::path::PathBuf;
use std::process::Command;
use std::sync::OnceLock;

static BINARY_PATH: OnceLock<PathBuf> = OnceLock::new();

fn get_binary_path() -> &'static PathBuf {
    BINARY_PATH.get_or_init(|| {
        let output = Command::new("cargo").args(["build", "--bin", "dbtel-pipeline"]).output().expect("failed to build binary");
        assert!(output.status.success(), "failed to build binary:\n{}", String::from_utf8_lossy(&output.stderr));
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("target").join("debug").join("dbtel-pipeline")
    })
}

fn run(args: &[&str]) -> std::process::Output {
    Command::new(get_binary_path()).args(args).output().expect("failed to execute binary")
}

#[test]
fn help_flag_describes_the_binary() {
    let output = run(&["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--config"));
    assert!(stdout.contains("--health-port"));
    assert!(stdout.contains("--validate-only"));
}

#[test]
fn version_flag_reports_the_package_version() {
    let output = run(&["--version"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn validate_only_accepts_a_well_formed_document() {
    let mut file = tempfile_with_contents(
        r#"
scrapers:
  primary:
    driver: postgres
    endpoint: localhost:5432
"#,
    );
    file.flush().expect("flush temp config");

    let output = run(&["--validate-only", "--config", file.path().to_str().expect("utf8 path")]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
}

#[test]
fn validate_only_rejects_an_unknown_field() {
    let mut file = tempfile_with_contents(
        r#"
scrapers:
  primary:
    driver: postgres
    endpoint: localhost:5432
    bogus_option: true
"#,
    );
    file.flush().expect("flush temp config");

    let output = run(&["--validate-only", "--config", file.path().to_str().expect("utf8 path")]);
    assert!(!output.status.success());
}

#[test]
fn validate_only_rejects_a_missing_file() {
    let output = run(&["--validate-only", "--config", "/nonexistent/dbtel-pipeline.yaml"]);
    assert!(!output.status.success());
}

fn tempfile_with_contents(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("create temp config file");
    file.write_all(contents.as_bytes()).expect("write temp config contents");
    file
}
