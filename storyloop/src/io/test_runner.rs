//! Test runner adapter.

use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::io::process::{NOT_FOUND_EXIT_CODE, run_command_with_timeout};

/// Lines of test output carried into the failure message and reviewer prompt.
const HEAD_LINES: usize = 40;

#[derive(Debug, Clone)]
pub struct TestRequest {
    pub command: String,
    pub workdir: PathBuf,
    pub log_path: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestOutcome {
    Pass,
    Fail,
    /// The test command is not installed; treated as passing.
    Skipped,
}

impl TestOutcome {
    pub fn passed(self) -> bool {
        !matches!(self, TestOutcome::Fail)
    }
}

#[derive(Debug, Clone)]
pub struct TestReport {
    pub outcome: TestOutcome,
    pub log_path: PathBuf,
    /// First lines of the captured output.
    pub head: String,
}

pub trait TestRunner {
    fn run(&self, request: &TestRequest) -> Result<TestReport>;
}

/// Runs the test command through `sh -c` in the repository root.
pub struct ShellTestRunner;

impl TestRunner for ShellTestRunner {
    #[instrument(skip_all, fields(command = %request.command))]
    fn run(&self, request: &TestRequest) -> Result<TestReport> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&request.command)
            .current_dir(&request.workdir);
        let output = run_command_with_timeout(
            cmd,
            None,
            request.timeout,
            request.output_limit_bytes,
        )?;

        let mut log = format!("$ {}\n", request.command);
        log.push_str(&output.combined_log("tests"));
        write_test_log(&request.log_path, &log)?;

        let outcome = if output.success() {
            TestOutcome::Pass
        } else if !output.timed_out && output.status.code() == Some(NOT_FOUND_EXIT_CODE) {
            warn!("test command not found, skipping tests");
            TestOutcome::Skipped
        } else {
            TestOutcome::Fail
        };
        info!(outcome = ?outcome, "tests finished");

        Ok(TestReport {
            outcome,
            log_path: request.log_path.clone(),
            head: head_lines(&log, HEAD_LINES),
        })
    }
}

fn write_test_log(path: &std::path::Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create test log dir {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write test log {}", path.display()))
}

fn head_lines(text: &str, max_lines: usize) -> String {
    text.lines().take(max_lines).collect::<Vec<_>>().join("\n")
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn request(dir: &std::path::Path, command: &str) -> TestRequest {
        TestRequest {
            command: command.to_string(),
            workdir: dir.to_path_buf(),
            log_path: dir.join("logs").join("test.log"),
            timeout: Duration::from_secs(10),
            output_limit_bytes: 10_000,
        }
    }

    #[test]
    fn passing_command_writes_log() {
        let temp = tempfile::tempdir().expect("tempdir");
        let report = ShellTestRunner
            .run(&request(temp.path(), "echo all good"))
            .expect("run");
        assert_eq!(report.outcome, TestOutcome::Pass);
        let log = fs::read_to_string(&report.log_path).expect("log");
        assert!(log.starts_with("$ echo all good\n"));
        assert!(log.contains("all good"));
    }

    #[test]
    fn failing_command_reports_head() {
        let temp = tempfile::tempdir().expect("tempdir");
        let report = ShellTestRunner
            .run(&request(temp.path(), "echo 'assertion failed'; exit 1"))
            .expect("run");
        assert_eq!(report.outcome, TestOutcome::Fail);
        assert!(!report.outcome.passed());
        assert!(report.head.contains("assertion failed"));
    }

    #[test]
    fn missing_command_is_skipped() {
        let temp = tempfile::tempdir().expect("tempdir");
        let report = ShellTestRunner
            .run(&request(temp.path(), "no-such-test-tool-xyz --all"))
            .expect("run");
        assert_eq!(report.outcome, TestOutcome::Skipped);
        assert!(report.outcome.passed());
    }
}
