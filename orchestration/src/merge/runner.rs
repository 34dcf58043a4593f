//! Test execution inside task worktrees
//!
//! Runs the configured test command with a hard timeout. The command string
//! is split shell-style but executed directly, no shell in between. A run
//! that exceeds its budget counts as a failure with an explicit timeout
//! reason; the child is killed on drop.

use std::path::Path;
use std::time::Instant;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

use crate::model::TestTotals;

/// Keep at most this much of each captured stream
const OUTPUT_TAIL_BYTES: usize = 4096;

/// Matches the summary line cargo-style test harnesses print
static TOTALS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+) passed; (\d+) failed").expect("totals regex"));

/// Outcome of one test run
#[derive(Debug, Clone)]
pub struct TestRunOutcome {
    pub passed: bool,
    pub timed_out: bool,
    pub exit_code: Option<i32>,
    pub stdout_tail: String,
    pub stderr_tail: String,
    pub duration_ms: u64,
    pub totals: TestTotals,
    /// Present when the run did not even produce an exit status
    pub failure_reason: Option<String>,
}

impl TestRunOutcome {
    fn failed(reason: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            passed: false,
            timed_out: false,
            exit_code: None,
            stdout_tail: String::new(),
            stderr_tail: String::new(),
            duration_ms,
            totals: TestTotals::default(),
            failure_reason: Some(reason.into()),
        }
    }

    /// One-line summary for logs and failure reports
    pub fn summary(&self) -> String {
        if self.timed_out {
            return format!("timeout after {}ms", self.duration_ms);
        }
        match (self.passed, self.exit_code) {
            (true, _) => format!(
                "passed ({} tests, {}ms)",
                self.totals.total, self.duration_ms
            ),
            (false, Some(code)) => format!(
                "failed with exit code {code} ({} of {} tests failed)",
                self.totals.failed, self.totals.total
            ),
            (false, None) => self
                .failure_reason
                .clone()
                .unwrap_or_else(|| "failed".to_string()),
        }
    }
}

/// Run `command` in `dir` with a `timeout_ms` budget
pub async fn run_tests(command: &str, dir: &Path, timeout_ms: u64) -> TestRunOutcome {
    let started = Instant::now();

    let Some(argv) = shlex::split(command) else {
        return TestRunOutcome::failed(format!("unparseable test command: {command:?}"), 0);
    };
    let Some((program, args)) = argv.split_first() else {
        return TestRunOutcome::failed("empty test command", 0);
    };

    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args)
        .current_dir(dir)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);

    let child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!(command, error = %e, "test command failed to spawn");
            return TestRunOutcome::failed(
                format!("failed to spawn {program:?}: {e}"),
                started.elapsed().as_millis() as u64,
            );
        }
    };

    let budget = std::time::Duration::from_millis(timeout_ms);
    match tokio::time::timeout(budget, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            let totals = parse_totals(&stdout);
            let passed = output.status.success();
            let duration_ms = started.elapsed().as_millis() as u64;
            info!(command, passed, duration_ms, "test run finished");
            TestRunOutcome {
                passed,
                timed_out: false,
                exit_code: output.status.code(),
                stdout_tail: tail(&stdout),
                stderr_tail: tail(&stderr),
                duration_ms,
                totals,
                failure_reason: None,
            }
        }
        Ok(Err(e)) => TestRunOutcome::failed(
            format!("test process error: {e}"),
            started.elapsed().as_millis() as u64,
        ),
        Err(_) => {
            // Dropping the future killed the child
            warn!(command, timeout_ms, "test run exceeded its budget");
            TestRunOutcome {
                passed: false,
                timed_out: true,
                exit_code: None,
                stdout_tail: String::new(),
                stderr_tail: String::new(),
                duration_ms: started.elapsed().as_millis() as u64,
                totals: TestTotals::default(),
                failure_reason: Some("timeout".to_string()),
            }
        }
    }
}

/// Sum pass/fail counts across every harness summary line in the output
fn parse_totals(stdout: &str) -> TestTotals {
    let mut totals = TestTotals::default();
    for captures in TOTALS_RE.captures_iter(stdout) {
        let passed: u32 = captures[1].parse().unwrap_or(0);
        let failed: u32 = captures[2].parse().unwrap_or(0);
        totals.passed += passed;
        totals.failed += failed;
        totals.total += passed + failed;
    }
    totals
}

fn tail(s: &str) -> String {
    if s.len() <= OUTPUT_TAIL_BYTES {
        return s.to_string();
    }
    let start = s.len() - OUTPUT_TAIL_BYTES;
    // Stay on a char boundary
    let start = (start..s.len()).find(|&i| s.is_char_boundary(i)).unwrap_or(start);
    s[start..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_totals() {
        let out = "running 3 tests\ntest result: ok. 3 passed; 0 failed; 0 ignored\n\
                   running 2 tests\ntest result: FAILED. 1 passed; 1 failed; 0 ignored\n";
        let totals = parse_totals(out);
        assert_eq!(totals.passed, 4);
        assert_eq!(totals.failed, 1);
        assert_eq!(totals.total, 5);
    }

    #[test]
    fn test_parse_totals_no_summary() {
        assert_eq!(parse_totals("nothing useful"), TestTotals::default());
    }

    #[tokio::test]
    async fn test_passing_command() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run_tests("true", dir.path(), 5_000).await;
        assert!(outcome.passed);
        assert!(!outcome.timed_out);
        assert_eq!(outcome.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_failing_command() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run_tests("false", dir.path(), 5_000).await;
        assert!(!outcome.passed);
        assert_eq!(outcome.exit_code, Some(1));
        assert!(outcome.failure_reason.is_none());
    }

    #[tokio::test]
    async fn test_timeout_has_explicit_reason() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run_tests("sleep 10", dir.path(), 200).await;
        assert!(!outcome.passed);
        assert!(outcome.timed_out);
        assert_eq!(outcome.failure_reason.as_deref(), Some("timeout"));
        assert!(outcome.summary().starts_with("timeout"));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run_tests("definitely-not-a-real-binary-xyz", dir.path(), 1_000).await;
        assert!(!outcome.passed);
        assert!(outcome.failure_reason.is_some());
    }

    #[tokio::test]
    async fn test_command_with_args() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run_tests("echo '1 passed; 0 failed'", dir.path(), 5_000).await;
        assert!(outcome.passed);
        assert_eq!(outcome.totals.passed, 1);
    }
}
