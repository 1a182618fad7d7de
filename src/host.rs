//! Test host invocation.
//!
//! A [`TestHost`] runs the target project's tests inside one project copy.
//! [`CommandHost`] does that with an external program and the environment
//! protocol below.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::coverage::MutationCoverage;
use crate::error::HostError;
use crate::results::{TestOutcome, TestResults};

/// `coverage` or `test`.
pub const ENV_MODE: &str = "IL_MUTANT_MODE";
/// Newline-separated names of the tests to run (test mode).
pub const ENV_TESTS: &str = "IL_MUTANT_TESTS";
/// Where the host writes its [`TestResults`] artifact.
pub const ENV_RESULTS: &str = "IL_MUTANT_RESULTS";
/// Where the instrumented host writes its coverage snapshot (coverage mode).
pub const ENV_COVERAGE: &str = "IL_MUTANT_COVERAGE";

/// Directory inside a project copy that holds artifacts and host logs.
pub const ARTIFACT_DIR: &str = ".il-mutant";

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Result of one test-mode invocation.
#[derive(Debug, Clone)]
pub struct HostRun {
    pub results: TestResults,
    /// The deadline expired and the host was stopped.
    pub timed_out: bool,
    pub duration: Duration,
}

/// Runs the tests of one project copy.
pub trait TestHost: Send + Sync {
    /// Run the whole suite with coverage instrumentation enabled.
    fn run_coverage(&self, project: &Path) -> Result<MutationCoverage, HostError>;

    /// Run exactly `tests`, stopping the host at `deadline`.
    ///
    /// Every requested test without a result is reported as `TimedOut`.
    fn run_tests(
        &self,
        project: &Path,
        tests: &BTreeSet<String>,
        deadline: Duration,
    ) -> Result<HostRun, HostError>;
}

/// An external test host program.
#[derive(Debug, Clone)]
pub struct CommandHost {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandHost {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    fn command(&self, project: &Path, mode: &str, log: &Path) -> Result<Command, HostError> {
        let spawn_err = |source| HostError::Spawn {
            program: self.program.clone(),
            source,
        };
        let stdout = File::create(log).map_err(spawn_err)?;
        let stderr = stdout.try_clone().map_err(spawn_err)?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(project)
            .env(ENV_MODE, mode)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));
        Ok(cmd)
    }

    fn spawn(&self, mut cmd: Command) -> Result<Child, HostError> {
        cmd.spawn().map_err(|source| HostError::Spawn {
            program: self.program.clone(),
            source,
        })
    }
}

fn artifact_dir(project: &Path) -> Result<PathBuf, HostError> {
    let dir = project.join(ARTIFACT_DIR);
    fs::create_dir_all(&dir).map_err(|e| HostError::MissingArtifact {
        path: dir.clone(),
        reason: e.to_string(),
    })?;
    Ok(dir)
}

/// Wait for `child` until `deadline`; kill it when the deadline passes.
///
/// Returns `None` when the child was killed.
fn wait_with_deadline(child: &mut Child, deadline: Duration) -> Result<Option<ExitStatus>, HostError> {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().map_err(HostError::Wait)? {
            return Ok(Some(status));
        }
        if start.elapsed() >= deadline {
            if let Err(e) = child.kill() {
                // Exited between the poll and the kill.
                debug!(error = %e, "kill after deadline failed");
            }
            child.wait().map_err(HostError::Wait)?;
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn log_tail(path: &Path) -> String {
    let text = fs::read_to_string(path).unwrap_or_default();
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(20)..].join("\n")
}

impl TestHost for CommandHost {
    fn run_coverage(&self, project: &Path) -> Result<MutationCoverage, HostError> {
        let dir = artifact_dir(project)?;
        let coverage_path = dir.join("coverage.bin");
        let results_path = dir.join("coverage-results.bin");
        let log = dir.join("coverage.log");

        let mut cmd = self.command(project, "coverage", &log)?;
        cmd.env(ENV_COVERAGE, &coverage_path)
            .env(ENV_RESULTS, &results_path);

        info!(program = %self.program, project = ?project, "running coverage pass");
        let mut child = self.spawn(cmd)?;
        let status = child.wait().map_err(HostError::Wait)?;
        if !status.success() {
            return Err(HostError::CoverageRun {
                code: status.code(),
                stderr: log_tail(&log),
            });
        }

        let coverage = MutationCoverage::read(&coverage_path)?;
        debug!(tests = coverage.len(), "coverage snapshot read");
        Ok(coverage)
    }

    fn run_tests(
        &self,
        project: &Path,
        tests: &BTreeSet<String>,
        deadline: Duration,
    ) -> Result<HostRun, HostError> {
        let dir = artifact_dir(project)?;
        let run = Uuid::new_v4();
        let results_path = dir.join(format!("results-{run}.bin"));
        let log = dir.join(format!("host-{run}.log"));

        let names: Vec<&str> = tests.iter().map(String::as_str).collect();
        let mut cmd = self.command(project, "test", &log)?;
        cmd.env(ENV_TESTS, names.join("\n"))
            .env(ENV_RESULTS, &results_path);

        let start = Instant::now();
        let mut child = self.spawn(cmd)?;
        let status = wait_with_deadline(&mut child, deadline)?;
        let duration = start.elapsed();
        let timed_out = status.is_none();

        let results = match TestResults::read(&results_path) {
            Ok(r) => r.normalized(),
            Err(e) if timed_out => {
                debug!(error = %e, "no results from a host stopped at the deadline");
                TestResults::default()
            }
            Err(e) => {
                return Err(HostError::MissingArtifact {
                    path: results_path,
                    reason: format!("{e} (exit status {status:?})"),
                });
            }
        };

        let mut results = results;
        let missing = results.fill_missing(tests, TestOutcome::TimedOut);
        if missing > 0 {
            warn!(missing, timed_out, "tests without a result are marked timed out");
        }
        if let Err(e) = fs::remove_file(&results_path) {
            debug!(error = %e, "could not remove result artifact");
        }

        Ok(HostRun {
            results,
            timed_out,
            duration,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn script(dir: &Path, body: &str) -> CommandHost {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("host.sh");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
        CommandHost::new(path.to_string_lossy(), vec![])
    }

    #[test]
    fn hanging_host_is_killed_and_tests_time_out() {
        let scripts = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        let host = script(scripts.path(), "sleep 30");

        let tests = BTreeSet::from(["T1".to_string()]);
        let run = host
            .run_tests(project.path(), &tests, Duration::from_millis(200))
            .unwrap();
        assert!(run.timed_out);
        assert!(run.duration < Duration::from_secs(10));
        assert_eq!(run.results.timed_out(), BTreeSet::from(["T1"]));
    }

    #[test]
    fn missing_artifact_after_normal_exit_is_an_error() {
        let scripts = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        let host = script(scripts.path(), "exit 0");

        let tests = BTreeSet::from(["T1".to_string()]);
        let err = host
            .run_tests(project.path(), &tests, Duration::from_secs(10))
            .unwrap_err();
        assert!(matches!(err, HostError::MissingArtifact { .. }));
    }

    #[test]
    fn failing_coverage_pass_reports_its_output() {
        let scripts = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        let host = script(scripts.path(), "echo 'build broke' >&2; exit 3");

        match host.run_coverage(project.path()).unwrap_err() {
            HostError::CoverageRun { code, stderr } => {
                assert_eq!(code, Some(3));
                assert!(stderr.contains("build broke"));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn host_sees_mode_and_requested_tests() {
        let scripts = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        let host = script(
            scripts.path(),
            "printf '%s|%s' \"$IL_MUTANT_MODE\" \"$IL_MUTANT_TESTS\" > seen.txt; exit 0",
        );
        let tests = BTreeSet::from(["A".to_string(), "B".to_string()]);
        // No artifact is written, which is an error, but the environment was seen.
        let _ = host.run_tests(project.path(), &tests, Duration::from_secs(10));
        let seen = fs::read_to_string(project.path().join("seen.txt")).unwrap();
        assert_eq!(seen, "test|A\nB");
    }
}
