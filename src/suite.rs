//! In-process test suites over the reference evaluator.
//!
//! A suite file lists module images and test cases; each case calls one
//! method with constant arguments and compares the result. [`SuiteHost`] runs
//! a suite as a [`TestHost`] inside the orchestrating process, and
//! [`run_protocol`] runs it as an external host speaking the environment
//! protocol of [`CommandHost`](crate::host::CommandHost).

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::coverage::MutationCoverage;
use crate::coverage::registry::CoverageRegistry;
use crate::error::{HostError, ModelError};
use crate::host::{ENV_MODE, ENV_RESULTS, ENV_TESTS, HostRun, TestHost};
use crate::model::eval::{DEFAULT_STEP_LIMIT, Evaluator, Output, Value};
use crate::model::{ConstValue, Module};
use crate::results::{TestOutcome, TestResults, normalize_test_name};

/// Expected result of one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expect {
    Void,
    Value(ConstValue),
    Array(Vec<ConstValue>),
    List(Vec<ConstValue>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    /// Test name; a `(..)` suffix marks one case of a parameterised test.
    pub name: String,
    /// `Type::Method` to call.
    pub member: String,
    #[serde(default)]
    pub args: Vec<ConstValue>,
    pub expect: Expect,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suite {
    /// Module images, relative to the project root.
    pub modules: Vec<PathBuf>,
    pub tests: Vec<TestCase>,
}

impl Suite {
    pub fn load(path: &Path) -> Result<Suite> {
        let text = fs::read_to_string(path).with_context(|| format!("failed to read suite {:?}", path))?;
        serde_json::from_str(&text).with_context(|| format!("failed to parse suite {:?}", path))
    }

    /// Load the suite's module images from `project`.
    pub fn load_modules(&self, project: &Path) -> Result<Vec<Module>> {
        self.modules
            .iter()
            .map(|rel| {
                let path = project.join(rel);
                Module::load(&path).with_context(|| format!("failed to load module {:?}", path))
            })
            .collect()
    }

    /// Cases whose normalized name is in `names`.
    pub fn selected<'a>(&'a self, names: &'a BTreeSet<String>) -> impl Iterator<Item = &'a TestCase> + 'a {
        self.tests
            .iter()
            .filter(move |case| names.contains(normalize_test_name(&case.name)))
    }
}

fn matches(expect: &Expect, output: &Output) -> bool {
    let values = |cs: &[ConstValue]| cs.iter().map(Value::from).collect::<Vec<_>>();
    match (expect, output) {
        (Expect::Void, Output::Void) => true,
        (Expect::Value(c), Output::Value(v)) => Value::from(c) == *v,
        (Expect::Array(cs), Output::Array(vs)) => values(cs) == *vs,
        (Expect::List(cs), Output::List(vs)) => values(cs) == *vs,
        _ => false,
    }
}

/// Run one case; coverage goes to `registry` when one is given.
pub fn run_case(
    modules: &[Module],
    case: &TestCase,
    registry: Option<&CoverageRegistry>,
    step_limit: u64,
) -> TestOutcome {
    let Some(module) = modules.iter().find(|m| m.method_by_name(&case.member).is_some()) else {
        debug!(test = %case.name, member = %case.member, "no module defines the member");
        return TestOutcome::Failed;
    };

    let name = normalize_test_name(&case.name);
    if let Some(r) = registry {
        r.begin_test(name);
    }

    let mut evaluator = Evaluator::new(module).with_step_limit(step_limit);
    let args = case.args.iter().map(Value::from).collect();
    let result = evaluator.call(&case.member, args);

    if let Some(r) = registry {
        for entity in evaluator.touched() {
            r.record_hit(&module.name, entity);
        }
        r.end_test();
    }

    match result {
        Ok(output) if matches(&case.expect, &output) => TestOutcome::Passed,
        Ok(output) => {
            debug!(test = %case.name, ?output, expected = ?case.expect, "assertion failed");
            TestOutcome::Failed
        }
        Err(ModelError::StepLimit(limit)) => {
            debug!(test = %case.name, limit, "step limit reached");
            TestOutcome::TimedOut
        }
        Err(e) => {
            debug!(test = %case.name, error = %e, "test faulted");
            TestOutcome::Failed
        }
    }
}

/// Run every case of `suite` with coverage recording.
///
/// Fails when any case does not pass.
fn coverage_pass(suite: &Suite, modules: &[Module], registry: &CoverageRegistry, step_limit: u64) -> Result<TestResults, String> {
    let mut results = TestResults::default();
    let mut failed = Vec::new();
    for case in &suite.tests {
        let outcome = run_case(modules, case, Some(registry), step_limit);
        if outcome != TestOutcome::Passed {
            failed.push(format!("{} ({outcome:?})", case.name));
        }
        results.push(case.name.clone(), outcome);
    }
    if failed.is_empty() {
        Ok(results)
    } else {
        Err(format!("tests did not pass before mutation: {}", failed.join(", ")))
    }
}

/// Run the selected cases until `deadline`; later cases get no result.
fn test_pass(
    suite: &Suite,
    modules: &[Module],
    tests: &BTreeSet<String>,
    deadline: Duration,
    step_limit: u64,
) -> TestResults {
    let start = Instant::now();
    let mut results = TestResults::default();
    for case in suite.selected(tests) {
        if start.elapsed() >= deadline {
            break;
        }
        results.push(case.name.clone(), run_case(modules, case, None, step_limit));
    }
    let known: BTreeSet<&str> = suite.tests.iter().map(|c| normalize_test_name(&c.name)).collect();
    for name in tests.iter().filter(|t| !known.contains(t.as_str())) {
        results.push(name.clone(), TestOutcome::Skipped);
    }
    results
}

/// A [`TestHost`] that evaluates a suite file inside this process.
#[derive(Debug, Clone)]
pub struct SuiteHost {
    /// Suite file, relative to the project root.
    pub suite: PathBuf,
    pub step_limit: u64,
}

impl SuiteHost {
    pub fn new(suite: impl Into<PathBuf>) -> Self {
        Self {
            suite: suite.into(),
            step_limit: DEFAULT_STEP_LIMIT,
        }
    }

    fn load(&self, project: &Path) -> Result<(Suite, Vec<Module>), HostError> {
        let load = || -> Result<(Suite, Vec<Module>)> {
            let suite = Suite::load(&project.join(&self.suite))?;
            let modules = suite.load_modules(project)?;
            Ok((suite, modules))
        };
        load().map_err(|e| HostError::MissingArtifact {
            path: project.join(&self.suite),
            reason: format!("{e:#}"),
        })
    }
}

impl TestHost for SuiteHost {
    fn run_coverage(&self, project: &Path) -> Result<MutationCoverage, HostError> {
        let (suite, modules) = self.load(project)?;
        let registry = CoverageRegistry::new(None);
        coverage_pass(&suite, &modules, &registry, self.step_limit)
            .map_err(|stderr| HostError::CoverageRun { code: None, stderr })?;
        Ok(registry.snapshot())
    }

    fn run_tests(
        &self,
        project: &Path,
        tests: &BTreeSet<String>,
        deadline: Duration,
    ) -> Result<HostRun, HostError> {
        let start = Instant::now();
        let (suite, modules) = self.load(project)?;
        let mut results = test_pass(&suite, &modules, tests, deadline, self.step_limit).normalized();
        let missing = results.fill_missing(tests, TestOutcome::TimedOut);
        Ok(HostRun {
            results,
            timed_out: missing > 0,
            duration: start.elapsed(),
        })
    }
}

/// Entry point of the `host` subcommand: run `suite` in the mode requested
/// through the environment, in the current directory.
pub fn run_protocol(suite_path: &Path) -> Result<()> {
    let project = std::env::current_dir().context("failed to read the current directory")?;
    let suite = Suite::load(&project.join(suite_path))?;
    let modules = suite.load_modules(&project)?;
    let results_path = std::env::var_os(ENV_RESULTS).map(PathBuf::from);
    let mode = std::env::var(ENV_MODE).unwrap_or_default();

    let results = match mode.as_str() {
        "coverage" => {
            let registry = Arc::new(CoverageRegistry::from_env()?);
            registry.install_panic_hook();
            let results = coverage_pass(&suite, &modules, &registry, DEFAULT_STEP_LIMIT);
            registry.flush()?;
            match results {
                Ok(results) => results,
                Err(message) => bail!(message),
            }
        }
        "test" => {
            let tests: BTreeSet<String> = std::env::var(ENV_TESTS)
                .unwrap_or_default()
                .lines()
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect();
            test_pass(&suite, &modules, &tests, Duration::MAX, DEFAULT_STEP_LIMIT)
        }
        other => bail!("{ENV_MODE} must be `coverage` or `test`, found {other:?}"),
    };

    info!(mode = %mode, tests = results.tests.len(), "suite finished");
    if let Some(path) = results_path {
        results
            .write(&path)
            .with_context(|| format!("failed to write results to {:?}", path))?;
    }
    Ok(())
}
