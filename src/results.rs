use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::coverage::write_atomic;
use crate::error::CoverageError;

/// Outcome of one test within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TestOutcome {
    Passed,
    Failed,
    Skipped,
    /// No result before the deadline.
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub outcome: TestOutcome,
    pub guid: Uuid,
}

impl TestResult {
    pub fn new(name: impl Into<String>, outcome: TestOutcome) -> Self {
        Self {
            name: name.into(),
            outcome,
            guid: Uuid::new_v4(),
        }
    }
}

/// Per-run result artifact written by the test host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResults {
    pub tests: Vec<TestResult>,
}

/// Strip a parameter suffix: `Adds(1,2)` becomes `Adds`.
pub fn normalize_test_name(name: &str) -> &str {
    name.split('(').next().unwrap_or(name)
}

impl TestResults {
    pub fn push(&mut self, name: impl Into<String>, outcome: TestOutcome) {
        self.tests.push(TestResult::new(name, outcome));
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CoverageError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoverageError> {
        Ok(bincode::deserialize(bytes)?)
    }

    pub fn read(path: &Path) -> Result<Self, CoverageError> {
        let bytes = fs::read(path).map_err(|source| CoverageError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(&bytes)
    }

    pub fn write(&self, path: &Path) -> Result<(), CoverageError> {
        write_atomic(path, &self.to_bytes()?)
    }

    /// Rename every result to its normalized test name.
    pub fn normalized(mut self) -> Self {
        for t in &mut self.tests {
            let name = normalize_test_name(&t.name);
            if name.len() != t.name.len() {
                t.name = name.to_string();
            }
        }
        self
    }

    /// All results for `name`; parameterised cases share one name.
    pub fn outcomes_for<'a>(&'a self, name: &'a str) -> impl Iterator<Item = TestOutcome> + 'a {
        self.tests.iter().filter(move |t| t.name == name).map(|t| t.outcome)
    }

    /// Add `outcome` for every requested test that has no result.
    pub fn fill_missing(&mut self, requested: &BTreeSet<String>, outcome: TestOutcome) -> usize {
        let present: BTreeSet<&str> = self.tests.iter().map(|t| t.name.as_str()).collect();
        let missing: Vec<String> = requested
            .iter()
            .filter(|name| !present.contains(name.as_str()))
            .cloned()
            .collect();
        let count = missing.len();
        for name in missing {
            self.push(name, outcome);
        }
        count
    }

    /// Names of tests that ran out of time.
    pub fn timed_out(&self) -> BTreeSet<&str> {
        self.tests
            .iter()
            .filter(|t| t.outcome == TestOutcome::TimedOut)
            .map(|t| t.name.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn artifact_keeps_names_outcomes_and_guids() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("results.bin");
        let mut results = TestResults::default();
        results.push("Calc.Adds", TestOutcome::Passed);
        results.push("Calc.Divides", TestOutcome::TimedOut);

        results.write(&path).unwrap();
        assert_eq!(TestResults::read(&path).unwrap(), results);
    }

    #[test]
    fn parameterised_names_are_trimmed() {
        assert_eq!(normalize_test_name("Calc.Adds(1,2)"), "Calc.Adds");
        assert_eq!(normalize_test_name("Calc.Adds"), "Calc.Adds");

        let mut results = TestResults::default();
        results.push("Calc.Adds(1,2)", TestOutcome::Passed);
        results.push("Calc.Adds(3,4)", TestOutcome::Failed);
        let results = results.normalized();
        let outcomes: Vec<_> = results.outcomes_for("Calc.Adds").collect();
        assert_eq!(outcomes, vec![TestOutcome::Passed, TestOutcome::Failed]);
    }

    #[test]
    fn missing_requested_tests_are_filled() {
        let mut results = TestResults::default();
        results.push("T1", TestOutcome::Passed);
        let requested = BTreeSet::from(["T1".to_string(), "T2".to_string()]);

        assert_eq!(results.fill_missing(&requested, TestOutcome::TimedOut), 1);
        assert_eq!(results.timed_out(), BTreeSet::from(["T2"]));
    }
}
