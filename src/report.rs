use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::coverage::mapper::MutationVariantId;
use crate::discover::DiscoveredMutation;
use crate::results::{TestOutcome, TestResults};

/// Final classification of one mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationStatus {
    Killed,
    Survived,
    Timeout,
    NoCoverage,
}

impl MutationStatus {
    pub const ALL: [MutationStatus; 4] = [
        MutationStatus::Killed,
        MutationStatus::Survived,
        MutationStatus::Timeout,
        MutationStatus::NoCoverage,
    ];

    pub fn label(self) -> &'static str {
        match self {
            MutationStatus::Killed => "killed",
            MutationStatus::Survived => "survived",
            MutationStatus::Timeout => "timeout",
            MutationStatus::NoCoverage => "no_coverage",
        }
    }
}

/// Status of a mutation from the results of the tests covering it.
///
/// Empty coverage is `NoCoverage`. A failing test kills the mutation.
/// Otherwise it survives only if every covering test passed; anything else
/// (a timeout, a skipped or missing result) counts as `Timeout`.
pub fn derive_status(coverage: &BTreeSet<String>, results: &TestResults) -> MutationStatus {
    if coverage.is_empty() {
        return MutationStatus::NoCoverage;
    }

    let mut all_passed = true;
    for test in coverage {
        let mut seen = false;
        for outcome in results.outcomes_for(test) {
            seen = true;
            match outcome {
                TestOutcome::Failed => return MutationStatus::Killed,
                TestOutcome::Passed => {}
                TestOutcome::Skipped | TestOutcome::TimedOut => all_passed = false,
            }
        }
        all_passed &= seen;
    }

    if all_passed {
        MutationStatus::Survived
    } else {
        MutationStatus::Timeout
    }
}

/// One line of the final report.
#[derive(Debug, Clone, Serialize)]
pub struct MutationReport {
    pub id: u64,
    pub assembly: String,
    pub member: String,
    pub analyzer: &'static str,
    pub analyzer_description: &'static str,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub original: String,
    pub mutated: String,
    pub status: MutationStatus,
    pub covering_tests: BTreeSet<String>,
    pub failing_tests: BTreeSet<String>,
    pub duration_ms: u64,
}

/// Counts per status plus run bookkeeping.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub killed: usize,
    pub survived: usize,
    pub timeout: usize,
    pub no_coverage: usize,
    /// Mutations rejected before their tests ran (apply or stack check failed).
    pub dropped: usize,
    /// Mutations whose run failed as a whole and that got no status.
    pub excluded: usize,
    /// Runs that ended in a host or image error.
    pub failed_runs: usize,
}

/// Mutation score: detected mutations over all classified mutations, in percent.
pub fn score(summary: &Summary) -> f64 {
    let detected = summary.killed + summary.timeout;
    let all = detected + summary.survived + summary.no_coverage;
    if all == 0 {
        0.0
    } else {
        detected as f64 * 100.0 / all as f64
    }
}

/// Machine-readable report of a session.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    /// Tool name, stable across versions.
    pub tool: &'static str,
    pub version: &'static str,
    pub project_root: PathBuf,
    pub level: &'static str,
    pub discovered: usize,
    pub summary: Summary,
    pub score: f64,
    pub duration_ms: u64,
    pub mutations: Vec<MutationReport>,
}

impl Report {
    pub fn with_status(&self, status: MutationStatus) -> impl Iterator<Item = &MutationReport> + '_ {
        self.mutations.iter().filter(move |m| m.status == status)
    }

    pub fn has_survivors(&self) -> bool {
        self.summary.survived > 0
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: BTreeMap<u64, MutationReport>,
    dropped: BTreeSet<u64>,
    excluded: BTreeSet<u64>,
    failed_runs: usize,
}

/// Thread-safe result aggregator.
///
/// Adding a mutation id that already has an entry is a no-op.
#[derive(Debug, Default)]
pub struct ReportBuilder {
    inner: Mutex<Inner>,
}

fn entry(d: &DiscoveredMutation, status: MutationStatus, covering: BTreeSet<String>) -> MutationReport {
    let m = &d.mutation;
    MutationReport {
        id: d.id,
        assembly: m.assembly.clone(),
        member: m.member.clone(),
        analyzer: d.analyzer_name,
        analyzer_description: d.analyzer_description,
        description: m.report.clone(),
        line: m.line,
        original: m.original_snippet.clone(),
        mutated: m.mutated_snippet.clone(),
        status,
        covering_tests: covering,
        failing_tests: BTreeSet::new(),
        duration_ms: 0,
    }
}

impl ReportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fold the outcomes of one run into the report.
    ///
    /// Returns the number of new entries.
    pub fn add_result(
        &self,
        results: &TestResults,
        batch: &[(&MutationVariantId, &DiscoveredMutation)],
        elapsed: Duration,
    ) -> usize {
        let mut inner = self.lock();
        let mut added = 0;
        for (variant, d) in batch {
            if inner.entries.contains_key(&variant.id) {
                debug!(id = variant.id, "duplicate result ignored");
                continue;
            }
            let status = derive_status(&variant.test_coverage, results);
            let mut e = entry(d, status, variant.test_coverage.clone());
            e.failing_tests = variant
                .test_coverage
                .iter()
                .filter(|t| results.outcomes_for(t).any(|o| o == TestOutcome::Failed))
                .cloned()
                .collect();
            e.duration_ms = elapsed.as_millis() as u64;
            inner.entries.insert(variant.id, e);
            added += 1;
        }
        added
    }

    /// Record a mutation whose status is known without a run.
    pub fn add_status(&self, d: &DiscoveredMutation, covering: BTreeSet<String>, status: MutationStatus) -> bool {
        let mut inner = self.lock();
        if inner.entries.contains_key(&d.id) {
            return false;
        }
        inner.entries.insert(d.id, entry(d, status, covering));
        true
    }

    pub fn add_dropped(&self, id: u64) {
        self.lock().dropped.insert(id);
    }

    pub fn add_excluded(&self, ids: impl IntoIterator<Item = u64>) {
        self.lock().excluded.extend(ids);
    }

    pub fn record_failed_run(&self) {
        self.lock().failed_runs += 1;
    }

    pub fn failed_runs(&self) -> usize {
        self.lock().failed_runs
    }

    /// Number of mutations with a final entry.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies of the entries whose id matches `keep`.
    pub fn entries_where(&self, keep: impl Fn(u64) -> bool) -> Vec<MutationReport> {
        self.lock()
            .entries
            .values()
            .filter(|e| keep(e.id))
            .cloned()
            .collect()
    }

    /// Summary of what has been recorded so far.
    pub fn summary(&self) -> Summary {
        summarize(&self.lock())
    }

    pub fn build(self, project_root: PathBuf, level: &'static str, discovered: usize, duration: Duration) -> Report {
        let inner = self.inner.into_inner().unwrap_or_else(PoisonError::into_inner);
        let summary = summarize(&inner);
        Report {
            tool: "il-mutant",
            version: env!("CARGO_PKG_VERSION"),
            project_root,
            level,
            discovered,
            score: score(&summary),
            summary,
            duration_ms: duration.as_millis() as u64,
            mutations: inner.entries.into_values().collect(),
        }
    }
}

fn summarize(inner: &Inner) -> Summary {
    let mut s = Summary {
        dropped: inner.dropped.iter().filter(|id| !inner.entries.contains_key(id)).count(),
        excluded: inner.excluded.iter().filter(|id| !inner.entries.contains_key(id)).count(),
        failed_runs: inner.failed_runs,
        ..Summary::default()
    };
    for e in inner.entries.values() {
        s.total += 1;
        match e.status {
            MutationStatus::Killed => s.killed += 1,
            MutationStatus::Survived => s.survived += 1,
            MutationStatus::Timeout => s.timeout += 1,
            MutationStatus::NoCoverage => s.no_coverage += 1,
        }
    }
    s
}

/// Format one report entry as a single, readable line.
pub fn format_mutation_short(m: &MutationReport) -> String {
    let line = m.line.map(|l| format!(":{l}")).unwrap_or_default();
    format!(
        "#{id} {assembly} {member}{line} {analyzer}: {orig:?} -> {mutated:?}",
        id = m.id,
        assembly = m.assembly,
        member = m.member,
        analyzer = m.analyzer,
        orig = m.original,
        mutated = m.mutated,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConstValue, EntityHandle};
    use crate::mutation::{Mutation, MutationLevel};

    fn tests(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn results(entries: &[(&str, TestOutcome)]) -> TestResults {
        let mut r = TestResults::default();
        for (name, outcome) in entries {
            r.push(*name, *outcome);
        }
        r
    }

    fn discovered(id: u64) -> DiscoveredMutation {
        DiscoveredMutation {
            id,
            analyzer_name: "Boolean Constant Analyzer",
            analyzer_description: "Flips boolean constants.",
            mutation: Mutation::for_constant(
                "Calculator",
                "Calculator.Operations::Enabled".into(),
                EntityHandle(0x0400_0001),
                ConstValue::Bool(true),
                ConstValue::Bool(false),
                MutationLevel::SIMPLE,
                "Replace true with false".into(),
            ),
        }
    }

    fn variant(id: u64, covering: &[&str]) -> MutationVariantId {
        MutationVariantId {
            id,
            assembly: "Calculator".into(),
            entity: EntityHandle(0x0400_0001),
            member: "Calculator.Operations::Enabled".into(),
            test_coverage: tests(covering),
        }
    }

    #[test]
    fn status_rules() {
        use MutationStatus::*;
        use TestOutcome::*;

        assert_eq!(derive_status(&tests(&[]), &results(&[("T1", Failed)])), NoCoverage);
        assert_eq!(derive_status(&tests(&["T1"]), &results(&[("T1", Passed)])), Survived);
        assert_eq!(
            derive_status(&tests(&["T1", "T2"]), &results(&[("T1", TimedOut), ("T2", Failed)])),
            Killed
        );
        assert_eq!(derive_status(&tests(&["T1"]), &results(&[("T1", TimedOut)])), Timeout);
        // A missing result never reads as a pass.
        assert_eq!(derive_status(&tests(&["T1", "T2"]), &results(&[("T1", Passed)])), Timeout);
        // Results for tests outside the coverage set do not count.
        assert_eq!(
            derive_status(&tests(&["T1"]), &results(&[("T1", Passed), ("T9", Failed)])),
            Survived
        );
    }

    #[test]
    fn status_ignores_result_order() {
        use TestOutcome::*;
        let covering = tests(&["A", "B"]);
        let forward = results(&[("A", Passed), ("B", Failed)]);
        let backward = results(&[("B", Failed), ("A", Passed)]);
        assert_eq!(derive_status(&covering, &forward), derive_status(&covering, &backward));
    }

    #[test]
    fn adding_the_same_id_twice_is_a_no_op() {
        let builder = ReportBuilder::new();
        let d = discovered(1);
        let v = variant(1, &["T1"]);
        let r = results(&[("T1", TestOutcome::Failed)]);

        assert_eq!(builder.add_result(&r, &[(&v, &d)], Duration::from_millis(5)), 1);
        assert_eq!(builder.add_result(&r, &[(&v, &d)], Duration::from_millis(5)), 0);
        assert!(!builder.add_status(&d, BTreeSet::new(), MutationStatus::NoCoverage));

        let report = builder.build(PathBuf::from("p"), "simple", 1, Duration::ZERO);
        assert_eq!(report.mutations.len(), 1);
        assert_eq!(report.mutations[0].status, MutationStatus::Killed);
        assert_eq!(report.mutations[0].failing_tests, tests(&["T1"]));
    }

    #[test]
    fn score_counts_timeouts_as_detected() {
        let summary = Summary {
            total: 4,
            killed: 1,
            survived: 1,
            timeout: 1,
            no_coverage: 1,
            ..Summary::default()
        };
        assert_eq!(score(&summary), 50.0);
        assert_eq!(score(&Summary::default()), 0.0);
    }

    #[test]
    fn dropped_and_excluded_without_entries_are_counted() {
        let builder = ReportBuilder::new();
        builder.add_dropped(7);
        builder.add_excluded([8, 9]);
        builder.record_failed_run();
        let s = builder.summary();
        assert_eq!((s.dropped, s.excluded, s.failed_runs, s.total), (1, 2, 1, 0));
    }

    #[test]
    fn format_short_is_stable() {
        let builder = ReportBuilder::new();
        builder.add_status(&discovered(7), BTreeSet::new(), MutationStatus::NoCoverage);
        let report = builder.build(PathBuf::from("p"), "simple", 1, Duration::ZERO);
        insta::assert_snapshot!(
            format_mutation_short(&report.mutations[0]),
            @r#"#7 Calculator Calculator.Operations::Enabled Boolean Constant Analyzer: "true" -> "false""#
        );
    }
}
