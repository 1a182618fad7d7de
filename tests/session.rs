use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use il_mutant::coverage::MutationCoverage;
use il_mutant::error::HostError;
use il_mutant::host::{HostRun, TestHost};
use il_mutant::mutation::MutationLevel;
use il_mutant::options::Options;
use il_mutant::results::TestOutcome;
use il_mutant::report::{MutationStatus, Report};
use il_mutant::session::run_session;
use il_mutant::suite::SuiteHost;
use il_mutant::ui::Ui;

fn options(level: MutationLevel, parallelism: usize) -> Options {
    let mut options = Options::new(PathBuf::from("tests/fixtures/sample"));
    options.modules = vec![PathBuf::from("bin/Calculator.json")];
    options.level = level;
    options.parallelism = parallelism;
    options.seed = Some(11);
    options.timeout = Some(Duration::from_secs(30));
    options
}

fn run(level: MutationLevel, parallelism: usize) -> Report {
    let host = SuiteHost::new("suite.json");
    let mut ui = Ui::silent();
    run_session(&options(level, parallelism), &host, &mut ui).expect("session should finish")
}

fn member_status(report: &Report, member: &str) -> Vec<MutationStatus> {
    report
        .mutations
        .iter()
        .filter(|m| m.member == member)
        .map(|m| m.status)
        .collect()
}

#[test]
fn simple_session_reports_every_discovered_mutation() {
    let report = run(MutationLevel::SIMPLE, 2);
    let s = &report.summary;

    assert_eq!(report.discovered, 9);
    assert_eq!(s.total, report.mutations.len());
    assert_eq!(s.killed, 6);
    assert_eq!(s.survived, 1);
    assert_eq!(s.no_coverage, 2);
    assert_eq!(s.timeout, 0);
    assert_eq!((s.dropped, s.excluded, s.failed_runs), (0, 0, 0));

    let ids: BTreeSet<u64> = report.mutations.iter().map(|m| m.id).collect();
    assert_eq!(ids.len(), report.mutations.len(), "one entry per mutation");
    assert!((report.score - 600.0 / 9.0).abs() < 1e-9);
}

#[test]
fn weak_assertions_let_mutations_survive() {
    let report = run(MutationLevel::SIMPLE, 1);
    assert_eq!(
        member_status(&report, "Calculator.Operations::BothSet"),
        vec![MutationStatus::Survived]
    );
    let survivor = report.with_status(MutationStatus::Survived).next().unwrap();
    assert_eq!(survivor.covering_tests, BTreeSet::from(["CalculatorTests.BothSet".to_string()]));
    assert!(survivor.failing_tests.is_empty());
    assert!(report.has_survivors());
}

#[test]
fn uncovered_members_are_never_run() {
    let report = run(MutationLevel::SIMPLE, 1);
    for member in ["Calculator.Operations::Multiply", "Calculator.Operations::Smallest"] {
        let statuses = member_status(&report, member);
        assert!(!statuses.is_empty(), "{member} should have mutations");
        assert!(statuses.iter().all(|s| *s == MutationStatus::NoCoverage));
    }
    for m in report.with_status(MutationStatus::NoCoverage) {
        assert!(m.covering_tests.is_empty());
        assert_eq!(m.duration_ms, 0);
    }
}

#[test]
fn killed_mutations_name_the_failing_tests() {
    let report = run(MutationLevel::DETAILED, 3);
    let killed: Vec<_> = report.with_status(MutationStatus::Killed).collect();
    assert!(!killed.is_empty());
    for m in killed {
        assert!(!m.failing_tests.is_empty(), "#{} killed without a failing test", m.id);
        assert!(m.failing_tests.is_subset(&m.covering_tests));
    }

    let adds = member_status(&report, "Calculator.Operations::Add");
    assert_eq!(adds.len(), 3);
    assert!(adds.iter().all(|s| *s == MutationStatus::Killed));
}

#[test]
fn parallelism_does_not_change_outcomes() {
    let outcomes = |report: Report| {
        report
            .mutations
            .into_iter()
            .map(|m| (m.id, m.status))
            .collect::<Vec<_>>()
    };
    assert_eq!(
        outcomes(run(MutationLevel::MEDIUM, 1)),
        outcomes(run(MutationLevel::MEDIUM, 4))
    );
}

#[test]
fn failing_baseline_aborts_the_session() {
    let dir = tempfile::TempDir::new().unwrap();
    let project = dir.path();
    std::fs::create_dir_all(project.join("bin")).unwrap();
    std::fs::copy(
        "tests/fixtures/sample/bin/Calculator.json",
        project.join("bin/Calculator.json"),
    )
    .unwrap();
    std::fs::write(
        project.join("suite.json"),
        r#"{
  "modules": ["bin/Calculator.json"],
  "tests": [
    {"name": "Broken.Adds", "member": "Calculator.Operations::Add",
     "args": [{"i32": 1}, {"i32": 1}], "expect": {"value": {"i32": 3}}}
  ]
}"#,
    )
    .unwrap();

    let mut options = options(MutationLevel::SIMPLE, 1);
    options.project_root = project.to_path_buf();
    let err = run_session(&options, &SuiteHost::new("suite.json"), &mut Ui::silent()).unwrap_err();
    assert!(format!("{err:#}").contains("Broken.Adds"), "{err:#}");
}

const ADDS: &str = "CalculatorTests.Adds";

/// How the wrapped suite handles `CalculatorTests.Adds`.
#[derive(Clone, Copy)]
enum Hang {
    /// The host finishes and reports the test as timed out.
    Reported,
    /// The host is stopped at the deadline before the test reports.
    Stopped,
}

/// The fixture suite, except that `CalculatorTests.Adds` never finishes.
struct HangingAdds {
    suite: SuiteHost,
    hang: Hang,
    calls: Mutex<Vec<BTreeSet<String>>>,
}

impl HangingAdds {
    fn new(hang: Hang) -> Self {
        Self {
            suite: SuiteHost::new("suite.json"),
            hang,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls_running_adds(&self) -> Vec<BTreeSet<String>> {
        let calls = self.calls.lock().unwrap();
        calls.iter().filter(|tests| tests.contains(ADDS)).cloned().collect()
    }
}

impl TestHost for HangingAdds {
    fn run_coverage(&self, project: &Path) -> Result<MutationCoverage, HostError> {
        self.suite.run_coverage(project)
    }

    fn run_tests(&self, project: &Path, tests: &BTreeSet<String>, deadline: Duration) -> Result<HostRun, HostError> {
        self.calls.lock().unwrap().push(tests.clone());
        let mut run = self.suite.run_tests(project, tests, deadline)?;
        if !tests.contains(ADDS) {
            return Ok(run);
        }
        match self.hang {
            Hang::Reported => {
                for t in run.results.tests.iter_mut().filter(|t| t.name == ADDS) {
                    t.outcome = TestOutcome::TimedOut;
                }
            }
            Hang::Stopped => {
                run.results.tests.retain(|t| t.name != ADDS);
                run.results.fill_missing(tests, TestOutcome::TimedOut);
                run.timed_out = true;
            }
        }
        Ok(run)
    }
}

fn run_hanging(hang: Hang) -> (Report, HangingAdds) {
    let host = HangingAdds::new(hang);
    let report =
        run_session(&options(MutationLevel::SIMPLE, 2), &host, &mut Ui::silent()).expect("session should finish");
    (report, host)
}

fn assert_add_timed_out(report: &Report) {
    let s = &report.summary;
    assert_eq!((s.killed, s.survived, s.timeout, s.no_coverage), (5, 1, 1, 2));
    assert_eq!(
        member_status(report, "Calculator.Operations::Add"),
        vec![MutationStatus::Timeout]
    );
    let timed_out = report.with_status(MutationStatus::Timeout).next().unwrap();
    assert_eq!(timed_out.covering_tests, BTreeSet::from([ADDS.to_string()]));
    assert!(timed_out.failing_tests.is_empty());
}

#[test]
fn reported_timeout_is_final_without_a_rerun() {
    let (report, host) = run_hanging(Hang::Reported);
    assert_add_timed_out(&report);
    assert_eq!(host.calls_running_adds().len(), 1);
}

#[test]
fn stopped_shared_run_reruns_its_timeout_alone_once() {
    let (report, host) = run_hanging(Hang::Stopped);
    assert_add_timed_out(&report);

    let calls = host.calls_running_adds();
    assert_eq!(calls.len(), 2);
    assert!(calls[0].len() > 1, "first run is shared: {:?}", calls[0]);
    assert_eq!(calls[1], BTreeSet::from([ADDS.to_string()]));
}

/// Runs the fixture suite but reports coverage in which no test reached anything.
struct EmptyCoverage;

impl TestHost for EmptyCoverage {
    fn run_coverage(&self, _: &Path) -> Result<MutationCoverage, HostError> {
        let mut coverage = MutationCoverage::default();
        coverage.coverage.insert(ADDS.to_string(), vec![]);
        Ok(coverage)
    }

    fn run_tests(&self, _: &Path, _: &BTreeSet<String>, _: Duration) -> Result<HostRun, HostError> {
        unreachable!("nothing is covered, so nothing runs")
    }
}

#[test]
fn coverage_without_hits_aborts_the_session() {
    let err = run_session(&options(MutationLevel::SIMPLE, 1), &EmptyCoverage, &mut Ui::silent()).unwrap_err();
    assert!(format!("{err:#}").contains("found 0 test coverage entries"), "{err:#}");
}
