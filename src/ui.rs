use console::{Style, Term};
use std::collections::BTreeMap;
use std::{env, fmt::Display, time::Duration};

use crate::report::{MutationReport, MutationStatus, Report, format_mutation_short};

/// Plan of the execution phase, shown before the first run starts.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionPlan {
    pub mutations: usize,
    pub batches: usize,
    pub rounds: usize,
    pub best_case: Duration,
    pub expected_case: Duration,
    pub worst_case: Duration,
}

/// Progress after one finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunProgress {
    pub completed: usize,
    pub remaining: usize,
    pub failed: usize,
}

/// Statuses seen so far in per-run progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Tally {
    killed: u64,
    survived: u64,
    timeout: u64,
}

impl Tally {
    fn count(&mut self, status: MutationStatus) {
        let slot = match status {
            MutationStatus::Killed => &mut self.killed,
            MutationStatus::Survived => &mut self.survived,
            MutationStatus::Timeout => &mut self.timeout,
            MutationStatus::NoCoverage => return,
        };
        *slot = slot.saturating_add(1);
    }
}

/// Console output of a session.
///
/// Human output goes to stdout, or to stderr in `--json` mode so stdout
/// carries only the JSON document. Styling is used on a terminal unless
/// `NO_COLOR` or `CI` is set.
#[derive(Debug, Clone)]
pub struct Ui {
    out: Term,
    err: Term,
    fancy: bool,
    enabled: bool,
    verbose: bool,
    tally: Tally,
    runner_errors: u64,
}

fn secs(d: Duration) -> String {
    format!("{:.1}s", d.as_secs_f64())
}

impl Ui {
    pub fn new(json: bool) -> Self {
        let out = if json { Term::stderr() } else { Term::stdout() };
        let fancy = out.is_term() && env::var_os("NO_COLOR").is_none() && env::var_os("CI").is_none();

        Self {
            out,
            err: Term::stderr(),
            fancy,
            enabled: true,
            verbose: false,
            tally: Tally::default(),
            runner_errors: 0,
        }
    }

    /// A UI that prints nothing but still counts.
    pub fn silent() -> Self {
        Self {
            enabled: false,
            fancy: false,
            ..Self::new(false)
        }
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    fn emit(&self, term: &Term, msg: impl Display, style: Style) {
        if !self.enabled {
            return;
        }
        let text = msg.to_string();
        let _ = if self.fancy {
            term.write_line(&style.apply_to(text).to_string())
        } else {
            term.write_line(&text)
        };
    }

    pub fn line(&self, msg: impl Display) {
        self.emit(&self.out, msg, Style::new());
    }

    pub fn title(&self, msg: impl Display) {
        self.emit(&self.out, msg, Style::new().bold());
    }

    pub fn note(&self, msg: impl Display) {
        self.emit(&self.err, msg, Style::new().yellow());
    }

    pub fn error(&self, msg: impl Display) {
        self.emit(&self.err, msg, Style::new().red().bold());
    }

    pub fn discovered(&self, total: usize, per_analyzer: &BTreeMap<&'static str, usize>) {
        self.line(format!("discovered {total} mutations"));
        for (name, count) in per_analyzer {
            self.line(format!("  {name:<28} {count:>6}"));
        }
    }

    pub fn coverage_begin(&self) {
        self.line("measuring test coverage");
    }

    pub fn coverage_end(&self, duration: Duration, tests: usize) {
        self.line(format!("coverage: {tests} tests recorded in {}", secs(duration)));
    }

    pub fn session_start(&self, plan: &SessionPlan, timeout: Duration) {
        self.title(format!(
            "running {} mutations in {} batches over {} rounds (timeout {})",
            plan.mutations,
            plan.batches,
            plan.rounds,
            secs(timeout)
        ));
        self.line(format!(
            "estimated time: best {}, expected {}, worst {}",
            secs(plan.best_case),
            secs(plan.expected_case),
            secs(plan.worst_case)
        ));
    }

    /// Timed out mutations of shared runs that are run again on their own.
    pub fn retrying(&self, mutations: usize) {
        self.note(format!("re-running {mutations} timed out mutation(s) alone"));
    }

    pub fn run_progress(&mut self, progress: RunProgress, finished: &[&MutationReport]) {
        for m in finished {
            self.tally.count(m.status);
            if self.verbose {
                self.mutation_line(m);
            }
        }
        self.line(format!(
            "runs: {} done, {} remaining, {} failed",
            progress.completed, progress.remaining, progress.failed
        ));
    }

    fn mutation_line(&self, m: &MutationReport) {
        let tag = m.status.label().to_uppercase();
        let style = match m.status {
            MutationStatus::Killed => Style::new().red().bold(),
            MutationStatus::Survived => Style::new().green().bold(),
            MutationStatus::Timeout => Style::new().yellow().bold(),
            MutationStatus::NoCoverage => Style::new().dim(),
        };
        self.emit(
            &self.out,
            format!("{tag:>11} {:>6}ms  {}", m.duration_ms, format_mutation_short(m)),
            style,
        );
    }

    pub fn runner_error(&mut self, msg: impl Display) {
        self.runner_errors += 1;
        self.error(msg);
    }

    pub fn session_end(&self, report: &Report) {
        let s = &report.summary;
        let secs_total = report.duration_ms as f64 / 1000.0;
        let rate = if secs_total > 0.0 {
            s.total as f64 / secs_total
        } else {
            0.0
        };

        self.title("--- mutation session summary ---");
        self.line(format!("mutations total:       {}", s.total));
        self.line(format!("mutations killed:      {}", s.killed));
        self.line(format!("mutations survived:    {}", s.survived));
        self.line(format!("mutations timed out:   {}", s.timeout));
        self.line(format!("mutations uncovered:   {}", s.no_coverage));
        if s.dropped + s.excluded > 0 {
            self.line(format!("mutations not run:     {} dropped, {} excluded", s.dropped, s.excluded));
        }
        if s.failed_runs > 0 {
            self.line(format!("failed runs:           {}", s.failed_runs));
        }
        self.line(format!("mutation score:        {:.2}%", report.score));
        self.line(format!("duration:              {secs_total:.1}s ({rate:.2} mutations/s)"));
    }

    /// Surviving mutations, one per line.
    pub fn survivors(&self, report: &Report) {
        let survivors: Vec<_> = report.with_status(MutationStatus::Survived).collect();
        if survivors.is_empty() {
            return;
        }
        self.title(format!(
            "--- surviving mutations ({} of {}) ---",
            survivors.len(),
            report.mutations.len()
        ));
        for m in survivors {
            self.line(format_mutation_short(m));
        }
    }

    pub fn is_fancy(&self) -> bool {
        self.fancy && self.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn report(id: u64, status: MutationStatus) -> MutationReport {
        MutationReport {
            id,
            assembly: "Calculator".into(),
            member: "Calculator.Operations::Add".into(),
            analyzer: "Arithmetic Analyzer",
            analyzer_description: "",
            description: "Replace add with sub".into(),
            line: Some(3),
            original: "add".into(),
            mutated: "sub".into(),
            status,
            covering_tests: BTreeSet::new(),
            failing_tests: BTreeSet::new(),
            duration_ms: 4,
        }
    }

    #[test]
    fn silent_ui_is_never_fancy() {
        let mut ui = Ui::silent();
        assert!(!ui.is_fancy());
        ui.fancy = true;
        assert!(!ui.is_fancy());
        ui.enabled = true;
        assert!(ui.is_fancy());
    }

    #[test]
    fn runner_errors_are_counted() {
        let mut ui = Ui::silent();
        ui.runner_error("copy 0 crashed");
        ui.runner_error("copy 1 crashed");
        assert_eq!(ui.runner_errors, 2);
    }

    #[test]
    fn run_progress_tallies_statuses() {
        let mut ui = Ui::silent().with_verbose(true);
        let killed = report(1, MutationStatus::Killed);
        let survived = report(2, MutationStatus::Survived);
        let timeout = report(3, MutationStatus::Timeout);
        let uncovered = report(4, MutationStatus::NoCoverage);
        ui.run_progress(RunProgress::default(), &[&killed, &survived]);
        ui.run_progress(RunProgress::default(), &[&timeout, &killed, &uncovered]);
        assert_eq!(
            ui.tally,
            Tally {
                killed: 2,
                survived: 1,
                timeout: 1
            }
        );
    }
}
