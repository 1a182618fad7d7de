//! Mutation session: discovery, coverage, scheduling and parallel runs.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use crate::analyze::values::ValueGenerator;
use crate::coverage::MutationCoverage;
use crate::coverage::mapper::{MutationVariantId, join};
use crate::discover::{DiscoveredMutation, count_by_analyzer, discover_mutations};
use crate::duplicate::{ProjectCopy, duplicate_project};
use crate::error::{RunError, SessionError};
use crate::host::TestHost;
use crate::model::Module;
use crate::options::Options;
use crate::pool::Pool;
use crate::report::{MutationReport, MutationStatus, Report, ReportBuilder, derive_status};
use crate::runner::{ModuleIndex, MutationTestRun, RunResult};
use crate::scheduler::{Batch, rounds, schedule};
use crate::ui::{RunProgress, SessionPlan, Ui};

/// Lower bound of a test-run deadline.
pub const MIN_TEST_TIMEOUT: Duration = Duration::from_secs(1);

/// Deadline used when there is neither an explicit timeout nor a measured
/// coverage pass.
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Deadline of one test run.
pub fn derive_timeout(explicit: Option<Duration>, coverage_pass: Option<Duration>) -> Duration {
    explicit
        .or(coverage_pass)
        .unwrap_or(DEFAULT_TEST_TIMEOUT)
        .max(MIN_TEST_TIMEOUT)
}

/// Estimated duration of the execution phase.
pub fn plan(mutations: usize, batches: usize, rounds: usize, typical: Duration, timeout: Duration) -> SessionPlan {
    let factor = rounds as u32;
    let best_case = typical * factor;
    let worst_case = timeout * factor;
    SessionPlan {
        mutations,
        batches,
        rounds,
        best_case,
        expected_case: (best_case + worst_case) / 2,
        worst_case,
    }
}

/// Load the configured module images from the original project.
pub fn load_modules(options: &Options) -> Result<(Vec<Module>, ModuleIndex), SessionError> {
    let mut modules = Vec::with_capacity(options.modules.len());
    let mut index = ModuleIndex::new();
    for rel in &options.modules {
        let path = options.project_root.join(rel);
        let module = Module::load(&path).map_err(|source| SessionError::ModuleLoad {
            path: path.clone(),
            source,
        })?;
        index.insert(module.name.clone(), rel.clone());
        modules.push(module);
    }
    Ok((modules, index))
}

/// Discover the mutations of the configured modules.
pub fn discover(options: &Options, modules: &[Module]) -> Vec<DiscoveredMutation> {
    let mut values = ValueGenerator::new(options.seed);
    discover_mutations(modules, options.level, &mut values)
}

struct Shared<'a> {
    host: &'a dyn TestHost,
    pool: Pool<ProjectCopy>,
    by_id: HashMap<u64, &'a DiscoveredMutation>,
    modules: ModuleIndex,
    deadline: Duration,
}

fn execute(shared: &Shared<'_>, batch: &Batch) -> Result<RunResult, RunError> {
    let copy = shared.pool.acquire();
    debug!(copy = copy.index(), mutations = batch.len(), "starting run");
    let run = MutationTestRun::initialize(batch, &shared.by_id, &copy, &shared.modules, &HashSet::new());
    run.run(shared.deadline, shared.host)
}

/// What happened to the mutations of one finished run.
struct Settled {
    finished: Vec<u64>,
    retry: Vec<MutationVariantId>,
}

fn settle(shared: &Shared<'_>, builder: &ReportBuilder, result: &RunResult) -> Settled {
    let mut settled = Settled {
        finished: Vec::new(),
        retry: Vec::new(),
    };
    for (variant, reason) in &result.dropped {
        debug!(id = variant.id, reason = %reason, "mutation dropped");
        builder.add_dropped(variant.id);
    }

    // Only a host stopped at the deadline leaves other mutations' tests unrun.
    let stopped_shared_run = result.timed_out && result.executed.len() > 1;
    for variant in &result.executed {
        let status = derive_status(&variant.test_coverage, &result.results);
        if status == MutationStatus::Timeout && stopped_shared_run {
            settled.retry.push(variant.clone());
            continue;
        }
        let Some(&d) = shared.by_id.get(&variant.id) else {
            continue;
        };
        if builder.add_result(&result.results, &[(variant, d)], result.duration) > 0 {
            settled.finished.push(variant.id);
        }
    }
    settled
}

/// Run a complete mutation session and build its report.
pub fn run_session(options: &Options, host: &dyn TestHost, ui: &mut Ui) -> Result<Report> {
    let start = Instant::now();

    let (modules, index) = load_modules(options)?;
    let discovered = discover(options, &modules);
    ui.discovered(discovered.len(), &count_by_analyzer(&discovered));

    let copies = duplicate_project(&options.project_root, options.parallelism).map_err(SessionError::Duplication)?;
    info!(copies = copies.len(), "project duplicated");

    let (coverage, measured) = match &options.coverage {
        Some(path) => {
            let coverage = MutationCoverage::read(path)
                .with_context(|| format!("failed to read coverage snapshot {:?}", path))?;
            (coverage, None)
        }
        None => {
            ui.coverage_begin();
            let started = Instant::now();
            let coverage = host
                .run_coverage(copies[0].root())
                .map_err(SessionError::CoverageFailed)?;
            let took = started.elapsed();
            ui.coverage_end(took, coverage.len());
            (coverage, Some(took))
        }
    };
    if coverage.is_empty() {
        return Err(SessionError::NoCoverage.into());
    }

    let deadline = derive_timeout(options.timeout, measured);
    let joined = join(&discovered, &coverage);
    info!(
        covered = joined.covered.len(),
        uncovered = joined.uncovered.len(),
        ?deadline,
        "coverage joined"
    );

    let builder = ReportBuilder::new();
    let by_id: HashMap<u64, &DiscoveredMutation> = discovered.iter().map(|d| (d.id, d)).collect();
    for variant in &joined.uncovered {
        if let Some(d) = by_id.get(&variant.id) {
            builder.add_status(d, BTreeSet::new(), MutationStatus::NoCoverage);
        }
    }

    let shared = Shared {
        host,
        pool: Pool::new(copies),
        by_id,
        modules: index,
        deadline,
    };

    let mut pending = joined.covered;
    let mut timeout_prone: HashSet<u64> = HashSet::new();
    let mut completed = 0usize;
    let mut planned = 0usize;
    let mut first_pass = true;

    while !pending.is_empty() {
        let count = pending.len();
        let batches = schedule(std::mem::take(&mut pending), &timeout_prone);
        let batch_count = batches.len();
        let rounds = rounds(batches, shared.pool.len());
        planned += batch_count;

        if first_pass {
            let typical = measured.unwrap_or(deadline).min(deadline);
            ui.session_start(&plan(count, batch_count, rounds.len(), typical, deadline), deadline);
            first_pass = false;
        } else {
            info!(mutations = count, "re-running timed out mutations alone");
            ui.retrying(count);
        }

        for round in rounds {
            let shared_ref = &shared;
            let outcomes: Vec<(&Batch, thread::Result<Result<RunResult, RunError>>)> = thread::scope(|s| {
                let handles: Vec<_> = round
                    .iter()
                    .map(|batch| (batch, s.spawn(move || execute(shared_ref, batch))))
                    .collect();
                handles.into_iter().map(|(b, h)| (b, h.join())).collect()
            });

            for (batch, outcome) in outcomes {
                completed += 1;
                let settled = match outcome {
                    Ok(Ok(result)) => settle(&shared, &builder, &result),
                    Ok(Err(e)) => {
                        warn!(error = %e, mutations = batch.len(), "run failed");
                        builder.record_failed_run();
                        builder.add_excluded(batch.ids());
                        ui.runner_error(format!("run of {} mutation(s) failed: {e}", batch.len()));
                        continue;
                    }
                    Err(_) => {
                        error!(mutations = batch.len(), "run panicked");
                        builder.record_failed_run();
                        builder.add_excluded(batch.ids());
                        ui.runner_error(format!("run of {} mutation(s) crashed", batch.len()));
                        continue;
                    }
                };

                for variant in settled.retry {
                    timeout_prone.insert(variant.id);
                    pending.push(variant);
                }

                let ids: HashSet<u64> = settled.finished.into_iter().collect();
                let finished = builder.entries_where(|id| ids.contains(&id));
                let refs: Vec<&MutationReport> = finished.iter().collect();
                ui.run_progress(
                    RunProgress {
                        completed,
                        remaining: planned.saturating_sub(completed),
                        failed: builder.failed_runs(),
                    },
                    &refs,
                );
            }
        }
    }

    let level = options.level.label();
    let report = builder.build(options.project_root.clone(), level, discovered.len(), start.elapsed());
    ui.session_end(&report);
    Ok(report)
}
