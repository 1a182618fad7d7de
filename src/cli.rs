use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use crate::discover::{DiscoveredMutation, count_by_analyzer};
use crate::host::{CommandHost, TestHost};
use crate::mutation::MutationLevel;
use crate::options::{HostConfig, Options, default_parallelism};
use crate::out::write_all;
use crate::report::Report;
use crate::session::{discover, load_modules, run_session};
use crate::suite::{SuiteHost, run_protocol};
use crate::ui::Ui;

const EXIT_OK: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_SURVIVORS: i32 = 2;

/// Top-level CLI arguments for the `il-mutant` binary.
#[derive(Debug, Parser)]
#[command(
    name = "il-mutant",
    version,
    about = "Coverage-driven mutation testing for instruction-level programs"
)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Level {
    Simple,
    Medium,
    Detailed,
}

impl From<Level> for MutationLevel {
    fn from(level: Level) -> Self {
        match level {
            Level::Simple => MutationLevel::SIMPLE,
            Level::Medium => MutationLevel::MEDIUM,
            Level::Detailed => MutationLevel::DETAILED,
        }
    }
}

/// Subcommands supported by `il-mutant`.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Discover mutations without running any tests.
    Scan {
        /// Project root directory.
        #[arg(long, default_value = ".")]
        project: PathBuf,

        /// Module image to mutate, relative to the project root (repeatable).
        #[arg(long = "module", required = true)]
        modules: Vec<PathBuf>,

        /// Mutation level.
        #[arg(long, value_enum, default_value_t = Level::Simple)]
        level: Level,

        /// Seed for generated replacement values.
        #[arg(long)]
        seed: Option<u64>,

        /// Emit the discovered mutations as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Run mutation testing.
    Run {
        /// Project root directory; it is copied once per parallel run.
        #[arg(long, default_value = ".")]
        project: PathBuf,

        /// Module image to mutate, relative to the project root (repeatable).
        #[arg(long = "module", required = true)]
        modules: Vec<PathBuf>,

        /// Mutation level.
        #[arg(long, value_enum, default_value_t = Level::Simple)]
        level: Level,

        /// Number of project copies tested in parallel [default: CPU count].
        #[arg(long, short = 'j')]
        parallelism: Option<usize>,

        /// Deadline of one test run in milliseconds [default: coverage pass duration].
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Seed for generated replacement values.
        #[arg(long)]
        seed: Option<u64>,

        /// Test host program, run inside each project copy.
        #[arg(long, conflicts_with = "suite")]
        host: Option<String>,

        /// Suite file (relative to the project) evaluated in-process instead of a host program.
        #[arg(long)]
        suite: Option<PathBuf>,

        /// Use a recorded coverage snapshot instead of running the coverage pass.
        #[arg(long)]
        coverage: Option<PathBuf>,

        /// Write report.json, per-status lists and a log file here.
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,

        /// Print every mutation outcome as runs finish.
        #[arg(long, short = 'v')]
        verbose: bool,

        /// Emit a machine-readable JSON report to stdout.
        #[arg(long)]
        json: bool,

        /// Exit with code 2 if any mutations survive (useful for CI).
        #[arg(long)]
        fail_on_survivors: bool,

        /// Arguments passed to the host program.
        #[arg(last = true)]
        host_args: Vec<String>,
    },

    /// Run a suite file as an external test host (reads IL_MUTANT_* variables).
    #[command(hide = true)]
    Host {
        /// Suite file, relative to the current directory.
        #[arg(long)]
        suite: PathBuf,
    },
}

#[derive(Debug, Serialize)]
struct ErrorReport {
    tool: &'static str,
    version: &'static str,
    error: String,
}

fn print_json_and_exit<T: Serialize>(value: &T, exit_code: i32) -> ! {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("failed to serialize report: {e}");
            std::process::exit(EXIT_ERROR);
        }
    }
    std::process::exit(exit_code);
}

fn fail_json(error: &anyhow::Error) -> ! {
    let report = ErrorReport {
        tool: "il-mutant",
        version: env!("CARGO_PKG_VERSION"),
        error: format!("{error:#}"),
    };
    print_json_and_exit(&report, EXIT_ERROR)
}

/// One discovered mutation in `scan --json` output.
#[derive(Debug, Serialize)]
struct ScanEntry<'a> {
    id: u64,
    assembly: &'a str,
    member: &'a str,
    analyzer: &'static str,
    level: &'static str,
    description: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    line: Option<u32>,
    original: &'a str,
    mutated: &'a str,
}

impl<'a> From<&'a DiscoveredMutation> for ScanEntry<'a> {
    fn from(d: &'a DiscoveredMutation) -> Self {
        let m = &d.mutation;
        Self {
            id: d.id,
            assembly: &m.assembly,
            member: &m.member,
            analyzer: d.analyzer_name,
            level: m.required.label(),
            description: &m.report,
            line: m.line,
            original: &m.original_snippet,
            mutated: &m.mutated_snippet,
        }
    }
}

fn scan(options: &Options) -> Result<()> {
    let ui = Ui::new(options.json_output);
    ui.line("il-mutant: scan");
    ui.line(format!("project: {:?}", options.project_root));

    let (modules, _) = load_modules(options)?;
    let discovered = discover(options, &modules);

    if options.json_output {
        let entries: Vec<ScanEntry<'_>> = discovered.iter().map(ScanEntry::from).collect();
        print_json_and_exit(&entries, EXIT_OK);
    }

    ui.discovered(discovered.len(), &count_by_analyzer(&discovered));
    for d in &discovered {
        let line = d.mutation.line.map(|l| format!(":{l}")).unwrap_or_default();
        ui.line(format!(
            "#{id} {member}{line} [{level}] {report}",
            id = d.id,
            member = d.mutation.member,
            level = d.mutation.required.label(),
            report = d.mutation.report,
        ));
    }
    Ok(())
}

fn make_host(config: Option<&HostConfig>) -> Result<Box<dyn TestHost>> {
    match config {
        Some(HostConfig::Command { program, args }) => Ok(Box::new(CommandHost::new(program.clone(), args.clone()))),
        Some(HostConfig::Suite(path)) => Ok(Box::new(SuiteHost::new(path.clone()))),
        None => bail!("no test host configured: pass --host <program> or --suite <file>"),
    }
}

fn run_mutations(options: &Options) -> Result<Report> {
    let mut ui = Ui::new(options.json_output).with_verbose(options.verbose);
    ui.line("il-mutant: run");
    ui.line(format!("project: {:?}", options.project_root));

    let host = make_host(options.host.as_ref())?;
    let report = run_session(options, host.as_ref(), &mut ui)?;

    if let Some(dir) = &options.output_dir {
        write_all(dir, &report)?;
        ui.line(format!("report written to {:?}", dir));
    }
    if !options.json_output {
        ui.survivors(&report);
    }
    Ok(report)
}

/// Parse CLI arguments and dispatch the selected command.
pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Scan {
            project,
            modules,
            level,
            seed,
            json,
        } => {
            let mut options = Options::new(project);
            options.modules = modules;
            options.level = level.into();
            options.seed = seed;
            options.json_output = json;

            match scan(&options) {
                Ok(()) => Ok(()),
                Err(e) if json => fail_json(&e),
                Err(e) => Err(e),
            }
        }

        Command::Run {
            project,
            modules,
            level,
            parallelism,
            timeout_ms,
            seed,
            host,
            suite,
            coverage,
            output,
            verbose,
            json,
            fail_on_survivors,
            host_args,
        } => {
            let mut options = Options::new(project);
            options.modules = modules;
            options.level = level.into();
            options.parallelism = parallelism.unwrap_or_else(default_parallelism).max(1);
            options.timeout = timeout_ms.map(Duration::from_millis);
            options.seed = seed;
            options.host = match (host, suite) {
                (Some(program), _) => Some(HostConfig::Command {
                    program,
                    args: host_args,
                }),
                (None, Some(suite)) => Some(HostConfig::Suite(suite)),
                (None, None) => None,
            };
            options.coverage = coverage;
            options.output_dir = output;
            options.json_output = json;
            options.fail_on_survivors = fail_on_survivors;
            options.verbose = verbose;

            let report = match run_mutations(&options) {
                Ok(r) => r,
                Err(e) if json => fail_json(&e),
                Err(e) => return Err(e),
            };

            // CI policy
            let wants_ci_fail = fail_on_survivors && report.has_survivors();
            let exit_code = if wants_ci_fail { EXIT_SURVIVORS } else { EXIT_OK };

            if json {
                print_json_and_exit(&report, exit_code);
            }

            if wants_ci_fail {
                eprintln!(
                    "mutation testing failed policy: {} mutation(s) survived (--fail-on-survivors)",
                    report.summary.survived
                );
                std::process::exit(EXIT_SURVIVORS);
            }

            Ok(())
        }

        Command::Host { suite } => run_protocol(&suite),
    }
}
