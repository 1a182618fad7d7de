use std::path::PathBuf;
use std::time::Duration;

use crate::mutation::MutationLevel;

/// How the tests of a project copy are run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostConfig {
    /// External program speaking the environment protocol.
    Command { program: String, args: Vec<String> },
    /// Suite file evaluated in this process.
    Suite(PathBuf),
}

/// Configuration options for il-mutant derived from the CLI
#[derive(Debug, Clone)]
pub struct Options {
    /// Project directory that is duplicated for each parallel run.
    pub project_root: PathBuf,

    /// Module images to mutate, relative to the project root.
    pub modules: Vec<PathBuf>,

    pub level: MutationLevel,

    /// Number of project copies used concurrently.
    pub parallelism: usize,

    /// Deadline of one test run; derived from the coverage pass when unset.
    pub timeout: Option<Duration>,

    /// Seed for generated replacement values.
    pub seed: Option<u64>,

    pub host: Option<HostConfig>,

    /// Pre-recorded coverage snapshot; skips the coverage pass.
    pub coverage: Option<PathBuf>,

    /// Directory for report files.
    pub output_dir: Option<PathBuf>,

    /// When true, emit JSON output instead of human-readable summary.
    pub json_output: bool,

    pub fail_on_survivors: bool,

    pub verbose: bool,
}

/// Number of available CPUs, at least one.
pub fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl Options {
    /// Construct an `Options` instance with default values.
    pub fn new(project_root: PathBuf) -> Self {
        Self {
            project_root,
            modules: Vec::new(),
            level: MutationLevel::SIMPLE,
            parallelism: default_parallelism(),
            timeout: None,
            seed: None,
            host: None,
            coverage: None,
            output_dir: None,
            json_output: false,
            fail_on_survivors: false,
            verbose: false,
        }
    }
}
