use std::collections::{BTreeMap, BTreeSet};
use std::panic;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use super::{MutationCoverage, RegisteredCoverage};
use crate::error::CoverageError;
use crate::host::ENV_COVERAGE;
use crate::model::EntityHandle;

#[derive(Debug, Default)]
struct State {
    current: Option<String>,
    coverage: BTreeMap<String, BTreeSet<RegisteredCoverage>>,
}

/// Runtime coverage registry of an instrumented test process.
///
/// Instrumentation calls [`begin_test`](Self::begin_test) and
/// [`end_test`](Self::end_test) around each test and
/// [`record_hit`](Self::record_hit) on entry to every instrumented entity.
/// All calls may come from any thread. The snapshot is written to the target
/// path on [`flush`](Self::flush), on drop and, with
/// [`install_panic_hook`](Self::install_panic_hook), on an unhandled panic.
#[derive(Debug)]
pub struct CoverageRegistry {
    state: Mutex<State>,
    target: Option<PathBuf>,
}

impl CoverageRegistry {
    /// A registry writing its snapshot to `target`, or only held in memory.
    pub fn new(target: Option<PathBuf>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            target,
        }
    }

    /// A registry writing to the path in `IL_MUTANT_COVERAGE`.
    pub fn from_env() -> Result<Self, CoverageError> {
        let target = std::env::var_os(ENV_COVERAGE).ok_or(CoverageError::MissingEnv(ENV_COVERAGE))?;
        Ok(Self::new(Some(PathBuf::from(target))))
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn begin_test(&self, name: &str) {
        let mut state = self.lock();
        if let Some(previous) = state.current.replace(name.to_string()) {
            debug!(test = %previous, "test began before the previous one ended");
        }
        state.coverage.entry(name.to_string()).or_default();
    }

    pub fn end_test(&self) {
        self.lock().current = None;
    }

    /// Record that the running test reached `entity`; ignored between tests.
    pub fn record_hit(&self, assembly: &str, entity: EntityHandle) {
        let mut state = self.lock();
        let State { current, coverage } = &mut *state;
        let Some(test) = current.as_ref() else {
            return;
        };
        coverage
            .entry(test.clone())
            .or_default()
            .insert(RegisteredCoverage::new(assembly, entity));
    }

    /// Current contents; tests that reached nothing are left out.
    pub fn snapshot(&self) -> MutationCoverage {
        let state = self.lock();
        let coverage = state
            .coverage
            .iter()
            .filter(|(_, hits)| !hits.is_empty())
            .map(|(test, hits)| (test.clone(), hits.iter().cloned().collect()))
            .collect();
        MutationCoverage { coverage }
    }

    /// Write the snapshot to the target path, if there is one.
    pub fn flush(&self) -> Result<(), CoverageError> {
        let Some(target) = &self.target else {
            return Ok(());
        };
        let snapshot = self.snapshot();
        snapshot.write(target)?;
        debug!(tests = snapshot.len(), path = ?target, "wrote coverage snapshot");
        Ok(())
    }

    /// Flush best-effort when the process panics, then run the previous hook.
    pub fn install_panic_hook(self: &Arc<Self>) {
        let registry = Arc::clone(self);
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if let Err(e) = registry.flush() {
                warn!(error = %e, "failed to write coverage snapshot while panicking");
            }
            previous(info);
        }));
    }
}

impl Drop for CoverageRegistry {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(error = %e, "failed to write coverage snapshot");
        }
    }
}
