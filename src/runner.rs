//! One mutation test run: apply a batch to a project copy, run its tests,
//! revert.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::coverage::mapper::MutationVariantId;
use crate::discover::DiscoveredMutation;
use crate::duplicate::ProjectCopy;
use crate::error::{ModelError, RunError};
use crate::host::TestHost;
use crate::model::{Module, stack};
use crate::mutation::Mutation;
use crate::results::TestResults;
use crate::scheduler::Batch;

/// Assembly name to project-relative module image path.
pub type ModuleIndex = BTreeMap<String, PathBuf>;

/// Outcome of one run.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// Mutations that were active while the tests ran.
    pub executed: Vec<MutationVariantId>,
    /// Mutations taken out of the batch before the tests ran, with the reason.
    pub dropped: Vec<(MutationVariantId, String)>,
    pub tests: BTreeSet<String>,
    pub results: TestResults,
    pub timed_out: bool,
    pub duration: Duration,
}

/// Restores the original module images of a copy when dropped.
///
/// Covers every exit path of a run, unwinding included.
struct ImageRestore {
    files: Vec<(PathBuf, Vec<u8>)>,
}

impl Drop for ImageRestore {
    fn drop(&mut self) {
        for (path, bytes) in &self.files {
            if let Err(e) = fs::write(path, bytes) {
                warn!(path = ?path, error = %e, "failed to restore module image");
            }
        }
    }
}

/// A batch bound to one isolated project copy.
pub struct MutationTestRun<'a> {
    copy: &'a ProjectCopy,
    modules: &'a ModuleIndex,
    entries: Vec<(MutationVariantId, Mutation)>,
}

impl<'a> MutationTestRun<'a> {
    /// Bind `batch` to `copy`, leaving out the `excluded` mutation ids.
    pub fn initialize(
        batch: &Batch,
        discovered: &HashMap<u64, &DiscoveredMutation>,
        copy: &'a ProjectCopy,
        modules: &'a ModuleIndex,
        excluded: &HashSet<u64>,
    ) -> Self {
        let entries = batch
            .mutations
            .iter()
            .filter(|v| !excluded.contains(&v.id))
            .filter_map(|v| {
                let d = discovered.get(&v.id)?;
                Some((v.clone(), d.mutation.clone()))
            })
            .collect();
        Self {
            copy,
            modules,
            entries,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn load_images(&self) -> Result<(BTreeMap<String, (PathBuf, Module)>, ImageRestore), RunError> {
        let assemblies: BTreeSet<&str> = self.entries.iter().map(|(v, _)| v.assembly.as_str()).collect();
        let mut images = BTreeMap::new();
        let mut restore = ImageRestore { files: Vec::new() };

        for assembly in assemblies {
            let rel = self
                .modules
                .get(assembly)
                .ok_or_else(|| RunError::UnknownAssembly(assembly.to_string()))?;
            let path = self.copy.path(rel);
            let bytes = fs::read(&path).map_err(|source| ModelError::Read {
                path: path.clone(),
                source,
            })?;
            images.insert(assembly.to_string(), (path.clone(), Module::from_bytes(&bytes)?));
            restore.files.push((path, bytes));
        }
        Ok((images, restore))
    }

    /// Apply, test with a `deadline`, and revert.
    ///
    /// The copy's module images are restored before this returns, on error
    /// paths too.
    pub fn run(self, deadline: Duration, host: &dyn TestHost) -> Result<RunResult, RunError> {
        let start = Instant::now();
        let (mut images, restore) = self.load_images()?;

        let mut active: Vec<(MutationVariantId, Mutation)> = Vec::new();
        let mut dropped = Vec::new();
        for (variant, mut mutation) in self.entries {
            let Some((_, module)) = images.get_mut(&variant.assembly) else {
                dropped.push((variant, "module image not loaded".to_string()));
                continue;
            };
            if let Err(e) = mutation.apply(module) {
                debug!(id = variant.id, error = %e, "mutation does not apply");
                dropped.push((variant, e.to_string()));
                continue;
            }
            if let Err(e) = verify_entity(module, &mutation) {
                debug!(id = variant.id, error = %e, "mutated body fails stack verification");
                if let Err(e) = mutation.revert(module) {
                    warn!(id = variant.id, error = %e, "revert of rejected mutation failed");
                }
                dropped.push((variant, e.to_string()));
                continue;
            }
            active.push((variant, mutation));
        }

        let tests: BTreeSet<String> = active
            .iter()
            .flat_map(|(v, _)| v.test_coverage.iter().cloned())
            .collect();

        let outcome = if active.is_empty() {
            Ok(None)
        } else {
            save_images(&images)
                .and_then(|()| host.run_tests(self.copy.root(), &tests, deadline).map_err(RunError::from))
                .map(Some)
        };

        for (variant, mutation) in &mut active {
            if let Some((_, module)) = images.get_mut(&variant.assembly) {
                if let Err(e) = mutation.revert(module) {
                    warn!(id = variant.id, error = %e, "revert failed");
                }
            }
        }
        drop(restore);

        let run = outcome?;
        let (results, timed_out) = match run {
            Some(run) => (run.results, run.timed_out),
            None => (TestResults::default(), false),
        };
        Ok(RunResult {
            executed: active.into_iter().map(|(v, _)| v).collect(),
            dropped,
            tests,
            results,
            timed_out,
            duration: start.elapsed(),
        })
    }
}

/// Stack-verify the mutated method, if the mutation edits a method.
fn verify_entity(module: &Module, mutation: &Mutation) -> Result<(), ModelError> {
    match module.method(mutation.entity) {
        Some(method) => match &method.body {
            Some(body) => stack::verify(body, method.returns_value()),
            None => Ok(()),
        },
        None => Ok(()),
    }
}

fn save_images(images: &BTreeMap<String, (PathBuf, Module)>) -> Result<(), RunError> {
    for (path, module) in images.values() {
        module.save(path)?;
    }
    Ok(())
}
