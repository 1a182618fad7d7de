//! Coverage-disjoint batch packing.
//!
//! Mutations that share no covering test can run in the same test-host
//! invocation: a failing test then names exactly one active mutation.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashSet};

use tracing::debug;

use crate::coverage::mapper::MutationVariantId;

/// Mutations executed together in one test-host invocation.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub mutations: Vec<MutationVariantId>,
    /// Union of the mutations' covering tests.
    pub tests: BTreeSet<String>,
}

impl Batch {
    fn alone(mutation: MutationVariantId) -> Batch {
        let tests = mutation.test_coverage.clone();
        Batch {
            mutations: vec![mutation],
            tests,
        }
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.mutations.iter().map(|m| m.id)
    }
}

struct OpenBatch {
    mutations: Vec<MutationVariantId>,
    tests: HashSet<String>,
}

impl OpenBatch {
    fn accepts(&self, mutation: &MutationVariantId) -> bool {
        mutation.test_coverage.iter().all(|t| !self.tests.contains(t))
    }

    fn push(&mut self, mutation: MutationVariantId) {
        self.tests.extend(mutation.test_coverage.iter().cloned());
        self.mutations.push(mutation);
    }
}

/// Greedily pack covered mutations into coverage-disjoint batches.
///
/// Larger coverage sets are placed first; equal sizes keep input order.
/// Mutations in `timeout_prone` get a batch of their own.
pub fn schedule(mutations: Vec<MutationVariantId>, timeout_prone: &HashSet<u64>) -> Vec<Batch> {
    let (alone, mut packable): (Vec<_>, Vec<_>) = mutations
        .into_iter()
        .partition(|m| timeout_prone.contains(&m.id));
    packable.sort_by_key(|m| Reverse(m.test_coverage.len()));

    let mut open: Vec<OpenBatch> = Vec::new();
    for mutation in packable {
        match open.iter_mut().find(|b| b.accepts(&mutation)) {
            Some(batch) => batch.push(mutation),
            None => {
                let mut batch = OpenBatch {
                    mutations: Vec::new(),
                    tests: HashSet::new(),
                };
                batch.push(mutation);
                open.push(batch);
            }
        }
    }

    let mut batches: Vec<Batch> = open
        .into_iter()
        .map(|b| Batch {
            mutations: b.mutations,
            tests: b.tests.into_iter().collect(),
        })
        .collect();
    batches.extend(alone.into_iter().map(Batch::alone));

    debug!(batches = batches.len(), "scheduled mutation batches");
    batches
}

/// Split batches into rounds of at most `parallelism` concurrent runs.
pub fn rounds(batches: Vec<Batch>, parallelism: usize) -> Vec<Vec<Batch>> {
    let width = parallelism.max(1);
    let mut out = Vec::with_capacity(batches.len().div_ceil(width));
    let mut iter = batches.into_iter().peekable();
    while iter.peek().is_some() {
        out.push(iter.by_ref().take(width).collect());
    }
    out
}
