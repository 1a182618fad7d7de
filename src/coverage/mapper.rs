use std::collections::{BTreeSet, HashMap};

use super::{MutationCoverage, RegisteredCoverage};
use crate::discover::DiscoveredMutation;
use crate::model::EntityHandle;

/// Joins one discovered mutation to the tests that reach its entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationVariantId {
    pub id: u64,
    pub assembly: String,
    pub entity: EntityHandle,
    pub member: String,
    /// Names of the tests whose coverage includes the entity.
    pub test_coverage: BTreeSet<String>,
}

impl MutationVariantId {
    pub fn has_coverage(&self) -> bool {
        !self.test_coverage.is_empty()
    }
}

/// Discovered mutations split by whether any test reaches them.
#[derive(Debug, Default)]
pub struct CoverageJoin {
    pub covered: Vec<MutationVariantId>,
    pub uncovered: Vec<MutationVariantId>,
}

/// Invert `test -> entities` into `entity -> tests`.
pub fn tests_per_entity(coverage: &MutationCoverage) -> HashMap<RegisteredCoverage, BTreeSet<String>> {
    let mut index: HashMap<RegisteredCoverage, BTreeSet<String>> = HashMap::new();
    for (test, entities) in &coverage.coverage {
        for entity in entities {
            index.entry(entity.clone()).or_default().insert(test.clone());
        }
    }
    index
}

/// Attach a `TestCoverage` set to every discovered mutation.
pub fn join(discovered: &[DiscoveredMutation], coverage: &MutationCoverage) -> CoverageJoin {
    let index = tests_per_entity(coverage);
    let mut out = CoverageJoin::default();

    for d in discovered {
        let m = &d.mutation;
        let key = RegisteredCoverage::new(m.assembly.clone(), m.entity);
        let variant = MutationVariantId {
            id: d.id,
            assembly: m.assembly.clone(),
            entity: m.entity,
            member: m.member.clone(),
            test_coverage: index.get(&key).cloned().unwrap_or_default(),
        };
        if variant.has_coverage() {
            out.covered.push(variant);
        } else {
            out.uncovered.push(variant);
        }
    }
    out
}
