use std::collections::BTreeMap;

use tracing::debug;

use crate::analyze::analyze_type;
use crate::analyze::values::ValueGenerator;
use crate::model::Module;
use crate::mutation::{Mutation, MutationLevel};

/// A mutation found by one analyzer, with its process-unique id.
#[derive(Debug, Clone)]
pub struct DiscoveredMutation {
    /// Monotonically increasing identifier, starting at 1.
    pub id: u64,

    pub analyzer_name: &'static str,
    pub analyzer_description: &'static str,

    pub mutation: Mutation,
}

/// Run every analyzer over every type of the given modules.
///
/// Ids follow module, type and member order, so the same images and seed
/// give the same ids.
pub fn discover_mutations(
    modules: &[Module],
    level: MutationLevel,
    values: &mut ValueGenerator,
) -> Vec<DiscoveredMutation> {
    let mut discovered = Vec::new();

    for module in modules {
        for ty in &module.types {
            for grouping in analyze_type(&module.name, ty, level, values) {
                for mutation in grouping.mutations {
                    discovered.push(DiscoveredMutation {
                        id: 0, // assigned below
                        analyzer_name: grouping.analyzer_name,
                        analyzer_description: grouping.analyzer_description,
                        mutation,
                    });
                }
            }
        }
        debug!(module = %module.name, total = discovered.len(), "analyzed module");
    }

    for (idx, d) in discovered.iter_mut().enumerate() {
        d.id = (idx as u64) + 1;
    }

    discovered
}

/// Number of discovered mutations per analyzer, by analyzer name.
pub fn count_by_analyzer(discovered: &[DiscoveredMutation]) -> BTreeMap<&'static str, usize> {
    let mut counts = BTreeMap::new();
    for d in discovered {
        *counts.entry(d.analyzer_name).or_insert(0) += 1;
    }
    counts
}
