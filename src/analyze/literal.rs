use std::collections::HashSet;

use crate::model::{ConstValue, OpCode, TypeRef};
use crate::mutation::{Edit, Mutation, MutationLevel};

use super::MethodScope;
use super::values::ValueGenerator;

/// Literal loads that are immediately stored into a boolean or numeric local.
///
/// Boolean flips are simple; numeric replacements need `MEDIUM`.
pub(super) fn analyze(
    scope: &MethodScope<'_>,
    level: MutationLevel,
    values: &mut ValueGenerator,
) -> Vec<Mutation> {
    let Some(body) = scope.canonical_body() else {
        return Vec::new();
    };
    // A store that is also a branch target may receive its value from elsewhere.
    let targets: HashSet<usize> = body.branch_targets().collect();

    let mut out = Vec::new();
    for store in body.positions(|i| i.op == OpCode::Stloc).filter(|&i| i > 0) {
        if targets.contains(&store) {
            continue;
        }
        let load = &body.instructions[store - 1];
        if !load.op.is_ldc() {
            continue;
        }
        let Some(local) = body.instructions[store].local() else {
            continue;
        };
        let Some(ty) = body.locals.get(local as usize) else {
            continue;
        };
        if !(matches!(ty, TypeRef::Bool) || ty.is_numeric()) {
            continue;
        }
        let Some(from) = ConstValue::from_operand(ty, &load.operand) else {
            continue;
        };

        let required = if *ty == TypeRef::Bool {
            MutationLevel::SIMPLE
        } else {
            MutationLevel::MEDIUM
        };
        if !level.allows(required) {
            continue;
        }

        let to = values.different(&from);
        let report = format!("Change the value assigned to local V_{local} ({ty}) from {from} to {to}");
        let edit = Edit::Literal {
            index: store - 1,
            local,
            from,
            to,
        };
        scope.push(&mut out, edit, required, report);
    }
    out
}
