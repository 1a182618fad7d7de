use crate::model::ConstValue;
use crate::mutation::{Mutation, MutationLevel};

use super::FieldScope;
use super::values::ValueGenerator;

fn constant_mutation(scope: &FieldScope<'_>, from: &ConstValue, to: ConstValue) -> Mutation {
    let report = format!("Change constant {} from {from} to {to}", scope.field.name);
    Mutation::for_constant(
        scope.assembly,
        scope.member(),
        scope.field.handle,
        from.clone(),
        to,
        MutationLevel::SIMPLE,
        report,
    )
}

pub(super) fn boolean(scope: &FieldScope<'_>, level: MutationLevel) -> Vec<Mutation> {
    match &scope.field.constant {
        Some(from @ ConstValue::Bool(v)) if level.allows(MutationLevel::SIMPLE) => {
            vec![constant_mutation(scope, from, ConstValue::Bool(!v))]
        }
        _ => Vec::new(),
    }
}

pub(super) fn number(
    scope: &FieldScope<'_>,
    level: MutationLevel,
    values: &mut ValueGenerator,
) -> Vec<Mutation> {
    match &scope.field.constant {
        Some(from) if from.type_ref().is_numeric() && level.allows(MutationLevel::SIMPLE) => {
            let to = values.different(from);
            vec![constant_mutation(scope, from, to)]
        }
        _ => Vec::new(),
    }
}

pub(super) fn string(
    scope: &FieldScope<'_>,
    level: MutationLevel,
    values: &mut ValueGenerator,
) -> Vec<Mutation> {
    match &scope.field.constant {
        Some(from @ ConstValue::String(s)) if level.allows(MutationLevel::SIMPLE) => {
            let to = ConstValue::String(values.surrogate_string(s));
            vec![constant_mutation(scope, from, to)]
        }
        _ => Vec::new(),
    }
}
