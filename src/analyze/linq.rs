use crate::model::{MethodRef, OpCode, TypeRef};
use crate::mutation::{Edit, Mutation, MutationLevel};

use super::MethodScope;

const ENUMERABLE: &str = "System.Linq.Enumerable";

const SOURCE: &str = "System.Collections.Generic.IEnumerable`1<TSource>";
const ORDERED: &str = "System.Linq.IOrderedEnumerable`1<TSource>";
const PREDICATE: &str = "System.Func`2<TSource,bool>";
const INT_SELECTOR: &str = "System.Func`2<TSource,int>";
const KEY_SELECTOR: &str = "System.Func`2<TSource,TKey>";

/// Which method each query operator is swapped for.
const PAIRS: &[(&str, &str)] = &[
    ("SingleOrDefault", "Single"),
    ("Single", "SingleOrDefault"),
    ("FirstOrDefault", "First"),
    ("First", "FirstOrDefault"),
    ("Last", "First"),
    ("All", "Any"),
    ("Any", "All"),
    ("Skip", "Take"),
    ("Take", "Skip"),
    ("SkipWhile", "TakeWhile"),
    ("TakeWhile", "SkipWhile"),
    ("Min", "Max"),
    ("Max", "Min"),
    ("Sum", "Max"),
    ("Count", "Sum"),
    ("Average", "Min"),
    ("OrderBy", "OrderByDescending"),
    ("OrderByDescending", "OrderBy"),
    ("ThenBy", "ThenByDescending"),
    ("ThenByDescending", "ThenBy"),
    ("Reverse", "AsEnumerable"),
    ("AsEnumerable", "Reverse"),
    ("Union", "Intersect"),
    ("Intersect", "Union"),
    ("Concat", "Except"),
    ("Except", "Concat"),
];

/// A generic method definition of `System.Linq.Enumerable`.
struct Overload {
    name: &'static str,
    arity: usize,
    params: &'static [&'static str],
    returns: &'static str,
}

const fn overload(
    name: &'static str,
    arity: usize,
    params: &'static [&'static str],
    returns: &'static str,
) -> Overload {
    Overload {
        name,
        arity,
        params,
        returns,
    }
}

/// Generic overloads of the paired operators, by parameter types as written
/// on the definition.
const OVERLOADS: &[Overload] = &[
    overload("Single", 1, &[SOURCE], "TSource"),
    overload("Single", 1, &[SOURCE, PREDICATE], "TSource"),
    overload("SingleOrDefault", 1, &[SOURCE], "TSource"),
    overload("SingleOrDefault", 1, &[SOURCE, PREDICATE], "TSource"),
    overload("First", 1, &[SOURCE], "TSource"),
    overload("First", 1, &[SOURCE, PREDICATE], "TSource"),
    overload("FirstOrDefault", 1, &[SOURCE], "TSource"),
    overload("FirstOrDefault", 1, &[SOURCE, PREDICATE], "TSource"),
    overload("Last", 1, &[SOURCE], "TSource"),
    overload("Last", 1, &[SOURCE, PREDICATE], "TSource"),
    overload("All", 1, &[SOURCE, PREDICATE], "bool"),
    overload("Any", 1, &[SOURCE], "bool"),
    overload("Any", 1, &[SOURCE, PREDICATE], "bool"),
    overload("Skip", 1, &[SOURCE, "int"], SOURCE),
    overload("Take", 1, &[SOURCE, "int"], SOURCE),
    overload("SkipWhile", 1, &[SOURCE, PREDICATE], SOURCE),
    overload("TakeWhile", 1, &[SOURCE, PREDICATE], SOURCE),
    overload("Min", 1, &[SOURCE], "TSource"),
    overload("Max", 1, &[SOURCE], "TSource"),
    overload("Min", 1, &[SOURCE, INT_SELECTOR], "int"),
    overload("Max", 1, &[SOURCE, INT_SELECTOR], "int"),
    overload("Sum", 1, &[SOURCE, INT_SELECTOR], "int"),
    overload("Average", 1, &[SOURCE, INT_SELECTOR], "double"),
    overload("Count", 1, &[SOURCE], "int"),
    overload("Count", 1, &[SOURCE, PREDICATE], "int"),
    overload("OrderBy", 2, &[SOURCE, KEY_SELECTOR], ORDERED),
    overload("OrderByDescending", 2, &[SOURCE, KEY_SELECTOR], ORDERED),
    overload("ThenBy", 2, &[ORDERED, KEY_SELECTOR], ORDERED),
    overload("ThenByDescending", 2, &[ORDERED, KEY_SELECTOR], ORDERED),
    overload("Reverse", 1, &[SOURCE], SOURCE),
    overload("AsEnumerable", 1, &[SOURCE], SOURCE),
    overload("Union", 1, &[SOURCE, SOURCE], SOURCE),
    overload("Intersect", 1, &[SOURCE, SOURCE], SOURCE),
    overload("Concat", 1, &[SOURCE, SOURCE], SOURCE),
    overload("Except", 1, &[SOURCE, SOURCE], SOURCE),
];

fn type_ref(name: &str) -> TypeRef {
    match name {
        "int" => TypeRef::I32,
        "bool" => TypeRef::Bool,
        "double" => TypeRef::F64,
        other => TypeRef::Named(other.to_string()),
    }
}

impl Overload {
    fn matches(&self, name: &str, m: &MethodRef) -> bool {
        self.name == name
            && self.arity == m.generic_args.len()
            && self.params.len() == m.params.len()
            && self.params.iter().zip(&m.params).all(|(p, t)| *p == t.name())
    }
}

/// The operator a call is swapped for, with identical parameter types and arity.
///
/// Pairs without such an overload (for example `Count(source)` to `Sum`) yield nothing.
fn replacement(original: &MethodRef) -> Option<MethodRef> {
    if !OVERLOADS.iter().any(|o| o.matches(&original.name, original)) {
        return None;
    }
    let (_, to) = PAIRS.iter().find(|(from, _)| *from == original.name)?;
    let target = OVERLOADS.iter().find(|o| o.matches(to, original))?;
    Some(MethodRef {
        declaring_type: original.declaring_type.clone(),
        name: target.name.to_string(),
        params: original.params.clone(),
        return_type: type_ref(target.returns),
        generic_args: original.generic_args.clone(),
        has_this: false,
    })
}

/// Calls to generic `System.Linq.Enumerable` operators.
pub(super) fn analyze(scope: &MethodScope<'_>, level: MutationLevel) -> Vec<Mutation> {
    if !level.allows(MutationLevel::SIMPLE) {
        return Vec::new();
    }
    let Some(body) = scope.canonical_body() else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for (index, ins) in body.instructions.iter().enumerate() {
        if ins.op != OpCode::Call {
            continue;
        }
        let Some(from) = ins.method() else {
            continue;
        };
        if from.declaring_type != ENUMERABLE || !from.is_generic_instance() {
            continue;
        }
        let Some(to) = replacement(from) else {
            continue;
        };
        let report = format!("Replace {} with {}", from.display_name(), to.display_name());
        let edit = Edit::CallTarget {
            index,
            from: from.clone(),
            to,
        };
        scope.push(&mut out, edit, MutationLevel::SIMPLE, report);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::test_support::method;
    use crate::model::stack::depths;
    use crate::model::{Instruction, MethodDef, Module, Operand, TypeDef};

    fn call(name: &str, params: &[&str], returns: &str, generic_args: Vec<TypeRef>) -> Instruction {
        Instruction::with(
            OpCode::Call,
            Operand::Method(MethodRef {
                declaring_type: ENUMERABLE.into(),
                name: name.into(),
                params: params.iter().map(|p| type_ref(p)).collect(),
                return_type: type_ref(returns),
                generic_args,
                has_this: false,
            }),
        )
    }

    fn scope_of(method: &MethodDef) -> MethodScope<'_> {
        MethodScope {
            assembly: "Query",
            type_name: "Query.Ops",
            method,
        }
    }

    fn seq() -> TypeRef {
        TypeRef::Named("System.Collections.Generic.IEnumerable`1<int>".into())
    }

    #[test]
    fn every_pair_names_a_known_operator() {
        for (from, to) in PAIRS {
            assert!(OVERLOADS.iter().any(|o| o.name == *from), "{from}");
            assert!(OVERLOADS.iter().any(|o| o.name == *to), "{to}");
        }
    }

    #[test]
    fn last_becomes_first_and_keeps_type_arguments() {
        let m = method(
            vec![seq()],
            TypeRef::I32,
            vec![],
            vec![
                Instruction::new(OpCode::Ldarg_0),
                call("Last", &[SOURCE], "TSource", vec![TypeRef::I32]),
                Instruction::new(OpCode::Ret),
            ],
        );
        let mutations = analyze(&scope_of(&m), MutationLevel::SIMPLE);
        assert_eq!(mutations.len(), 1);
        assert_eq!(
            mutations[0].report,
            "Replace System.Linq.Enumerable::Last<int> with System.Linq.Enumerable::First<int>"
        );

        let mut module = Module {
            name: "Query".into(),
            types: vec![TypeDef {
                name: "Query.Ops".into(),
                methods: vec![m],
                fields: vec![],
            }],
        };
        let mut mutation = mutations[0].clone();
        mutation.apply(&mut module).unwrap();
        let body = module.types[0].methods[0].body.as_ref().unwrap();
        let target = body.instructions[1].method().unwrap();
        assert_eq!(target.name, "First");
        assert_eq!(target.generic_args, vec![TypeRef::I32]);
        depths(body, true).unwrap();

        mutation.revert(&mut module).unwrap();
        let body = module.types[0].methods[0].body.as_ref().unwrap();
        assert_eq!(body.instructions[1].method().unwrap().name, "Last");
    }

    #[test]
    fn order_by_keeps_both_type_arguments() {
        let m = method(
            vec![seq(), TypeRef::Named("System.Func`2<int,int>".into())],
            TypeRef::Named(ORDERED.into()),
            vec![],
            vec![
                Instruction::new(OpCode::Ldarg_0),
                Instruction::new(OpCode::Ldarg_1),
                call("OrderBy", &[SOURCE, KEY_SELECTOR], ORDERED, vec![TypeRef::I32, TypeRef::I32]),
                Instruction::new(OpCode::Ret),
            ],
        );
        let mutations = analyze(&scope_of(&m), MutationLevel::SIMPLE);
        assert_eq!(mutations.len(), 1);
        match &mutations[0].edit {
            Edit::CallTarget { to, .. } => {
                assert_eq!(to.name, "OrderByDescending");
                assert_eq!(to.generic_args.len(), 2);
            }
            other => panic!("unexpected edit {other:?}"),
        }
    }

    #[test]
    fn pairs_without_matching_overload_are_skipped() {
        // Count(source) has no same-signature generic Sum.
        let m = method(
            vec![seq()],
            TypeRef::I32,
            vec![],
            vec![
                Instruction::new(OpCode::Ldarg_0),
                call("Count", &[SOURCE], "int", vec![TypeRef::I32]),
                Instruction::new(OpCode::Ret),
            ],
        );
        assert!(analyze(&scope_of(&m), MutationLevel::DETAILED).is_empty());
    }

    #[test]
    fn non_generic_and_foreign_calls_are_ignored() {
        let m = method(
            vec![seq()],
            TypeRef::I32,
            vec![],
            vec![
                Instruction::new(OpCode::Ldarg_0),
                call("Sum", &["System.Collections.Generic.IEnumerable`1<int>"], "int", vec![]),
                Instruction::new(OpCode::Ret),
            ],
        );
        assert!(analyze(&scope_of(&m), MutationLevel::DETAILED).is_empty());
    }
}
