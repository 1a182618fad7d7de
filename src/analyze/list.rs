use std::collections::HashSet;

use tracing::warn;

use crate::model::stack::stack_effect;
use crate::model::{MethodBody, OpCode};
use crate::mutation::{Edit, Mutation, MutationLevel};

use super::MethodScope;

const LIST_TYPE: &str = "System.Collections.Generic.List`1";

/// Result of walking the element-adding groups after a list constructor.
#[derive(Debug, PartialEq, Eq)]
enum Walk {
    /// `dup ... call Add` groups covering `start..end`.
    Elements { start: usize, end: usize, count: usize },
    /// No collection initializer follows the constructor.
    None,
    /// A pattern the walk cannot remove safely.
    Unsupported { index: usize, reason: &'static str },
}

/// Walk collection-initializer groups that follow `newobj List<T>::.ctor` at `ctor`.
///
/// Every group starts with `dup` and ends with a call to `Add` that brings
/// the virtual stack back to the depth it had before the group. Depth is
/// tracked relative to the new list on the stack. Branches inside or into
/// a group are the known gap: conditional element expressions are reported
/// as unsupported instead of guessed at.
fn walk(body: &MethodBody, ctor: usize, targets: &HashSet<usize>) -> Walk {
    let ins = &body.instructions;
    let base: u32 = 1;
    let start = ctor + 1;
    let mut at = start;
    let mut count = 0;

    while ins.get(at).is_some_and(|i| i.op == OpCode::Dup) {
        let mut depth = base;
        let mut k = at;
        loop {
            let Some(current) = ins.get(k) else {
                return Walk::Unsupported {
                    index: k,
                    reason: "initializer runs past the end of the body",
                };
            };
            if current.op.is_branch() || matches!(current.op, OpCode::Ret | OpCode::Throw) {
                return Walk::Unsupported {
                    index: k,
                    reason: "branching element expression",
                };
            }
            if k != at && targets.contains(&k) {
                return Walk::Unsupported {
                    index: k,
                    reason: "branch into element expression",
                };
            }
            let effect = stack_effect(current, false);
            if depth < effect.pops {
                return Walk::Unsupported {
                    index: k,
                    reason: "element expression underflows the stack",
                };
            }
            depth = depth - effect.pops + effect.pushes;
            k += 1;
            if depth == base {
                break;
            }
        }

        let is_add = ins[k - 1].op.is_call() && ins[k - 1].method().is_some_and(|m| m.name == "Add");
        if !is_add {
            // The `dup` belonged to something other than the initializer.
            break;
        }
        count += 1;
        at = k;
    }

    if count == 0 {
        Walk::None
    } else {
        Walk::Elements {
            start,
            end: at,
            count,
        }
    }
}

/// Removal of all elements from `new List<T> { ... }` initializers.
pub(super) fn analyze(scope: &MethodScope<'_>, level: MutationLevel) -> Vec<Mutation> {
    if !level.allows(MutationLevel::SIMPLE) {
        return Vec::new();
    }
    let Some(body) = scope.canonical_body() else {
        return Vec::new();
    };
    let targets: HashSet<usize> = body.branch_targets().collect();

    let ctors = body.positions(|i| {
        i.op == OpCode::Newobj
            && i.method()
                .is_some_and(|m| m.declaring_type.starts_with(LIST_TYPE) && m.name == ".ctor")
    });

    let mut out = Vec::new();
    for ctor in ctors {
        match walk(&body, ctor, &targets) {
            Walk::Elements { start, end, count } => {
                let list = body.instructions[ctor]
                    .method()
                    .map(|m| m.declaring_type.clone())
                    .unwrap_or_default();
                let report = format!("Remove all {count} element(s) from a {list} initializer");
                let edit = Edit::ListInit {
                    range: start..end,
                    elements: count,
                };
                scope.push(&mut out, edit, MutationLevel::SIMPLE, report);
            }
            Walk::None => {}
            Walk::Unsupported { index, reason } => {
                warn!(
                    member = %scope.member(),
                    index,
                    reason,
                    "list initializer not mutated: unsupported pattern"
                );
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::test_support::method;
    use crate::model::eval::{Output, Value, evaluate};
    use crate::model::stack::depths;
    use crate::model::{Instruction, MethodDef, MethodRef, Module, Operand, TypeDef, TypeRef};

    fn list_ref(name: &str, params: Vec<TypeRef>, has_this: bool) -> Operand {
        Operand::Method(MethodRef {
            declaring_type: "System.Collections.Generic.List`1<int>".into(),
            name: name.into(),
            params,
            return_type: TypeRef::Void,
            generic_args: vec![],
            has_this,
        })
    }

    fn add() -> Instruction {
        Instruction::with(OpCode::Callvirt, list_ref("Add", vec![TypeRef::Named("T".into())], true))
    }

    /// `return new List<int> { 1, x + 2 };`
    fn list_method() -> MethodDef {
        method(
            vec![TypeRef::I32],
            TypeRef::Named("System.Collections.Generic.List`1<int>".into()),
            vec![],
            vec![
                Instruction::with(OpCode::Newobj, list_ref(".ctor", vec![], true)),
                Instruction::new(OpCode::Dup),
                Instruction::new(OpCode::Ldc_I4_1),
                add(),
                Instruction::new(OpCode::Dup),
                Instruction::new(OpCode::Ldarg_0),
                Instruction::new(OpCode::Ldc_I4_2),
                Instruction::new(OpCode::Add),
                add(),
                Instruction::new(OpCode::Ret),
            ],
        )
    }

    fn scope_of(method: &MethodDef) -> MethodScope<'_> {
        MethodScope {
            assembly: "Lists",
            type_name: "Lists.Make",
            method,
        }
    }

    #[test]
    fn walk_covers_every_add_group() {
        let m = list_method();
        let mut body = m.body.clone().unwrap();
        body.simplify_macros();
        assert_eq!(
            walk(&body, 0, &HashSet::new()),
            Walk::Elements {
                start: 1,
                end: 9,
                count: 2
            }
        );
    }

    #[test]
    fn removal_yields_empty_list_and_keeps_stack_balance() {
        let m = list_method();
        let mutations = analyze(&scope_of(&m), MutationLevel::SIMPLE);
        assert_eq!(mutations.len(), 1);

        let before = depths(m.body.as_ref().unwrap(), true).unwrap();
        let mut module = Module {
            name: "Lists".into(),
            types: vec![TypeDef {
                name: "Lists.Make".into(),
                methods: vec![m],
                fields: vec![],
            }],
        };
        let out = evaluate(&module, "Lists.Make::M", vec![Value::I32(4)]).unwrap();
        assert_eq!(out, Output::List(vec![Value::I32(1), Value::I32(6)]));

        let mut mutation = mutations[0].clone();
        mutation.apply(&mut module).unwrap();
        let body = module.types[0].methods[0].body.as_ref().unwrap();
        let after = depths(body, true).unwrap();
        assert_eq!(after.last(), before.last());
        let out = evaluate(&module, "Lists.Make::M", vec![Value::I32(4)]).unwrap();
        assert_eq!(out, Output::List(vec![]));
    }

    #[test]
    fn conditional_element_is_flagged_not_removed() {
        // new List<int> { flag ? 1 : 2 }
        let m = method(
            vec![TypeRef::Bool],
            TypeRef::Named("System.Collections.Generic.List`1<int>".into()),
            vec![],
            vec![
                Instruction::with(OpCode::Newobj, list_ref(".ctor", vec![], true)),
                Instruction::new(OpCode::Dup),
                Instruction::new(OpCode::Ldarg_0),
                Instruction::with(OpCode::Brtrue_S, Operand::Branch(6)),
                Instruction::new(OpCode::Ldc_I4_2),
                Instruction::with(OpCode::Br_S, Operand::Branch(7)),
                Instruction::new(OpCode::Ldc_I4_1),
                add(),
                Instruction::new(OpCode::Ret),
            ],
        );
        let mut body = m.body.clone().unwrap();
        body.simplify_macros();
        let targets = body.branch_targets().collect();
        assert!(matches!(walk(&body, 0, &targets), Walk::Unsupported { index: 3, .. }));
        assert!(analyze(&scope_of(&m), MutationLevel::DETAILED).is_empty());
    }

    #[test]
    fn constructor_without_initializer_is_ignored() {
        let m = method(
            vec![],
            TypeRef::Named("System.Collections.Generic.List`1<int>".into()),
            vec![],
            vec![
                Instruction::with(OpCode::Newobj, list_ref(".ctor", vec![], true)),
                Instruction::new(OpCode::Ret),
            ],
        );
        assert!(analyze(&scope_of(&m), MutationLevel::DETAILED).is_empty());
    }
}
