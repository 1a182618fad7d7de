use crate::model::OpCode;
use crate::mutation::{Edit, Mutation, MutationLevel, opcode_label};

use super::MethodScope;

/// Per original opcode, the replacements and the level each needs.
pub(super) type OpCodeTable = &'static [(OpCode, &'static [(MutationLevel, OpCode)])];

const S: MutationLevel = MutationLevel::SIMPLE;
const M: MutationLevel = MutationLevel::MEDIUM;
const D: MutationLevel = MutationLevel::DETAILED;

pub(super) const ARITHMETIC: OpCodeTable = &[
    (OpCode::Add, &[(S, OpCode::Sub), (M, OpCode::Mul), (D, OpCode::Div)]),
    (OpCode::Sub, &[(S, OpCode::Add), (M, OpCode::Mul), (D, OpCode::Div)]),
    (OpCode::Mul, &[(S, OpCode::Div), (M, OpCode::Add), (D, OpCode::Sub)]),
    (OpCode::Div, &[(S, OpCode::Mul), (M, OpCode::Rem), (D, OpCode::Add)]),
    (OpCode::Rem, &[(S, OpCode::Div), (M, OpCode::Mul)]),
    (OpCode::Div_Un, &[(S, OpCode::Mul), (M, OpCode::Rem_Un)]),
    (OpCode::Rem_Un, &[(S, OpCode::Div_Un), (M, OpCode::Mul)]),
];

/// Comparisons and compare-and-branch opcodes; the simple replacement is the negation.
pub(super) const COMPARISON: OpCodeTable = &[
    (OpCode::Ceq, &[(S, OpCode::Cgt), (M, OpCode::Clt)]),
    (OpCode::Cgt, &[(S, OpCode::Clt), (M, OpCode::Ceq)]),
    (OpCode::Clt, &[(S, OpCode::Cgt), (M, OpCode::Ceq)]),
    (OpCode::Cgt_Un, &[(S, OpCode::Clt_Un), (M, OpCode::Ceq)]),
    (OpCode::Clt_Un, &[(S, OpCode::Cgt_Un), (M, OpCode::Ceq)]),
    (OpCode::Brtrue, &[(S, OpCode::Brfalse)]),
    (OpCode::Brfalse, &[(S, OpCode::Brtrue)]),
    (OpCode::Beq, &[(S, OpCode::Bne_Un)]),
    (OpCode::Bne_Un, &[(S, OpCode::Beq)]),
    (OpCode::Bge, &[(S, OpCode::Blt), (M, OpCode::Bgt)]),
    (OpCode::Bgt, &[(S, OpCode::Ble), (M, OpCode::Bge)]),
    (OpCode::Ble, &[(S, OpCode::Bgt), (M, OpCode::Blt)]),
    (OpCode::Blt, &[(S, OpCode::Bge), (M, OpCode::Ble)]),
    (OpCode::Bge_Un, &[(S, OpCode::Blt_Un), (M, OpCode::Bgt_Un)]),
    (OpCode::Bgt_Un, &[(S, OpCode::Ble_Un), (M, OpCode::Bge_Un)]),
    (OpCode::Ble_Un, &[(S, OpCode::Bgt_Un), (M, OpCode::Blt_Un)]),
    (OpCode::Blt_Un, &[(S, OpCode::Bge_Un), (M, OpCode::Ble_Un)]),
];

pub(super) const BITWISE: OpCodeTable = &[
    (OpCode::Or, &[(S, OpCode::And), (M, OpCode::Xor)]),
    (OpCode::And, &[(S, OpCode::Or), (M, OpCode::Xor)]),
    (OpCode::Xor, &[(S, OpCode::Or), (M, OpCode::And)]),
    (OpCode::Shl, &[(S, OpCode::Shr)]),
    (OpCode::Shr, &[(S, OpCode::Shl)]),
    (OpCode::Shr_Un, &[(S, OpCode::Shl)]),
];

fn replacements(table: OpCodeTable, op: OpCode) -> &'static [(MutationLevel, OpCode)] {
    table
        .iter()
        .find(|(from, _)| *from == op)
        .map(|(_, to)| *to)
        .unwrap_or(&[])
}

/// Opcode substitution: every table hit yields one mutation per allowed replacement.
pub(super) fn analyze(table: OpCodeTable, scope: &MethodScope<'_>, level: MutationLevel) -> Vec<Mutation> {
    let Some(body) = scope.canonical_body() else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for (index, ins) in body.instructions.iter().enumerate() {
        for &(required, to) in replacements(table, ins.op) {
            if !level.allows(required) {
                continue;
            }
            let report = format!("Replace {} with {}", opcode_label(ins.op), opcode_label(to));
            let edit = Edit::OpCode {
                index,
                from: ins.op,
                to,
            };
            scope.push(&mut out, edit, required, report);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::test_support::method;
    use crate::model::eval::{Output, Value, evaluate};
    use crate::model::{Instruction, Module, Operand, TypeDef, TypeRef};

    fn scope_of(method: &crate::model::MethodDef) -> MethodScope<'_> {
        MethodScope {
            assembly: "Logic",
            type_name: "Logic.Gate",
            method,
        }
    }

    fn both() -> crate::model::MethodDef {
        // return a & b;
        method(
            vec![TypeRef::Bool, TypeRef::Bool],
            TypeRef::Bool,
            vec![],
            vec![
                Instruction::new(OpCode::Ldarg_0),
                Instruction::new(OpCode::Ldarg_1),
                Instruction::new(OpCode::And),
                Instruction::new(OpCode::Ret),
            ],
        )
    }

    #[test]
    fn bitwise_and_becomes_or_at_simple_level() {
        let m = both();
        let mutations = analyze(BITWISE, &scope_of(&m), MutationLevel::SIMPLE);
        assert_eq!(mutations.len(), 1);
        assert_eq!(mutations[0].report, "Replace and (&) with or (|)");

        let mut module = Module {
            name: "Logic".into(),
            types: vec![TypeDef {
                name: "Logic.Gate".into(),
                methods: vec![m],
                fields: vec![],
            }],
        };
        let args = || vec![Value::bool(true), Value::bool(false)];
        assert_eq!(
            evaluate(&module, "Logic.Gate::M", args()).unwrap(),
            Output::Value(Value::bool(false))
        );

        let mut mutation = mutations[0].clone();
        mutation.apply(&mut module).unwrap();
        assert_eq!(
            evaluate(&module, "Logic.Gate::M", args()).unwrap(),
            Output::Value(Value::bool(true))
        );
    }

    #[test]
    fn medium_level_adds_xor() {
        let m = both();
        let mutations = analyze(BITWISE, &scope_of(&m), MutationLevel::MEDIUM);
        let targets: Vec<_> = mutations
            .iter()
            .map(|m| match &m.edit {
                Edit::OpCode { to, .. } => *to,
                other => panic!("unexpected edit {other:?}"),
            })
            .collect();
        assert_eq!(targets, vec![OpCode::Or, OpCode::Xor]);
        assert!(mutations.iter().all(|m| MutationLevel::MEDIUM.allows(m.required)));
    }

    #[test]
    fn short_branches_are_matched_through_their_canonical_form() {
        let m = method(
            vec![TypeRef::I32, TypeRef::I32],
            TypeRef::I32,
            vec![],
            vec![
                Instruction::new(OpCode::Ldarg_0),
                Instruction::new(OpCode::Ldarg_1),
                Instruction::with(OpCode::Blt_S, Operand::Branch(5)),
                Instruction::new(OpCode::Ldc_I4_1),
                Instruction::new(OpCode::Ret),
                Instruction::new(OpCode::Ldc_I4_0),
                Instruction::new(OpCode::Ret),
            ],
        );
        let mutations = analyze(COMPARISON, &scope_of(&m), MutationLevel::SIMPLE);
        assert_eq!(mutations.len(), 1);
        assert_eq!(mutations[0].report, "Replace blt (<) with bge (>=)");
    }

    #[test]
    fn every_table_replacement_keeps_stack_shape() {
        use crate::model::stack::stack_effect;
        for table in [ARITHMETIC, COMPARISON, BITWISE] {
            for (from, tos) in table {
                for (_, to) in *tos {
                    let a = stack_effect(&Instruction::new(*from), false);
                    let b = stack_effect(&Instruction::new(*to), false);
                    assert_eq!(a, b, "{from} -> {to}");
                }
            }
        }
    }
}
