use std::collections::HashSet;

use tracing::debug;

use crate::model::{ConstValue, Instruction, MethodBody, OpCode, Operand, TypeRef};
use crate::mutation::{ArrayStrategy, Edit, Mutation, MutationLevel};

use super::MethodScope;
use super::values::ValueGenerator;

const RUNTIME_HELPERS: &str = "System.Runtime.CompilerServices.RuntimeHelpers";

/// Longest array the randomizer re-synthesizes element by element.
const MAX_RANDOMIZED_LENGTH: usize = 256;

/// A recognised `new T[] { ... }` initializer in a canonical body.
#[derive(Debug, Clone, PartialEq)]
struct ArrayInitializer {
    /// Index of the length load; the initializer spans `start..end`.
    start: usize,
    end: usize,
    elem: TypeRef,
    length: usize,
    /// Known element values, `None` where the initializer leaves the default.
    values: Vec<Option<ConstValue>>,
}

/// Store opcode for an element type with literal values.
fn stelem_for(ty: &TypeRef) -> Option<OpCode> {
    let op = match ty {
        TypeRef::Bool | TypeRef::I8 | TypeRef::U8 => OpCode::Stelem_I1,
        TypeRef::Char | TypeRef::I16 | TypeRef::U16 => OpCode::Stelem_I2,
        TypeRef::I32 | TypeRef::U32 => OpCode::Stelem_I4,
        TypeRef::I64 | TypeRef::U64 => OpCode::Stelem_I8,
        TypeRef::F32 => OpCode::Stelem_R4,
        TypeRef::F64 => OpCode::Stelem_R8,
        _ => return None,
    };
    Some(op)
}

/// Recognise an initializer starting at `start` (`ldc.i4 n; newarr T; dup; ...`).
///
/// Two encodings are understood: a block copy from an embedded data blob
/// (`dup; ldtoken; call InitializeArray`) and per-index stores
/// (`dup; ldc.i4 i; <literal>; stelem` repeated).
fn recognise(body: &MethodBody, start: usize, targets: &HashSet<usize>) -> Option<ArrayInitializer> {
    let ins = &body.instructions;
    let length = usize::try_from(ins.get(start)?.int32()?).ok()?;
    let newarr = ins.get(start + 1)?;
    if newarr.op != OpCode::Newarr {
        return None;
    }
    let elem = newarr.type_operand()?.clone();
    stelem_for(&elem)?;
    if ins.get(start + 2)?.op != OpCode::Dup {
        return None;
    }

    if let Some(init) = block_form(body, start, &elem, length) {
        return Some(init);
    }

    // Every stored element takes at least one instruction of the body.
    if length > ins.len() {
        debug!(index = start, length, "array length exceeds the method body; skipping");
        return None;
    }
    let mut values: Vec<Option<ConstValue>> = vec![None; length];
    let mut at = start + 2;
    let mut groups = 0;
    while let Some((index, value, len)) = store_group(body, at, &elem) {
        if (at..at + len).any(|i| targets.contains(&i)) {
            debug!(index = at, "branch into array initializer; skipping");
            return None;
        }
        *values.get_mut(index)? = Some(value);
        at += len;
        groups += 1;
    }
    if groups == 0 {
        return None;
    }
    // A following `dup; ldc.i4 k` that did not parse is an element with a computed value.
    let computed = ins.get(at).is_some_and(|i| i.op == OpCode::Dup)
        && ins.get(at + 1).is_some_and(|i| i.op == OpCode::Ldc_I4)
        && ins.get(at + 3).is_some_and(|i| i.op.is_stelem());
    if computed {
        debug!(index = at, "array initializer with computed elements; skipping");
        return None;
    }

    Some(ArrayInitializer {
        start,
        end: at,
        elem,
        length,
        values,
    })
}

fn block_form(body: &MethodBody, start: usize, elem: &TypeRef, length: usize) -> Option<ArrayInitializer> {
    let ins = &body.instructions;
    let Operand::Token(token) = &ins.get(start + 3)?.operand else {
        return None;
    };
    let call = ins.get(start + 4)?.method()?;
    if call.declaring_type != RUNTIME_HELPERS || call.name != "InitializeArray" {
        return None;
    }
    let size = elem.blob_size()?;
    let values = (0..length)
        .map(|i| ConstValue::from_blob(elem, token.data.get(i * size..)?).map(Some))
        .collect::<Option<Vec<_>>>()?;
    Some(ArrayInitializer {
        start,
        end: start + 5,
        elem: elem.clone(),
        length,
        values,
    })
}

/// One `dup; ldc.i4 index; <literal> [conv]; stelem` group: (index, value, instruction count).
fn store_group(body: &MethodBody, at: usize, elem: &TypeRef) -> Option<(usize, ConstValue, usize)> {
    let ins = &body.instructions;
    if ins.get(at)?.op != OpCode::Dup {
        return None;
    }
    let index = usize::try_from(ins.get(at + 1)?.int32()?).ok()?;
    let load = ins.get(at + 2)?;
    if !load.op.is_ldc() {
        return None;
    }
    let value = ConstValue::from_operand(elem, &load.operand)?;
    let mut len = 3;
    if matches!(ins.get(at + len)?.op, OpCode::Conv_I8 | OpCode::Conv_U8) {
        len += 1;
    }
    if Some(ins.get(at + len)?.op) != stelem_for(elem) {
        return None;
    }
    Some((index, value, len + 1))
}

fn empty_array(elem: &TypeRef) -> Vec<Instruction> {
    vec![
        Instruction::with(OpCode::Ldc_I4, Operand::Int32(0)),
        Instruction::with(OpCode::Newarr, Operand::Type(elem.clone())),
    ]
}

fn randomized_array(init: &ArrayInitializer, values: &mut ValueGenerator) -> Option<Vec<Instruction>> {
    let stelem = stelem_for(&init.elem)?;
    let mut out = vec![
        Instruction::with(OpCode::Ldc_I4, Operand::Int32(init.length as i32)),
        Instruction::with(OpCode::Newarr, Operand::Type(init.elem.clone())),
    ];
    for (i, original) in init.values.iter().enumerate() {
        let value = values.element(&init.elem, original.as_ref())?;
        out.push(Instruction::new(OpCode::Dup));
        out.push(Instruction::with(OpCode::Ldc_I4, Operand::Int32(i as i32)));
        out.push(value.to_instruction());
        out.push(Instruction::new(stelem));
    }
    Some(out)
}

/// Array initializers of boolean, character and numeric element types.
///
/// Each initializer yields an "empty" mutation (`SIMPLE`) and a "randomize"
/// mutation (`MEDIUM`).
pub(super) fn analyze(
    scope: &MethodScope<'_>,
    level: MutationLevel,
    values: &mut ValueGenerator,
) -> Vec<Mutation> {
    let Some(body) = scope.canonical_body() else {
        return Vec::new();
    };
    let targets: HashSet<usize> = body.branch_targets().collect();

    let mut out = Vec::new();
    let starts: Vec<usize> = body.positions(|i| i.op == OpCode::Ldc_I4).collect();
    for start in starts {
        let Some(init) = recognise(&body, start, &targets) else {
            continue;
        };
        let range = init.start..init.end;
        let elem = init.elem.name();

        if level.allows(MutationLevel::SIMPLE) {
            let edit = Edit::ArrayInit {
                strategy: ArrayStrategy::Empty,
                range: range.clone(),
                replacement: empty_array(&init.elem),
            };
            let report = format!("Replace the {elem}[{}] initializer with an empty array", init.length);
            scope.push(&mut out, edit, MutationLevel::SIMPLE, report);
        }

        if level.allows(MutationLevel::MEDIUM) && init.length <= MAX_RANDOMIZED_LENGTH {
            let Some(replacement) = randomized_array(&init, values) else {
                continue;
            };
            let edit = Edit::ArrayInit {
                strategy: ArrayStrategy::Randomize,
                range,
                replacement,
            };
            let report = format!("Randomize the {} element(s) of a {elem}[] initializer", init.length);
            scope.push(&mut out, edit, MutationLevel::MEDIUM, report);
        }
    }
    out
}
