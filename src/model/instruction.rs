use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use super::opcode::{OpCode, OperandKind};
use super::types::{DataToken, FieldRef, MethodRef, TypeRef};

/// Operand of an instruction.
///
/// Branch targets are indices into the owning [`MethodBody`], never byte offsets.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    #[default]
    None,
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
    Local(u16),
    Arg(u16),
    Branch(usize),
    Switch(Vec<usize>),
    Type(TypeRef),
    Method(MethodRef),
    Field(FieldRef),
    Token(DataToken),
}

impl Operand {
    pub fn is_none(&self) -> bool {
        matches!(self, Operand::None)
    }
}

/// One operation in a method body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub op: OpCode,

    #[serde(default, skip_serializing_if = "Operand::is_none")]
    pub operand: Operand,

    /// Source line from debug metadata, when the compiler emitted one here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl Instruction {
    pub fn new(op: OpCode) -> Self {
        Self::with(op, Operand::None)
    }

    pub fn with(op: OpCode, operand: Operand) -> Self {
        Self {
            op,
            operand,
            line: None,
        }
    }

    pub fn int32(&self) -> Option<i32> {
        match self.operand {
            Operand::Int32(v) => Some(v),
            _ => None,
        }
    }

    pub fn local(&self) -> Option<u16> {
        match self.operand {
            Operand::Local(v) => Some(v),
            _ => None,
        }
    }

    pub fn method(&self) -> Option<&MethodRef> {
        match &self.operand {
            Operand::Method(m) => Some(m),
            _ => None,
        }
    }

    pub fn type_operand(&self) -> Option<&TypeRef> {
        match &self.operand {
            Operand::Type(t) => Some(t),
            _ => None,
        }
    }

    /// Encoded size in bytes, used to pick short branch forms.
    pub fn size(&self) -> u32 {
        let base = self.op.size() + self.op.operand_kind().size();
        match &self.operand {
            Operand::Switch(targets) => base + 4 * targets.len() as u32,
            _ => base,
        }
    }

    fn targets_mut(&mut self) -> &mut [usize] {
        match &mut self.operand {
            Operand::Branch(t) => std::slice::from_mut(t),
            Operand::Switch(ts) => ts.as_mut_slice(),
            _ => &mut [],
        }
    }

    fn targets(&self) -> &[usize] {
        match &self.operand {
            Operand::Branch(t) => std::slice::from_ref(t),
            Operand::Switch(ts) => ts.as_slice(),
            _ => &[],
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.op.mnemonic())?;
        match &self.operand {
            Operand::None => Ok(()),
            Operand::Int32(v) => write!(f, " {v}"),
            Operand::Int64(v) => write!(f, " {v}"),
            Operand::Float32(v) => write!(f, " {v}"),
            Operand::Float64(v) => write!(f, " {v}"),
            Operand::String(s) => write!(f, " {s:?}"),
            Operand::Local(n) => write!(f, " V_{n}"),
            Operand::Arg(n) => write!(f, " A_{n}"),
            Operand::Branch(t) => write!(f, " IL_{t:04}"),
            Operand::Switch(ts) => {
                let labels: Vec<String> = ts.iter().map(|t| format!("IL_{t:04}")).collect();
                write!(f, " ({})", labels.join(", "))
            }
            Operand::Type(t) => write!(f, " {t}"),
            Operand::Method(m) => write!(f, " {}", m.display_name()),
            Operand::Field(field) => write!(f, " {}", field.name),
            Operand::Token(tok) => write!(f, " {}", tok.field),
        }
    }
}

/// Mutable instruction arena of one method, plus its local variable types.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MethodBody {
    #[serde(default)]
    pub locals: Vec<TypeRef>,
    pub instructions: Vec<Instruction>,
}

impl MethodBody {
    pub fn new(locals: Vec<TypeRef>, instructions: Vec<Instruction>) -> Self {
        Self {
            locals,
            instructions,
        }
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Instruction> {
        self.instructions.get(index)
    }

    pub fn clear(&mut self) {
        self.instructions.clear();
    }

    pub fn push(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    /// Insert before `index`; branches to the displaced instruction keep following it.
    pub fn insert(&mut self, index: usize, instruction: Instruction) {
        self.replace_range(index..index, vec![instruction]);
    }

    pub fn remove(&mut self, index: usize) -> Instruction {
        let removed = self.instructions[index].clone();
        self.replace_range(index..index + 1, Vec::new());
        removed
    }

    /// Replace a contiguous subrange and remap every branch target.
    ///
    /// Targets inside the replaced range land on the first replacement
    /// instruction (or on whatever follows the range when it shrinks to
    /// nothing). If the replacement carries no line numbers, the first
    /// replacement inherits the line of the first replaced instruction.
    pub fn replace_range(&mut self, range: Range<usize>, mut with: Vec<Instruction>) {
        let Range { start, end } = range;
        let old_len = end - start;
        let new_len = with.len();

        if with.iter().all(|i| i.line.is_none()) {
            let line = self.instructions[start..end].iter().find_map(|i| i.line);
            if let Some(first) = with.first_mut() {
                first.line = line;
            }
        }

        self.instructions.splice(start..end, with);

        for ins in &mut self.instructions {
            for target in ins.targets_mut() {
                *target = remap(*target, start, end, old_len, new_len);
            }
        }
    }

    /// All branch targets referenced by the body.
    pub fn branch_targets(&self) -> impl Iterator<Item = usize> + '_ {
        self.instructions.iter().flat_map(|i| i.targets().iter().copied())
    }

    /// Lazily yield the indices of instructions matching `pred`.
    pub fn positions<'a, F>(&'a self, pred: F) -> impl Iterator<Item = usize> + 'a
    where
        F: Fn(&Instruction) -> bool + 'a,
    {
        self.instructions
            .iter()
            .enumerate()
            .filter(move |(_, ins)| pred(ins))
            .map(|(i, _)| i)
    }

    /// Nearest debug line at or before `index`, falling back to the next one after it.
    pub fn line_near(&self, index: usize) -> Option<u32> {
        let split = (index + 1).min(self.instructions.len());
        let (before, after) = self.instructions.split_at(split);
        before
            .iter()
            .rev()
            .find_map(|i| i.line)
            .or_else(|| after.iter().find_map(|i| i.line))
    }

    /// Rewrite every macro form into its canonical long form.
    pub fn simplify_macros(&mut self) {
        for ins in &mut self.instructions {
            let (op, implied) = ins.op.canonical();
            if let Some(v) = implied {
                ins.operand = match op {
                    OpCode::Ldc_I4 => Operand::Int32(v),
                    OpCode::Ldarg => Operand::Arg(v as u16),
                    _ => Operand::Local(v as u16),
                };
            }
            ins.op = op;
        }
    }

    /// Choose the shortest encoding for every instruction.
    ///
    /// Branches start short and are widened until every displacement fits.
    pub fn optimize_macros(&mut self) {
        for ins in &mut self.instructions {
            if let Some(op) = shortest_form(ins) {
                if op.operand_kind() == OperandKind::None {
                    ins.operand = Operand::None;
                }
                ins.op = op;
            }
            if ins.op.operand_kind() == OperandKind::Branch {
                ins.op = ins.op.short_branch();
            }
        }

        loop {
            let offsets = self.offsets();
            let mut widened = false;
            for (i, ins) in self.instructions.iter_mut().enumerate() {
                if ins.op.operand_kind() != OperandKind::ShortBranch {
                    continue;
                }
                let Operand::Branch(target) = ins.operand else {
                    continue;
                };
                let next = offsets[i] as i64 + ins.size() as i64;
                let Some(&to) = offsets.get(target) else {
                    continue;
                };
                let disp = to as i64 - next;
                if !(i8::MIN as i64..=i8::MAX as i64).contains(&disp) {
                    ins.op = ins.op.long_branch();
                    widened = true;
                }
            }
            if !widened {
                break;
            }
        }
    }

    /// Byte offset of each instruction; one extra entry holds the body length.
    pub fn offsets(&self) -> Vec<u32> {
        let mut out = Vec::with_capacity(self.instructions.len() + 1);
        let mut at = 0;
        for ins in &self.instructions {
            out.push(at);
            at += ins.size();
        }
        out.push(at);
        out
    }

    /// `IL_0000: op operand` listing, one instruction per line.
    pub fn listing(&self) -> String {
        let mut out = String::new();
        for (i, ins) in self.instructions.iter().enumerate() {
            out.push_str(&format!("IL_{i:04}: {ins}\n"));
        }
        out
    }
}

fn remap(target: usize, start: usize, end: usize, old_len: usize, new_len: usize) -> usize {
    if target < start {
        target
    } else if old_len == 0 {
        // Pure insertion: keep following the displaced instruction.
        target + new_len
    } else if target >= end {
        target + new_len - old_len
    } else {
        start
    }
}

fn shortest_form(ins: &Instruction) -> Option<OpCode> {
    use OpCode::*;
    match (ins.op, &ins.operand) {
        (Ldc_I4, Operand::Int32(v)) => Some(match *v {
            -1 => Ldc_I4_M1,
            0 => Ldc_I4_0,
            1 => Ldc_I4_1,
            2 => Ldc_I4_2,
            3 => Ldc_I4_3,
            4 => Ldc_I4_4,
            5 => Ldc_I4_5,
            6 => Ldc_I4_6,
            7 => Ldc_I4_7,
            8 => Ldc_I4_8,
            v if i8::try_from(v).is_ok() => Ldc_I4_S,
            _ => Ldc_I4,
        }),
        (Ldarg, Operand::Arg(n)) => Some(match *n {
            0 => Ldarg_0,
            1 => Ldarg_1,
            2 => Ldarg_2,
            3 => Ldarg_3,
            n if n <= u8::MAX as u16 => Ldarg_S,
            _ => Ldarg,
        }),
        (Starg, Operand::Arg(n)) if *n <= u8::MAX as u16 => Some(Starg_S),
        (Ldloc, Operand::Local(n)) => Some(match *n {
            0 => Ldloc_0,
            1 => Ldloc_1,
            2 => Ldloc_2,
            3 => Ldloc_3,
            n if n <= u8::MAX as u16 => Ldloc_S,
            _ => Ldloc,
        }),
        (Stloc, Operand::Local(n)) => Some(match *n {
            0 => Stloc_0,
            1 => Stloc_1,
            2 => Stloc_2,
            3 => Stloc_3,
            n if n <= u8::MAX as u16 => Stloc_S,
            _ => Stloc,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ins(op: OpCode, operand: Operand) -> Instruction {
        Instruction::with(op, operand)
    }

    fn sample() -> MethodBody {
        // if (arg0) return 1; return 2;
        MethodBody::new(
            vec![],
            vec![
                ins(OpCode::Ldarg_0, Operand::None),
                ins(OpCode::Brfalse_S, Operand::Branch(3)),
                ins(OpCode::Ldc_I4_1, Operand::None),
                ins(OpCode::Ldc_I4_2, Operand::None),
                ins(OpCode::Ret, Operand::None),
            ],
        )
    }

    #[test]
    fn simplify_makes_implied_operands_explicit() {
        let mut body = sample();
        body.simplify_macros();
        assert_eq!(body.instructions[0], ins(OpCode::Ldarg, Operand::Arg(0)));
        assert_eq!(body.instructions[1].op, OpCode::Brfalse);
        assert_eq!(body.instructions[2], ins(OpCode::Ldc_I4, Operand::Int32(1)));
    }

    #[test]
    fn optimize_restores_macro_forms() {
        let original = sample();
        let mut body = original.clone();
        body.simplify_macros();
        body.optimize_macros();
        assert_eq!(body, original);
    }

    #[test]
    fn optimize_widens_far_branches() {
        let mut instructions = vec![ins(OpCode::Br, Operand::Branch(201))];
        instructions.extend((0..200).map(|_| ins(OpCode::Nop, Operand::None)));
        instructions.push(ins(OpCode::Ret, Operand::None));
        let mut body = MethodBody::new(vec![], instructions);
        body.optimize_macros();
        assert_eq!(body.instructions[0].op, OpCode::Br);

        let mut near = MethodBody::new(
            vec![],
            vec![
                ins(OpCode::Br, Operand::Branch(2)),
                ins(OpCode::Nop, Operand::None),
                ins(OpCode::Ret, Operand::None),
            ],
        );
        near.optimize_macros();
        assert_eq!(near.instructions[0].op, OpCode::Br_S);
    }

    #[test]
    fn removing_a_range_remaps_branches() {
        let mut body = sample();
        body.simplify_macros();
        body.replace_range(2..3, Vec::new());
        assert_eq!(body.len(), 4);
        assert_eq!(body.instructions[1].operand, Operand::Branch(2));
        assert_eq!(body.instructions[2], ins(OpCode::Ldc_I4, Operand::Int32(2)));
    }

    #[test]
    fn inserting_before_a_target_keeps_it_reachable() {
        let mut body = sample();
        body.insert(3, ins(OpCode::Nop, Operand::None));
        assert_eq!(body.instructions[1].operand, Operand::Branch(4));
        assert_eq!(body.instructions[4].op, OpCode::Ldc_I4_2);
        let removed = body.remove(3);
        assert_eq!(removed.op, OpCode::Nop);
        assert_eq!(body.instructions[1].operand, Operand::Branch(3));
    }

    #[test]
    fn replaced_range_keeps_its_debug_line() {
        let mut body = sample();
        body.instructions[2].line = Some(12);
        body.replace_range(2..3, vec![ins(OpCode::Ldc_I4, Operand::Int32(9))]);
        assert_eq!(body.instructions[2].line, Some(12));
    }

    #[test]
    fn line_near_looks_backwards_first() {
        let mut body = sample();
        body.instructions[0].line = Some(3);
        body.instructions[4].line = Some(5);
        assert_eq!(body.line_near(2), Some(3));
        body.instructions[0].line = None;
        assert_eq!(body.line_near(2), Some(5));
        assert_eq!(MethodBody::default().line_near(0), None);
    }

    #[test]
    fn positions_are_lazy_and_restartable() {
        let body = sample();
        let consts: Vec<usize> = body.positions(|i| i.op.is_ldc()).collect();
        assert_eq!(consts, vec![2, 3]);
        assert_eq!(body.positions(|i| i.op.is_ldc()).next(), Some(2));
    }

    #[test]
    fn listing_uses_index_labels() {
        let body = sample();
        insta::assert_snapshot!(body.listing().trim_end(), @r"
        IL_0000: ldarg.0
        IL_0001: brfalse.s IL_0003
        IL_0002: ldc.i4.1
        IL_0003: ldc.i4.2
        IL_0004: ret
        ");
    }
}
