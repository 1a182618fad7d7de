use std::ops::Range;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::MutationError;
use crate::model::{
    ConstValue, EntityHandle, Instruction, MethodBody, MethodDef, MethodRef, Module, OpCode,
    Operand,
};

bitflags! {
    /// How aggressive the analyzers may be.
    ///
    /// Each level contains the lower ones, so a caller asking for
    /// `MEDIUM` also gets every `SIMPLE` mutation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct MutationLevel: u8 {
        const SIMPLE = 0b001;
        const MEDIUM = 0b011;
        const DETAILED = 0b111;
    }
}

impl MutationLevel {
    /// True when a mutation requiring `required` may be emitted at this level.
    pub fn allows(self, required: MutationLevel) -> bool {
        self.contains(required)
    }

    pub fn label(self) -> &'static str {
        if self.contains(MutationLevel::DETAILED) {
            "detailed"
        } else if self.contains(MutationLevel::MEDIUM) {
            "medium"
        } else {
            "simple"
        }
    }
}

/// Strategy of an array initializer rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrayStrategy {
    /// Length becomes 0 and every element store is dropped.
    Empty,
    /// Length and type are kept; every element gets a fresh value.
    Randomize,
}

/// The concrete edit a mutation performs.
///
/// Indices address the canonical (macro-free) form of the method body.
#[derive(Debug, Clone, PartialEq)]
pub enum Edit {
    OpCode {
        index: usize,
        from: OpCode,
        to: OpCode,
    },
    /// Constant load feeding a local store.
    Literal {
        index: usize,
        local: u16,
        from: ConstValue,
        to: ConstValue,
    },
    /// Compile-time constant of a field.
    Constant { from: ConstValue, to: ConstValue },
    ArrayInit {
        strategy: ArrayStrategy,
        range: Range<usize>,
        replacement: Vec<Instruction>,
    },
    /// Removal of the element-adding instructions of a list initializer.
    ListInit { range: Range<usize>, elements: usize },
    CallTarget {
        index: usize,
        from: MethodRef,
        to: MethodRef,
    },
}

impl Edit {
    /// Canonical instruction range touched by the edit, and the length it has afterwards.
    fn span(&self) -> Option<(Range<usize>, usize)> {
        match self {
            Edit::OpCode { index, .. }
            | Edit::Literal { index, .. }
            | Edit::CallTarget { index, .. } => Some((*index..*index + 1, 1)),
            Edit::ArrayInit {
                range, replacement, ..
            } => Some((range.clone(), replacement.len())),
            Edit::ListInit { range, .. } => Some((range.clone(), 0)),
            Edit::Constant { .. } => None,
        }
    }

    fn index(&self) -> usize {
        self.span().map(|(r, _)| r.start).unwrap_or(0)
    }

    /// Perform the edit on a canonical body.
    fn apply_to(&self, body: &mut MethodBody, entity: EntityHandle) -> Result<(), MutationError> {
        let mismatch = |index| MutationError::InstructionMismatch { entity, index };
        match self {
            Edit::OpCode { index, from, to } => {
                let ins = body.instructions.get_mut(*index).ok_or(mismatch(*index))?;
                if ins.op != *from {
                    return Err(mismatch(*index));
                }
                ins.op = *to;
            }
            Edit::Literal {
                index, from, to, ..
            } => {
                let ins = body.instructions.get_mut(*index).ok_or(mismatch(*index))?;
                let current = ConstValue::from_operand(&from.type_ref(), &ins.operand);
                if !ins.op.is_ldc() || !current.is_some_and(|c| c.same_as(from)) {
                    return Err(mismatch(*index));
                }
                let replacement = to.to_instruction();
                ins.op = replacement.op;
                ins.operand = replacement.operand;
            }
            Edit::CallTarget { index, from, to } => {
                let ins = body.instructions.get_mut(*index).ok_or(mismatch(*index))?;
                if ins.method() != Some(from) {
                    return Err(mismatch(*index));
                }
                ins.operand = Operand::Method(to.clone());
            }
            Edit::ArrayInit {
                range, replacement, ..
            } => {
                if range.end > body.len() {
                    return Err(mismatch(range.start));
                }
                body.replace_range(range.clone(), replacement.clone());
            }
            Edit::ListInit { range, .. } => {
                if range.end > body.len() {
                    return Err(mismatch(range.start));
                }
                body.replace_range(range.clone(), Vec::new());
            }
            Edit::Constant { .. } => {
                return Err(MutationError::Unsupported {
                    entity,
                    index: 0,
                    reason: "constant edits apply to fields, not method bodies".into(),
                });
            }
        }
        Ok(())
    }
}

/// One reversible edit of one program entity.
///
/// The original state (method body or field constant) is captured when the
/// mutation is created and restored verbatim on revert. Mutations address
/// entities by handle, so the same mutation can be applied to any loaded copy
/// of the analyzed image.
#[derive(Debug, Clone)]
pub struct Mutation {
    pub entity: EntityHandle,

    /// `Type::Member` name of the mutated entity.
    pub member: String,

    /// Assembly name of the owning module.
    pub assembly: String,

    pub edit: Edit,

    /// Lowest level at which this mutation is emitted.
    pub required: MutationLevel,

    /// Human-readable description of the edit.
    pub report: String,

    /// Best-effort source line nearest the edit point.
    pub line: Option<u32>,

    pub original_snippet: String,
    pub mutated_snippet: String,

    original_body: Option<MethodBody>,
    applied: bool,
}

impl Mutation {
    /// Create a mutation of a method body.
    ///
    /// The edit is trial-applied to a canonical copy of the body to validate
    /// it and to render the before/after snippets.
    pub fn for_method(
        assembly: &str,
        member: String,
        method: &MethodDef,
        edit: Edit,
        required: MutationLevel,
        report: String,
    ) -> Result<Mutation, MutationError> {
        let original = method
            .body
            .clone()
            .ok_or(MutationError::MissingBody(method.handle))?;
        let mut canonical = original.clone();
        canonical.simplify_macros();

        let mut mutated = canonical.clone();
        edit.apply_to(&mut mutated, method.handle)?;

        let (range, new_len) = edit.span().unwrap_or((0..0, 0));
        let original_snippet = snippet(&canonical, range.clone());
        let mutated_snippet = snippet(&mutated, range.start..range.start + new_len);
        let line = canonical.line_near(range.start);

        Ok(Mutation {
            entity: method.handle,
            member,
            assembly: assembly.to_string(),
            edit,
            required,
            report,
            line,
            original_snippet,
            mutated_snippet,
            original_body: Some(original),
            applied: false,
        })
    }

    /// Create a mutation of a field constant.
    pub fn for_constant(
        assembly: &str,
        member: String,
        field: EntityHandle,
        from: ConstValue,
        to: ConstValue,
        required: MutationLevel,
        report: String,
    ) -> Mutation {
        Mutation {
            entity: field,
            member,
            assembly: assembly.to_string(),
            original_snippet: from.to_string(),
            mutated_snippet: to.to_string(),
            edit: Edit::Constant { from, to },
            required,
            report,
            line: None,
            original_body: None,
            applied: false,
        }
    }

    pub fn is_applied(&self) -> bool {
        self.applied
    }

    /// Apply the edit to `module`, which must be in the analyzed state for this entity.
    pub fn apply(&mut self, module: &mut Module) -> Result<(), MutationError> {
        if self.applied {
            return Err(MutationError::AlreadyApplied);
        }
        let entity = self.entity;

        match &self.edit {
            Edit::Constant { from, to } => {
                let field = module
                    .field_mut(entity)
                    .ok_or(MutationError::EntityNotFound(entity))?;
                match &field.constant {
                    Some(current) if current.same_as(from) => field.constant = Some(to.clone()),
                    _ => return Err(MutationError::InstructionMismatch { entity, index: 0 }),
                }
            }
            edit => {
                let method = module
                    .method_mut(entity)
                    .ok_or(MutationError::EntityNotFound(entity))?;
                let body = method
                    .body
                    .as_mut()
                    .ok_or(MutationError::MissingBody(entity))?;
                if self.original_body.as_ref() != Some(&*body) {
                    return Err(MutationError::InstructionMismatch {
                        entity,
                        index: edit.index(),
                    });
                }
                let mut canonical = body.clone();
                canonical.simplify_macros();
                edit.apply_to(&mut canonical, entity)?;
                canonical.optimize_macros();
                *body = canonical;
            }
        }

        self.applied = true;
        Ok(())
    }

    /// Restore the state captured when the mutation was created.
    pub fn revert(&mut self, module: &mut Module) -> Result<(), MutationError> {
        if !self.applied {
            return Err(MutationError::NotApplied);
        }
        let entity = self.entity;

        match (&self.edit, &self.original_body) {
            (Edit::Constant { from, .. }, _) => {
                let field = module
                    .field_mut(entity)
                    .ok_or(MutationError::EntityNotFound(entity))?;
                field.constant = Some(from.clone());
            }
            (_, Some(original)) => {
                let method = module
                    .method_mut(entity)
                    .ok_or(MutationError::EntityNotFound(entity))?;
                method.body = Some(original.clone());
            }
            (_, None) => return Err(MutationError::MissingBody(entity)),
        }

        self.applied = false;
        Ok(())
    }
}

fn snippet(body: &MethodBody, range: Range<usize>) -> String {
    let end = range.end.min(body.len());
    let start = range.start.min(end);
    body.instructions[start..end]
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Source-level operator an opcode stands for, used in reports.
pub fn opcode_symbol(op: OpCode) -> Option<&'static str> {
    use OpCode::*;
    let symbol = match op.long_branch() {
        Add => "+",
        Sub => "-",
        Mul => "*",
        Div | Div_Un => "/",
        Rem | Rem_Un => "%",
        And => "&",
        Or => "|",
        Xor => "^",
        Shl => "<<",
        Shr => ">>",
        Shr_Un => ">>>",
        Ceq | Beq => "==",
        Bne_Un => "!=",
        Cgt | Cgt_Un | Bgt | Bgt_Un => ">",
        Clt | Clt_Un | Blt | Blt_Un => "<",
        Bge | Bge_Un => ">=",
        Ble | Ble_Un => "<=",
        Brtrue => "if true",
        Brfalse => "if false",
        _ => return None,
    };
    Some(symbol)
}

/// `add (+)` style label used in opcode mutation reports.
pub fn opcode_label(op: OpCode) -> String {
    match opcode_symbol(op) {
        Some(sym) => format!("{op} ({sym})"),
        None => op.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldDef, TypeDef, TypeRef};

    fn module() -> Module {
        let body = MethodBody::new(
            vec![TypeRef::I32],
            vec![
                Instruction::new(OpCode::Ldc_I4_5),
                Instruction::new(OpCode::Stloc_0),
                Instruction::new(OpCode::Ldarg_0),
                Instruction::new(OpCode::Ldloc_0),
                Instruction::new(OpCode::Add),
                Instruction::new(OpCode::Ret),
            ],
        );
        Module {
            name: "Calc".into(),
            types: vec![TypeDef {
                name: "Calc.Ops".into(),
                methods: vec![MethodDef {
                    handle: EntityHandle(42),
                    name: "AddFive".into(),
                    params: vec![TypeRef::I32],
                    return_type: TypeRef::I32,
                    has_this: false,
                    body: Some(body),
                }],
                fields: vec![FieldDef {
                    handle: EntityHandle(7),
                    name: "IsEnabled".into(),
                    field_type: TypeRef::Bool,
                    constant: Some(ConstValue::Bool(true)),
                }],
            }],
        }
    }

    fn opcode_mutation(m: &Module) -> Mutation {
        let method = m.method(EntityHandle(42)).unwrap();
        Mutation::for_method(
            "Calc",
            "Calc.Ops::AddFive".into(),
            method,
            Edit::OpCode {
                index: 4,
                from: OpCode::Add,
                to: OpCode::Sub,
            },
            MutationLevel::SIMPLE,
            "Replace add (+) with sub (-)".into(),
        )
        .unwrap()
    }

    #[test]
    fn levels_nest() {
        assert!(MutationLevel::DETAILED.allows(MutationLevel::MEDIUM));
        assert!(MutationLevel::MEDIUM.allows(MutationLevel::SIMPLE));
        assert!(!MutationLevel::SIMPLE.allows(MutationLevel::MEDIUM));
        assert_eq!(MutationLevel::MEDIUM.label(), "medium");
    }

    #[test]
    fn apply_then_revert_restores_body() {
        let mut m = module();
        let before = m.clone();
        let mut mutation = opcode_mutation(&m);

        mutation.apply(&mut m).unwrap();
        assert!(mutation.is_applied());
        let body = m.method(EntityHandle(42)).unwrap().body.as_ref().unwrap();
        assert_eq!(body.instructions[4].op, OpCode::Sub);
        // Macro forms survive the canonical round trip.
        assert_eq!(body.instructions[0].op, OpCode::Ldc_I4_5);

        mutation.revert(&mut m).unwrap();
        assert_eq!(m, before);
    }

    #[test]
    fn apply_twice_is_rejected() {
        let mut m = module();
        let mut mutation = opcode_mutation(&m);
        mutation.apply(&mut m).unwrap();
        assert!(matches!(mutation.apply(&mut m), Err(MutationError::AlreadyApplied)));
        mutation.revert(&mut m).unwrap();
        assert!(matches!(mutation.revert(&mut m), Err(MutationError::NotApplied)));
    }

    #[test]
    fn mutation_applies_to_a_fresh_copy() {
        let analyzed = module();
        let mut mutation = opcode_mutation(&analyzed);
        let mut copy = module();
        mutation.apply(&mut copy).unwrap();
        assert_ne!(copy, analyzed);
    }

    #[test]
    fn snippets_show_canonical_instructions() {
        let m = module();
        let mutation = opcode_mutation(&m);
        assert_eq!(mutation.original_snippet, "add");
        assert_eq!(mutation.mutated_snippet, "sub");
    }

    #[test]
    fn mismatched_edit_is_refused_at_creation() {
        let m = module();
        let method = m.method(EntityHandle(42)).unwrap();
        let err = Mutation::for_method(
            "Calc",
            "Calc.Ops::AddFive".into(),
            method,
            Edit::OpCode {
                index: 4,
                from: OpCode::Mul,
                to: OpCode::Div,
            },
            MutationLevel::SIMPLE,
            String::new(),
        )
        .unwrap_err();
        assert!(matches!(err, MutationError::InstructionMismatch { index: 4, .. }));
    }

    #[test]
    fn literal_edit_keeps_debug_line() {
        let mut m = module();
        m.method_mut(EntityHandle(42)).unwrap().body.as_mut().unwrap().instructions[0].line =
            Some(9);
        let method = m.method(EntityHandle(42)).unwrap();
        let mut mutation = Mutation::for_method(
            "Calc",
            "Calc.Ops::AddFive".into(),
            method,
            Edit::Literal {
                index: 0,
                local: 0,
                from: ConstValue::I32(5),
                to: ConstValue::I32(0),
            },
            MutationLevel::MEDIUM,
            String::new(),
        )
        .unwrap();
        assert_eq!(mutation.line, Some(9));
        mutation.apply(&mut m).unwrap();
        let body = m.method(EntityHandle(42)).unwrap().body.as_ref().unwrap();
        assert_eq!(body.instructions[0].op, OpCode::Ldc_I4_0);
        assert_eq!(body.instructions[0].line, Some(9));
    }

    #[test]
    fn constant_mutation_flips_field() {
        let mut m = module();
        let mut mutation = Mutation::for_constant(
            "Calc",
            "Calc.Ops::IsEnabled".into(),
            EntityHandle(7),
            ConstValue::Bool(true),
            ConstValue::Bool(false),
            MutationLevel::SIMPLE,
            "Change IsEnabled from true to false".into(),
        );
        mutation.apply(&mut m).unwrap();
        assert_eq!(m.field(EntityHandle(7)).unwrap().constant, Some(ConstValue::Bool(false)));
        mutation.revert(&mut m).unwrap();
        assert_eq!(m.field(EntityHandle(7)).unwrap().constant, Some(ConstValue::Bool(true)));
    }

    #[test]
    fn opcode_labels() {
        assert_eq!(opcode_label(OpCode::Shr_Un), "shr.un (>>>)");
        assert_eq!(opcode_label(OpCode::Blt_S), "blt.s (<)");
        assert_eq!(opcode_label(OpCode::Nop), "nop");
    }
}
