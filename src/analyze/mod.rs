//! Mutation analyzers.
//!
//! Each analyzer is a free function over one method or field that returns the
//! candidate mutations it can make at a given [`MutationLevel`]. Analyzers
//! never fail: a candidate they cannot classify confidently is skipped.

mod array;
mod constant;
mod linq;
mod list;
mod literal;
mod opcode;
pub mod values;

use tracing::debug;

use crate::model::{FieldDef, MethodBody, MethodDef, TypeDef};
use crate::mutation::{Edit, Mutation, MutationLevel};
use values::ValueGenerator;

/// Mutations produced by one analyzer invocation.
#[derive(Debug, Clone)]
pub struct MutationGrouping {
    pub analyzer_name: &'static str,
    pub analyzer_description: &'static str,
    /// Member the analyzer scanned, `Type::Member`.
    pub key: Option<String>,
    pub mutations: Vec<Mutation>,
}

impl MutationGrouping {
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}

/// Analyzers that scan method bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodAnalyzer {
    Arithmetic,
    Comparison,
    Bitwise,
    Variable,
    Array,
    List,
    Linq,
}

/// Analyzers that look at field constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldAnalyzer {
    BooleanConstant,
    NumberConstant,
    StringConstant,
}

impl MethodAnalyzer {
    pub const ALL: [MethodAnalyzer; 7] = [
        MethodAnalyzer::Arithmetic,
        MethodAnalyzer::Comparison,
        MethodAnalyzer::Bitwise,
        MethodAnalyzer::Variable,
        MethodAnalyzer::Array,
        MethodAnalyzer::List,
        MethodAnalyzer::Linq,
    ];

    pub fn name(self) -> &'static str {
        match self {
            MethodAnalyzer::Arithmetic => "Arithmetic Analyzer",
            MethodAnalyzer::Comparison => "Comparison Analyzer",
            MethodAnalyzer::Bitwise => "Bitwise Analyzer",
            MethodAnalyzer::Variable => "Variable Analyzer",
            MethodAnalyzer::Array => "Array Analyzer",
            MethodAnalyzer::List => "List Analyzer",
            MethodAnalyzer::Linq => "LINQ Analyzer",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            MethodAnalyzer::Arithmetic => {
                "Swaps arithmetic operators, for example 'add' to 'sub' or 'mul' to 'div'."
            }
            MethodAnalyzer::Comparison => {
                "Swaps comparisons and conditional branches, for example '<' to '>=' or 'brtrue' to 'brfalse'."
            }
            MethodAnalyzer::Bitwise => {
                "Swaps bitwise operators, for example 'or' to 'and' or 'xor', and '<<' to '>>'."
            }
            MethodAnalyzer::Variable => {
                "Replaces literal values assigned to boolean and numeric locals, for example 'true' to 'false'."
            }
            MethodAnalyzer::Array => {
                "Empties or randomizes array initializers of boolean, character and numeric element types."
            }
            MethodAnalyzer::List => "Removes every element from list collection initializers.",
            MethodAnalyzer::Linq => {
                "Replaces LINQ calls with a paired operation of the same signature, for example 'Last()' to 'First()'."
            }
        }
    }

    /// Run this analyzer over one method.
    pub fn analyze(
        self,
        scope: &MethodScope<'_>,
        level: MutationLevel,
        values: &mut ValueGenerator,
    ) -> MutationGrouping {
        let mutations = match self {
            MethodAnalyzer::Arithmetic => opcode::analyze(opcode::ARITHMETIC, scope, level),
            MethodAnalyzer::Comparison => opcode::analyze(opcode::COMPARISON, scope, level),
            MethodAnalyzer::Bitwise => opcode::analyze(opcode::BITWISE, scope, level),
            MethodAnalyzer::Variable => literal::analyze(scope, level, values),
            MethodAnalyzer::Array => array::analyze(scope, level, values),
            MethodAnalyzer::List => list::analyze(scope, level),
            MethodAnalyzer::Linq => linq::analyze(scope, level),
        };
        MutationGrouping {
            analyzer_name: self.name(),
            analyzer_description: self.description(),
            key: Some(scope.member()),
            mutations,
        }
    }
}

impl FieldAnalyzer {
    pub const ALL: [FieldAnalyzer; 3] = [
        FieldAnalyzer::BooleanConstant,
        FieldAnalyzer::NumberConstant,
        FieldAnalyzer::StringConstant,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FieldAnalyzer::BooleanConstant => "Boolean Constant Analyzer",
            FieldAnalyzer::NumberConstant => "Number Constant Analyzer",
            FieldAnalyzer::StringConstant => "String Constant Analyzer",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            FieldAnalyzer::BooleanConstant => "Flips boolean constants, for example 'true' to 'false'.",
            FieldAnalyzer::NumberConstant => {
                "Replaces numeric constants with a different, boundary-biased random value."
            }
            FieldAnalyzer::StringConstant => {
                "Replaces string constants with a random UUID, for example 'hello' to '0f8fad5b-d9cb-469f-a165-70867728950e'."
            }
        }
    }

    pub fn analyze(
        self,
        scope: &FieldScope<'_>,
        level: MutationLevel,
        values: &mut ValueGenerator,
    ) -> MutationGrouping {
        let mutations = match self {
            FieldAnalyzer::BooleanConstant => constant::boolean(scope, level),
            FieldAnalyzer::NumberConstant => constant::number(scope, level, values),
            FieldAnalyzer::StringConstant => constant::string(scope, level, values),
        };
        MutationGrouping {
            analyzer_name: self.name(),
            analyzer_description: self.description(),
            key: Some(scope.member()),
            mutations,
        }
    }
}

/// A method under analysis, with the context mutations need.
#[derive(Debug, Clone, Copy)]
pub struct MethodScope<'a> {
    pub assembly: &'a str,
    pub type_name: &'a str,
    pub method: &'a MethodDef,
}

impl MethodScope<'_> {
    pub fn member(&self) -> String {
        format!("{}::{}", self.type_name, self.method.name)
    }

    /// Macro-free copy of the body, which is what edit indices refer to.
    fn canonical_body(&self) -> Option<MethodBody> {
        let mut body = self.method.body.clone()?;
        body.simplify_macros();
        Some(body)
    }

    /// Build a mutation for `edit`, skipping it when it does not apply cleanly.
    fn push(&self, out: &mut Vec<Mutation>, edit: Edit, required: MutationLevel, report: String) {
        match Mutation::for_method(
            self.assembly,
            self.member(),
            self.method,
            edit,
            required,
            report,
        ) {
            Ok(m) => out.push(m),
            Err(e) => debug!(member = %self.member(), error = %e, "skipping candidate"),
        }
    }
}

/// A field under analysis.
#[derive(Debug, Clone, Copy)]
pub struct FieldScope<'a> {
    pub assembly: &'a str,
    pub type_name: &'a str,
    pub field: &'a FieldDef,
}

impl FieldScope<'_> {
    pub fn member(&self) -> String {
        format!("{}::{}", self.type_name, self.field.name)
    }
}

/// Run every analyzer over every method and field of one type.
///
/// Compiler-generated types yield nothing. Empty groupings are dropped.
pub fn analyze_type(
    assembly: &str,
    ty: &TypeDef,
    level: MutationLevel,
    values: &mut ValueGenerator,
) -> Vec<MutationGrouping> {
    if ty.is_compiler_generated() {
        debug!(r#type = %ty.name, "skipping compiler-generated type");
        return Vec::new();
    }

    let mut groupings = Vec::new();
    for method in ty.methods.iter().filter(|m| m.body.is_some()) {
        let scope = MethodScope {
            assembly,
            type_name: &ty.name,
            method,
        };
        for analyzer in MethodAnalyzer::ALL {
            let grouping = analyzer.analyze(&scope, level, values);
            if !grouping.is_empty() {
                groupings.push(grouping);
            }
        }
    }
    for field in &ty.fields {
        let scope = FieldScope {
            assembly,
            type_name: &ty.name,
            field,
        };
        for analyzer in FieldAnalyzer::ALL {
            let grouping = analyzer.analyze(&scope, level, values);
            if !grouping.is_empty() {
                groupings.push(grouping);
            }
        }
    }
    groupings
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConstValue, EntityHandle, Instruction, OpCode, TypeRef};

    fn ty(name: &str) -> TypeDef {
        TypeDef {
            name: name.into(),
            methods: vec![test_support::method(
                vec![TypeRef::I32, TypeRef::I32],
                TypeRef::I32,
                vec![],
                vec![
                    Instruction::new(OpCode::Ldarg_0),
                    Instruction::new(OpCode::Ldarg_1),
                    Instruction::new(OpCode::Add),
                    Instruction::new(OpCode::Ret),
                ],
            )],
            fields: vec![FieldDef {
                handle: EntityHandle(7),
                name: "Enabled".into(),
                field_type: TypeRef::Bool,
                constant: Some(ConstValue::Bool(true)),
            }],
        }
    }

    #[test]
    fn type_dispatch_runs_method_and_field_analyzers() {
        let mut values = ValueGenerator::new(Some(1));
        let groupings = analyze_type("Calc", &ty("Calc.Ops"), MutationLevel::SIMPLE, &mut values);
        let names: Vec<&str> = groupings.iter().map(|g| g.analyzer_name).collect();
        assert_eq!(names, vec!["Arithmetic Analyzer", "Boolean Constant Analyzer"]);
        assert_eq!(groupings[0].key.as_deref(), Some("Calc.Ops::M"));
        assert_eq!(groupings[0].mutations.len(), 1);
    }

    #[test]
    fn higher_levels_emit_more() {
        let mut values = ValueGenerator::new(Some(1));
        let t = ty("Calc.Ops");
        let simple: usize = analyze_type("Calc", &t, MutationLevel::SIMPLE, &mut values)
            .iter()
            .map(|g| g.mutations.len())
            .sum();
        let detailed: usize = analyze_type("Calc", &t, MutationLevel::DETAILED, &mut values)
            .iter()
            .map(|g| g.mutations.len())
            .sum();
        assert!(detailed > simple);
    }

    #[test]
    fn compiler_generated_types_are_skipped() {
        let mut values = ValueGenerator::new(Some(1));
        let groupings = analyze_type("Calc", &ty("<>c"), MutationLevel::DETAILED, &mut values);
        assert!(groupings.is_empty());
    }
}
