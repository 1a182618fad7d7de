//! Instruction program model.
//!
//! A [`Module`] is a program image: types with methods and fields. Method
//! bodies are instruction arenas ([`MethodBody`]) whose branch operands are
//! indices, so range edits only need an index remap.

pub mod eval;
mod instruction;
mod module;
mod opcode;
pub mod stack;
mod types;
mod value;

pub use instruction::{Instruction, MethodBody, Operand};
pub use module::{FieldDef, MethodDef, Module, TypeDef};
pub use opcode::{OpCode, OperandKind};
pub use types::{DataToken, EntityHandle, FieldRef, MethodRef, TypeRef};
pub use value::ConstValue;
