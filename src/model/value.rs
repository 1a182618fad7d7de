use std::fmt;

use serde::{Deserialize, Serialize};

use super::instruction::{Instruction, Operand};
use super::opcode::OpCode;
use super::types::TypeRef;

/// Compile-time constant: a field constant, literal load or array element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstValue {
    Bool(bool),
    Char(u16),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
}

impl ConstValue {
    pub fn type_ref(&self) -> TypeRef {
        match self {
            ConstValue::Bool(_) => TypeRef::Bool,
            ConstValue::Char(_) => TypeRef::Char,
            ConstValue::I8(_) => TypeRef::I8,
            ConstValue::U8(_) => TypeRef::U8,
            ConstValue::I16(_) => TypeRef::I16,
            ConstValue::U16(_) => TypeRef::U16,
            ConstValue::I32(_) => TypeRef::I32,
            ConstValue::U32(_) => TypeRef::U32,
            ConstValue::I64(_) => TypeRef::I64,
            ConstValue::U64(_) => TypeRef::U64,
            ConstValue::F32(_) => TypeRef::F32,
            ConstValue::F64(_) => TypeRef::F64,
            ConstValue::String(_) => TypeRef::String,
        }
    }

    /// Canonical constant-load instruction that pushes this value.
    pub fn to_instruction(&self) -> Instruction {
        let (op, operand) = match *self {
            ConstValue::Bool(v) => (OpCode::Ldc_I4, Operand::Int32(v as i32)),
            ConstValue::Char(v) => (OpCode::Ldc_I4, Operand::Int32(v as i32)),
            ConstValue::I8(v) => (OpCode::Ldc_I4, Operand::Int32(v as i32)),
            ConstValue::U8(v) => (OpCode::Ldc_I4, Operand::Int32(v as i32)),
            ConstValue::I16(v) => (OpCode::Ldc_I4, Operand::Int32(v as i32)),
            ConstValue::U16(v) => (OpCode::Ldc_I4, Operand::Int32(v as i32)),
            ConstValue::I32(v) => (OpCode::Ldc_I4, Operand::Int32(v)),
            ConstValue::U32(v) => (OpCode::Ldc_I4, Operand::Int32(v as i32)),
            ConstValue::I64(v) => (OpCode::Ldc_I8, Operand::Int64(v)),
            ConstValue::U64(v) => (OpCode::Ldc_I8, Operand::Int64(v as i64)),
            ConstValue::F32(v) => (OpCode::Ldc_R4, Operand::Float32(v)),
            ConstValue::F64(v) => (OpCode::Ldc_R8, Operand::Float64(v)),
            ConstValue::String(ref s) => (OpCode::Ldstr, Operand::String(s.clone())),
        };
        Instruction::with(op, operand)
    }

    /// Interpret a canonical constant-load operand as a value of the declared type.
    ///
    /// Returns `None` when the operand shape does not fit the type.
    pub fn from_operand(ty: &TypeRef, operand: &Operand) -> Option<ConstValue> {
        let value = match (ty, operand) {
            (TypeRef::Bool, Operand::Int32(v)) => ConstValue::Bool(*v != 0),
            (TypeRef::Char, Operand::Int32(v)) => ConstValue::Char(*v as u16),
            (TypeRef::I8, Operand::Int32(v)) => ConstValue::I8(*v as i8),
            (TypeRef::U8, Operand::Int32(v)) => ConstValue::U8(*v as u8),
            (TypeRef::I16, Operand::Int32(v)) => ConstValue::I16(*v as i16),
            (TypeRef::U16, Operand::Int32(v)) => ConstValue::U16(*v as u16),
            (TypeRef::I32, Operand::Int32(v)) => ConstValue::I32(*v),
            (TypeRef::U32, Operand::Int32(v)) => ConstValue::U32(*v as u32),
            (TypeRef::I64, Operand::Int64(v)) => ConstValue::I64(*v),
            (TypeRef::U64, Operand::Int64(v)) => ConstValue::U64(*v as u64),
            // `long x = 5;` is commonly encoded as `ldc.i4 5; conv.i8`.
            (TypeRef::I64, Operand::Int32(v)) => ConstValue::I64(*v as i64),
            (TypeRef::U64, Operand::Int32(v)) => ConstValue::U64(*v as u32 as u64),
            (TypeRef::F32, Operand::Float32(v)) => ConstValue::F32(*v),
            (TypeRef::F64, Operand::Float64(v)) => ConstValue::F64(*v),
            (TypeRef::String, Operand::String(s)) => ConstValue::String(s.clone()),
            _ => return None,
        };
        Some(value)
    }

    /// Decode one little-endian element of an embedded array data blob.
    pub fn from_blob(ty: &TypeRef, bytes: &[u8]) -> Option<ConstValue> {
        let size = ty.blob_size()?;
        let b = bytes.get(..size)?;
        let value = match ty {
            TypeRef::Bool => ConstValue::Bool(b[0] != 0),
            TypeRef::I8 => ConstValue::I8(b[0] as i8),
            TypeRef::U8 => ConstValue::U8(b[0]),
            TypeRef::Char => ConstValue::Char(u16::from_le_bytes([b[0], b[1]])),
            TypeRef::I16 => ConstValue::I16(i16::from_le_bytes([b[0], b[1]])),
            TypeRef::U16 => ConstValue::U16(u16::from_le_bytes([b[0], b[1]])),
            TypeRef::I32 => ConstValue::I32(i32::from_le_bytes(b.try_into().ok()?)),
            TypeRef::U32 => ConstValue::U32(u32::from_le_bytes(b.try_into().ok()?)),
            TypeRef::F32 => ConstValue::F32(f32::from_le_bytes(b.try_into().ok()?)),
            TypeRef::I64 => ConstValue::I64(i64::from_le_bytes(b.try_into().ok()?)),
            TypeRef::U64 => ConstValue::U64(u64::from_le_bytes(b.try_into().ok()?)),
            TypeRef::F64 => ConstValue::F64(f64::from_le_bytes(b.try_into().ok()?)),
            _ => return None,
        };
        Some(value)
    }

    /// Exact equality, treating floats bitwise so `NaN` equals itself.
    pub fn same_as(&self, other: &ConstValue) -> bool {
        match (self, other) {
            (ConstValue::F32(a), ConstValue::F32(b)) => a.to_bits() == b.to_bits(),
            (ConstValue::F64(a), ConstValue::F64(b)) => a.to_bits() == b.to_bits(),
            (a, b) => a == b,
        }
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::Bool(v) => write!(f, "{v}"),
            ConstValue::Char(v) => match char::from_u32(*v as u32) {
                Some(c) if !c.is_control() => write!(f, "'{c}'"),
                _ => write!(f, "'\\u{v:04x}'"),
            },
            ConstValue::I8(v) => write!(f, "{v}"),
            ConstValue::U8(v) => write!(f, "{v}"),
            ConstValue::I16(v) => write!(f, "{v}"),
            ConstValue::U16(v) => write!(f, "{v}"),
            ConstValue::I32(v) => write!(f, "{v}"),
            ConstValue::U32(v) => write!(f, "{v}"),
            ConstValue::I64(v) => write!(f, "{v}"),
            ConstValue::U64(v) => write!(f, "{v}"),
            ConstValue::F32(v) => write!(f, "{v}"),
            ConstValue::F64(v) => write!(f, "{v}"),
            ConstValue::String(v) => write!(f, "{v:?}"),
        }
    }
}
