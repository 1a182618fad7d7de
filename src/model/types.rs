use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable numeric identifier of a method or field inside one module.
///
/// This is the join key between coverage data and discovered mutations.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EntityHandle(pub u32);

impl fmt::Display for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// Type reference as seen by instructions, locals, fields and signatures.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeRef {
    Void,
    Bool,
    Char,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    String,
    Object,
    Array(Box<TypeRef>),
    /// Any other type, by full name (generic instances included).
    Named(String),
}

impl TypeRef {
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            TypeRef::I8
                | TypeRef::U8
                | TypeRef::I16
                | TypeRef::U16
                | TypeRef::I32
                | TypeRef::U32
                | TypeRef::I64
                | TypeRef::U64
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self, TypeRef::F32 | TypeRef::F64)
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_float()
    }

    /// Booleans, characters and numbers: the types with literal constant loads.
    pub fn is_primitive_value(&self) -> bool {
        matches!(self, TypeRef::Bool | TypeRef::Char) || self.is_numeric()
    }

    /// Size in bytes of one element of this type in an embedded data blob.
    pub fn blob_size(&self) -> Option<usize> {
        match self {
            TypeRef::Bool | TypeRef::I8 | TypeRef::U8 => Some(1),
            TypeRef::Char | TypeRef::I16 | TypeRef::U16 => Some(2),
            TypeRef::I32 | TypeRef::U32 | TypeRef::F32 => Some(4),
            TypeRef::I64 | TypeRef::U64 | TypeRef::F64 => Some(8),
            _ => None,
        }
    }

    /// Short display name, used in reports.
    pub fn name(&self) -> String {
        match self {
            TypeRef::Void => "void".into(),
            TypeRef::Bool => "bool".into(),
            TypeRef::Char => "char".into(),
            TypeRef::I8 => "sbyte".into(),
            TypeRef::U8 => "byte".into(),
            TypeRef::I16 => "short".into(),
            TypeRef::U16 => "ushort".into(),
            TypeRef::I32 => "int".into(),
            TypeRef::U32 => "uint".into(),
            TypeRef::I64 => "long".into(),
            TypeRef::U64 => "ulong".into(),
            TypeRef::F32 => "float".into(),
            TypeRef::F64 => "double".into(),
            TypeRef::String => "string".into(),
            TypeRef::Object => "object".into(),
            TypeRef::Array(elem) => format!("{}[]", elem.name()),
            TypeRef::Named(name) => name.clone(),
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Reference to a callable method, as carried by `call`, `callvirt` and `newobj`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodRef {
    /// Full name of the declaring type, for example `System.Linq.Enumerable`.
    pub declaring_type: String,

    pub name: String,

    /// Parameter types of the method definition (generic parameters unresolved).
    #[serde(default)]
    pub params: Vec<TypeRef>,

    #[serde(default = "void")]
    pub return_type: TypeRef,

    /// Type arguments of a generic method instance; empty for non-generic calls.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub generic_args: Vec<TypeRef>,

    /// Instance methods consume a receiver in addition to their parameters.
    #[serde(default)]
    pub has_this: bool,
}

fn void() -> TypeRef {
    TypeRef::Void
}

impl MethodRef {
    pub fn is_generic_instance(&self) -> bool {
        !self.generic_args.is_empty()
    }

    /// `Type::Name<Args>` form used in reports.
    pub fn display_name(&self) -> String {
        if self.generic_args.is_empty() {
            return format!("{}::{}", self.declaring_type, self.name);
        }
        let args: Vec<String> = self.generic_args.iter().map(TypeRef::name).collect();
        format!("{}::{}<{}>", self.declaring_type, self.name, args.join(", "))
    }
}

/// Reference to a field, as carried by field access instructions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    pub handle: EntityHandle,
    pub name: String,
    pub field_type: TypeRef,
}

/// Token for an embedded data blob used by block array initialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataToken {
    pub field: String,
    #[serde(default)]
    pub data: Vec<u8>,
}
