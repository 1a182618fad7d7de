use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::instruction::MethodBody;
use super::types::{EntityHandle, TypeRef};
use super::value::ConstValue;
use crate::error::ModelError;

/// A loaded program image: one assembly with its types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    /// Assembly name, paired with entity handles in coverage data.
    pub name: String,
    #[serde(default)]
    pub types: Vec<TypeDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDef {
    /// Full type name, e.g. `Calculator.Operations`.
    pub name: String,
    #[serde(default)]
    pub methods: Vec<MethodDef>,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
}

impl TypeDef {
    /// Types synthesized by the compiler (closures, iterators, ...) are named `<...>`.
    pub fn is_compiler_generated(&self) -> bool {
        let simple = self.name.rsplit(['.', '/', '+']).next().unwrap_or(&self.name);
        self.name.starts_with('<') || simple.starts_with('<')
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDef {
    pub handle: EntityHandle,
    pub name: String,
    #[serde(default)]
    pub params: Vec<TypeRef>,
    #[serde(default = "void")]
    pub return_type: TypeRef,
    #[serde(default)]
    pub has_this: bool,
    /// Abstract and external methods carry no body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<MethodBody>,
}

impl MethodDef {
    pub fn returns_value(&self) -> bool {
        self.return_type != TypeRef::Void
    }

    /// Argument slots, the receiver included.
    pub fn arg_count(&self) -> usize {
        self.params.len() + usize::from(self.has_this)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub handle: EntityHandle,
    pub name: String,
    pub field_type: TypeRef,
    /// Compile-time constant value (`const` fields).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constant: Option<ConstValue>,
}

fn void() -> TypeRef {
    TypeRef::Void
}

impl Module {
    pub fn load(path: &Path) -> Result<Module, ModelError> {
        let bytes = fs::read(path).map_err(|source| ModelError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Module::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Module, ModelError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ModelError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        let bytes = self.to_bytes()?;
        fs::write(path, bytes).map_err(|source| ModelError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn method(&self, handle: EntityHandle) -> Option<&MethodDef> {
        self.types
            .iter()
            .flat_map(|t| &t.methods)
            .find(|m| m.handle == handle)
    }

    pub fn method_mut(&mut self, handle: EntityHandle) -> Option<&mut MethodDef> {
        self.types
            .iter_mut()
            .flat_map(|t| &mut t.methods)
            .find(|m| m.handle == handle)
    }

    pub fn field(&self, handle: EntityHandle) -> Option<&FieldDef> {
        self.types
            .iter()
            .flat_map(|t| &t.fields)
            .find(|f| f.handle == handle)
    }

    pub fn field_mut(&mut self, handle: EntityHandle) -> Option<&mut FieldDef> {
        self.types
            .iter_mut()
            .flat_map(|t| &mut t.fields)
            .find(|f| f.handle == handle)
    }

    /// Find a method by `Type::Method` name.
    pub fn method_by_name(&self, member: &str) -> Option<&MethodDef> {
        let (ty, name) = member.rsplit_once("::")?;
        self.types
            .iter()
            .filter(|t| t.name == ty)
            .flat_map(|t| &t.methods)
            .find(|m| m.name == name)
    }

    /// `Type::Member` name of a method or field.
    pub fn member_name(&self, handle: EntityHandle) -> Option<String> {
        self.types.iter().find_map(|t| {
            let method = t.methods.iter().find(|m| m.handle == handle).map(|m| &m.name);
            let field = t.fields.iter().find(|f| f.handle == handle).map(|f| &f.name);
            method
                .or(field)
                .map(|member| format!("{}::{}", t.name, member))
        })
    }
}
