//! Reference evaluator for method bodies.
//!
//! Interprets the subset of the instruction set the analyzers touch:
//! integer and float arithmetic, comparisons, branches, locals and
//! arguments, arrays (including block initialization from data blobs),
//! generic `List` construction, constant fields and calls between methods of
//! the same module. Anything else is reported as a fault.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use super::instruction::{Instruction, Operand};
use super::module::{MethodDef, Module};
use super::opcode::OpCode;
use super::types::{DataToken, EntityHandle, TypeRef};
use super::value::ConstValue;
use crate::error::ModelError;

/// Default step budget; a body exceeding it is considered hanging.
pub const DEFAULT_STEP_LIMIT: u64 = 1_000_000;

const MAX_CALL_DEPTH: usize = 64;

/// Longest array `newarr` may create.
pub const MAX_ARRAY_LENGTH: usize = 1 << 20;

const LIST_TYPE: &str = "System.Collections.Generic.List`1";
const RUNTIME_HELPERS: &str = "System.Runtime.CompilerServices.RuntimeHelpers";

/// Runtime value on the evaluation stack.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    I32(i32),
    I64(i64),
    F64(f64),
    Str(String),
    Null,
    /// Reference to an array or list on the evaluator heap.
    Ref(usize),
    Token(DataToken),
}

impl Value {
    pub fn bool(b: bool) -> Value {
        Value::I32(i32::from(b))
    }

    fn is_truthy(&self) -> bool {
        match self {
            Value::I32(v) => *v != 0,
            Value::I64(v) => *v != 0,
            Value::F64(v) => *v != 0.0,
            Value::Null => false,
            _ => true,
        }
    }
}

impl From<&ConstValue> for Value {
    fn from(c: &ConstValue) -> Value {
        match *c {
            ConstValue::Bool(v) => Value::bool(v),
            ConstValue::Char(v) => Value::I32(v as i32),
            ConstValue::I8(v) => Value::I32(v as i32),
            ConstValue::U8(v) => Value::I32(v as i32),
            ConstValue::I16(v) => Value::I32(v as i32),
            ConstValue::U16(v) => Value::I32(v as i32),
            ConstValue::I32(v) => Value::I32(v),
            ConstValue::U32(v) => Value::I32(v as i32),
            ConstValue::I64(v) => Value::I64(v),
            ConstValue::U64(v) => Value::I64(v as i64),
            ConstValue::F32(v) => Value::F64(v as f64),
            ConstValue::F64(v) => Value::F64(v),
            ConstValue::String(ref s) => Value::Str(s.clone()),
        }
    }
}

/// Observable result of an evaluation, with heap references resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Void,
    Value(Value),
    Array(Vec<Value>),
    List(Vec<Value>),
}

#[derive(Debug)]
enum HeapObject {
    Array { elem: TypeRef, items: Vec<Value> },
    List(Vec<Value>),
}

enum Flow {
    Next,
    Jump(usize),
    Return(Option<Value>),
}

struct Frame {
    method: String,
    args: Vec<Value>,
    locals: Vec<Value>,
    stack: Vec<Value>,
}

impl Frame {
    fn fault(&self, reason: impl Into<String>) -> ModelError {
        ModelError::Eval {
            method: self.method.clone(),
            reason: reason.into(),
        }
    }

    fn pop(&mut self) -> Result<Value, ModelError> {
        self.stack
            .pop()
            .ok_or_else(|| self.fault("evaluation stack underflow"))
    }

    fn pop_i32(&mut self) -> Result<i32, ModelError> {
        match self.pop()? {
            Value::I32(v) => Ok(v),
            other => Err(self.fault(format!("expected int32, found {other:?}"))),
        }
    }

    fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, ModelError> {
        if self.stack.len() < n {
            return Err(self.fault("evaluation stack underflow"));
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }
}

/// Interpreter over one module image.
#[derive(Debug)]
pub struct Evaluator<'m> {
    module: &'m Module,
    heap: Vec<HeapObject>,
    steps: u64,
    limit: u64,
    /// Methods entered and constant fields read, for coverage.
    touched: BTreeSet<EntityHandle>,
}

/// Evaluate `Type::Method` of `module` with the given arguments.
pub fn evaluate(module: &Module, member: &str, args: Vec<Value>) -> Result<Output, ModelError> {
    Evaluator::new(module).call(member, args)
}

impl<'m> Evaluator<'m> {
    pub fn new(module: &'m Module) -> Self {
        Self {
            module,
            heap: Vec::new(),
            steps: 0,
            limit: DEFAULT_STEP_LIMIT,
            touched: BTreeSet::new(),
        }
    }

    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    /// Entities reached by every call made through this evaluator so far.
    pub fn touched(&self) -> impl Iterator<Item = EntityHandle> + '_ {
        self.touched.iter().copied()
    }

    /// Call a method by `Type::Method` name.
    pub fn call(&mut self, member: &str, args: Vec<Value>) -> Result<Output, ModelError> {
        let module = self.module;
        let method = module.method_by_name(member).ok_or_else(|| ModelError::Eval {
            method: member.to_string(),
            reason: "no such method".into(),
        })?;
        let result = self.invoke(method, args, 0)?;
        Ok(self.output(result))
    }

    fn output(&self, value: Option<Value>) -> Output {
        match value {
            None => Output::Void,
            Some(Value::Ref(i)) => match self.heap.get(i) {
                Some(HeapObject::Array { items, .. }) => Output::Array(items.clone()),
                Some(HeapObject::List(items)) => Output::List(items.clone()),
                None => Output::Value(Value::Ref(i)),
            },
            Some(v) => Output::Value(v),
        }
    }

    fn invoke(
        &mut self,
        method: &MethodDef,
        args: Vec<Value>,
        depth: usize,
    ) -> Result<Option<Value>, ModelError> {
        let mut frame = Frame {
            method: method.name.clone(),
            args,
            locals: Vec::new(),
            stack: Vec::new(),
        };
        if depth > MAX_CALL_DEPTH {
            return Err(frame.fault("call depth exceeded"));
        }
        self.touched.insert(method.handle);
        let Some(mut body) = method.body.clone() else {
            return Err(frame.fault("method has no body"));
        };
        body.simplify_macros();
        frame.locals = body.locals.iter().map(default_value).collect();

        let mut pc = 0;
        loop {
            self.steps += 1;
            if self.steps > self.limit {
                return Err(ModelError::StepLimit(self.limit));
            }
            let Some(ins) = body.instructions.get(pc) else {
                return Err(frame.fault(format!("control fell off the body at {pc}")));
            };
            match self.exec(ins, &mut frame, depth)? {
                Flow::Next => pc += 1,
                Flow::Jump(target) => pc = target,
                Flow::Return(v) => return Ok(v),
            }
        }
    }

    fn exec(&mut self, ins: &Instruction, f: &mut Frame, depth: usize) -> Result<Flow, ModelError> {
        use OpCode::*;
        match (ins.op, &ins.operand) {
            (Nop, _) => {}
            (Dup, _) => {
                let v = f.pop()?;
                f.stack.push(v.clone());
                f.stack.push(v);
            }
            (Pop, _) => {
                f.pop()?;
            }
            (Ret, _) => return Ok(Flow::Return(f.stack.pop())),
            (Throw, _) => return Err(f.fault("exception thrown")),

            (Ldarg, Operand::Arg(n)) => {
                let v = f.args.get(*n as usize).cloned();
                let v = v.ok_or_else(|| f.fault(format!("argument {n} out of range")))?;
                f.stack.push(v);
            }
            (Starg, Operand::Arg(n)) => {
                let v = f.pop()?;
                let slot = f.args.get_mut(*n as usize);
                match slot {
                    Some(slot) => *slot = v,
                    None => return Err(f.fault(format!("argument {n} out of range"))),
                }
            }
            (Ldloc, Operand::Local(n)) => {
                let v = f.locals.get(*n as usize).cloned();
                let v = v.ok_or_else(|| f.fault(format!("local {n} out of range")))?;
                f.stack.push(v);
            }
            (Stloc, Operand::Local(n)) => {
                let v = f.pop()?;
                match f.locals.get_mut(*n as usize) {
                    Some(slot) => *slot = v,
                    None => return Err(f.fault(format!("local {n} out of range"))),
                }
            }

            (Ldc_I4, Operand::Int32(v)) => f.stack.push(Value::I32(*v)),
            (Ldc_I8, Operand::Int64(v)) => f.stack.push(Value::I64(*v)),
            (Ldc_R4, Operand::Float32(v)) => f.stack.push(Value::F64(*v as f64)),
            (Ldc_R8, Operand::Float64(v)) => f.stack.push(Value::F64(*v)),
            (Ldstr, Operand::String(s)) => f.stack.push(Value::Str(s.clone())),
            (Ldnull, _) => f.stack.push(Value::Null),
            (Ldtoken, Operand::Token(t)) => f.stack.push(Value::Token(t.clone())),

            (Add | Sub | Mul | Div | Div_Un | Rem | Rem_Un | And | Or | Xor, _) => {
                let b = f.pop()?;
                let a = f.pop()?;
                let v = arith(ins.op, a, b).map_err(|e| f.fault(e))?;
                f.stack.push(v);
            }
            (Shl | Shr | Shr_Un, _) => {
                let amount = f.pop_i32()? as u32;
                let v = match (ins.op, f.pop()?) {
                    (Shl, Value::I32(x)) => Value::I32(x.wrapping_shl(amount)),
                    (Shr, Value::I32(x)) => Value::I32(x.wrapping_shr(amount)),
                    (Shr_Un, Value::I32(x)) => Value::I32((x as u32).wrapping_shr(amount) as i32),
                    (Shl, Value::I64(x)) => Value::I64(x.wrapping_shl(amount)),
                    (Shr, Value::I64(x)) => Value::I64(x.wrapping_shr(amount)),
                    (Shr_Un, Value::I64(x)) => Value::I64((x as u64).wrapping_shr(amount) as i64),
                    (_, other) => return Err(f.fault(format!("cannot shift {other:?}"))),
                };
                f.stack.push(v);
            }
            (Neg, _) => {
                let v = match f.pop()? {
                    Value::I32(x) => Value::I32(x.wrapping_neg()),
                    Value::I64(x) => Value::I64(x.wrapping_neg()),
                    Value::F64(x) => Value::F64(-x),
                    other => return Err(f.fault(format!("cannot negate {other:?}"))),
                };
                f.stack.push(v);
            }
            (Not, _) => {
                let v = match f.pop()? {
                    Value::I32(x) => Value::I32(!x),
                    Value::I64(x) => Value::I64(!x),
                    other => return Err(f.fault(format!("cannot complement {other:?}"))),
                };
                f.stack.push(v);
            }
            (Ceq | Cgt | Cgt_Un | Clt | Clt_Un, _) => {
                let b = f.pop()?;
                let a = f.pop()?;
                let r = relation(ins.op, &a, &b).map_err(|e| f.fault(e))?;
                f.stack.push(Value::bool(r));
            }

            (Br, Operand::Branch(t)) => return Ok(Flow::Jump(*t)),
            (Brfalse | Brtrue, Operand::Branch(t)) => {
                let taken = f.pop()?.is_truthy() == (ins.op == Brtrue);
                if taken {
                    return Ok(Flow::Jump(*t));
                }
            }
            (
                Beq | Bne_Un | Bge | Bge_Un | Bgt | Bgt_Un | Ble | Ble_Un | Blt | Blt_Un,
                Operand::Branch(t),
            ) => {
                let b = f.pop()?;
                let a = f.pop()?;
                if relation(ins.op, &a, &b).map_err(|e| f.fault(e))? {
                    return Ok(Flow::Jump(*t));
                }
            }
            (Switch, Operand::Switch(targets)) => {
                let i = f.pop_i32()?;
                if let Some(t) = usize::try_from(i).ok().and_then(|i| targets.get(i)) {
                    return Ok(Flow::Jump(*t));
                }
            }

            (
                Conv_I1 | Conv_I2 | Conv_I4 | Conv_I8 | Conv_U1 | Conv_U2 | Conv_U4 | Conv_U8
                | Conv_R4 | Conv_R8,
                _,
            ) => {
                let v = f.pop()?;
                let v = convert(ins.op, v).map_err(|e| f.fault(e))?;
                f.stack.push(v);
            }

            (Newarr, Operand::Type(elem)) => {
                let len = f.pop_i32()?;
                let len = usize::try_from(len).map_err(|_| f.fault("negative array length"))?;
                if len > MAX_ARRAY_LENGTH {
                    return Err(f.fault(format!("array length {len} exceeds {MAX_ARRAY_LENGTH}")));
                }
                let items = vec![default_value(elem); len];
                self.heap.push(HeapObject::Array {
                    elem: elem.clone(),
                    items,
                });
                f.stack.push(Value::Ref(self.heap.len() - 1));
            }
            (Ldlen, _) => {
                let r = f.pop()?;
                let len = self.array(f, &r)?.len();
                f.stack.push(Value::I32(len as i32));
            }
            (op, _) if op.is_stelem() => {
                let value = f.pop()?;
                let index = f.pop_i32()?;
                let r = f.pop()?;
                let items = self.array_mut(f, &r)?;
                match usize::try_from(index).ok().and_then(|i| items.get_mut(i)) {
                    Some(slot) => *slot = value,
                    None => return Err(f.fault("index out of range")),
                }
            }
            (
                Ldelem_I1 | Ldelem_U1 | Ldelem_I2 | Ldelem_U2 | Ldelem_I4 | Ldelem_U4 | Ldelem_I8
                | Ldelem_R4 | Ldelem_R8 | Ldelem_Ref,
                _,
            ) => {
                let index = f.pop_i32()?;
                let r = f.pop()?;
                let item = usize::try_from(index)
                    .ok()
                    .and_then(|i| self.array(f, &r).ok()?.get(i).cloned());
                let item = item.ok_or_else(|| f.fault("index out of range"))?;
                f.stack.push(item);
            }

            (Ldsfld, Operand::Field(field)) => {
                self.touched.insert(field.handle);
                let constant = self.module.field(field.handle).and_then(|d| d.constant.as_ref());
                match constant {
                    Some(c) => f.stack.push(Value::from(c)),
                    None => return Err(f.fault(format!("field {} is not a constant", field.name))),
                }
            }

            (Call | Callvirt | Newobj, Operand::Method(_)) => return self.call_method(ins, f, depth),

            _ => return Err(f.fault(format!("unsupported instruction `{ins}`"))),
        }
        Ok(Flow::Next)
    }

    fn call_method(
        &mut self,
        ins: &Instruction,
        f: &mut Frame,
        depth: usize,
    ) -> Result<Flow, ModelError> {
        let Some(m) = ins.method() else {
            return Err(f.fault("call without method operand"));
        };

        if m.declaring_type.starts_with(LIST_TYPE) {
            match (ins.op, m.name.as_str()) {
                (OpCode::Newobj, ".ctor") => {
                    f.pop_n(m.params.len())?;
                    self.heap.push(HeapObject::List(Vec::new()));
                    f.stack.push(Value::Ref(self.heap.len() - 1));
                }
                (_, "Add") => {
                    let item = f.pop()?;
                    let r = f.pop()?;
                    self.list_mut(f, &r)?.push(item);
                }
                (_, "get_Count") => {
                    let r = f.pop()?;
                    let len = self.list_mut(f, &r)?.len();
                    f.stack.push(Value::I32(len as i32));
                }
                (_, "get_Item") => {
                    let index = f.pop_i32()?;
                    let r = f.pop()?;
                    let list = self.list_mut(f, &r)?;
                    let item = usize::try_from(index).ok().and_then(|i| list.get(i).cloned());
                    let item = item.ok_or_else(|| f.fault("index out of range"))?;
                    f.stack.push(item);
                }
                (_, name) => return Err(f.fault(format!("unsupported List member {name}"))),
            }
            return Ok(Flow::Next);
        }

        if m.declaring_type == RUNTIME_HELPERS && m.name == "InitializeArray" {
            let token = f.pop()?;
            let r = f.pop()?;
            let Value::Token(token) = token else {
                return Err(f.fault("InitializeArray expects a data token"));
            };
            self.initialize_array(f, &r, &token)?;
            return Ok(Flow::Next);
        }

        let module = self.module;
        let target = module
            .types
            .iter()
            .filter(|t| t.name == m.declaring_type)
            .flat_map(|t| &t.methods)
            .find(|d| d.name == m.name && d.params == m.params);
        let Some(target) = target else {
            return Err(f.fault(format!("unsupported call to {}", m.display_name())));
        };
        let args = f.pop_n(target.arg_count())?;
        if let Some(v) = self.invoke(target, args, depth + 1)? {
            f.stack.push(v);
        }
        Ok(Flow::Next)
    }

    fn initialize_array(&mut self, f: &Frame, r: &Value, token: &DataToken) -> Result<(), ModelError> {
        let Some(HeapObject::Array { elem, items }) = self.heap_object(r) else {
            return Err(f.fault("InitializeArray target is not an array"));
        };
        let size = elem.blob_size().ok_or_else(|| f.fault("unsupported blob element"))?;
        if token.data.len() < size * items.len() {
            return Err(f.fault("data blob is shorter than the array"));
        }
        for (i, slot) in items.iter_mut().enumerate() {
            let c = ConstValue::from_blob(elem, &token.data[i * size..])
                .ok_or_else(|| f.fault("undecodable blob element"))?;
            *slot = Value::from(&c);
        }
        Ok(())
    }

    fn heap_object(&mut self, r: &Value) -> Option<&mut HeapObject> {
        match r {
            Value::Ref(i) => self.heap.get_mut(*i),
            _ => None,
        }
    }

    fn array(&self, f: &Frame, r: &Value) -> Result<&Vec<Value>, ModelError> {
        match r {
            Value::Ref(i) => match self.heap.get(*i) {
                Some(HeapObject::Array { items, .. }) => Ok(items),
                _ => Err(f.fault("not an array")),
            },
            Value::Null => Err(f.fault("null reference")),
            _ => Err(f.fault("not an array")),
        }
    }

    fn array_mut(&mut self, f: &Frame, r: &Value) -> Result<&mut Vec<Value>, ModelError> {
        match self.heap_object(r) {
            Some(HeapObject::Array { items, .. }) => Ok(items),
            _ => Err(f.fault("not an array")),
        }
    }

    fn list_mut(&mut self, f: &Frame, r: &Value) -> Result<&mut Vec<Value>, ModelError> {
        match self.heap_object(r) {
            Some(HeapObject::List(items)) => Ok(items),
            _ => Err(f.fault("not a list")),
        }
    }
}

fn default_value(ty: &TypeRef) -> Value {
    match ty {
        TypeRef::I64 | TypeRef::U64 => Value::I64(0),
        TypeRef::F32 | TypeRef::F64 => Value::F64(0.0),
        t if t.is_primitive_value() => Value::I32(0),
        _ => Value::Null,
    }
}

macro_rules! int_binop {
    ($name:ident, $t:ty, $u:ty) => {
        fn $name(op: OpCode, x: $t, y: $t) -> Result<$t, String> {
            let v = match op {
                OpCode::Add => x.wrapping_add(y),
                OpCode::Sub => x.wrapping_sub(y),
                OpCode::Mul => x.wrapping_mul(y),
                OpCode::Div => x.checked_div(y).ok_or_else(|| division_fault(y == 0))?,
                OpCode::Rem => x.checked_rem(y).ok_or_else(|| division_fault(y == 0))?,
                OpCode::Div_Un => (x as $u).checked_div(y as $u).ok_or_else(|| division_fault(true))? as $t,
                OpCode::Rem_Un => (x as $u).checked_rem(y as $u).ok_or_else(|| division_fault(true))? as $t,
                OpCode::And => x & y,
                OpCode::Or => x | y,
                OpCode::Xor => x ^ y,
                _ => return Err(format!("`{op}` is not an integer operation")),
            };
            Ok(v)
        }
    };
}

int_binop!(int32_op, i32, u32);
int_binop!(int64_op, i64, u64);

fn division_fault(by_zero: bool) -> String {
    if by_zero {
        "divide by zero".into()
    } else {
        "arithmetic overflow".into()
    }
}

fn arith(op: OpCode, a: Value, b: Value) -> Result<Value, String> {
    match (a, b) {
        (Value::I32(x), Value::I32(y)) => int32_op(op, x, y).map(Value::I32),
        (Value::I64(x), Value::I64(y)) => int64_op(op, x, y).map(Value::I64),
        (Value::F64(x), Value::F64(y)) => {
            let v = match op {
                OpCode::Add => x + y,
                OpCode::Sub => x - y,
                OpCode::Mul => x * y,
                OpCode::Div => x / y,
                OpCode::Rem => x % y,
                _ => return Err(format!("`{op}` is not a float operation")),
            };
            Ok(Value::F64(v))
        }
        (a, b) => Err(format!("`{op}` on mismatched operands {a:?} and {b:?}")),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::F64(x), Value::F64(y)) => x == y,
        (a, b) => a == b,
    }
}

fn order(a: &Value, b: &Value, unsigned: bool) -> Result<Option<Ordering>, String> {
    match (a, b) {
        (Value::I32(x), Value::I32(y)) if unsigned => Ok(Some((*x as u32).cmp(&(*y as u32)))),
        (Value::I32(x), Value::I32(y)) => Ok(Some(x.cmp(y))),
        (Value::I64(x), Value::I64(y)) if unsigned => Ok(Some((*x as u64).cmp(&(*y as u64)))),
        (Value::I64(x), Value::I64(y)) => Ok(Some(x.cmp(y))),
        (Value::F64(x), Value::F64(y)) => Ok(x.partial_cmp(y)),
        (a, b) => Err(format!("cannot order {a:?} and {b:?}")),
    }
}

/// Outcome of a comparison or compare-and-branch opcode.
fn relation(op: OpCode, a: &Value, b: &Value) -> Result<bool, String> {
    use OpCode::*;
    match op {
        Ceq | Beq => return Ok(values_equal(a, b)),
        Bne_Un => return Ok(!values_equal(a, b)),
        _ => {}
    }
    let unsigned = matches!(op, Cgt_Un | Clt_Un | Bge_Un | Bgt_Un | Ble_Un | Blt_Un);
    let Some(ord) = order(a, b, unsigned)? else {
        // Unordered (NaN): only the `.un` forms succeed.
        return Ok(unsigned);
    };
    let r = match op {
        Cgt | Cgt_Un | Bgt | Bgt_Un => ord == Ordering::Greater,
        Clt | Clt_Un | Blt | Blt_Un => ord == Ordering::Less,
        Bge | Bge_Un => ord != Ordering::Less,
        Ble | Ble_Un => ord != Ordering::Greater,
        _ => return Err(format!("`{op}` is not a comparison")),
    };
    Ok(r)
}

fn convert(op: OpCode, v: Value) -> Result<Value, String> {
    let (i, u, x) = match v {
        Value::I32(n) => (n as i64, n as u32 as i64, n as f64),
        Value::I64(n) => (n, n, n as f64),
        Value::F64(n) => (n as i64, n as i64, n),
        other => return Err(format!("cannot convert {other:?}")),
    };
    let out = match op {
        OpCode::Conv_I1 => Value::I32(i as i8 as i32),
        OpCode::Conv_I2 => Value::I32(i as i16 as i32),
        OpCode::Conv_I4 => Value::I32(i as i32),
        OpCode::Conv_U1 => Value::I32(i as u8 as i32),
        OpCode::Conv_U2 => Value::I32(i as u16 as i32),
        OpCode::Conv_U4 => Value::I32(i as u32 as i32),
        OpCode::Conv_I8 => Value::I64(i),
        OpCode::Conv_U8 => Value::I64(u),
        OpCode::Conv_R4 => Value::F64(x as f32 as f64),
        OpCode::Conv_R8 => Value::F64(x),
        _ => return Err(format!("`{op}` is not a conversion")),
    };
    Ok(out)
}
