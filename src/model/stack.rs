//! Evaluation-stack behaviour of instructions and a body verifier.

use super::instruction::{Instruction, MethodBody, Operand};
use super::opcode::OpCode;
use super::types::TypeRef;
use crate::error::ModelError;

/// Number of values an instruction pops and pushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackEffect {
    pub pops: u32,
    pub pushes: u32,
}

impl StackEffect {
    const fn new(pops: u32, pushes: u32) -> Self {
        Self { pops, pushes }
    }

    /// Net change in depth.
    pub fn net(self) -> i64 {
        self.pushes as i64 - self.pops as i64
    }
}

/// Stack effect of one instruction, in either macro or canonical form.
///
/// `returns_value` tells whether a `ret` in this body pops a value.
pub fn stack_effect(ins: &Instruction, returns_value: bool) -> StackEffect {
    use OpCode::*;
    let op = ins.op.canonical().0;
    match op {
        Nop | Br => StackEffect::new(0, 0),
        Ret => StackEffect::new(u32::from(returns_value), 0),
        Throw | Pop | Starg | Stloc | Brfalse | Brtrue | Switch | Stsfld => {
            StackEffect::new(1, 0)
        }
        Dup => StackEffect::new(1, 2),
        Ldarg | Ldloc | Ldc_I4 | Ldc_I8 | Ldc_R4 | Ldc_R8 | Ldstr | Ldnull | Ldtoken
        | Ldsfld => StackEffect::new(0, 1),
        Add | Sub | Mul | Div | Div_Un | Rem | Rem_Un | And | Or | Xor | Shl | Shr | Shr_Un
        | Ceq | Cgt | Cgt_Un | Clt | Clt_Un => StackEffect::new(2, 1),
        Neg | Not | Conv_I1 | Conv_I2 | Conv_I4 | Conv_I8 | Conv_U1 | Conv_U2 | Conv_U4
        | Conv_U8 | Conv_R4 | Conv_R8 | Newarr | Ldlen | Ldfld => StackEffect::new(1, 1),
        Beq | Bne_Un | Bge | Bge_Un | Bgt | Bgt_Un | Ble | Ble_Un | Blt | Blt_Un | Stfld => {
            StackEffect::new(2, 0)
        }
        Stelem_I1 | Stelem_I2 | Stelem_I4 | Stelem_I8 | Stelem_R4 | Stelem_R8 | Stelem_Ref => {
            StackEffect::new(3, 0)
        }
        Ldelem_I1 | Ldelem_U1 | Ldelem_I2 | Ldelem_U2 | Ldelem_I4 | Ldelem_U4 | Ldelem_I8
        | Ldelem_R4 | Ldelem_R8 | Ldelem_Ref => StackEffect::new(2, 1),
        Call | Callvirt | Newobj => call_effect(op, ins),
        // Macro forms were canonicalized above.
        _ => StackEffect::new(0, 0),
    }
}

fn call_effect(op: OpCode, ins: &Instruction) -> StackEffect {
    let Some(method) = ins.method() else {
        return StackEffect::new(0, 0);
    };
    let params = method.params.len() as u32;
    match op {
        OpCode::Newobj => StackEffect::new(params, 1),
        _ => {
            let receiver = u32::from(op == OpCode::Callvirt || method.has_this);
            let result = u32::from(method.return_type != TypeRef::Void);
            StackEffect::new(params + receiver, result)
        }
    }
}

/// Stack depth before each instruction, or `None` for unreachable ones.
///
/// Fails on underflow, on inconsistent depths at a join point, on a `ret`
/// that leaves values behind, and on control falling off the end.
pub fn depths(body: &MethodBody, returns_value: bool) -> Result<Vec<Option<u32>>, ModelError> {
    let len = body.len();
    let mut depth: Vec<Option<u32>> = vec![None; len];
    if len == 0 {
        return Ok(depth);
    }
    depth[0] = Some(0);
    let mut work = vec![0usize];

    while let Some(i) = work.pop() {
        let ins = &body.instructions[i];
        let d = depth[i].unwrap_or(0);
        let effect = stack_effect(ins, returns_value);
        if d < effect.pops {
            return Err(stack_error(i, format!("`{ins}` underflows a stack of depth {d}")));
        }
        let after = d - effect.pops + effect.pushes;

        let op = ins.op.canonical().0;
        let mut successors = Vec::new();
        match op {
            OpCode::Ret => {
                if after != 0 {
                    return Err(stack_error(i, format!("`ret` leaves {after} value(s) on the stack")));
                }
            }
            OpCode::Throw => {}
            _ => {
                match &ins.operand {
                    Operand::Branch(t) if op.is_branch() => successors.push(*t),
                    Operand::Switch(ts) => successors.extend(ts.iter().copied()),
                    _ => {}
                }
                if op != OpCode::Br {
                    successors.push(i + 1);
                }
            }
        }

        for next in successors {
            if next >= len {
                return Err(stack_error(i, "control flows past the end of the body".into()));
            }
            match depth[next] {
                Some(existing) if existing != after => {
                    return Err(stack_error(
                        next,
                        format!("inconsistent stack depth ({existing} vs {after})"),
                    ));
                }
                Some(_) => {}
                None => {
                    depth[next] = Some(after);
                    work.push(next);
                }
            }
        }
    }

    Ok(depth)
}

/// Check that a body is stack-consistent.
pub fn verify(body: &MethodBody, returns_value: bool) -> Result<(), ModelError> {
    depths(body, returns_value).map(|_| ())
}

fn stack_error(index: usize, reason: String) -> ModelError {
    ModelError::Stack { index, reason }
}
