use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Shape of the operand an opcode carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    None,
    /// Signed 8-bit immediate stored as `Int32`.
    ShortInt,
    Int32,
    Int64,
    Float32,
    Float64,
    String,
    ShortLocal,
    Local,
    ShortArg,
    Arg,
    ShortBranch,
    Branch,
    Switch,
    Type,
    Method,
    Field,
    Token,
}

impl OperandKind {
    /// Encoded operand size in bytes (`Switch` excludes the per-target entries).
    pub fn size(self) -> u32 {
        match self {
            OperandKind::None => 0,
            OperandKind::ShortInt | OperandKind::ShortLocal | OperandKind::ShortArg => 1,
            OperandKind::ShortBranch => 1,
            OperandKind::Local | OperandKind::Arg => 2,
            OperandKind::Int64 | OperandKind::Float64 => 8,
            OperandKind::Int32
            | OperandKind::Float32
            | OperandKind::String
            | OperandKind::Branch
            | OperandKind::Switch
            | OperandKind::Type
            | OperandKind::Method
            | OperandKind::Field
            | OperandKind::Token => 4,
        }
    }
}

macro_rules! opcodes {
    ($($variant:ident => $mnemonic:literal, $kind:ident, $size:literal;)*) => {
        /// Instruction opcodes, a subset of the CIL instruction set.
        ///
        /// Both macro forms (`ldc.i4.0`, `br.s`, ...) and their canonical long
        /// forms are represented; see [`OpCode::canonical`].
        #[allow(non_camel_case_types)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "&'static str")]
        pub enum OpCode {
            $($variant,)*
        }

        impl OpCode {
            /// Every opcode, in declaration order.
            pub const ALL: &'static [OpCode] = &[$(OpCode::$variant,)*];

            /// Assembler mnemonic, for example `ldc.i4.s`.
            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(OpCode::$variant => $mnemonic,)*
                }
            }

            pub fn operand_kind(self) -> OperandKind {
                match self {
                    $(OpCode::$variant => OperandKind::$kind,)*
                }
            }

            /// Encoded opcode size in bytes.
            pub fn size(self) -> u32 {
                match self {
                    $(OpCode::$variant => $size,)*
                }
            }

            pub fn from_mnemonic(name: &str) -> Option<OpCode> {
                match name {
                    $($mnemonic => Some(OpCode::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

opcodes! {
    Nop => "nop", None, 1;
    Dup => "dup", None, 1;
    Pop => "pop", None, 1;
    Ret => "ret", None, 1;
    Throw => "throw", None, 1;

    Ldarg_0 => "ldarg.0", None, 1;
    Ldarg_1 => "ldarg.1", None, 1;
    Ldarg_2 => "ldarg.2", None, 1;
    Ldarg_3 => "ldarg.3", None, 1;
    Ldarg_S => "ldarg.s", ShortArg, 1;
    Ldarg => "ldarg", Arg, 2;
    Starg_S => "starg.s", ShortArg, 1;
    Starg => "starg", Arg, 2;

    Ldloc_0 => "ldloc.0", None, 1;
    Ldloc_1 => "ldloc.1", None, 1;
    Ldloc_2 => "ldloc.2", None, 1;
    Ldloc_3 => "ldloc.3", None, 1;
    Ldloc_S => "ldloc.s", ShortLocal, 1;
    Ldloc => "ldloc", Local, 2;
    Stloc_0 => "stloc.0", None, 1;
    Stloc_1 => "stloc.1", None, 1;
    Stloc_2 => "stloc.2", None, 1;
    Stloc_3 => "stloc.3", None, 1;
    Stloc_S => "stloc.s", ShortLocal, 1;
    Stloc => "stloc", Local, 2;

    Ldc_I4_M1 => "ldc.i4.m1", None, 1;
    Ldc_I4_0 => "ldc.i4.0", None, 1;
    Ldc_I4_1 => "ldc.i4.1", None, 1;
    Ldc_I4_2 => "ldc.i4.2", None, 1;
    Ldc_I4_3 => "ldc.i4.3", None, 1;
    Ldc_I4_4 => "ldc.i4.4", None, 1;
    Ldc_I4_5 => "ldc.i4.5", None, 1;
    Ldc_I4_6 => "ldc.i4.6", None, 1;
    Ldc_I4_7 => "ldc.i4.7", None, 1;
    Ldc_I4_8 => "ldc.i4.8", None, 1;
    Ldc_I4_S => "ldc.i4.s", ShortInt, 1;
    Ldc_I4 => "ldc.i4", Int32, 1;
    Ldc_I8 => "ldc.i8", Int64, 1;
    Ldc_R4 => "ldc.r4", Float32, 1;
    Ldc_R8 => "ldc.r8", Float64, 1;
    Ldstr => "ldstr", String, 1;
    Ldnull => "ldnull", None, 1;

    Add => "add", None, 1;
    Sub => "sub", None, 1;
    Mul => "mul", None, 1;
    Div => "div", None, 1;
    Div_Un => "div.un", None, 1;
    Rem => "rem", None, 1;
    Rem_Un => "rem.un", None, 1;
    And => "and", None, 1;
    Or => "or", None, 1;
    Xor => "xor", None, 1;
    Shl => "shl", None, 1;
    Shr => "shr", None, 1;
    Shr_Un => "shr.un", None, 1;
    Neg => "neg", None, 1;
    Not => "not", None, 1;

    Ceq => "ceq", None, 2;
    Cgt => "cgt", None, 2;
    Cgt_Un => "cgt.un", None, 2;
    Clt => "clt", None, 2;
    Clt_Un => "clt.un", None, 2;

    Br_S => "br.s", ShortBranch, 1;
    Br => "br", Branch, 1;
    Brfalse_S => "brfalse.s", ShortBranch, 1;
    Brfalse => "brfalse", Branch, 1;
    Brtrue_S => "brtrue.s", ShortBranch, 1;
    Brtrue => "brtrue", Branch, 1;
    Beq_S => "beq.s", ShortBranch, 1;
    Beq => "beq", Branch, 1;
    Bne_Un_S => "bne.un.s", ShortBranch, 1;
    Bne_Un => "bne.un", Branch, 1;
    Bge_S => "bge.s", ShortBranch, 1;
    Bge => "bge", Branch, 1;
    Bge_Un_S => "bge.un.s", ShortBranch, 1;
    Bge_Un => "bge.un", Branch, 1;
    Bgt_S => "bgt.s", ShortBranch, 1;
    Bgt => "bgt", Branch, 1;
    Bgt_Un_S => "bgt.un.s", ShortBranch, 1;
    Bgt_Un => "bgt.un", Branch, 1;
    Ble_S => "ble.s", ShortBranch, 1;
    Ble => "ble", Branch, 1;
    Ble_Un_S => "ble.un.s", ShortBranch, 1;
    Ble_Un => "ble.un", Branch, 1;
    Blt_S => "blt.s", ShortBranch, 1;
    Blt => "blt", Branch, 1;
    Blt_Un_S => "blt.un.s", ShortBranch, 1;
    Blt_Un => "blt.un", Branch, 1;
    Switch => "switch", Switch, 1;

    Conv_I1 => "conv.i1", None, 1;
    Conv_I2 => "conv.i2", None, 1;
    Conv_I4 => "conv.i4", None, 1;
    Conv_I8 => "conv.i8", None, 1;
    Conv_U1 => "conv.u1", None, 1;
    Conv_U2 => "conv.u2", None, 1;
    Conv_U4 => "conv.u4", None, 1;
    Conv_U8 => "conv.u8", None, 1;
    Conv_R4 => "conv.r4", None, 1;
    Conv_R8 => "conv.r8", None, 1;

    Newarr => "newarr", Type, 1;
    Ldlen => "ldlen", None, 1;
    Ldtoken => "ldtoken", Token, 1;
    Stelem_I1 => "stelem.i1", None, 1;
    Stelem_I2 => "stelem.i2", None, 1;
    Stelem_I4 => "stelem.i4", None, 1;
    Stelem_I8 => "stelem.i8", None, 1;
    Stelem_R4 => "stelem.r4", None, 1;
    Stelem_R8 => "stelem.r8", None, 1;
    Stelem_Ref => "stelem.ref", None, 1;
    Ldelem_I1 => "ldelem.i1", None, 1;
    Ldelem_U1 => "ldelem.u1", None, 1;
    Ldelem_I2 => "ldelem.i2", None, 1;
    Ldelem_U2 => "ldelem.u2", None, 1;
    Ldelem_I4 => "ldelem.i4", None, 1;
    Ldelem_U4 => "ldelem.u4", None, 1;
    Ldelem_I8 => "ldelem.i8", None, 1;
    Ldelem_R4 => "ldelem.r4", None, 1;
    Ldelem_R8 => "ldelem.r8", None, 1;
    Ldelem_Ref => "ldelem.ref", None, 1;

    Ldfld => "ldfld", Field, 1;
    Stfld => "stfld", Field, 1;
    Ldsfld => "ldsfld", Field, 1;
    Stsfld => "stsfld", Field, 1;

    Call => "call", Method, 1;
    Callvirt => "callvirt", Method, 1;
    Newobj => "newobj", Method, 1;
}

impl OpCode {
    /// Canonical (long) form of a macro opcode, together with the implied
    /// integer operand for the constant-carrying macro forms.
    pub fn canonical(self) -> (OpCode, Option<i32>) {
        use OpCode::*;
        match self {
            Ldc_I4_M1 => (Ldc_I4, Some(-1)),
            Ldc_I4_0 => (Ldc_I4, Some(0)),
            Ldc_I4_1 => (Ldc_I4, Some(1)),
            Ldc_I4_2 => (Ldc_I4, Some(2)),
            Ldc_I4_3 => (Ldc_I4, Some(3)),
            Ldc_I4_4 => (Ldc_I4, Some(4)),
            Ldc_I4_5 => (Ldc_I4, Some(5)),
            Ldc_I4_6 => (Ldc_I4, Some(6)),
            Ldc_I4_7 => (Ldc_I4, Some(7)),
            Ldc_I4_8 => (Ldc_I4, Some(8)),
            Ldarg_0 => (Ldarg, Some(0)),
            Ldarg_1 => (Ldarg, Some(1)),
            Ldarg_2 => (Ldarg, Some(2)),
            Ldarg_3 => (Ldarg, Some(3)),
            Ldloc_0 => (Ldloc, Some(0)),
            Ldloc_1 => (Ldloc, Some(1)),
            Ldloc_2 => (Ldloc, Some(2)),
            Ldloc_3 => (Ldloc, Some(3)),
            Stloc_0 => (Stloc, Some(0)),
            Stloc_1 => (Stloc, Some(1)),
            Stloc_2 => (Stloc, Some(2)),
            Stloc_3 => (Stloc, Some(3)),
            Ldc_I4_S => (Ldc_I4, None),
            Ldarg_S => (Ldarg, None),
            Starg_S => (Starg, None),
            Ldloc_S => (Ldloc, None),
            Stloc_S => (Stloc, None),
            other => (other.long_branch(), None),
        }
    }

    /// Long form of a short branch; other opcodes are returned unchanged.
    pub fn long_branch(self) -> OpCode {
        use OpCode::*;
        match self {
            Br_S => Br,
            Brfalse_S => Brfalse,
            Brtrue_S => Brtrue,
            Beq_S => Beq,
            Bne_Un_S => Bne_Un,
            Bge_S => Bge,
            Bge_Un_S => Bge_Un,
            Bgt_S => Bgt,
            Bgt_Un_S => Bgt_Un,
            Ble_S => Ble,
            Ble_Un_S => Ble_Un,
            Blt_S => Blt,
            Blt_Un_S => Blt_Un,
            other => other,
        }
    }

    /// Short form of a long branch; other opcodes are returned unchanged.
    pub fn short_branch(self) -> OpCode {
        use OpCode::*;
        match self {
            Br => Br_S,
            Brfalse => Brfalse_S,
            Brtrue => Brtrue_S,
            Beq => Beq_S,
            Bne_Un => Bne_Un_S,
            Bge => Bge_S,
            Bge_Un => Bge_Un_S,
            Bgt => Bgt_S,
            Bgt_Un => Bgt_Un_S,
            Ble => Ble_S,
            Ble_Un => Ble_Un_S,
            Blt => Blt_S,
            Blt_Un => Blt_Un_S,
            other => other,
        }
    }

    pub fn is_branch(self) -> bool {
        matches!(
            self.operand_kind(),
            OperandKind::Branch | OperandKind::ShortBranch | OperandKind::Switch
        )
    }

    /// Branches that fall through when not taken.
    pub fn is_conditional_branch(self) -> bool {
        self.is_branch() && !matches!(self.long_branch(), OpCode::Br)
    }

    /// True for every integer or float constant load, in any form.
    pub fn is_ldc(self) -> bool {
        matches!(
            self.canonical().0,
            OpCode::Ldc_I4 | OpCode::Ldc_I8 | OpCode::Ldc_R4 | OpCode::Ldc_R8
        )
    }

    pub fn is_stelem(self) -> bool {
        matches!(
            self,
            OpCode::Stelem_I1
                | OpCode::Stelem_I2
                | OpCode::Stelem_I4
                | OpCode::Stelem_I8
                | OpCode::Stelem_R4
                | OpCode::Stelem_R8
                | OpCode::Stelem_Ref
        )
    }

    pub fn is_call(self) -> bool {
        matches!(self, OpCode::Call | OpCode::Callvirt | OpCode::Newobj)
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

impl From<OpCode> for &'static str {
    fn from(op: OpCode) -> Self {
        op.mnemonic()
    }
}

impl TryFrom<String> for OpCode {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        OpCode::from_mnemonic(&value).ok_or(ModelError::UnknownOpCode(value))
    }
}
