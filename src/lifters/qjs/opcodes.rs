//! Closed opcode table for the stack engine
//!
//! Every opcode maps to a mnemonic, operand kinds, net stack effect,
//! category and throw/side-effect flags. Stack effects of the variadic
//! call opcodes are computed from their argument-count operand.

use serde::{Deserialize, Serialize};

/// Stack-engine opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QjsOp {
    Nop,
    PushConst,
    PushI32,
    PushTrue,
    PushFalse,
    PushNull,
    PushUndefined,
    Dup,
    Swap,
    Drop,
    GetLocal,
    PutLocal,
    GetArg,
    PutArg,
    GetVar,
    PutVar,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Sar,
    Shr,
    Neg,
    Plus,
    BitNot,
    LNot,
    TypeOf,
    Eq,
    Neq,
    StrictEq,
    StrictNeq,
    Lt,
    Lte,
    Gt,
    Gte,
    Goto,
    IfTrue,
    IfFalse,
    Call,
    CallMethod,
    GetField,
    PutField,
    GetArrayEl,
    PutArrayEl,
    ArrayFrom,
    ObjectNew,
    Ret,
    RetUndef,
    Throw,
    /// Unknown opcode byte; decoded as a one-byte placeholder
    Unknown(u8),
}

/// Operand kinds appearing in the instruction stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperandKind {
    /// 32-bit immediate, little-endian
    Immediate32,
    /// Constant-pool index, u16 little-endian
    ConstIndex,
    /// Local slot index, u8
    LocalIndex,
    /// Argument slot index, u8
    ArgIndex,
    /// Atom-table index, u16 little-endian
    AtomIndex,
    /// Signed branch offset relative to the next instruction, i32
    BranchOffset,
    /// Argument count, u8
    ArgCount,
}

impl OperandKind {
    /// Encoded width in bytes
    pub fn width(&self) -> usize {
        match self {
            OperandKind::Immediate32 | OperandKind::BranchOffset => 4,
            OperandKind::ConstIndex | OperandKind::AtomIndex => 2,
            OperandKind::LocalIndex | OperandKind::ArgIndex | OperandKind::ArgCount => 1,
        }
    }
}

/// Opcode category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpCategory {
    Stack,
    Arithmetic,
    Comparison,
    Logical,
    Variable,
    Property,
    ControlFlow,
    Function,
    Object,
    Iterator,
    Async,
    Generator,
}

/// How many operands an opcode pops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackArity {
    Fixed(u8),
    /// Computed from the argument-count operand plus the given base
    Variadic { base: u8 },
}

/// Static description of one opcode
#[derive(Debug, Clone, Copy)]
pub struct OpcodeInfo {
    pub mnemonic: &'static str,
    pub operands: &'static [OperandKind],
    pub pops: StackArity,
    pub pushes: u8,
    pub category: OpCategory,
    pub may_throw: bool,
    pub side_effect: bool,
}

impl QjsOp {
    /// Decode an opcode byte
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => QjsOp::Nop,
            0x01 => QjsOp::PushConst,
            0x02 => QjsOp::PushI32,
            0x03 => QjsOp::PushTrue,
            0x04 => QjsOp::PushFalse,
            0x05 => QjsOp::PushNull,
            0x06 => QjsOp::PushUndefined,
            0x10 => QjsOp::Dup,
            0x11 => QjsOp::Swap,
            0x12 => QjsOp::Drop,
            0x20 => QjsOp::GetLocal,
            0x21 => QjsOp::PutLocal,
            0x22 => QjsOp::GetArg,
            0x23 => QjsOp::PutArg,
            0x24 => QjsOp::GetVar,
            0x25 => QjsOp::PutVar,
            0x30 => QjsOp::Add,
            0x31 => QjsOp::Sub,
            0x32 => QjsOp::Mul,
            0x33 => QjsOp::Div,
            0x34 => QjsOp::Mod,
            0x35 => QjsOp::Pow,
            0x36 => QjsOp::BitAnd,
            0x37 => QjsOp::BitOr,
            0x38 => QjsOp::BitXor,
            0x39 => QjsOp::Shl,
            0x3A => QjsOp::Sar,
            0x3B => QjsOp::Shr,
            0x3C => QjsOp::Neg,
            0x3D => QjsOp::Plus,
            0x3E => QjsOp::BitNot,
            0x3F => QjsOp::LNot,
            0x40 => QjsOp::TypeOf,
            0x48 => QjsOp::Eq,
            0x49 => QjsOp::Neq,
            0x4A => QjsOp::StrictEq,
            0x4B => QjsOp::StrictNeq,
            0x4C => QjsOp::Lt,
            0x4D => QjsOp::Lte,
            0x4E => QjsOp::Gt,
            0x4F => QjsOp::Gte,
            0x50 => QjsOp::Goto,
            0x51 => QjsOp::IfTrue,
            0x52 => QjsOp::IfFalse,
            0x58 => QjsOp::Call,
            0x59 => QjsOp::CallMethod,
            0x60 => QjsOp::GetField,
            0x61 => QjsOp::PutField,
            0x62 => QjsOp::GetArrayEl,
            0x63 => QjsOp::PutArrayEl,
            0x68 => QjsOp::ArrayFrom,
            0x69 => QjsOp::ObjectNew,
            0x70 => QjsOp::Ret,
            0x71 => QjsOp::RetUndef,
            0x72 => QjsOp::Throw,
            other => QjsOp::Unknown(other),
        }
    }

    /// Encoded opcode byte
    pub fn to_byte(&self) -> u8 {
        match self {
            QjsOp::Nop => 0x00,
            QjsOp::PushConst => 0x01,
            QjsOp::PushI32 => 0x02,
            QjsOp::PushTrue => 0x03,
            QjsOp::PushFalse => 0x04,
            QjsOp::PushNull => 0x05,
            QjsOp::PushUndefined => 0x06,
            QjsOp::Dup => 0x10,
            QjsOp::Swap => 0x11,
            QjsOp::Drop => 0x12,
            QjsOp::GetLocal => 0x20,
            QjsOp::PutLocal => 0x21,
            QjsOp::GetArg => 0x22,
            QjsOp::PutArg => 0x23,
            QjsOp::GetVar => 0x24,
            QjsOp::PutVar => 0x25,
            QjsOp::Add => 0x30,
            QjsOp::Sub => 0x31,
            QjsOp::Mul => 0x32,
            QjsOp::Div => 0x33,
            QjsOp::Mod => 0x34,
            QjsOp::Pow => 0x35,
            QjsOp::BitAnd => 0x36,
            QjsOp::BitOr => 0x37,
            QjsOp::BitXor => 0x38,
            QjsOp::Shl => 0x39,
            QjsOp::Sar => 0x3A,
            QjsOp::Shr => 0x3B,
            QjsOp::Neg => 0x3C,
            QjsOp::Plus => 0x3D,
            QjsOp::BitNot => 0x3E,
            QjsOp::LNot => 0x3F,
            QjsOp::TypeOf => 0x40,
            QjsOp::Eq => 0x48,
            QjsOp::Neq => 0x49,
            QjsOp::StrictEq => 0x4A,
            QjsOp::StrictNeq => 0x4B,
            QjsOp::Lt => 0x4C,
            QjsOp::Lte => 0x4D,
            QjsOp::Gt => 0x4E,
            QjsOp::Gte => 0x4F,
            QjsOp::Goto => 0x50,
            QjsOp::IfTrue => 0x51,
            QjsOp::IfFalse => 0x52,
            QjsOp::Call => 0x58,
            QjsOp::CallMethod => 0x59,
            QjsOp::GetField => 0x60,
            QjsOp::PutField => 0x61,
            QjsOp::GetArrayEl => 0x62,
            QjsOp::PutArrayEl => 0x63,
            QjsOp::ArrayFrom => 0x68,
            QjsOp::ObjectNew => 0x69,
            QjsOp::Ret => 0x70,
            QjsOp::RetUndef => 0x71,
            QjsOp::Throw => 0x72,
            QjsOp::Unknown(byte) => *byte,
        }
    }

    /// Static opcode description
    pub fn info(&self) -> OpcodeInfo {
        use OpCategory::*;
        use OperandKind::*;
        use StackArity::*;

        let entry = |mnemonic,
                     operands,
                     pops,
                     pushes,
                     category,
                     may_throw,
                     side_effect| OpcodeInfo {
            mnemonic,
            operands,
            pops,
            pushes,
            category,
            may_throw,
            side_effect,
        };

        match self {
            QjsOp::Nop => entry("nop", &[], Fixed(0), 0, Stack, false, false),
            QjsOp::PushConst => {
                entry("push_const", &[ConstIndex], Fixed(0), 1, Stack, false, false)
            }
            QjsOp::PushI32 => entry("push_i32", &[Immediate32], Fixed(0), 1, Stack, false, false),
            QjsOp::PushTrue => entry("push_true", &[], Fixed(0), 1, Stack, false, false),
            QjsOp::PushFalse => entry("push_false", &[], Fixed(0), 1, Stack, false, false),
            QjsOp::PushNull => entry("push_null", &[], Fixed(0), 1, Stack, false, false),
            QjsOp::PushUndefined => {
                entry("push_undefined", &[], Fixed(0), 1, Stack, false, false)
            }
            QjsOp::Dup => entry("dup", &[], Fixed(1), 2, Stack, false, false),
            QjsOp::Swap => entry("swap", &[], Fixed(2), 2, Stack, false, false),
            QjsOp::Drop => entry("drop", &[], Fixed(1), 0, Stack, false, false),
            QjsOp::GetLocal => {
                entry("get_local", &[LocalIndex], Fixed(0), 1, Variable, false, false)
            }
            QjsOp::PutLocal => {
                entry("put_local", &[LocalIndex], Fixed(1), 0, Variable, false, true)
            }
            QjsOp::GetArg => entry("get_arg", &[ArgIndex], Fixed(0), 1, Variable, false, false),
            QjsOp::PutArg => entry("put_arg", &[ArgIndex], Fixed(1), 0, Variable, false, true),
            QjsOp::GetVar => entry("get_var", &[AtomIndex], Fixed(0), 1, Variable, true, false),
            QjsOp::PutVar => entry("put_var", &[AtomIndex], Fixed(1), 0, Variable, true, true),
            QjsOp::Add => entry("add", &[], Fixed(2), 1, Arithmetic, true, false),
            QjsOp::Sub => entry("sub", &[], Fixed(2), 1, Arithmetic, true, false),
            QjsOp::Mul => entry("mul", &[], Fixed(2), 1, Arithmetic, true, false),
            QjsOp::Div => entry("div", &[], Fixed(2), 1, Arithmetic, true, false),
            QjsOp::Mod => entry("mod", &[], Fixed(2), 1, Arithmetic, true, false),
            QjsOp::Pow => entry("pow", &[], Fixed(2), 1, Arithmetic, true, false),
            QjsOp::BitAnd => entry("bit_and", &[], Fixed(2), 1, Arithmetic, true, false),
            QjsOp::BitOr => entry("bit_or", &[], Fixed(2), 1, Arithmetic, true, false),
            QjsOp::BitXor => entry("bit_xor", &[], Fixed(2), 1, Arithmetic, true, false),
            QjsOp::Shl => entry("shl", &[], Fixed(2), 1, Arithmetic, true, false),
            QjsOp::Sar => entry("sar", &[], Fixed(2), 1, Arithmetic, true, false),
            QjsOp::Shr => entry("shr", &[], Fixed(2), 1, Arithmetic, true, false),
            QjsOp::Neg => entry("neg", &[], Fixed(1), 1, Arithmetic, true, false),
            QjsOp::Plus => entry("plus", &[], Fixed(1), 1, Arithmetic, true, false),
            QjsOp::BitNot => entry("bit_not", &[], Fixed(1), 1, Arithmetic, true, false),
            QjsOp::LNot => entry("lnot", &[], Fixed(1), 1, Logical, false, false),
            QjsOp::TypeOf => entry("typeof", &[], Fixed(1), 1, Logical, false, false),
            QjsOp::Eq => entry("eq", &[], Fixed(2), 1, Comparison, true, false),
            QjsOp::Neq => entry("neq", &[], Fixed(2), 1, Comparison, true, false),
            QjsOp::StrictEq => entry("strict_eq", &[], Fixed(2), 1, Comparison, false, false),
            QjsOp::StrictNeq => entry("strict_neq", &[], Fixed(2), 1, Comparison, false, false),
            QjsOp::Lt => entry("lt", &[], Fixed(2), 1, Comparison, true, false),
            QjsOp::Lte => entry("lte", &[], Fixed(2), 1, Comparison, true, false),
            QjsOp::Gt => entry("gt", &[], Fixed(2), 1, Comparison, true, false),
            QjsOp::Gte => entry("gte", &[], Fixed(2), 1, Comparison, true, false),
            QjsOp::Goto => {
                entry("goto", &[BranchOffset], Fixed(0), 0, ControlFlow, false, false)
            }
            QjsOp::IfTrue => {
                entry("if_true", &[BranchOffset], Fixed(1), 0, ControlFlow, false, false)
            }
            QjsOp::IfFalse => {
                entry("if_false", &[BranchOffset], Fixed(1), 0, ControlFlow, false, false)
            }
            QjsOp::Call => {
                entry("call", &[ArgCount], Variadic { base: 1 }, 1, Function, true, true)
            }
            QjsOp::CallMethod => entry(
                "call_method",
                &[AtomIndex, ArgCount],
                Variadic { base: 1 },
                1,
                Function,
                true,
                true,
            ),
            QjsOp::GetField => {
                entry("get_field", &[AtomIndex], Fixed(1), 1, Property, true, false)
            }
            QjsOp::PutField => {
                entry("put_field", &[AtomIndex], Fixed(2), 0, Property, true, true)
            }
            QjsOp::GetArrayEl => entry("get_array_el", &[], Fixed(2), 1, Property, true, false),
            QjsOp::PutArrayEl => entry("put_array_el", &[], Fixed(3), 0, Property, true, true),
            QjsOp::ArrayFrom => entry(
                "array_from",
                &[ArgCount],
                Variadic { base: 0 },
                1,
                Object,
                false,
                false,
            ),
            QjsOp::ObjectNew => entry("object_new", &[], Fixed(0), 1, Object, false, false),
            QjsOp::Ret => entry("ret", &[], Fixed(1), 0, ControlFlow, false, false),
            QjsOp::RetUndef => entry("ret_undef", &[], Fixed(0), 0, ControlFlow, false, false),
            QjsOp::Throw => entry("throw", &[], Fixed(1), 0, ControlFlow, true, true),
            QjsOp::Unknown(_) => entry("unknown", &[], Fixed(0), 0, Stack, false, false),
        }
    }

    /// True for opcodes ending a basic block
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            QjsOp::Goto | QjsOp::IfTrue | QjsOp::IfFalse | QjsOp::Ret | QjsOp::RetUndef | QjsOp::Throw
        )
    }
}
