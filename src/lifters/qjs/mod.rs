//! Stack-engine bytecode lifter

pub mod lift;
pub mod module;
pub mod opcodes;

pub use lift::{decode, QjsInstruction, QjsLifter};
pub use module::{QjsFunction, QjsModule, QjsModuleParser};
pub use opcodes::{OpCategory, OpcodeInfo, OperandKind, QjsOp, StackArity};
