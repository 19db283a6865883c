//! Register+accumulator bytecode lifter

pub mod lift;
pub mod module;
pub mod opcodes;

pub use lift::{decode, V8iInstruction, V8iLifter};
pub use module::{VirsFunction, VirsModule, VirsModuleParser};
pub use opcodes::{AccumMode, V8iOp, V8iOpcodeInfo, V8iOperand};
