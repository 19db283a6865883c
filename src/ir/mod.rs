//! Intermediate representation: node model, factory and pipeline state

pub mod factory;
pub mod node;
pub mod state;

pub use node::{ExprKind, ExprNode, IrFunction, IrProgram, StmtKind, StmtNode};
pub use state::{FunctionAnalysis, IrState};
