//! Control-flow and dataflow analyses

pub mod cfg;
pub mod ssa;
pub mod structure;

pub use cfg::{BasicBlock, CfgBuilder, ControlFlowGraph, Edge, EdgeKind, Phi, Terminator};
pub use ssa::{SsaBuilder, SsaForm};
