//! Bytecode lifters: engine modules in, IR programs out

pub mod pool;
pub mod qjs;
pub mod reader;
pub mod v8i;

pub use pool::{ConstantPool, PoolEntry};
