//! Error types and handling for the deobfuscation engine

use thiserror::Error;

use crate::common::types::NodeId;

/// Main result type for deobfuscator operations
pub type DeobfResult<T> = Result<T, DeobfError>;

/// Main error type encompassing all engine errors
#[derive(Error, Debug)]
pub enum DeobfError {
    #[error("structural error: {0}")]
    Structural(#[from] StructuralError),

    #[error("internal invariant violation: {0}")]
    Invariant(#[from] InvariantError),

    #[error("solver error: {0}")]
    Solver(#[from] SolverError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Ill-formed input that prevents building valid IR
///
/// Structural errors halt the affected function only; sibling functions in
/// the same module continue through the pipeline.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StructuralError {
    #[error("invalid magic bytes: expected {expected:?}, got {actual:?}")]
    InvalidMagic { expected: [u8; 4], actual: [u8; 4] },

    #[error("unsupported module version: {version}")]
    UnsupportedVersion { version: u32 },

    #[error("unexpected end of data at offset {offset}")]
    UnexpectedEof { offset: usize },

    #[error("varint exceeds supported range at offset {offset}")]
    VarIntOverflow { offset: usize },

    #[error("string contains invalid utf-8 at offset {offset}")]
    InvalidUtf8 { offset: usize },

    #[error("unknown constant-pool tag 0x{tag:02x} at offset {offset}")]
    UnknownConstantTag { tag: u8, offset: usize },

    #[error("truncated operand for {mnemonic} at offset {offset}")]
    TruncatedOperand { mnemonic: &'static str, offset: usize },

    #[error("operand stack underflow at offset {offset}")]
    StackUnderflow { offset: usize },

    #[error("branch target {target} is outside the function at offset {offset}")]
    BranchOutOfRange { target: i64, offset: usize },

    #[error("`break` without an enclosing loop or switch")]
    BreakOutsideLoop,

    #[error("`continue` without an enclosing loop")]
    ContinueOutsideLoop,

    #[error("unknown label `{label}`")]
    UnknownLabel { label: String },

    #[error("constant-pool index {index} out of range ({len} entries)")]
    ConstantIndexOutOfRange { index: usize, len: usize },
}

/// A pass observed an IR violating a core invariant
///
/// Never silently patched: aborts the pipeline with the offending node.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("node {node}: {message}")]
pub struct InvariantError {
    /// Identifier of the offending node
    pub node: NodeId,
    /// What was violated
    pub message: String,
}

impl InvariantError {
    /// Create an invariant error for a node
    pub fn new(node: NodeId, message: impl Into<String>) -> Self {
        Self {
            node,
            message: message.into(),
        }
    }
}

/// Errors surfaced by the SMT solver boundary
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SolverError {
    #[error("solver is unreachable: {reason}")]
    Unreachable { reason: String },

    #[error("predicate exceeds the complexity budget ({nodes} > {budget} operator nodes)")]
    ComplexityBudget { nodes: usize, budget: usize },

    #[error("pop on an empty assertion stack")]
    EmptyStack,
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("invalid configuration value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
}

impl DeobfError {
    /// Create an internal error with custom message
    pub fn internal<T: Into<String>>(msg: T) -> Self {
        DeobfError::Internal(msg.into())
    }

    /// Check if the error is recoverable at module granularity
    ///
    /// Structural errors are per-function: the rest of the module may still
    /// be lifted. Invariant violations abort the whole pipeline.
    pub fn is_recoverable(&self) -> bool {
        match self {
            DeobfError::Structural(_) => true,
            DeobfError::Solver(_) => true,
            DeobfError::Invariant(_) => false,
            DeobfError::Config(_) => false,
            DeobfError::Io(_) => false,
            DeobfError::Internal(_) => false,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            DeobfError::Structural(StructuralError::InvalidMagic { .. }) => ErrorSeverity::Critical,
            DeobfError::Structural(_) => ErrorSeverity::Medium,
            DeobfError::Invariant(_) => ErrorSeverity::Critical,
            DeobfError::Solver(_) => ErrorSeverity::Low,
            DeobfError::Config(_) => ErrorSeverity::High,
            DeobfError::Io(_) => ErrorSeverity::High,
            DeobfError::Internal(_) => ErrorSeverity::High,
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorSeverity::Low => write!(f, "LOW"),
            ErrorSeverity::Medium => write!(f, "MEDIUM"),
            ErrorSeverity::High => write!(f, "HIGH"),
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_errors_are_recoverable() {
        let err = DeobfError::Structural(StructuralError::StackUnderflow { offset: 12 });
        assert!(err.is_recoverable());
        assert_eq!(err.severity(), ErrorSeverity::Medium);
    }

    #[test]
    fn test_invariant_errors_abort() {
        let err = DeobfError::Invariant(InvariantError::new(7, "phi operand missing predecessor"));
        assert!(!err.is_recoverable());
        assert_eq!(err.severity(), ErrorSeverity::Critical);
        assert!(err.to_string().contains("node 7"));
    }

    #[test]
    fn test_bad_magic_is_critical() {
        let err = DeobfError::Structural(StructuralError::InvalidMagic {
            expected: *b"qjs\0",
            actual: *b"NOPE",
        });
        assert_eq!(err.severity(), ErrorSeverity::Critical);
    }
}
