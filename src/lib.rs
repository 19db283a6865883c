//! # Unweave
//!
//! An IR-based JavaScript deobfuscation engine structured as a compiler:
//! obfuscated source (lifted by an external parser) or engine bytecode is
//! raised into a language-neutral intermediate representation, transformed
//! by a pipeline of analysis and rewriting passes, then handed back to an
//! external printer.
//!
//! ## Architecture Overview
//!
//! ```text
//! Source → Parser → IR tree → CFG → SSA → Pass pipeline → IR tree → Printer
//!                     ↑
//! Bytecode → Lifter ──┘        (QJS stack engine / V8I register engine)
//! ```
//!
//! When a function embeds a switch-dispatched interpreter, the
//! devirtualiser lifts its virtual opcodes back to ordinary IR before the
//! pipeline runs.
//!
//! ## Quick Start
//!
//! ```rust
//! use unweave::{Deobfuscator, DeobfuscatorConfig};
//! use unweave::ir::{factory, IrProgram};
//!
//! let program = IrProgram {
//!     functions: vec![factory::ir_function(
//!         "main",
//!         vec![],
//!         vec![factory::return_stmt(Some(factory::binary(
//!             unweave::common::types::BinaryOp::Add,
//!             factory::number(1.0),
//!             factory::number(2.0),
//!         )))],
//!     )],
//! };
//!
//! let deobfuscator = Deobfuscator::new(DeobfuscatorConfig::default());
//! let result = deobfuscator.deobfuscate(program)?;
//! assert_eq!(result.program.functions.len(), 1);
//! # Ok::<(), unweave::DeobfError>(())
//! ```

pub mod analysis;
pub mod common;
pub mod devirt;
pub mod ir;
pub mod lifters;
pub mod passes;
pub mod solver;

use indexmap::IndexMap;
use tracing::info;

// Re-export main types for convenience
pub use common::{
    config::{ConfigLoader, DeobfuscatorConfig},
    errors::{DeobfError, DeobfResult, StructuralError},
    types::{Warning, WarningKind},
};
pub use ir::{IrProgram, IrState};
pub use passes::{PassMetrics, Pipeline, TraceSink};

use devirt::Devirtualizer;
use lifters::qjs::{QjsLifter, QjsModuleParser};
use lifters::v8i::{V8iLifter, VirsModuleParser};

/// Main deobfuscator facade providing the high-level API
pub struct Deobfuscator {
    config: DeobfuscatorConfig,
    devirtualizer: Devirtualizer,
}

impl Deobfuscator {
    /// Create a new deobfuscator with configuration
    pub fn new(config: DeobfuscatorConfig) -> Self {
        Self {
            devirtualizer: Devirtualizer::new(&config.devirt),
            config,
        }
    }

    /// Run the full pipeline over an IR program
    ///
    /// Functions containing a detected interpreter are devirtualised
    /// first; the standard pass pipeline then runs to a fixed point.
    pub fn deobfuscate(&self, program: IrProgram) -> DeobfResult<DeobfuscationResult> {
        self.deobfuscate_with_warnings(program, Vec::new())
    }

    /// Parse and lift a stack-engine bytecode module, then run the
    /// pipeline over the lifted program
    pub fn lift_stack_module(&self, data: &[u8]) -> DeobfResult<DeobfuscationResult> {
        let parser = QjsModuleParser::new(&self.config.lifters);
        let (module, mut warnings) = parser.parse(data)?;
        let (program, lift_warnings) = QjsLifter::new().lift(&module);
        warnings.extend(lift_warnings);
        self.deobfuscate_with_warnings(program, warnings)
    }

    /// Parse and lift a register-engine bytecode module, then run the
    /// pipeline over the lifted program
    pub fn lift_register_module(&self, data: &[u8]) -> DeobfResult<DeobfuscationResult> {
        let parser = VirsModuleParser::new(&self.config.lifters);
        let (module, mut warnings) = parser.parse(data)?;
        let lifter = V8iLifter::new(&self.config.lifters);
        let (program, lift_warnings) = lifter.lift(&module);
        warnings.extend(lift_warnings);
        self.deobfuscate_with_warnings(program, warnings)
    }

    fn deobfuscate_with_warnings(
        &self,
        mut program: IrProgram,
        mut warnings: Vec<Warning>,
    ) -> DeobfResult<DeobfuscationResult> {
        // Devirtualise embedded interpreters before the pipeline sees them
        for function in &mut program.functions {
            let outcome = self.devirtualizer.devirtualize(function);
            warnings.extend(outcome.warnings);
            if let Some(devirtualized) = outcome.function {
                info!(
                    function = %function.name,
                    confidence = outcome.confidence,
                    "inlining devirtualised body"
                );
                function.body = devirtualized.body;
            }
        }

        let mut state = IrState::new(program);
        state.warnings.append(&mut warnings);

        let pipeline = Pipeline::standard(&self.config);
        let report = pipeline.run(state, None)?;

        Ok(DeobfuscationResult {
            program: report.state.program,
            warnings: report.state.warnings,
            metrics: report.metrics,
            iterations: report.iterations,
            partial: report.partial,
        })
    }
}

/// Complete deobfuscation result
#[derive(Debug)]
pub struct DeobfuscationResult {
    /// The transformed IR program, ready for the external printer
    pub program: IrProgram,
    /// Accumulated warnings from lifting, devirtualisation and passes
    pub warnings: Vec<Warning>,
    /// Aggregated per-pass metrics
    pub metrics: IndexMap<String, PassMetrics>,
    /// Fixed-point iterations performed
    pub iterations: u32,
    /// True when a budget or iteration cap cut the run short
    pub partial: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::BinaryOp;
    use crate::ir::factory;
    use crate::ir::node::{ExprKind, StmtKind};

    #[test]
    fn test_facade_folds_constants() {
        let program = IrProgram {
            functions: vec![factory::ir_function(
                "main",
                vec![],
                vec![factory::return_stmt(Some(factory::binary(
                    BinaryOp::Add,
                    factory::number(1.0),
                    factory::number(2.0),
                )))],
            )],
        };
        let deobfuscator = Deobfuscator::new(DeobfuscatorConfig::default());
        let result = deobfuscator.deobfuscate(program).unwrap();
        let StmtKind::Return(Some(value)) = &result.program.functions[0].body[0].kind else {
            panic!("expected return");
        };
        assert_eq!(
            value.kind,
            ExprKind::Literal(crate::common::types::Literal::Number(3.0))
        );
        assert!(!result.partial);
        assert!(result.metrics.contains_key("constant-propagation"));
    }

    #[test]
    fn test_facade_reports_bad_magic() {
        let deobfuscator = Deobfuscator::new(DeobfuscatorConfig::default());
        let error = deobfuscator.lift_stack_module(b"XXXX\0\0\0\0").unwrap_err();
        assert!(matches!(
            error,
            DeobfError::Structural(StructuralError::InvalidMagic { .. })
        ));
    }
}
