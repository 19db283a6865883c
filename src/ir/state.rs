//! The IR state threaded through the pass pipeline
//!
//! A state bundles the program tree, per-function CFG/SSA analyses and an
//! open-ended metadata map. Passes treat states as values: they never mutate
//! their input but produce a new state that shares unmodified subtrees by
//! node identifier.

use std::collections::HashMap;

use indexmap::IndexMap;
use tracing::debug;

use crate::common::types::{Warning, WarningKind};
use crate::analysis::cfg::{CfgBuilder, ControlFlowGraph};
use crate::analysis::ssa::{SsaBuilder, SsaForm};
use crate::ir::node::IrProgram;

/// Cached analyses for one function
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionAnalysis {
    /// Control-flow graph with dominance information
    pub cfg: ControlFlowGraph,
    /// SSA annotation over the CFG
    pub ssa: SsaForm,
}

/// Metadata key a pass sets to request CFG/SSA recomputation before the
/// next pass runs
pub const RECOMPUTE_ANALYSES_KEY: &str = "recompute_analyses";

/// Pipeline state: program, analyses, metadata and accumulated warnings
#[derive(Debug, Clone, Default)]
pub struct IrState {
    /// The program tree
    pub program: IrProgram,
    /// Analyses per function index; absent entries mean the function was
    /// skipped with a structural error
    pub analyses: HashMap<usize, FunctionAnalysis>,
    /// Open-ended metadata (pass history, markers)
    pub metadata: IndexMap<String, serde_json::Value>,
    /// Accumulated warnings
    pub warnings: Vec<Warning>,
}

impl IrState {
    /// Create a state for a program; analyses are built lazily
    pub fn new(program: IrProgram) -> Self {
        Self {
            program,
            analyses: HashMap::new(),
            metadata: IndexMap::new(),
            warnings: Vec::new(),
        }
    }

    /// Build or rebuild CFG and SSA for every function
    ///
    /// A structural error in one function skips that function with a
    /// warning; the others continue.
    pub fn analyze(&mut self) {
        self.analyses.clear();
        for (index, function) in self.program.functions.iter().enumerate() {
            let mut cfg = match CfgBuilder::build(&function.body) {
                Ok(cfg) => cfg,
                Err(error) => {
                    debug!(function = %function.name, %error, "skipping function");
                    self.warnings.push(Warning::new(
                        WarningKind::FunctionSkipped,
                        format!("function `{}` skipped: {}", function.name, error),
                    ));
                    continue;
                }
            };
            let (ssa, warnings) = SsaBuilder::build(&mut cfg, &function.params);
            self.warnings.extend(warnings);
            self.analyses.insert(index, FunctionAnalysis { cfg, ssa });
        }
        self.metadata.shift_remove(RECOMPUTE_ANALYSES_KEY);
    }

    /// Request CFG/SSA recomputation before the next pass
    pub fn request_recompute(&mut self) {
        self.metadata
            .insert(RECOMPUTE_ANALYSES_KEY.to_string(), serde_json::json!(true));
    }

    /// True when a pass has requested recomputation, or no analyses exist
    pub fn needs_analysis(&self) -> bool {
        self.metadata.contains_key(RECOMPUTE_ANALYSES_KEY)
            || (self.analyses.is_empty() && !self.program.functions.is_empty())
    }

    /// Analysis for the function at `index`, when it was not skipped
    pub fn analysis(&self, index: usize) -> Option<&FunctionAnalysis> {
        self.analyses.get(&index)
    }

    /// Record a pass in the metadata history
    pub fn record_pass(&mut self, name: &str) {
        let history = self
            .metadata
            .entry("pass_history".to_string())
            .or_insert_with(|| serde_json::json!([]));
        if let Some(entries) = history.as_array_mut() {
            entries.push(serde_json::json!(name));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::factory;

    #[test]
    fn test_analyze_builds_per_function_analyses() {
        let program = IrProgram {
            functions: vec![
                factory::ir_function(
                    "a",
                    vec![],
                    vec![factory::return_stmt(Some(factory::number(1.0)))],
                ),
                factory::ir_function("b", vec!["x".into()], vec![]),
            ],
        };
        let mut state = IrState::new(program);
        assert!(state.needs_analysis());
        state.analyze();
        assert!(!state.needs_analysis());
        assert_eq!(state.analyses.len(), 2);
    }

    #[test]
    fn test_structural_error_skips_single_function() {
        let program = IrProgram {
            functions: vec![
                factory::ir_function("bad", vec![], vec![factory::break_stmt(None)]),
                factory::ir_function(
                    "good",
                    vec![],
                    vec![factory::return_stmt(None)],
                ),
            ],
        };
        let mut state = IrState::new(program);
        state.analyze();
        assert!(state.analysis(0).is_none());
        assert!(state.analysis(1).is_some());
        assert!(state
            .warnings
            .iter()
            .any(|w| w.kind == WarningKind::FunctionSkipped));
    }

    #[test]
    fn test_recompute_marker_round_trip() {
        let mut state = IrState::new(IrProgram::new());
        assert!(!state.needs_analysis());
        state.request_recompute();
        assert!(state.needs_analysis());
        state.analyze();
        assert!(!state.needs_analysis());
    }
}
