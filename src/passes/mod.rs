//! Pass framework: the pass abstraction, the fixed-point pipeline runner,
//! per-pass metrics and the trace sink
//!
//! Scheduling is cooperative and single-threaded within one pipeline
//! invocation. Passes are deterministic: the same input state produces the
//! same output state. Effects of pass N are fully observable to pass N+1
//! before N+1 begins; CFG/SSA recomputation requested by a pass completes
//! before the next pass starts.

pub mod const_prop;
pub mod dce;
pub mod opaque;

use std::time::{Duration, Instant};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::common::config::{DeobfuscatorConfig, PipelineConfig};
use crate::common::errors::DeobfResult;
use crate::common::types::{Warning, WarningKind};
use crate::analysis::ssa::validate_ssa;
use crate::ir::state::IrState;

pub use const_prop::ConstantPropagation;
pub use dce::DeadCodeElimination;
pub use opaque::OpaquePredicateElimination;

/// Per-pass execution metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassMetrics {
    /// IR nodes inspected
    pub nodes_visited: u64,
    /// IR nodes rewritten or removed
    pub nodes_changed: u64,
    /// Wall-clock time, microseconds
    pub duration_us: u64,
    /// Warnings emitted
    pub warnings: u64,
}

impl PassMetrics {
    fn accumulate(&mut self, other: &PassMetrics) {
        self.nodes_visited += other.nodes_visited;
        self.nodes_changed += other.nodes_changed;
        self.duration_us += other.duration_us;
        self.warnings += other.warnings;
    }
}

/// Result of one pass execution
#[derive(Debug)]
pub struct PassOutcome {
    /// The new state; unchanged subtrees are shared by node identifier
    pub state: IrState,
    /// Whether the pass changed the IR
    pub changed: bool,
    /// Warnings raised by this execution
    pub warnings: Vec<Warning>,
    /// Execution metrics
    pub metrics: PassMetrics,
}

/// A deterministic IR transformation
pub trait Pass {
    /// Short stable name
    fn name(&self) -> &'static str;
    /// One-line description
    fn description(&self) -> &'static str;
    /// Execute against a state, producing a new state
    fn execute(&self, state: &IrState) -> PassOutcome;
}

/// Events emitted to a trace sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TraceEvent {
    PassCompleted {
        pass: String,
        iteration: u32,
        changed: bool,
        metrics: PassMetrics,
    },
    WarningRaised(Warning),
    PipelineFinished {
        iterations: u32,
        partial: bool,
    },
}

/// Receiver for pipeline metrics and warnings
pub trait TraceSink {
    /// Record one event
    fn record(&mut self, event: &TraceEvent);
}

/// A sink that keeps every event in memory; useful for tests and reports
#[derive(Debug, Default)]
pub struct MemorySink {
    /// Recorded events in order
    pub events: Vec<TraceEvent>,
}

impl TraceSink for MemorySink {
    fn record(&mut self, event: &TraceEvent) {
        self.events.push(event.clone());
    }
}

/// Result of a pipeline run
#[derive(Debug)]
pub struct PipelineReport {
    /// Final state
    pub state: IrState,
    /// Fixed-point iterations performed
    pub iterations: u32,
    /// True when a budget or iteration cap cut the run short
    pub partial: bool,
    /// Aggregated metrics per pass name
    pub metrics: IndexMap<String, PassMetrics>,
}

/// Runs a pass list to a fixed point
pub struct Pipeline {
    passes: Vec<Box<dyn Pass>>,
    config: PipelineConfig,
}

impl Pipeline {
    /// Create an empty pipeline
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            passes: Vec::new(),
            config,
        }
    }

    /// The standard deobfuscation pipeline: constant propagation, dead-code
    /// elimination, opaque-predicate elimination
    ///
    /// Ties between rewrites go to constant propagation: it runs before DCE
    /// within every iteration.
    pub fn standard(config: &DeobfuscatorConfig) -> Self {
        let mut pipeline = Self::new(config.pipeline.clone());
        pipeline.add_pass(Box::new(ConstantPropagation::new(&config.pipeline)));
        pipeline.add_pass(Box::new(DeadCodeElimination::new()));
        pipeline.add_pass(Box::new(OpaquePredicateElimination::new(
            &config.pipeline,
            &config.solver,
        )));
        pipeline
    }

    /// Append a pass
    pub fn add_pass(&mut self, pass: Box<dyn Pass>) {
        self.passes.push(pass);
    }

    /// Pass names in execution order
    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Run to a fixed point or until a cap is hit
    ///
    /// Aborts cleanly between passes when the wall-clock budget is
    /// exceeded, never mid-pass. An internal invariant violation
    /// short-circuits the remaining passes with an error.
    pub fn run(
        &self,
        state: IrState,
        mut sink: Option<&mut dyn TraceSink>,
    ) -> DeobfResult<PipelineReport> {
        let started = Instant::now();
        let budget = match self.config.wall_clock_budget_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };

        let mut state = state;
        let mut metrics: IndexMap<String, PassMetrics> = IndexMap::new();
        let mut partial = false;
        let mut iterations = 0u32;

        self.ensure_analyses(&mut state)?;

        'outer: for iteration in 0..self.config.max_iterations {
            iterations = iteration + 1;
            let mut any_changed = false;

            for pass in &self.passes {
                if let Some(budget) = budget {
                    if started.elapsed() > budget {
                        let warning = Warning::new(
                            WarningKind::BudgetExhausted,
                            format!(
                                "wall-clock budget of {}ms exhausted before `{}`",
                                self.config.wall_clock_budget_ms,
                                pass.name()
                            ),
                        );
                        warn!("{}", warning);
                        if let Some(sink) = sink.as_deref_mut() {
                            sink.record(&TraceEvent::WarningRaised(warning.clone()));
                        }
                        state.warnings.push(warning);
                        partial = true;
                        break 'outer;
                    }
                }

                debug!(pass = pass.name(), iteration, "running pass");
                let outcome = pass.execute(&state);
                state = outcome.state;
                for warning in &outcome.warnings {
                    if let Some(sink) = sink.as_deref_mut() {
                        sink.record(&TraceEvent::WarningRaised(warning.clone()));
                    }
                }
                state.warnings.extend(outcome.warnings);
                state.record_pass(pass.name());

                metrics
                    .entry(pass.name().to_string())
                    .or_default()
                    .accumulate(&outcome.metrics);
                if let Some(sink) = sink.as_deref_mut() {
                    sink.record(&TraceEvent::PassCompleted {
                        pass: pass.name().to_string(),
                        iteration,
                        changed: outcome.changed,
                        metrics: outcome.metrics,
                    });
                }

                any_changed |= outcome.changed;

                // Honour recompute requests before the next pass observes
                // the state
                self.ensure_analyses(&mut state)?;
            }

            if !any_changed {
                break;
            }
            if iteration + 1 == self.config.max_iterations {
                let warning = Warning::new(
                    WarningKind::IterationLimit,
                    format!(
                        "pipeline did not reach a fixed point in {} iterations",
                        self.config.max_iterations
                    ),
                );
                if let Some(sink) = sink.as_deref_mut() {
                    sink.record(&TraceEvent::WarningRaised(warning.clone()));
                }
                state.warnings.push(warning);
                partial = true;
            }
        }

        info!(iterations, partial, "pipeline finished");
        if let Some(sink) = sink.as_deref_mut() {
            sink.record(&TraceEvent::PipelineFinished { iterations, partial });
        }

        Ok(PipelineReport {
            state,
            iterations,
            partial,
            metrics,
        })
    }

    /// Rebuild analyses when requested and check the SSA invariant
    fn ensure_analyses(&self, state: &mut IrState) -> DeobfResult<()> {
        if state.needs_analysis() {
            state.analyze();
        }
        for analysis in state.analyses.values() {
            validate_ssa(&analysis.cfg, &analysis.ssa)?;
        }
        Ok(())
    }
}
