//! Virtual-machine devirtualisation
//!
//! Undoes the obfuscation in which original code is rewritten as an
//! interpreter: a dispatch loop over a bytecode array. Detection finds the
//! dispatcher and handler bodies, semantic analysis models each virtual
//! opcode, the longest plausible numeric array in scope becomes the
//! virtual program, and bounded micro-emulation rebuilds ordinary IR.
//!
//! Policy by detection confidence: below the refusal floor nothing
//! happens; in the middle band devirtualisation applies only when
//! emulation succeeds; above the eager threshold an emulation failure
//! degrades to annotated placeholder statements instead. Every refusal or
//! fallback is a warning, never an abort.

pub mod detect;
pub mod emulate;
pub mod semantics;

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::common::config::DevirtConfig;
use crate::common::types::{Warning, WarningKind};
use crate::ir::factory;
use crate::ir::node::{IrFunction, StmtNode};

pub use detect::{detect_dispatcher, extract_bytecode, DispatcherInfo, VmKind};
pub use emulate::{EmulationFailure, MicroEmulator};
pub use semantics::{analyze_handler, ControlEffect, OpcodeCategory, OpcodeSemantics, RegRef};

/// Outcome of a devirtualisation attempt
#[derive(Debug)]
pub struct DevirtOutcome {
    /// The synthesised replacement, absent when devirtualisation refused
    pub function: Option<IrFunction>,
    /// Detection confidence, 0.0 when no dispatcher was found
    pub confidence: f64,
    /// Refusals, fallbacks and anomalies
    pub warnings: Vec<Warning>,
}

impl DevirtOutcome {
    fn refused(confidence: f64, warnings: Vec<Warning>) -> Self {
        Self {
            function: None,
            confidence,
            warnings,
        }
    }
}

/// Detects and lifts switch-dispatched interpreters
pub struct Devirtualizer {
    config: DevirtConfig,
}

impl Devirtualizer {
    pub fn new(config: &DevirtConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Attempt to devirtualise one function
    ///
    /// On success the returned function is named `devirtualized_function`;
    /// the caller may inline its body at the site of the original
    /// dispatcher.
    pub fn devirtualize(&self, function: &IrFunction) -> DevirtOutcome {
        let mut warnings = Vec::new();

        let Some(dispatcher) = detect_dispatcher(&function.body) else {
            return DevirtOutcome::refused(0.0, warnings);
        };
        debug!(
            function = %function.name,
            kind = ?dispatcher.kind,
            opcodes = dispatcher.handlers.len(),
            confidence = dispatcher.confidence,
            "dispatcher detected"
        );

        if dispatcher.confidence < self.config.refuse_below {
            warnings.push(Warning::new(
                WarningKind::LowConfidence,
                format!(
                    "dispatcher in `{}` detected at confidence {:.2}, below the {:.2} floor; refusing",
                    function.name, dispatcher.confidence, self.config.refuse_below
                ),
            ));
            return DevirtOutcome::refused(dispatcher.confidence, warnings);
        }

        // Phase 2: per-opcode semantics
        let mut table: BTreeMap<i64, OpcodeSemantics> = BTreeMap::new();
        for (opcode, handler) in &dispatcher.handlers {
            table.insert(*opcode, analyze_handler(handler, &dispatcher));
        }

        // Phase 3: the virtual program
        let Some((array_name, program)) =
            extract_bytecode(&function.body, self.config.min_bytecode_length)
        else {
            warnings.push(Warning::new(
                WarningKind::LowConfidence,
                format!(
                    "no plausible bytecode array found in `{}`; refusing to devirtualise",
                    function.name
                ),
            ));
            return DevirtOutcome::refused(dispatcher.confidence, warnings);
        };
        if array_name != dispatcher.code_array {
            warnings.push(Warning::new(
                WarningKind::LowConfidence,
                format!(
                    "longest numeric array `{}` differs from dispatched array `{}`",
                    array_name, dispatcher.code_array
                ),
            ));
        }

        let initial_registers = dispatcher
            .register_array
            .as_deref()
            .map(|name| detect::extract_initial_registers(&function.body, name))
            .unwrap_or_default();

        // Phase 4: micro-emulation
        let emulator = MicroEmulator::new(self.config.step_limit);
        match emulator.run(&program, &table, &initial_registers) {
            Ok((body, emulation_warnings)) => {
                warnings.extend(emulation_warnings);
                info!(
                    function = %function.name,
                    statements = body.len(),
                    "devirtualised"
                );
                DevirtOutcome {
                    function: Some(wrap(body)),
                    confidence: dispatcher.confidence,
                    warnings,
                }
            }
            Err(failure) => {
                let kind = match failure {
                    EmulationFailure::StepLimit(_) => WarningKind::StepLimit,
                    _ => WarningKind::LowConfidence,
                };
                warnings.push(Warning::new(
                    kind,
                    format!(
                        "micro-emulation of `{}` aborted: {}",
                        function.name, failure
                    ),
                ));
                if dispatcher.confidence >= self.config.eager_above {
                    // Eager band: fall back to annotated placeholders
                    let body = placeholder_body(&table);
                    DevirtOutcome {
                        function: Some(wrap(body)),
                        confidence: dispatcher.confidence,
                        warnings,
                    }
                } else {
                    DevirtOutcome::refused(dispatcher.confidence, warnings)
                }
            }
        }
    }
}

/// Phase 5: wrap emitted statements in the synthetic function declaration
fn wrap(body: Vec<StmtNode>) -> IrFunction {
    factory::ir_function("devirtualized_function", Vec::new(), body)
}

/// Pattern-based fallback: one annotated placeholder per recognised opcode
fn placeholder_body(table: &BTreeMap<i64, OpcodeSemantics>) -> Vec<StmtNode> {
    table
        .iter()
        .map(|(opcode, semantics)| {
            factory::expression_stmt(factory::call(
                factory::identifier("__vm_opcode"),
                vec![
                    factory::number(*opcode as f64),
                    factory::string(format!("{:?}", semantics.category)),
                ],
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::{BinaryOp, UpdateOp};
    use crate::ir::factory;
    use crate::ir::node::{ExprKind, StmtKind, SwitchCase};

    /// The canonical register-machine dispatcher:
    /// `while(true){switch(ops[pc++]){case 1: regs[ops[pc++]] =
    /// regs[ops[pc++]] + regs[ops[pc++]]; break; case 2: return regs[0];}}`
    fn dispatcher_function(ops: &[f64], regs: &[f64]) -> IrFunction {
        let pc_read = || {
            factory::index_member(
                factory::identifier("ops"),
                factory::update(UpdateOp::Increment, false, factory::identifier("pc")),
            )
        };
        let reg_at = |index| factory::index_member(factory::identifier("regs"), index);

        factory::ir_function(
            "vm_entry",
            vec![],
            vec![
                factory::let_single(
                    "ops",
                    factory::array(ops.iter().map(|n| factory::number(*n)).collect()),
                ),
                factory::let_single(
                    "regs",
                    factory::array(regs.iter().map(|n| factory::number(*n)).collect()),
                ),
                factory::let_single("pc", factory::number(0.0)),
                factory::while_stmt(
                    factory::boolean(true),
                    factory::block(vec![factory::switch_stmt(
                        pc_read(),
                        vec![
                            SwitchCase {
                                test: Some(factory::number(1.0)),
                                body: vec![
                                    factory::expression_stmt(factory::assign(
                                        reg_at(pc_read()),
                                        factory::binary(
                                            BinaryOp::Add,
                                            reg_at(pc_read()),
                                            reg_at(pc_read()),
                                        ),
                                    )),
                                    factory::break_stmt(None),
                                ],
                            },
                            SwitchCase {
                                test: Some(factory::number(2.0)),
                                body: vec![factory::return_stmt(Some(reg_at(
                                    factory::number(0.0),
                                )))],
                            },
                        ],
                    )]),
                ),
            ],
        )
    }

    #[test]
    fn test_devirtualizes_register_machine() {
        let function = dispatcher_function(&[1.0, 0.0, 0.0, 1.0, 2.0], &[5.0, 7.0, 0.0]);
        let devirt = Devirtualizer::new(&DevirtConfig::default());
        let outcome = devirt.devirtualize(&function);
        let lifted = outcome.function.expect("devirtualised function");
        assert_eq!(lifted.name, "devirtualized_function");
        // vr seeds, the add, and the return
        assert!(lifted.body.len() >= 3);
        assert!(matches!(
            lifted.body.last().unwrap().kind,
            StmtKind::Return(Some(_))
        ));
        let returns_vr0 = {
            let StmtKind::Return(Some(value)) = &lifted.body.last().unwrap().kind else {
                unreachable!()
            };
            matches!(&value.kind, ExprKind::Identifier { name, .. } if name == "vr0")
        };
        assert!(returns_vr0);
    }

    #[test]
    fn test_plain_function_is_left_alone() {
        let function = factory::ir_function(
            "ordinary",
            vec![],
            vec![factory::return_stmt(Some(factory::number(1.0)))],
        );
        let devirt = Devirtualizer::new(&DevirtConfig::default());
        let outcome = devirt.devirtualize(&function);
        assert!(outcome.function.is_none());
        assert_eq!(outcome.confidence, 0.0);
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn test_emulation_failure_falls_back_when_eager() {
        // Jump target far outside the program forces an emulation abort;
        // detection confidence is high, so placeholders are emitted
        let pc_read = || {
            factory::index_member(
                factory::identifier("ops"),
                factory::update(UpdateOp::Increment, false, factory::identifier("pc")),
            )
        };
        let function = factory::ir_function(
            "vm_entry",
            vec![],
            vec![
                factory::let_single(
                    "ops",
                    factory::array(
                        [3.0, 99.0, 3.0, 99.0]
                            .iter()
                            .map(|n| factory::number(*n))
                            .collect(),
                    ),
                ),
                factory::let_single("pc", factory::number(0.0)),
                factory::while_stmt(
                    factory::boolean(true),
                    factory::block(vec![factory::switch_stmt(
                        pc_read(),
                        vec![
                            SwitchCase {
                                test: Some(factory::number(3.0)),
                                body: vec![factory::expression_stmt(factory::assign(
                                    factory::identifier("pc"),
                                    pc_read(),
                                ))],
                            },
                            SwitchCase {
                                test: Some(factory::number(4.0)),
                                body: vec![factory::return_stmt(None)],
                            },
                            SwitchCase {
                                test: Some(factory::number(5.0)),
                                body: vec![factory::return_stmt(None)],
                            },
                            SwitchCase {
                                test: Some(factory::number(6.0)),
                                body: vec![factory::return_stmt(None)],
                            },
                        ],
                    )]),
                ),
            ],
        );
        let devirt = Devirtualizer::new(&DevirtConfig::default());
        let outcome = devirt.devirtualize(&function);
        assert!(outcome.confidence >= 0.6);
        assert!(outcome
            .warnings
            .iter()
            .any(|w| w.kind == WarningKind::LowConfidence || w.kind == WarningKind::StepLimit));
        let fallback = outcome.function.expect("placeholder fallback");
        assert!(fallback.body.iter().all(|s| {
            let StmtKind::Expression(expr) = &s.kind else {
                return false;
            };
            matches!(
                &expr.kind,
                ExprKind::Call { callee, .. }
                    if matches!(&callee.kind, ExprKind::Identifier { name, .. } if name == "__vm_opcode")
            )
        }));
    }
}
