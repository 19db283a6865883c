//! Bounded micro-emulation of an extracted virtual program
//!
//! Phase 4 of devirtualisation: walk the virtual program abstractly,
//! applying each opcode's declared register and stack effects. Values are
//! placeholder names (`vr{k}` for virtual registers, fresh temporaries for
//! stack cells); every virtual instruction emits one IR statement. Virtual
//! leaders are identified before emulation from the static jump targets;
//! already-emitted blocks are never revisited, and a hard step cap defeats
//! adversarial programs. When the cap is hit nothing partial is promoted.

use std::collections::BTreeMap;

use tracing::debug;

use crate::common::types::{BlockId, Warning};
use crate::analysis::cfg::{BasicBlock, ControlFlowGraph, Edge, EdgeKind, Terminator};
use crate::analysis::structure;
use crate::ir::factory;
use crate::ir::node::{ExprNode, StmtNode};
use crate::devirt::semantics::{ControlEffect, OpcodeCategory, OpcodeSemantics, RegRef};

/// A decoded virtual instruction
#[derive(Debug, Clone)]
struct VirtualInstr {
    pc: usize,
    opcode: i64,
    operands: Vec<i64>,
}

/// Why emulation gave up
#[derive(Debug, Clone, PartialEq)]
pub enum EmulationFailure {
    /// The step cap was reached
    StepLimit(u32),
    /// An opcode with no semantics entry was encountered
    UnknownOpcode { opcode: i64, pc: usize },
    /// A jump landed outside the program
    JumpOutOfRange { target: i64, pc: usize },
}

impl std::fmt::Display for EmulationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmulationFailure::StepLimit(limit) => {
                write!(f, "step limit of {} reached", limit)
            }
            EmulationFailure::UnknownOpcode { opcode, pc } => {
                write!(f, "unknown virtual opcode {} at pc {}", opcode, pc)
            }
            EmulationFailure::JumpOutOfRange { target, pc } => {
                write!(f, "jump target {} out of range at pc {}", target, pc)
            }
        }
    }
}

/// Bounded abstract interpreter over a virtual program
pub struct MicroEmulator {
    step_limit: u32,
}

impl MicroEmulator {
    pub fn new(step_limit: u32) -> Self {
        Self { step_limit }
    }

    /// Emulate the program and reconstruct structured statements
    ///
    /// `initial_registers` seeds `vr{k}` assignments at the entry so
    /// constant propagation can finish the job downstream.
    pub fn run(
        &self,
        program: &[i64],
        table: &BTreeMap<i64, OpcodeSemantics>,
        initial_registers: &[i64],
    ) -> Result<(Vec<StmtNode>, Vec<Warning>), EmulationFailure> {
        let instructions = self.decode(program, table)?;
        let leaders = self.find_leaders(&instructions, table);

        let block_of = |pc: usize| -> BlockId {
            match leaders.binary_search(&pc) {
                Ok(index) => index,
                Err(index) => index.saturating_sub(1),
            }
        };

        let block_count = leaders.len();
        let exit = block_count;
        let mut blocks: Vec<BasicBlock> = (0..=block_count)
            .map(ControlFlowGraph::make_block)
            .collect();
        blocks[exit].terminator = Terminator::Exit;
        let mut edges = Vec::new();
        let mut steps = 0u32;
        let mut stack: Vec<ExprNode> = Vec::new();

        // Seed the virtual registers at the entry
        for (index, value) in initial_registers.iter().enumerate() {
            blocks[0].instructions.push(factory::expression_stmt(factory::assign(
                factory::identifier(format!("vr{}", index)),
                factory::number(*value as f64),
            )));
        }

        for instruction in &instructions {
            steps += 1;
            if steps > self.step_limit {
                return Err(EmulationFailure::StepLimit(self.step_limit));
            }
            let semantics = table
                .get(&instruction.opcode)
                .ok_or(EmulationFailure::UnknownOpcode {
                    opcode: instruction.opcode,
                    pc: instruction.pc,
                })?;
            let block_id = block_of(instruction.pc);
            let next_pc = instruction.pc + 1 + semantics.operand_count as usize;

            self.emit_instruction(
                instruction,
                semantics,
                &mut blocks[block_id],
                &mut stack,
            );

            match semantics.control {
                ControlEffect::Jump { operand } => {
                    let target = *instruction.operands.get(operand as usize).unwrap_or(&-1);
                    if target < 0 || target as usize >= program.len() {
                        return Err(EmulationFailure::JumpOutOfRange {
                            target,
                            pc: instruction.pc,
                        });
                    }
                    let target_block = block_of(target as usize);
                    blocks[block_id].terminator = Terminator::Jump(target_block);
                    edges.push(Edge {
                        from: block_id,
                        to: target_block,
                        kind: EdgeKind::Jump,
                    });
                }
                ControlEffect::ConditionalJump { operand } => {
                    let target = *instruction.operands.get(operand as usize).unwrap_or(&-1);
                    if target < 0 || target as usize >= program.len() {
                        return Err(EmulationFailure::JumpOutOfRange {
                            target,
                            pc: instruction.pc,
                        });
                    }
                    let target_block = block_of(target as usize);
                    let fallthrough = if next_pc < program.len() {
                        block_of(next_pc)
                    } else {
                        exit
                    };
                    // Placeholder condition identifier; the emitted
                    // statement above bound it
                    let condition =
                        factory::identifier(format!("vcond_{}", instruction.pc));
                    blocks[block_id].terminator = Terminator::Branch {
                        condition,
                        true_target: target_block,
                        false_target: fallthrough,
                    };
                    edges.push(Edge {
                        from: block_id,
                        to: target_block,
                        kind: EdgeKind::True,
                    });
                    edges.push(Edge {
                        from: block_id,
                        to: fallthrough,
                        kind: EdgeKind::False,
                    });
                }
                ControlEffect::Return => {
                    let value = semantics
                        .reads
                        .first()
                        .map(|r| self.register_expr(*r, instruction))
                        .or_else(|| stack.pop());
                    blocks[block_id].terminator = Terminator::Return(value);
                    edges.push(Edge {
                        from: block_id,
                        to: exit,
                        kind: EdgeKind::Jump,
                    });
                }
                ControlEffect::Throw => {
                    blocks[block_id].terminator = Terminator::Throw(
                        stack.pop().unwrap_or_else(factory::undefined),
                    );
                    edges.push(Edge {
                        from: block_id,
                        to: exit,
                        kind: EdgeKind::Exception,
                    });
                }
                ControlEffect::Call | ControlEffect::FallThrough => {
                    // Block boundary purely from the leader partition
                    if next_pc < program.len() {
                        let next_block = block_of(next_pc);
                        if next_block != block_id {
                            blocks[block_id].terminator = Terminator::Jump(next_block);
                            edges.push(Edge {
                                from: block_id,
                                to: next_block,
                                kind: EdgeKind::Fallthrough,
                            });
                        }
                    } else {
                        blocks[block_id].terminator = Terminator::Return(None);
                        edges.push(Edge {
                            from: block_id,
                            to: exit,
                            kind: EdgeKind::Jump,
                        });
                    }
                }
            }
        }

        let cfg = ControlFlowGraph::from_parts(blocks, edges, 0, exit);
        let (body, warnings) = structure::restructure(&cfg);
        debug!(
            instructions = instructions.len(),
            blocks = cfg.blocks.len(),
            "micro-emulation complete"
        );
        Ok((body, warnings))
    }

    /// Linear decode of the virtual program using the semantics table's
    /// operand counts
    fn decode(
        &self,
        program: &[i64],
        table: &BTreeMap<i64, OpcodeSemantics>,
    ) -> Result<Vec<VirtualInstr>, EmulationFailure> {
        let mut instructions = Vec::new();
        let mut pc = 0usize;
        let mut steps = 0u32;
        while pc < program.len() {
            steps += 1;
            if steps > self.step_limit {
                return Err(EmulationFailure::StepLimit(self.step_limit));
            }
            let opcode = program[pc];
            let semantics = table.get(&opcode).ok_or(EmulationFailure::UnknownOpcode {
                opcode,
                pc,
            })?;
            let count = semantics.operand_count as usize;
            let end = (pc + 1 + count).min(program.len());
            let operands = program[pc + 1..end].to_vec();
            instructions.push(VirtualInstr {
                pc,
                opcode,
                operands,
            });
            pc += 1 + count;
        }
        Ok(instructions)
    }

    /// Virtual leaders: the entry plus the target of every static jump and
    /// the fall-through after every control transfer
    fn find_leaders(
        &self,
        instructions: &[VirtualInstr],
        table: &BTreeMap<i64, OpcodeSemantics>,
    ) -> Vec<usize> {
        let mut leaders = std::collections::BTreeSet::new();
        leaders.insert(0usize);
        let program_end = instructions
            .last()
            .map(|i| i.pc + 1 + i.operands.len())
            .unwrap_or(0);
        for instruction in instructions {
            let Some(semantics) = table.get(&instruction.opcode) else {
                continue;
            };
            let next = instruction.pc + 1 + semantics.operand_count as usize;
            match semantics.control {
                ControlEffect::Jump { operand } | ControlEffect::ConditionalJump { operand } => {
                    if let Some(&target) = instruction.operands.get(operand as usize) {
                        if target >= 0 && (target as usize) < program_end {
                            leaders.insert(target as usize);
                        }
                    }
                    if next < program_end {
                        leaders.insert(next);
                    }
                }
                ControlEffect::Return | ControlEffect::Throw => {
                    if next < program_end {
                        leaders.insert(next);
                    }
                }
                _ => {}
            }
        }
        leaders.into_iter().collect()
    }

    /// Emit the one IR statement for a virtual instruction
    fn emit_instruction(
        &self,
        instruction: &VirtualInstr,
        semantics: &OpcodeSemantics,
        block: &mut BasicBlock,
        stack: &mut Vec<ExprNode>,
    ) {
        match semantics.category {
            OpcodeCategory::Arithmetic | OpcodeCategory::Comparison | OpcodeCategory::Logical => {
                if semantics.pushes + semantics.pops > 0 {
                    // Stack-machine arithmetic: pop operands, push result
                    let right = stack.pop().unwrap_or_else(factory::undefined);
                    let left = stack.pop().unwrap_or_else(factory::undefined);
                    if let Some(op) = semantics.operator {
                        let temp = factory::fresh_variable_name();
                        block.instructions.push(factory::let_single(
                            temp.clone(),
                            factory::binary(op, left, right),
                        ));
                        stack.push(factory::identifier(temp));
                    }
                } else if let (Some(op), Some(write)) =
                    (semantics.operator, semantics.writes.first())
                {
                    let mut sources = semantics
                        .reads
                        .iter()
                        .map(|r| self.register_expr(*r, instruction));
                    let left = sources.next().unwrap_or_else(factory::undefined);
                    let right = sources
                        .next()
                        .unwrap_or_else(|| self.immediate_expr(semantics, instruction));
                    block.instructions.push(factory::expression_stmt(factory::assign(
                        self.register_expr(*write, instruction),
                        factory::binary(op, left, right),
                    )));
                }
            }
            OpcodeCategory::Load => {
                if let Some(write) = semantics.writes.first() {
                    let value = self.immediate_expr(semantics, instruction);
                    block.instructions.push(factory::expression_stmt(factory::assign(
                        self.register_expr(*write, instruction),
                        value,
                    )));
                }
            }
            OpcodeCategory::Store => {
                // Assignment to a symbolic memory location
                let source = semantics
                    .reads
                    .first()
                    .map(|r| self.register_expr(*r, instruction))
                    .or_else(|| stack.pop())
                    .unwrap_or_else(factory::undefined);
                let address = self.immediate_expr(semantics, instruction);
                block.instructions.push(factory::expression_stmt(factory::assign(
                    factory::index_member(factory::identifier("vmem"), address),
                    source,
                )));
            }
            OpcodeCategory::Stack => {
                if semantics.pushes > 0 {
                    let value = if semantics.reads.is_empty() {
                        self.immediate_expr(semantics, instruction)
                    } else {
                        self.register_expr(semantics.reads[0], instruction)
                    };
                    stack.push(value);
                }
                for _ in 0..semantics.pops {
                    if let (Some(value), Some(write)) =
                        (stack.pop(), semantics.writes.first())
                    {
                        block.instructions.push(factory::expression_stmt(factory::assign(
                            self.register_expr(*write, instruction),
                            value,
                        )));
                    }
                }
            }
            OpcodeCategory::Call => {
                block.instructions.push(factory::expression_stmt(factory::call(
                    factory::identifier("__vm_call"),
                    instruction
                        .operands
                        .iter()
                        .map(|v| factory::number(*v as f64))
                        .collect(),
                )));
            }
            OpcodeCategory::Control => {
                // Conditional controls bind their placeholder condition
                if let ControlEffect::ConditionalJump { .. } = semantics.control {
                    let condition = semantics
                        .reads
                        .first()
                        .map(|r| self.register_expr(*r, instruction))
                        .or_else(|| stack.pop())
                        .unwrap_or_else(|| factory::boolean(true));
                    block.instructions.push(factory::expression_stmt(factory::assign(
                        factory::identifier(format!("vcond_{}", instruction.pc)),
                        condition,
                    )));
                }
            }
        }
    }

    /// The identifier for a virtual-register reference
    fn register_expr(&self, reference: RegRef, instruction: &VirtualInstr) -> ExprNode {
        let index = match reference {
            RegRef::Fixed(index) => index,
            RegRef::Operand(slot) => {
                *instruction.operands.get(slot as usize).unwrap_or(&0)
            }
        };
        factory::identifier(format!("vr{}", index))
    }

    /// The first immediate operand as a literal, `undefined` when absent
    fn immediate_expr(
        &self,
        semantics: &OpcodeSemantics,
        instruction: &VirtualInstr,
    ) -> ExprNode {
        semantics
            .immediates
            .first()
            .and_then(|slot| instruction.operands.get(*slot as usize))
            .map(|value| factory::number(*value as f64))
            .unwrap_or_else(factory::undefined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::BinaryOp;
    use crate::ir::node::{ExprKind, StmtKind};

    fn arith_add() -> OpcodeSemantics {
        OpcodeSemantics {
            reads: vec![RegRef::Operand(1), RegRef::Operand(2)],
            writes: vec![RegRef::Operand(0)],
            pushes: 0,
            pops: 0,
            operator: Some(BinaryOp::Add),
            control: ControlEffect::FallThrough,
            category: OpcodeCategory::Arithmetic,
            operand_count: 3,
            immediates: vec![],
            confidence: 0.9,
        }
    }

    fn ret_reg0() -> OpcodeSemantics {
        OpcodeSemantics {
            reads: vec![RegRef::Fixed(0)],
            writes: vec![],
            pushes: 0,
            pops: 0,
            operator: None,
            control: ControlEffect::Return,
            category: OpcodeCategory::Control,
            operand_count: 0,
            immediates: vec![],
            confidence: 0.6,
        }
    }

    #[test]
    fn test_emulates_add_then_return() {
        let mut table = BTreeMap::new();
        table.insert(1, arith_add());
        table.insert(2, ret_reg0());
        // vr0 = vr0 + vr1; return vr0
        let program = vec![1, 0, 0, 1, 2];
        let emulator = MicroEmulator::new(10_000);
        let (body, warnings) = emulator.run(&program, &table, &[5, 7, 0]).unwrap();
        assert!(warnings.is_empty());
        // Three register seeds, one arithmetic statement, one return
        assert_eq!(body.len(), 5);
        let StmtKind::Return(Some(value)) = &body[4].kind else {
            panic!("expected return, got {:?}", body[4].kind);
        };
        assert!(matches!(
            &value.kind,
            ExprKind::Identifier { name, .. } if name == "vr0"
        ));
        let StmtKind::Expression(expr) = &body[3].kind else {
            panic!("expected arithmetic statement");
        };
        let ExprKind::Assignment { value, .. } = &expr.kind else {
            panic!("expected assignment");
        };
        assert!(matches!(
            value.kind,
            ExprKind::Binary {
                op: BinaryOp::Add,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_opcode_fails_cleanly() {
        let table = BTreeMap::new();
        let emulator = MicroEmulator::new(10_000);
        assert!(matches!(
            emulator.run(&[9], &table, &[]),
            Err(EmulationFailure::UnknownOpcode { opcode: 9, pc: 0 })
        ));
    }

    #[test]
    fn test_step_cap_enforced() {
        let mut table = BTreeMap::new();
        table.insert(0, arith_add());
        // A long program of 4-cell instructions against a tiny cap
        let program: Vec<i64> = std::iter::repeat([0i64, 0, 0, 0])
            .take(10)
            .flatten()
            .collect();
        let emulator = MicroEmulator::new(5);
        assert_eq!(
            emulator.run(&program, &table, &[]),
            Err(EmulationFailure::StepLimit(5))
        );
    }

    #[test]
    fn test_jump_out_of_range_fails() {
        let mut table = BTreeMap::new();
        table.insert(
            7,
            OpcodeSemantics {
                reads: vec![],
                writes: vec![],
                pushes: 0,
                pops: 0,
                operator: None,
                control: ControlEffect::Jump { operand: 0 },
                category: OpcodeCategory::Control,
                operand_count: 1,
                immediates: vec![],
                confidence: 0.6,
            },
        );
        let emulator = MicroEmulator::new(100);
        assert!(matches!(
            emulator.run(&[7, 99], &table, &[]),
            Err(EmulationFailure::JumpOutOfRange { target: 99, .. })
        ));
    }
}
