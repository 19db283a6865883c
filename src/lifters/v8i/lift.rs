//! Register-engine lifting: accumulator/register stream → CFG → SSA → IR
//!
//! Each register and the accumulator map to a variable whose SSA version
//! increments on every write; the generic SSA pass performs the renaming
//! over the assignments emitted here. Jump operands are signed offsets
//! relative to the instruction after the opcode, and conditional jumps use
//! the current accumulator as the condition. Function bodies whose decode
//! confidence falls below the configured threshold emit a warning and an
//! empty body rather than fabricated IR.

use tracing::debug;

use crate::common::config::LifterConfig;
use crate::common::errors::StructuralError;
use crate::common::types::{BinaryOp, BlockId, UnaryOp, Warning, WarningKind};
use crate::analysis::cfg::{BasicBlock, ControlFlowGraph, Edge, EdgeKind, Terminator};
use crate::analysis::ssa::SsaBuilder;
use crate::analysis::structure;
use crate::ir::factory;
use crate::ir::node::{ExprNode, IrFunction, IrProgram, StmtNode};
use crate::lifters::v8i::module::{VirsFunction, VirsModule};
use crate::lifters::v8i::opcodes::{V8iOp, V8iOperand};

/// A decoded register-engine instruction
#[derive(Debug, Clone, PartialEq)]
pub struct V8iInstruction {
    pub offset: usize,
    pub size: usize,
    pub op: V8iOp,
    pub operands: Vec<i64>,
}

impl V8iInstruction {
    /// Jump target as an absolute offset
    pub fn jump_target(&self) -> Option<usize> {
        let info = self.op.info();
        let position = info
            .operands
            .iter()
            .position(|k| *k == V8iOperand::JumpOffset)?;
        let rel = self.operands[position];
        Some(((self.offset + self.size) as i64 + rel) as usize)
    }
}

/// Decode a register-engine stream; unknown opcodes skip one byte with a
/// warning
pub fn decode(bytecode: &[u8]) -> Result<(Vec<V8iInstruction>, Vec<Warning>), StructuralError> {
    let mut instructions = Vec::new();
    let mut warnings = Vec::new();
    let mut offset = 0usize;

    while offset < bytecode.len() {
        let op = V8iOp::from_byte(bytecode[offset]);
        if let V8iOp::Unknown(raw) = op {
            warnings.push(Warning::new(
                WarningKind::UnknownOpcode,
                format!("unknown opcode 0x{:02x} at offset {}", raw, offset),
            ));
            instructions.push(V8iInstruction {
                offset,
                size: 1,
                op,
                operands: Vec::new(),
            });
            offset += 1;
            continue;
        }

        let info = op.info();
        let mut operands = Vec::with_capacity(info.operands.len());
        let mut cursor = offset + 1;
        for kind in info.operands {
            let width = kind.width();
            if cursor + width > bytecode.len() {
                return Err(StructuralError::TruncatedOperand {
                    mnemonic: info.mnemonic,
                    offset,
                });
            }
            let value: i64 = match kind {
                V8iOperand::JumpOffset => {
                    i16::from_le_bytes([bytecode[cursor], bytecode[cursor + 1]]) as i64
                }
                V8iOperand::Imm8 => bytecode[cursor] as i8 as i64,
                _ => bytecode[cursor] as i64,
            };
            operands.push(value);
            cursor += width;
        }

        let size = cursor - offset;
        instructions.push(V8iInstruction {
            offset,
            size,
            op,
            operands,
        });
        offset += size;
    }

    Ok((instructions, warnings))
}

/// Lifts parsed register-engine modules into IR programs
pub struct V8iLifter {
    min_decode_confidence: f64,
}

impl V8iLifter {
    pub fn new(config: &LifterConfig) -> Self {
        Self {
            min_decode_confidence: config.min_decode_confidence,
        }
    }

    /// Lift every function of a module
    pub fn lift(&self, module: &VirsModule) -> (IrProgram, Vec<Warning>) {
        let mut program = IrProgram::new();
        let mut warnings = Vec::new();
        for (index, function) in module.functions.iter().enumerate() {
            match self.lift_function(module, index, function) {
                Ok((lifted, mut function_warnings)) => {
                    warnings.append(&mut function_warnings);
                    program.functions.push(lifted);
                }
                Err(error) => {
                    warnings.push(Warning::new(
                        WarningKind::FunctionSkipped,
                        format!("function {} skipped: {}", index, error),
                    ));
                }
            }
        }
        (program, warnings)
    }

    fn lift_function(
        &self,
        module: &VirsModule,
        index: usize,
        function: &VirsFunction,
    ) -> Result<(IrFunction, Vec<Warning>), StructuralError> {
        let (instructions, mut warnings) = decode(&function.bytecode)?;
        let name = format!("fn_{}", index);
        let params: Vec<String> = (0..function.param_count)
            .map(|i| format!("a{}", i))
            .collect();

        if instructions.is_empty() {
            return Ok((factory::ir_function(name, params, Vec::new()), warnings));
        }

        let known = instructions
            .iter()
            .filter(|i| !matches!(i.op, V8iOp::Unknown(_)))
            .count();
        let confidence = known as f64 / instructions.len() as f64;
        if confidence < self.min_decode_confidence {
            warnings.push(Warning::new(
                WarningKind::LowConfidence,
                format!(
                    "function {} decodes at confidence {:.2}; body omitted",
                    index, confidence
                ),
            ));
            return Ok((factory::ir_function(name, params, Vec::new()), warnings));
        }

        let mut cfg = build_cfg(module, &instructions)?;
        let (_ssa, ssa_warnings) = SsaBuilder::build(&mut cfg, &params);
        warnings.extend(ssa_warnings);
        let (body, structure_warnings) = structure::restructure(&cfg);
        warnings.extend(structure_warnings);
        debug!(function = %name, blocks = cfg.blocks.len(), "lifted register-engine function");

        Ok((factory::ir_function(name, params, body), warnings))
    }
}

fn acc() -> ExprNode {
    factory::identifier("acc")
}

fn reg(index: i64) -> ExprNode {
    factory::identifier(format!("r{}", index))
}

fn assign_stmt(target: ExprNode, value: ExprNode) -> StmtNode {
    factory::expression_stmt(factory::assign(target, value))
}

fn build_cfg(
    module: &VirsModule,
    instructions: &[V8iInstruction],
) -> Result<ControlFlowGraph, StructuralError> {
    let code_len = instructions
        .last()
        .map(|i| i.offset + i.size)
        .unwrap_or(0);

    // Leaders: entry, every jump target, every instruction after a
    // terminator
    let mut leader_set = std::collections::BTreeSet::new();
    leader_set.insert(0usize);
    for instruction in instructions {
        if let Some(target) = instruction.jump_target() {
            if target < code_len {
                leader_set.insert(target);
            }
        }
        if instruction.op.is_terminator() {
            let next = instruction.offset + instruction.size;
            if next < code_len {
                leader_set.insert(next);
            }
        }
    }
    let leaders: Vec<usize> = leader_set.into_iter().collect();
    let block_of = |offset: usize| -> BlockId {
        match leaders.binary_search(&offset) {
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

    for instruction in instructions {
        let block_id = block_of(instruction.offset);
        let block = &mut blocks[block_id];
        let ops = &instruction.operands;
        match instruction.op {
            V8iOp::LdaZero => block.instructions.push(assign_stmt(acc(), factory::number(0.0))),
            V8iOp::LdaSmi => block
                .instructions
                .push(assign_stmt(acc(), factory::number(ops[0] as f64))),
            V8iOp::LdaConstant => {
                let literal = module.constants.get(ops[0] as usize)?.literal();
                block
                    .instructions
                    .push(assign_stmt(acc(), factory::literal(literal)));
            }
            V8iOp::LdaUndefined => block.instructions.push(assign_stmt(acc(), factory::undefined())),
            V8iOp::LdaNull => block.instructions.push(assign_stmt(acc(), factory::null())),
            V8iOp::LdaTrue => block.instructions.push(assign_stmt(acc(), factory::boolean(true))),
            V8iOp::LdaFalse => {
                block.instructions.push(assign_stmt(acc(), factory::boolean(false)))
            }
            V8iOp::Ldar => block.instructions.push(assign_stmt(acc(), reg(ops[0]))),
            V8iOp::Star => block.instructions.push(assign_stmt(reg(ops[0]), acc())),
            V8iOp::Mov => block
                .instructions
                .push(assign_stmt(reg(ops[1]), reg(ops[0]))),
            V8iOp::Add
            | V8iOp::Sub
            | V8iOp::Mul
            | V8iOp::Div
            | V8iOp::Mod
            | V8iOp::BitwiseAnd
            | V8iOp::BitwiseOr
            | V8iOp::BitwiseXor
            | V8iOp::ShiftLeft
            | V8iOp::ShiftRight
            | V8iOp::ShiftRightLogical
            | V8iOp::TestEqual
            | V8iOp::TestEqualStrict
            | V8iOp::TestLessThan
            | V8iOp::TestGreaterThan
            | V8iOp::TestLessThanOrEqual
            | V8iOp::TestGreaterThanOrEqual => {
                let op = binary_op(instruction.op);
                block.instructions.push(assign_stmt(
                    acc(),
                    factory::binary(op, acc(), reg(ops[0])),
                ));
            }
            V8iOp::Inc => block.instructions.push(assign_stmt(
                acc(),
                factory::binary(BinaryOp::Add, acc(), factory::number(1.0)),
            )),
            V8iOp::Dec => block.instructions.push(assign_stmt(
                acc(),
                factory::binary(BinaryOp::Sub, acc(), factory::number(1.0)),
            )),
            V8iOp::Negate => block
                .instructions
                .push(assign_stmt(acc(), factory::unary(UnaryOp::Neg, acc()))),
            V8iOp::LogicalNot => block
                .instructions
                .push(assign_stmt(acc(), factory::unary(UnaryOp::Not, acc()))),
            V8iOp::TypeOf => block
                .instructions
                .push(assign_stmt(acc(), factory::unary(UnaryOp::TypeOf, acc()))),
            V8iOp::LdaNamedProperty => {
                let name = property_name(module, ops[1])?;
                block.instructions.push(assign_stmt(
                    acc(),
                    factory::static_member(reg(ops[0]), name),
                ));
            }
            V8iOp::StaNamedProperty => {
                let name = property_name(module, ops[1])?;
                block.instructions.push(assign_stmt(
                    factory::static_member(reg(ops[0]), name),
                    acc(),
                ));
            }
            V8iOp::LdaKeyedProperty => {
                block.instructions.push(assign_stmt(
                    acc(),
                    factory::index_member(reg(ops[0]), acc()),
                ));
            }
            V8iOp::StaKeyedProperty => {
                block.instructions.push(assign_stmt(
                    factory::index_member(reg(ops[0]), reg(ops[1])),
                    acc(),
                ));
            }
            V8iOp::CallUndefinedReceiver => {
                let argc = ops[2];
                let arguments: Vec<ExprNode> =
                    (0..argc).map(|i| reg(ops[1] + i)).collect();
                block.instructions.push(assign_stmt(
                    acc(),
                    factory::call(reg(ops[0]), arguments),
                ));
            }
            V8iOp::Jump => {
                let target = instruction
                    .jump_target()
                    .map(|t| if t >= code_len { exit } else { block_of(t) })
                    .unwrap_or(exit);
                block.terminator = Terminator::Jump(target);
                edges.push(Edge {
                    from: block_id,
                    to: target,
                    kind: EdgeKind::Jump,
                });
            }
            V8iOp::JumpIfTrue | V8iOp::JumpIfFalse => {
                let target = instruction
                    .jump_target()
                    .map(|t| if t >= code_len { exit } else { block_of(t) })
                    .unwrap_or(exit);
                let next = instruction.offset + instruction.size;
                let fallthrough = if next >= code_len { exit } else { block_of(next) };
                let (true_target, false_target) = if instruction.op == V8iOp::JumpIfTrue {
                    (target, fallthrough)
                } else {
                    (fallthrough, target)
                };
                block.terminator = Terminator::Branch {
                    condition: acc(),
                    true_target,
                    false_target,
                };
                edges.push(Edge {
                    from: block_id,
                    to: true_target,
                    kind: EdgeKind::True,
                });
                edges.push(Edge {
                    from: block_id,
                    to: false_target,
                    kind: EdgeKind::False,
                });
            }
            V8iOp::Return => {
                block.terminator = Terminator::Return(Some(acc()));
                edges.push(Edge {
                    from: block_id,
                    to: exit,
                    kind: EdgeKind::Jump,
                });
            }
            V8iOp::Throw => {
                block.terminator = Terminator::Throw(acc());
                edges.push(Edge {
                    from: block_id,
                    to: exit,
                    kind: EdgeKind::Exception,
                });
            }
            V8iOp::Unknown(raw) => {
                block.instructions.push(factory::expression_stmt(factory::call(
                    factory::identifier("__unknown_opcode"),
                    vec![factory::number(raw as f64)],
                )));
            }
        }
    }

    // Blocks that did not end on a terminator fall through
    for block_id in 0..block_count {
        if matches!(blocks[block_id].terminator, Terminator::Exit) {
            if block_id + 1 < block_count {
                blocks[block_id].terminator = Terminator::Jump(block_id + 1);
                edges.push(Edge {
                    from: block_id,
                    to: block_id + 1,
                    kind: EdgeKind::Fallthrough,
                });
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

    Ok(ControlFlowGraph::from_parts(blocks, edges, 0, exit))
}

fn property_name(module: &VirsModule, index: i64) -> Result<String, StructuralError> {
    let entry = module.constants.get(index as usize)?;
    Ok(match entry {
        crate::lifters::pool::PoolEntry::Str(s) => s.clone(),
        other => format!("{}", other.literal()),
    })
}

fn binary_op(op: V8iOp) -> BinaryOp {
    match op {
        V8iOp::Add => BinaryOp::Add,
        V8iOp::Sub => BinaryOp::Sub,
        V8iOp::Mul => BinaryOp::Mul,
        V8iOp::Div => BinaryOp::Div,
        V8iOp::Mod => BinaryOp::Mod,
        V8iOp::BitwiseAnd => BinaryOp::BitAnd,
        V8iOp::BitwiseOr => BinaryOp::BitOr,
        V8iOp::BitwiseXor => BinaryOp::BitXor,
        V8iOp::ShiftLeft => BinaryOp::Shl,
        V8iOp::ShiftRight => BinaryOp::Shr,
        V8iOp::ShiftRightLogical => BinaryOp::UShr,
        V8iOp::TestEqual => BinaryOp::Eq,
        V8iOp::TestEqualStrict => BinaryOp::StrictEq,
        V8iOp::TestLessThan => BinaryOp::Lt,
        V8iOp::TestGreaterThan => BinaryOp::Gt,
        V8iOp::TestLessThanOrEqual => BinaryOp::Le,
        V8iOp::TestGreaterThanOrEqual => BinaryOp::Ge,
        other => unreachable!("not a binary opcode: {:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::node::{ExprKind, StmtKind};
    use crate::lifters::pool::ConstantPool;

    fn module_with(bytecode: Vec<u8>) -> VirsModule {
        VirsModule {
            version: 1,
            flags: 0,
            constants: ConstantPool::new(vec![]),
            functions: vec![VirsFunction {
                register_count: 4,
                param_count: 0,
                stack_size_hint: 4,
                scope_descriptor: Vec::new(),
                bytecode,
            }],
        }
    }

    #[test]
    fn test_decode_lda_star_add() {
        // LdaSmi 5; Star r0; LdaSmi 7; Add r0; Return
        let bytecode = vec![0x01, 5, 0x11, 0, 0x01, 7, 0x20, 0, 0x80];
        let (instructions, warnings) = decode(&bytecode).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(instructions.len(), 5);
        assert_eq!(instructions[0].op, V8iOp::LdaSmi);
        assert_eq!(instructions[0].operands, vec![5]);
        assert_eq!(instructions[3].op, V8iOp::Add);
    }

    #[test]
    fn test_negative_smi_decodes_signed() {
        let (instructions, _) = decode(&[0x01, 0xFF, 0x80]).unwrap();
        assert_eq!(instructions[0].operands, vec![-1]);
    }

    #[test]
    fn test_lift_add_sequence() {
        let module = module_with(vec![0x01, 5, 0x11, 0, 0x01, 7, 0x20, 0, 0x80]);
        let lifter = V8iLifter::new(&LifterConfig::default());
        let (program, warnings) = lifter.lift(&module);
        assert!(warnings.is_empty(), "unexpected warnings: {:?}", warnings);
        let body = &program.functions[0].body;
        // acc = 5; r0 = acc; acc = 7; acc = acc + r0; return acc
        assert_eq!(body.len(), 5);
        assert!(matches!(body.last().unwrap().kind, StmtKind::Return(Some(_))));
        let StmtKind::Expression(expr) = &body[3].kind else {
            panic!("expected assignment");
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
    fn test_conditional_jump_uses_accumulator() {
        // LdaTrue; JumpIfFalse +1; Return; Throw
        //
        // offsets: 0: LdaTrue(1)  1: JumpIfFalse(3)  4: Return(1)
        //          5: Throw(1)
        let module = module_with(vec![0x05, 0x72, 1, 0, 0x80, 0x81]);
        let lifter = V8iLifter::new(&LifterConfig::default());
        let (program, _warnings) = lifter.lift(&module);
        let body = &program.functions[0].body;
        assert!(body.iter().any(|s| matches!(s.kind, StmtKind::If { .. })));
    }

    #[test]
    fn test_low_confidence_body_omitted() {
        // Mostly unknown opcodes
        let module = module_with(vec![0xAA, 0xBB, 0xCC, 0x80]);
        let lifter = V8iLifter::new(&LifterConfig::default());
        let (program, warnings) = lifter.lift(&module);
        assert!(program.functions[0].body.is_empty());
        assert!(warnings.iter().any(|w| w.kind == WarningKind::LowConfidence));
    }
}
