//! Stack-engine lifting: decoded instructions → CFG → SSA → IR tree
//!
//! Decoding recovers from unknown opcodes by skipping one byte and leaving
//! a placeholder statement so positions line up; truncated operands abort
//! the function, and the module continues with its other functions.
//!
//! Lifting simulates the abstract operand stack per basic block. Pure
//! values (literals, slot reads, operator trees) are pushed as expression
//! trees; side-effecting values (calls, property loads) are spilled into
//! fresh temporaries at their execution point so evaluation order is
//! preserved. Values live across block boundaries spill into `s{depth}`
//! slot variables, and the SSA pass completes the φ placement for them.

use tracing::debug;

use crate::common::errors::StructuralError;
use crate::common::types::{BinaryOp, BlockId, UnaryOp, Warning, WarningKind};
use crate::analysis::cfg::{BasicBlock, ControlFlowGraph, Edge, EdgeKind, Terminator};
use crate::analysis::ssa::SsaBuilder;
use crate::analysis::structure;
use crate::ir::factory;
use crate::ir::node::{ExprKind, ExprNode, IrFunction, IrProgram, StmtNode};
use crate::lifters::pool::PoolEntry;
use crate::lifters::qjs::module::{QjsFunction, QjsModule};
use crate::lifters::qjs::opcodes::{OperandKind, QjsOp};

/// A decoded instruction with raw operand values in declaration order
#[derive(Debug, Clone, PartialEq)]
pub struct QjsInstruction {
    pub offset: usize,
    pub size: usize,
    pub op: QjsOp,
    pub operands: Vec<i64>,
}

impl QjsInstruction {
    /// Branch target as an absolute bytecode offset
    pub fn branch_target(&self) -> Option<usize> {
        let info = self.op.info();
        let position = info
            .operands
            .iter()
            .position(|k| *k == OperandKind::BranchOffset)?;
        let rel = self.operands[position];
        Some(((self.offset + self.size) as i64 + rel) as usize)
    }

    fn argc(&self) -> u32 {
        let info = self.op.info();
        info.operands
            .iter()
            .position(|k| *k == OperandKind::ArgCount)
            .map(|i| self.operands[i] as u32)
            .unwrap_or(0)
    }
}

/// Decode a bytecode blob into typed instructions
///
/// Unknown opcodes become one-byte placeholder instructions with a
/// warning; the decode never aborts on them.
pub fn decode(bytecode: &[u8]) -> Result<(Vec<QjsInstruction>, Vec<Warning>), StructuralError> {
    let mut instructions = Vec::new();
    let mut warnings = Vec::new();
    let mut offset = 0usize;

    while offset < bytecode.len() {
        let byte = bytecode[offset];
        let op = QjsOp::from_byte(byte);
        if let QjsOp::Unknown(raw) = op {
            warnings.push(Warning::new(
                WarningKind::UnknownOpcode,
                format!("unknown opcode 0x{:02x} at offset {}", raw, offset),
            ));
            instructions.push(QjsInstruction {
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
                OperandKind::Immediate32 | OperandKind::BranchOffset => i32::from_le_bytes([
                    bytecode[cursor],
                    bytecode[cursor + 1],
                    bytecode[cursor + 2],
                    bytecode[cursor + 3],
                ]) as i64,
                OperandKind::ConstIndex | OperandKind::AtomIndex => {
                    u16::from_le_bytes([bytecode[cursor], bytecode[cursor + 1]]) as i64
                }
                OperandKind::LocalIndex | OperandKind::ArgIndex | OperandKind::ArgCount => {
                    bytecode[cursor] as i64
                }
            };
            operands.push(value);
            cursor += width;
        }

        let size = cursor - offset;
        let instruction = QjsInstruction {
            offset,
            size,
            op,
            operands,
        };
        if let Some(target) = instruction.branch_target() {
            if target > bytecode.len() {
                return Err(StructuralError::BranchOutOfRange {
                    target: target as i64,
                    offset,
                });
            }
        }
        instructions.push(instruction);
        offset += size;
    }

    Ok((instructions, warnings))
}

/// Lifts parsed stack-engine modules into IR programs
pub struct QjsLifter;

impl QjsLifter {
    pub fn new() -> Self {
        Self
    }

    /// Lift every function of a module
    ///
    /// A structural failure in one function records a warning and skips
    /// that function; the others continue.
    pub fn lift(&self, module: &QjsModule) -> (IrProgram, Vec<Warning>) {
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
        module: &QjsModule,
        index: usize,
        function: &QjsFunction,
    ) -> Result<(IrFunction, Vec<Warning>), StructuralError> {
        let (instructions, mut warnings) = decode(&function.bytecode)?;
        let params: Vec<String> = (0..function.param_count)
            .map(|i| format!("a{}", i))
            .collect();
        let name = {
            let atom = module.atom(function.name_atom as usize);
            if atom.is_empty() {
                format!("fn_{}", index)
            } else {
                atom
            }
        };

        if instructions.is_empty() {
            return Ok((factory::ir_function(name, params, Vec::new()), warnings));
        }

        let builder = FunctionLifter::new(module, function, &instructions);
        let mut cfg = builder.build(&mut warnings)?;

        let (_ssa, ssa_warnings) = SsaBuilder::build(&mut cfg, &params);
        warnings.extend(ssa_warnings);

        let (body, structure_warnings) = structure::restructure(&cfg);
        warnings.extend(structure_warnings);
        debug!(function = %name, blocks = cfg.blocks.len(), "lifted stack-engine function");

        Ok((factory::ir_function(name, params, body), warnings))
    }
}

impl Default for QjsLifter {
    fn default() -> Self {
        Self::new()
    }
}

struct FunctionLifter<'a> {
    module: &'a QjsModule,
    function: &'a QjsFunction,
    instructions: &'a [QjsInstruction],
    /// Leader offsets in ascending order; block i covers leaders[i]..next
    leaders: Vec<usize>,
}

impl<'a> FunctionLifter<'a> {
    fn new(
        module: &'a QjsModule,
        function: &'a QjsFunction,
        instructions: &'a [QjsInstruction],
    ) -> Self {
        let code_len = function.bytecode.len();
        let mut leaders = std::collections::BTreeSet::new();
        leaders.insert(0usize);
        for instruction in instructions {
            if let Some(target) = instruction.branch_target() {
                if target < code_len {
                    leaders.insert(target);
                }
            }
            if instruction.op.is_terminator() {
                let next = instruction.offset + instruction.size;
                if next < code_len {
                    leaders.insert(next);
                }
            }
        }
        Self {
            module,
            function,
            instructions,
            leaders: leaders.into_iter().collect(),
        }
    }

    fn block_of(&self, offset: usize) -> BlockId {
        match self.leaders.binary_search(&offset) {
            Ok(index) => index,
            Err(index) => index.saturating_sub(1),
        }
    }

    fn build(&self, warnings: &mut Vec<Warning>) -> Result<ControlFlowGraph, StructuralError> {
        let block_count = self.leaders.len();
        let exit = block_count;
        let mut blocks: Vec<BasicBlock> = (0..=block_count)
            .map(ControlFlowGraph::make_block)
            .collect();
        blocks[exit].terminator = Terminator::Exit;
        let mut edges: Vec<Edge> = Vec::new();

        // Entry stack depth per block, propagated along edges
        let mut depth_in: Vec<Option<usize>> = vec![None; block_count];
        depth_in[0] = Some(0);

        // Instructions grouped per block
        let mut grouped: Vec<Vec<&QjsInstruction>> = vec![Vec::new(); block_count];
        for instruction in self.instructions {
            grouped[self.block_of(instruction.offset)].push(instruction);
        }

        // Simulate blocks in leader order; depth propagation is acyclic in
        // leader order for reducible code, and a mismatch only warns
        for block_id in 0..block_count {
            let entry_depth = depth_in[block_id].unwrap_or(0);
            let mut sim = BlockSim {
                lifter: self,
                stack: (0..entry_depth)
                    .map(|i| factory::identifier(format!("s{}", i)))
                    .collect(),
                statements: Vec::new(),
            };

            let mut terminator: Option<(Terminator, Vec<(BlockId, EdgeKind)>)> = None;
            let block_instructions = grouped[block_id].clone();
            for instruction in block_instructions {
                if let Some(t) = sim.step(instruction, exit)? {
                    terminator = Some(t);
                    break;
                }
            }

            let (terminator, successors, leftover) = match terminator {
                Some((terminator, successors)) => {
                    let leftover = std::mem::take(&mut sim.stack);
                    (terminator, successors, leftover)
                }
                None => {
                    // Fallthrough into the next block, or the exit when
                    // this is the last block
                    let leftover = std::mem::take(&mut sim.stack);
                    if block_id + 1 < block_count {
                        (
                            Terminator::Jump(block_id + 1),
                            vec![(block_id + 1, EdgeKind::Fallthrough)],
                            leftover,
                        )
                    } else {
                        (
                            Terminator::Return(None),
                            vec![(exit, EdgeKind::Jump)],
                            leftover,
                        )
                    }
                }
            };

            // Spill surviving stack values unless the block leaves the
            // function
            let mut statements = std::mem::take(&mut sim.statements);
            let exits_function =
                matches!(terminator, Terminator::Return(_) | Terminator::Throw(_));
            let leftover_depth = leftover.len();
            if !exits_function {
                for (slot, value) in leftover.into_iter().enumerate() {
                    let keeps_slot = matches!(
                        &value.kind,
                        ExprKind::Identifier { name, .. } if name == &format!("s{}", slot)
                    );
                    if !keeps_slot {
                        statements.push(factory::expression_stmt(factory::assign(
                            factory::identifier(format!("s{}", slot)),
                            value,
                        )));
                    }
                }
            }

            for &(successor, kind) in &successors {
                edges.push(Edge {
                    from: block_id,
                    to: successor,
                    kind,
                });
                if successor < block_count {
                    let expected = if exits_function { 0 } else { leftover_depth };
                    match depth_in[successor] {
                        None => depth_in[successor] = Some(expected),
                        Some(existing) if existing != expected => {
                            warnings.push(Warning::new(
                                WarningKind::IrregularControlFlow,
                                format!(
                                    "stack depth mismatch entering block {}: {} vs {}",
                                    successor, existing, expected
                                ),
                            ));
                        }
                        Some(_) => {}
                    }
                }
            }

            blocks[block_id].instructions = statements;
            blocks[block_id].terminator = terminator;
        }

        Ok(ControlFlowGraph::from_parts(blocks, edges, 0, exit))
    }
}

struct BlockSim<'a, 'b> {
    lifter: &'b FunctionLifter<'a>,
    stack: Vec<ExprNode>,
    statements: Vec<StmtNode>,
}

impl BlockSim<'_, '_> {
    fn pop(&mut self, offset: usize) -> Result<ExprNode, StructuralError> {
        self.stack
            .pop()
            .ok_or(StructuralError::StackUnderflow { offset })
    }

    fn push_temp(&mut self, value: ExprNode) {
        let temp = factory::fresh_variable_name();
        self.statements
            .push(factory::let_single(temp.clone(), value));
        self.stack.push(factory::identifier(temp));
    }

    fn atom(&self, index: i64) -> String {
        self.lifter.module.atom(index as usize)
    }

    /// Block for a branch target; a jump past the last instruction lands
    /// on the exit block
    fn target_block(&self, instruction: &QjsInstruction, exit: BlockId) -> BlockId {
        let target = instruction.branch_target().unwrap_or(0);
        if target >= self.lifter.function.bytecode.len() {
            exit
        } else {
            self.lifter.block_of(target)
        }
    }

    /// Execute one instruction; `Some` means the block is terminated
    fn step(
        &mut self,
        instruction: &QjsInstruction,
        exit: BlockId,
    ) -> Result<Option<(Terminator, Vec<(BlockId, EdgeKind)>)>, StructuralError> {
        let offset = instruction.offset;
        match instruction.op {
            QjsOp::Nop => {}
            QjsOp::Unknown(raw) => {
                // Placeholder so positions line up with the original stream
                self.statements.push(factory::expression_stmt(factory::call(
                    factory::identifier("__unknown_opcode"),
                    vec![factory::number(raw as f64)],
                )));
            }
            QjsOp::PushConst => {
                let entry = self
                    .lifter
                    .function
                    .constant_pool
                    .get(instruction.operands[0] as usize)?;
                let expr = match entry {
                    PoolEntry::FunctionRef(target) => {
                        factory::identifier(self.lifter.module.atom(
                            self.lifter
                                .module
                                .functions
                                .get(*target as usize)
                                .map(|f| f.name_atom as usize)
                                .unwrap_or(usize::MAX),
                        ))
                    }
                    scalar => factory::literal(scalar.literal()),
                };
                self.stack.push(expr);
            }
            QjsOp::PushI32 => {
                self.stack
                    .push(factory::number(instruction.operands[0] as f64));
            }
            QjsOp::PushTrue => self.stack.push(factory::boolean(true)),
            QjsOp::PushFalse => self.stack.push(factory::boolean(false)),
            QjsOp::PushNull => self.stack.push(factory::null()),
            QjsOp::PushUndefined => self.stack.push(factory::undefined()),
            QjsOp::Dup => {
                let top = self.pop(offset)?;
                match &top.kind {
                    ExprKind::Literal(_) | ExprKind::Identifier { .. } => {
                        self.stack.push(top.clone());
                        self.stack.push(top);
                    }
                    _ => {
                        let temp = factory::fresh_variable_name();
                        self.statements
                            .push(factory::let_single(temp.clone(), top));
                        self.stack.push(factory::identifier(temp.clone()));
                        self.stack.push(factory::identifier(temp));
                    }
                }
            }
            QjsOp::Swap => {
                let b = self.pop(offset)?;
                let a = self.pop(offset)?;
                self.stack.push(b);
                self.stack.push(a);
            }
            QjsOp::Drop => {
                self.pop(offset)?;
            }
            QjsOp::GetLocal => {
                self.stack
                    .push(factory::identifier(format!("loc{}", instruction.operands[0])));
            }
            QjsOp::PutLocal => {
                let value = self.pop(offset)?;
                self.statements.push(factory::expression_stmt(factory::assign(
                    factory::identifier(format!("loc{}", instruction.operands[0])),
                    value,
                )));
            }
            QjsOp::GetArg => {
                self.stack
                    .push(factory::identifier(format!("a{}", instruction.operands[0])));
            }
            QjsOp::PutArg => {
                let value = self.pop(offset)?;
                self.statements.push(factory::expression_stmt(factory::assign(
                    factory::identifier(format!("a{}", instruction.operands[0])),
                    value,
                )));
            }
            QjsOp::GetVar => {
                let name = self.atom(instruction.operands[0]);
                self.stack.push(factory::identifier(name));
            }
            QjsOp::PutVar => {
                let value = self.pop(offset)?;
                let name = self.atom(instruction.operands[0]);
                self.statements.push(factory::expression_stmt(factory::assign(
                    factory::identifier(name),
                    value,
                )));
            }
            QjsOp::Add
            | QjsOp::Sub
            | QjsOp::Mul
            | QjsOp::Div
            | QjsOp::Mod
            | QjsOp::Pow
            | QjsOp::BitAnd
            | QjsOp::BitOr
            | QjsOp::BitXor
            | QjsOp::Shl
            | QjsOp::Sar
            | QjsOp::Shr
            | QjsOp::Eq
            | QjsOp::Neq
            | QjsOp::StrictEq
            | QjsOp::StrictNeq
            | QjsOp::Lt
            | QjsOp::Lte
            | QjsOp::Gt
            | QjsOp::Gte => {
                let right = self.pop(offset)?;
                let left = self.pop(offset)?;
                let op = binary_op(instruction.op);
                self.stack.push(factory::binary(op, left, right));
            }
            QjsOp::Neg => {
                let a = self.pop(offset)?;
                self.stack.push(factory::unary(UnaryOp::Neg, a));
            }
            QjsOp::Plus => {
                let a = self.pop(offset)?;
                self.stack.push(factory::unary(UnaryOp::Plus, a));
            }
            QjsOp::BitNot => {
                let a = self.pop(offset)?;
                self.stack.push(factory::unary(UnaryOp::BitNot, a));
            }
            QjsOp::LNot => {
                let a = self.pop(offset)?;
                self.stack.push(factory::unary(UnaryOp::Not, a));
            }
            QjsOp::TypeOf => {
                let a = self.pop(offset)?;
                self.stack.push(factory::unary(UnaryOp::TypeOf, a));
            }
            QjsOp::Call => {
                let argc = instruction.argc() as usize;
                let mut arguments = Vec::with_capacity(argc);
                for _ in 0..argc {
                    arguments.push(self.pop(offset)?);
                }
                arguments.reverse();
                let callee = self.pop(offset)?;
                self.push_temp(factory::call(callee, arguments));
            }
            QjsOp::CallMethod => {
                let argc = instruction.argc() as usize;
                let mut arguments = Vec::with_capacity(argc);
                for _ in 0..argc {
                    arguments.push(self.pop(offset)?);
                }
                arguments.reverse();
                let receiver = self.pop(offset)?;
                let method = self.atom(instruction.operands[0]);
                self.push_temp(factory::call(
                    factory::static_member(receiver, method),
                    arguments,
                ));
            }
            QjsOp::GetField => {
                let object = self.pop(offset)?;
                let name = self.atom(instruction.operands[0]);
                self.push_temp(factory::static_member(object, name));
            }
            QjsOp::PutField => {
                let value = self.pop(offset)?;
                let object = self.pop(offset)?;
                let name = self.atom(instruction.operands[0]);
                self.statements.push(factory::expression_stmt(factory::assign(
                    factory::static_member(object, name),
                    value,
                )));
            }
            QjsOp::GetArrayEl => {
                let index = self.pop(offset)?;
                let object = self.pop(offset)?;
                self.push_temp(factory::index_member(object, index));
            }
            QjsOp::PutArrayEl => {
                let value = self.pop(offset)?;
                let index = self.pop(offset)?;
                let object = self.pop(offset)?;
                self.statements.push(factory::expression_stmt(factory::assign(
                    factory::index_member(object, index),
                    value,
                )));
            }
            QjsOp::ArrayFrom => {
                let argc = instruction.argc() as usize;
                let mut elements = Vec::with_capacity(argc);
                for _ in 0..argc {
                    elements.push(self.pop(offset)?);
                }
                elements.reverse();
                self.stack.push(factory::array(elements));
            }
            QjsOp::ObjectNew => {
                self.stack.push(factory::object(Vec::new()));
            }
            QjsOp::Goto => {
                let target = self.target_block(instruction, exit);
                return Ok(Some((
                    Terminator::Jump(target),
                    vec![(target, EdgeKind::Jump)],
                )));
            }
            QjsOp::IfTrue | QjsOp::IfFalse => {
                let condition = self.pop(offset)?;
                let target = self.target_block(instruction, exit);
                let next = instruction.offset + instruction.size;
                let fallthrough = if next >= self.lifter.function.bytecode.len() {
                    exit
                } else {
                    self.lifter.block_of(next)
                };
                let (true_target, false_target) = if instruction.op == QjsOp::IfTrue {
                    (target, fallthrough)
                } else {
                    (fallthrough, target)
                };
                return Ok(Some((
                    Terminator::Branch {
                        condition,
                        true_target,
                        false_target,
                    },
                    vec![
                        (true_target, EdgeKind::True),
                        (false_target, EdgeKind::False),
                    ],
                )));
            }
            QjsOp::Ret => {
                let value = self.pop(offset)?;
                return Ok(Some((
                    Terminator::Return(Some(value)),
                    vec![(exit, EdgeKind::Jump)],
                )));
            }
            QjsOp::RetUndef => {
                return Ok(Some((Terminator::Return(None), vec![(exit, EdgeKind::Jump)])));
            }
            QjsOp::Throw => {
                let value = self.pop(offset)?;
                return Ok(Some((
                    Terminator::Throw(value),
                    vec![(exit, EdgeKind::Exception)],
                )));
            }
        }
        Ok(None)
    }
}

fn binary_op(op: QjsOp) -> BinaryOp {
    match op {
        QjsOp::Add => BinaryOp::Add,
        QjsOp::Sub => BinaryOp::Sub,
        QjsOp::Mul => BinaryOp::Mul,
        QjsOp::Div => BinaryOp::Div,
        QjsOp::Mod => BinaryOp::Mod,
        QjsOp::Pow => BinaryOp::Exp,
        QjsOp::BitAnd => BinaryOp::BitAnd,
        QjsOp::BitOr => BinaryOp::BitOr,
        QjsOp::BitXor => BinaryOp::BitXor,
        QjsOp::Shl => BinaryOp::Shl,
        QjsOp::Sar => BinaryOp::Shr,
        QjsOp::Shr => BinaryOp::UShr,
        QjsOp::Eq => BinaryOp::Eq,
        QjsOp::Neq => BinaryOp::NotEq,
        QjsOp::StrictEq => BinaryOp::StrictEq,
        QjsOp::StrictNeq => BinaryOp::StrictNotEq,
        QjsOp::Lt => BinaryOp::Lt,
        QjsOp::Lte => BinaryOp::Le,
        QjsOp::Gt => BinaryOp::Gt,
        QjsOp::Gte => BinaryOp::Ge,
        other => unreachable!("not a binary opcode: {:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::LifterConfig;
    use crate::common::types::Literal;
    use crate::ir::node::StmtKind;
    use crate::lifters::pool::ConstantPool;
    use crate::lifters::qjs::module::QjsModuleParser;

    fn function_with(bytecode: Vec<u8>, pool: Vec<PoolEntry>) -> QjsModule {
        QjsModule {
            version: 1,
            flags: 0,
            atoms: vec!["main".into()],
            functions: vec![QjsFunction {
                flags: 0,
                name_atom: 0,
                param_count: 0,
                local_count: 0,
                defined_arg_count: 0,
                stack_size: 8,
                closure_var_count: 0,
                constant_pool: ConstantPool::new(pool),
                bytecode,
                debug: None,
            }],
        }
    }

    #[test]
    fn test_decode_simple_stream() {
        // push_const 0; push_const 1; add; ret
        let bytecode = vec![0x01, 0, 0, 0x01, 1, 0, 0x30, 0x70];
        let (instructions, warnings) = decode(&bytecode).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(instructions.len(), 4);
        assert_eq!(instructions[0].op, QjsOp::PushConst);
        assert_eq!(instructions[2].op, QjsOp::Add);
        assert_eq!(instructions[3].offset, 7);
    }

    #[test]
    fn test_unknown_opcode_warns_and_continues() {
        let bytecode = vec![0xEE, 0x71];
        let (instructions, warnings) = decode(&bytecode).unwrap();
        assert_eq!(instructions.len(), 2);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, WarningKind::UnknownOpcode);
    }

    #[test]
    fn test_truncated_operand_aborts() {
        let bytecode = vec![0x01, 0]; // push_const missing one index byte
        assert!(matches!(
            decode(&bytecode),
            Err(StructuralError::TruncatedOperand { .. })
        ));
    }

    #[test]
    fn test_lift_add_function() {
        // Constant pool {0: 1, 1: 2}; push, push, add, ret
        let module = function_with(
            vec![0x01, 0, 0, 0x01, 1, 0, 0x30, 0x70],
            vec![PoolEntry::Int(1), PoolEntry::Int(2)],
        );
        let (program, warnings) = QjsLifter::new().lift(&module);
        assert!(warnings.is_empty());
        assert_eq!(program.functions.len(), 1);
        let body = &program.functions[0].body;
        assert_eq!(body.len(), 1);
        let StmtKind::Return(Some(expr)) = &body[0].kind else {
            panic!("expected return, got {:?}", body[0].kind);
        };
        let ExprKind::Binary { op, left, right } = &expr.kind else {
            panic!("expected binary expression");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert_eq!(left.kind, ExprKind::Literal(Literal::Number(1.0)));
        assert_eq!(right.kind, ExprKind::Literal(Literal::Number(2.0)));
    }

    #[test]
    fn test_lift_branch_builds_if() {
        // get_arg 0; if_false +4; push_const 0; ret; push_const 1; ret
        //
        // offsets: 0: get_arg(2)  2: if_false(5)  7: push_const(3)
        //          10: ret(1)  11: push_const(3)  14: ret(1)
        let bytecode = vec![
            0x22, 0, // get_arg a0
            0x52, 4, 0, 0, 0, // if_false -> 11
            0x01, 0, 0, // push_const 0
            0x70, // ret
            0x01, 1, 0, // push_const 1
            0x70, // ret
        ];
        let module = {
            let mut m = function_with(
                bytecode,
                vec![PoolEntry::Str("yes".into()), PoolEntry::Str("no".into())],
            );
            m.functions[0].param_count = 1;
            m
        };
        let (program, warnings) = QjsLifter::new().lift(&module);
        assert!(warnings.is_empty(), "unexpected warnings: {:?}", warnings);
        let body = &program.functions[0].body;
        assert!(
            body.iter().any(|s| matches!(s.kind, StmtKind::If { .. })),
            "expected an if statement, got {:?}",
            body
        );
    }

    #[test]
    fn test_stack_underflow_skips_function_only() {
        let module = function_with(vec![0x30, 0x70], vec![]); // add on empty stack
        let (program, warnings) = QjsLifter::new().lift(&module);
        assert!(program.functions.is_empty());
        assert!(warnings
            .iter()
            .any(|w| w.kind == WarningKind::FunctionSkipped));
    }

    #[test]
    fn test_round_trip_through_parser() {
        use crate::lifters::reader::{write_string, write_varint_u32};
        let mut out = Vec::new();
        out.extend_from_slice(b"qjs\0");
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes());
        write_string(&mut out, "calc");
        out.extend_from_slice(&0u32.to_le_bytes());
        write_varint_u32(&mut out, 0); // name atom
        write_varint_u32(&mut out, 0); // params
        write_varint_u32(&mut out, 0); // locals
        write_varint_u32(&mut out, 0); // defined args
        write_varint_u32(&mut out, 2); // stack size
        write_varint_u32(&mut out, 0); // closure vars
        write_varint_u32(&mut out, 2); // pool count
        out.push(4);
        crate::lifters::reader::write_varint_i32(&mut out, 1);
        out.push(4);
        crate::lifters::reader::write_varint_i32(&mut out, 2);
        let code = vec![0x01u8, 0, 0, 0x01, 1, 0, 0x30, 0x70];
        write_varint_u32(&mut out, code.len() as u32);
        out.extend_from_slice(&code);

        let parser = QjsModuleParser::new(&LifterConfig::default());
        let (module, parse_warnings) = parser.parse(&out).unwrap();
        assert!(parse_warnings.is_empty());
        let (program, lift_warnings) = QjsLifter::new().lift(&module);
        assert!(lift_warnings.is_empty());
        assert_eq!(program.functions.len(), 1);
        assert_eq!(program.functions[0].name, "calc");
    }
}
