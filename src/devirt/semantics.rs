//! Opcode-semantics inference
//!
//! Phase 2 of devirtualisation: for each handler body, statically extract
//! register reads and writes, virtual-stack pushes and pops, the operator
//! used, the control-flow effect, a category, and a confidence score from
//! pattern clarity. Operand slots are the `code[pc++]` reads of the
//! handler, numbered in evaluation order.

use serde::{Deserialize, Serialize};

use crate::common::types::{BinaryOp, Literal};
use crate::ir::node::{ExprKind, ExprNode, StmtKind, StmtNode};
use crate::devirt::detect::{match_pc_read, DispatcherInfo};

/// Where a virtual-register index comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegRef {
    /// The register index is the value of operand slot `n`
    Operand(u32),
    /// The register index is a fixed literal in the handler
    Fixed(i64),
}

/// Control-flow effect of a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlEffect {
    /// Execution continues at the next virtual instruction
    FallThrough,
    /// The program counter is assigned from operand slot `operand`
    Jump { operand: u32 },
    /// A pc assignment wrapped in a conditional
    ConditionalJump { operand: u32 },
    /// The handler returns from the interpreter function
    Return,
    /// The handler invokes a sub-handler
    Call,
    /// The handler raises
    Throw,
}

/// Handler category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpcodeCategory {
    Arithmetic,
    Load,
    Store,
    Control,
    Comparison,
    Logical,
    Stack,
    Call,
}

/// Inferred semantics of one virtual opcode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpcodeSemantics {
    pub reads: Vec<RegRef>,
    pub writes: Vec<RegRef>,
    pub pushes: u32,
    pub pops: u32,
    /// First qualifying operator in the handler
    pub operator: Option<BinaryOp>,
    pub control: ControlEffect,
    pub category: OpcodeCategory,
    /// Number of `code[pc++]` reads; the virtual instruction advances the
    /// pc by one plus this count
    pub operand_count: u32,
    /// Immediate operand slots: `code[pc++]` reads used as plain values
    /// rather than register indices or jump targets
    pub immediates: Vec<u32>,
    pub confidence: f64,
}

struct HandlerScan<'a> {
    info: &'a DispatcherInfo,
    next_operand: u32,
    reads: Vec<RegRef>,
    writes: Vec<RegRef>,
    pushes: u32,
    pops: u32,
    operator: Option<BinaryOp>,
    saw_logical: bool,
    control: ControlEffect,
    immediates: Vec<u32>,
}

/// Analyze one handler body
pub fn analyze_handler(handler: &[StmtNode], info: &DispatcherInfo) -> OpcodeSemantics {
    let mut scan = HandlerScan {
        info,
        next_operand: 0,
        reads: Vec::new(),
        writes: Vec::new(),
        pushes: 0,
        pops: 0,
        operator: None,
        saw_logical: false,
        control: ControlEffect::FallThrough,
        immediates: Vec::new(),
    };
    for stmt in handler {
        scan.scan_stmt(stmt, false);
    }

    let control = scan.control;
    let category = categorize(&scan);

    // Pattern-clarity score: base 0.5, clear register activity +0.2,
    // clear stack effect +0.2, detectable control flow +0.1, very short
    // body -0.2, clamped to [0, 1]
    let mut confidence: f64 = 0.5;
    if !scan.reads.is_empty() || !scan.writes.is_empty() {
        confidence += 0.2;
    }
    if scan.pushes + scan.pops > 0 {
        confidence += 0.2;
    }
    if !matches!(control, ControlEffect::FallThrough) {
        confidence += 0.1;
    }
    if handler.len() <= 1 && handler.iter().map(count_exprs).sum::<usize>() <= 2 {
        confidence -= 0.2;
    }
    let confidence = confidence.clamp(0.0, 1.0);

    OpcodeSemantics {
        reads: scan.reads,
        writes: scan.writes,
        pushes: scan.pushes,
        pops: scan.pops,
        operator: scan.operator,
        control,
        category,
        operand_count: scan.next_operand,
        immediates: scan.immediates,
        confidence,
    }
}

fn count_exprs(stmt: &StmtNode) -> usize {
    let mut count = 0;
    stmt.for_each_expr(&mut |_| count += 1);
    count
}

fn categorize(scan: &HandlerScan<'_>) -> OpcodeCategory {
    match scan.control {
        ControlEffect::Jump { .. }
        | ControlEffect::ConditionalJump { .. }
        | ControlEffect::Return
        | ControlEffect::Throw => return OpcodeCategory::Control,
        ControlEffect::Call => return OpcodeCategory::Call,
        ControlEffect::FallThrough => {}
    }
    if let Some(op) = scan.operator {
        if op.is_comparison() {
            return OpcodeCategory::Comparison;
        }
        return OpcodeCategory::Arithmetic;
    }
    if scan.saw_logical {
        return OpcodeCategory::Logical;
    }
    if scan.pushes + scan.pops > 0 {
        return OpcodeCategory::Stack;
    }
    if !scan.writes.is_empty() && scan.reads.is_empty() {
        return OpcodeCategory::Load;
    }
    OpcodeCategory::Store
}

impl HandlerScan<'_> {
    fn scan_stmt(&mut self, stmt: &StmtNode, in_conditional: bool) {
        match &stmt.kind {
            StmtKind::Expression(expr) => self.scan_expr(expr, false, in_conditional),
            StmtKind::VarDecl { declarators, .. } => {
                for declarator in declarators {
                    if let Some(init) = &declarator.init {
                        self.scan_expr(init, false, in_conditional);
                    }
                }
            }
            StmtKind::If {
                test,
                consequent,
                alternate,
            } => {
                self.scan_expr(test, false, in_conditional);
                self.scan_stmt(consequent, true);
                if let Some(alternate) = alternate {
                    self.scan_stmt(alternate, true);
                }
            }
            StmtKind::Block(stmts) => {
                for s in stmts {
                    self.scan_stmt(s, in_conditional);
                }
            }
            StmtKind::Return(argument) => {
                if let Some(argument) = argument {
                    self.scan_expr(argument, false, in_conditional);
                }
                self.control = ControlEffect::Return;
            }
            StmtKind::Throw(argument) => {
                self.scan_expr(argument, false, in_conditional);
                if matches!(self.control, ControlEffect::FallThrough) {
                    self.control = ControlEffect::Throw;
                }
            }
            _ => {}
        }
    }

    /// Walk an expression in evaluation order
    ///
    /// `write_position` marks assignment targets; `in_conditional` marks
    /// contexts where a pc assignment means a conditional jump.
    fn scan_expr(&mut self, expr: &ExprNode, write_position: bool, in_conditional: bool) {
        // code[pc++] allocates an operand slot
        if let Some((code, pc)) = match_pc_read(expr) {
            if code == self.info.code_array && pc == self.info.pc_var {
                let slot = self.next_operand;
                self.next_operand += 1;
                self.immediates.push(slot);
                return;
            }
        }

        match &expr.kind {
            ExprKind::Assignment { target, value, .. } => {
                // pc = <operand> is a jump
                if matches!(
                    &target.kind,
                    ExprKind::Identifier { name, .. } if *name == self.info.pc_var
                ) {
                    let before = self.next_operand;
                    self.scan_expr(value, false, in_conditional);
                    let operand = before;
                    // Remove the target slot from the immediate pool
                    self.immediates.retain(|s| *s != operand);
                    self.control = if in_conditional {
                        ControlEffect::ConditionalJump { operand }
                    } else {
                        ControlEffect::Jump { operand }
                    };
                    return;
                }
                self.scan_expr(target, true, in_conditional);
                self.scan_expr(value, false, in_conditional);
            }
            ExprKind::Member {
                object,
                property,
                computed: true,
            } => {
                let is_register_array = matches!(
                    (&object.kind, &self.info.register_array),
                    (ExprKind::Identifier { name, .. }, Some(regs)) if name == regs
                );
                if is_register_array {
                    let reference = self.register_reference(property);
                    if write_position {
                        self.writes.push(reference);
                    } else {
                        self.reads.push(reference);
                    }
                    // The subscript was consumed as a register index
                    if let RegRef::Operand(slot) = reference {
                        self.immediates.retain(|s| *s != slot);
                    }
                } else {
                    self.scan_expr(object, false, in_conditional);
                    self.scan_expr(property, false, in_conditional);
                }
            }
            ExprKind::Call { callee, arguments } => {
                let mut handled = false;
                if let ExprKind::Member {
                    object,
                    property,
                    computed: false,
                } = &callee.kind
                {
                    if let (
                        ExprKind::Identifier { name: recv, .. },
                        ExprKind::Identifier { name: method, .. },
                    ) = (&object.kind, &property.kind)
                    {
                        if Some(recv) == self.info.stack_var.as_ref() {
                            match method.as_str() {
                                "push" => {
                                    for argument in arguments {
                                        self.scan_expr(argument, false, in_conditional);
                                    }
                                    self.pushes += 1;
                                    handled = true;
                                }
                                "pop" => {
                                    self.pops += 1;
                                    handled = true;
                                }
                                _ => {}
                            }
                        }
                    }
                }
                if !handled {
                    // A call to anything else is a sub-handler invocation
                    if matches!(self.control, ControlEffect::FallThrough) {
                        self.control = ControlEffect::Call;
                    }
                    self.scan_expr(callee, false, in_conditional);
                    for argument in arguments {
                        self.scan_expr(argument, false, in_conditional);
                    }
                }
            }
            ExprKind::Binary { op, left, right } => {
                if self.operator.is_none() {
                    self.operator = Some(*op);
                }
                self.scan_expr(left, false, in_conditional);
                self.scan_expr(right, false, in_conditional);
            }
            ExprKind::Logical { left, right, .. } => {
                self.saw_logical = true;
                self.scan_expr(left, false, in_conditional);
                self.scan_expr(right, false, in_conditional);
            }
            ExprKind::Unary { argument, .. } | ExprKind::Update { argument, .. } => {
                self.scan_expr(argument, false, in_conditional);
            }
            ExprKind::Conditional {
                test,
                consequent,
                alternate,
            } => {
                self.scan_expr(test, false, in_conditional);
                self.scan_expr(consequent, false, true);
                self.scan_expr(alternate, false, true);
            }
            ExprKind::Array { elements } => {
                for element in elements {
                    self.scan_expr(element, false, in_conditional);
                }
            }
            ExprKind::Object { properties } => {
                for property in properties {
                    self.scan_expr(&property.value, false, in_conditional);
                }
            }
            ExprKind::Member { object, property, .. } => {
                self.scan_expr(object, false, in_conditional);
                self.scan_expr(property, false, in_conditional);
            }
            ExprKind::Literal(_)
            | ExprKind::Identifier { .. }
            | ExprKind::Function { .. }
            | ExprKind::Phi { .. } => {}
        }
    }

    /// Resolve a register-array subscript to an operand slot or a fixed
    /// index
    fn register_reference(&mut self, subscript: &ExprNode) -> RegRef {
        if let Some((code, pc)) = match_pc_read(subscript) {
            if code == self.info.code_array && pc == self.info.pc_var {
                let slot = self.next_operand;
                self.next_operand += 1;
                return RegRef::Operand(slot);
            }
        }
        if let ExprKind::Literal(Literal::Number(n)) = &subscript.kind {
            if n.fract() == 0.0 {
                return RegRef::Fixed(*n as i64);
            }
        }
        // Anything else degrades to register 0; the caller's confidence
        // accounting keeps such handlers out of eager devirtualisation
        RegRef::Fixed(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::UpdateOp;
    use crate::ir::factory;
    use std::collections::BTreeMap;

    fn info() -> DispatcherInfo {
        DispatcherInfo {
            kind: crate::devirt::detect::VmKind::Register,
            code_array: "ops".into(),
            pc_var: "pc".into(),
            register_array: Some("regs".into()),
            stack_var: Some("stack".into()),
            handlers: BTreeMap::new(),
            confidence: 0.8,
        }
    }

    fn pc_read() -> crate::ir::node::ExprNode {
        factory::index_member(
            factory::identifier("ops"),
            factory::update(UpdateOp::Increment, false, factory::identifier("pc")),
        )
    }

    fn reg_at(index: crate::ir::node::ExprNode) -> crate::ir::node::ExprNode {
        factory::index_member(factory::identifier("regs"), index)
    }

    #[test]
    fn test_add_handler_semantics() {
        // regs[ops[pc++]] = regs[ops[pc++]] + regs[ops[pc++]]
        let handler = vec![factory::expression_stmt(factory::assign(
            reg_at(pc_read()),
            factory::binary(BinaryOp::Add, reg_at(pc_read()), reg_at(pc_read())),
        ))];
        let semantics = analyze_handler(&handler, &info());
        assert_eq!(semantics.writes, vec![RegRef::Operand(0)]);
        assert_eq!(semantics.reads, vec![RegRef::Operand(1), RegRef::Operand(2)]);
        assert_eq!(semantics.operator, Some(BinaryOp::Add));
        assert_eq!(semantics.operand_count, 3);
        assert_eq!(semantics.control, ControlEffect::FallThrough);
        assert_eq!(semantics.category, OpcodeCategory::Arithmetic);
        assert!(semantics.immediates.is_empty());
        assert!(semantics.confidence >= 0.6);
    }

    #[test]
    fn test_return_handler_semantics() {
        // return regs[0]
        let handler = vec![factory::return_stmt(Some(reg_at(factory::number(0.0))))];
        let semantics = analyze_handler(&handler, &info());
        assert_eq!(semantics.control, ControlEffect::Return);
        assert_eq!(semantics.reads, vec![RegRef::Fixed(0)]);
        assert_eq!(semantics.category, OpcodeCategory::Control);
    }

    #[test]
    fn test_load_immediate_handler() {
        // regs[ops[pc++]] = ops[pc++]
        let handler = vec![factory::expression_stmt(factory::assign(
            reg_at(pc_read()),
            pc_read(),
        ))];
        let semantics = analyze_handler(&handler, &info());
        assert_eq!(semantics.writes, vec![RegRef::Operand(0)]);
        assert!(semantics.reads.is_empty());
        assert_eq!(semantics.operand_count, 2);
        assert_eq!(semantics.immediates, vec![1]);
        assert_eq!(semantics.category, OpcodeCategory::Load);
    }

    #[test]
    fn test_jump_handler_semantics() {
        // pc = ops[pc++]
        let handler = vec![factory::expression_stmt(factory::assign(
            factory::identifier("pc"),
            pc_read(),
        ))];
        let semantics = analyze_handler(&handler, &info());
        assert_eq!(semantics.control, ControlEffect::Jump { operand: 0 });
        assert_eq!(semantics.category, OpcodeCategory::Control);
        assert!(semantics.immediates.is_empty());
    }

    #[test]
    fn test_conditional_jump_semantics() {
        // if (regs[ops[pc++]]) pc = ops[pc++];
        let handler = vec![factory::if_stmt(
            reg_at(pc_read()),
            factory::expression_stmt(factory::assign(factory::identifier("pc"), pc_read())),
            None,
        )];
        let semantics = analyze_handler(&handler, &info());
        assert_eq!(
            semantics.control,
            ControlEffect::ConditionalJump { operand: 1 }
        );
        assert_eq!(semantics.reads, vec![RegRef::Operand(0)]);
    }

    #[test]
    fn test_stack_push_semantics() {
        // stack.push(ops[pc++])
        let handler = vec![factory::expression_stmt(factory::call(
            factory::static_member(factory::identifier("stack"), "push"),
            vec![pc_read()],
        ))];
        let semantics = analyze_handler(&handler, &info());
        assert_eq!(semantics.pushes, 1);
        assert_eq!(semantics.pops, 0);
        assert_eq!(semantics.category, OpcodeCategory::Stack);
        assert_eq!(semantics.immediates, vec![0]);
    }
}
