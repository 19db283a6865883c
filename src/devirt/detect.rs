//! Dispatcher detection
//!
//! Phase 1 of devirtualisation: find the interpreter skeleton, a loop over
//! a `switch` (or chained `if`) dispatching on `code[pc++]`; extract the
//! per-case handler bodies, classify the virtual machine as stack-based,
//! register-based or hybrid, and score the detection.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::common::types::{BinaryOp, Literal, UpdateOp};
use crate::ir::node::{ExprKind, ExprNode, StmtKind, StmtNode};

/// Virtual-machine style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VmKind {
    Stack,
    Register,
    Hybrid,
}

/// Everything phase 1 learns about a dispatcher
#[derive(Debug, Clone)]
pub struct DispatcherInfo {
    pub kind: VmKind,
    /// Name of the virtual program array
    pub code_array: String,
    /// Name of the program counter variable
    pub pc_var: String,
    /// Name of the virtual register array, when one is subscripted
    pub register_array: Option<String>,
    /// Name of the virtual stack, when push/pop calls appear
    pub stack_var: Option<String>,
    /// Handler bodies keyed by opcode value
    pub handlers: BTreeMap<i64, Vec<StmtNode>>,
    /// Detection confidence in [0, 1]
    pub confidence: f64,
}

/// Scan a function body for a dispatch loop
pub fn detect_dispatcher(body: &[StmtNode]) -> Option<DispatcherInfo> {
    let mut found = None;
    for stmt in body {
        stmt.for_each_stmt(&mut |s| {
            if found.is_some() {
                return;
            }
            if let Some(info) = match_dispatch_loop(s) {
                found = Some(info);
            }
        });
        if found.is_some() {
            break;
        }
    }
    found
}

/// Match `code[pc++]`, returning the code array and pc names
pub fn match_pc_read(expr: &ExprNode) -> Option<(String, String)> {
    let ExprKind::Member {
        object,
        property,
        computed: true,
    } = &expr.kind
    else {
        return None;
    };
    let ExprKind::Identifier { name: code, .. } = &object.kind else {
        return None;
    };
    let ExprKind::Update {
        op: UpdateOp::Increment,
        prefix: false,
        argument,
    } = &property.kind
    else {
        return None;
    };
    let ExprKind::Identifier { name: pc, .. } = &argument.kind else {
        return None;
    };
    Some((code.clone(), pc.clone()))
}

fn loop_runs_forever(stmt: &StmtNode) -> Option<&StmtNode> {
    match &stmt.kind {
        StmtKind::While { test, body } => {
            let truthy = matches!(
                &test.kind,
                ExprKind::Literal(Literal::Bool(true))
            ) || matches!(
                &test.kind,
                ExprKind::Literal(Literal::Number(n)) if *n != 0.0
            );
            truthy.then(|| body.as_ref())
        }
        StmtKind::For { test, body, .. } => match test {
            None => Some(body.as_ref()),
            Some(t) if matches!(&t.kind, ExprKind::Literal(Literal::Bool(true))) => {
                Some(body.as_ref())
            }
            _ => None,
        },
        _ => None,
    }
}

fn match_dispatch_loop(stmt: &StmtNode) -> Option<DispatcherInfo> {
    let loop_body = loop_runs_forever(stmt)?;
    let inner: &[StmtNode] = match &loop_body.kind {
        StmtKind::Block(stmts) => stmts,
        _ => std::slice::from_ref(loop_body),
    };

    // switch (code[pc++]) { case k: ... }
    for s in inner {
        if let StmtKind::Switch {
            discriminant,
            cases,
        } = &s.kind
        {
            if let Some((code_array, pc_var)) = match_pc_read(discriminant) {
                return build_info(code_array, pc_var, collect_switch_handlers(cases), true);
            }
        }
    }

    // let op = code[pc++]; if (op === k) {...} else if ...
    if let [first, rest @ ..] = inner {
        if let StmtKind::VarDecl { declarators, .. } = &first.kind {
            if let [declarator] = declarators.as_slice() {
                if let Some(init) = &declarator.init {
                    if let Some((code_array, pc_var)) = match_pc_read(init) {
                        let handlers = collect_if_chain_handlers(&declarator.name, rest);
                        if !handlers.is_empty() {
                            return build_info(code_array, pc_var, handlers, false);
                        }
                    }
                }
            }
        }
    }

    None
}

fn collect_switch_handlers(
    cases: &[crate::ir::node::SwitchCase],
) -> BTreeMap<i64, Vec<StmtNode>> {
    let mut handlers = BTreeMap::new();
    for case in cases {
        let Some(test) = &case.test else { continue };
        let ExprKind::Literal(Literal::Number(n)) = &test.kind else {
            continue;
        };
        if n.fract() != 0.0 {
            continue;
        }
        // Trailing break is dispatch plumbing, not handler semantics
        let body: Vec<StmtNode> = case
            .body
            .iter()
            .filter(|s| !matches!(s.kind, StmtKind::Break(_)))
            .cloned()
            .collect();
        handlers.insert(*n as i64, body);
    }
    handlers
}

fn collect_if_chain_handlers(
    op_var: &str,
    stmts: &[StmtNode],
) -> BTreeMap<i64, Vec<StmtNode>> {
    let mut handlers = BTreeMap::new();
    for stmt in stmts {
        let mut cursor = Some(stmt);
        while let Some(current) = cursor {
            let StmtKind::If {
                test,
                consequent,
                alternate,
            } = &current.kind
            else {
                break;
            };
            if let Some(opcode) = match_opcode_test(op_var, test) {
                let body = match &consequent.kind {
                    StmtKind::Block(stmts) => stmts.clone(),
                    _ => vec![(**consequent).clone()],
                };
                handlers.insert(opcode, body);
            }
            cursor = alternate.as_deref();
        }
    }
    handlers
}

/// `op === <literal>` in either operand order
fn match_opcode_test(op_var: &str, test: &ExprNode) -> Option<i64> {
    let ExprKind::Binary {
        op: BinaryOp::StrictEq | BinaryOp::Eq,
        left,
        right,
    } = &test.kind
    else {
        return None;
    };
    for (a, b) in [(left, right), (right, left)] {
        if matches!(&a.kind, ExprKind::Identifier { name, .. } if name == op_var) {
            if let ExprKind::Literal(Literal::Number(n)) = &b.kind {
                if n.fract() == 0.0 {
                    return Some(*n as i64);
                }
            }
        }
    }
    None
}

fn build_info(
    code_array: String,
    pc_var: String,
    handlers: BTreeMap<i64, Vec<StmtNode>>,
    switch_based: bool,
) -> Option<DispatcherInfo> {
    if handlers.is_empty() {
        return None;
    }

    let (register_array, stack_var) = classify_state_access(&handlers, &pc_var, &code_array);
    let kind = match (&register_array, &stack_var) {
        (Some(_), Some(_)) => VmKind::Hybrid,
        (None, Some(_)) => VmKind::Stack,
        _ => VmKind::Register,
    };

    let mut confidence: f64 = 0.5;
    if handlers.len() >= 4 {
        confidence += 0.2;
    }
    // A pc-advancing subscript is the strongest dispatcher signal
    confidence += 0.2;
    if switch_based {
        confidence += 0.1;
    }
    let confidence = confidence.min(1.0);

    Some(DispatcherInfo {
        kind,
        code_array,
        pc_var,
        register_array,
        stack_var,
        handlers,
        confidence,
    })
}

/// Find the virtual register array (subscripted reads/writes) and the
/// virtual stack (push/pop receivers) used by the handlers
fn classify_state_access(
    handlers: &BTreeMap<i64, Vec<StmtNode>>,
    pc_var: &str,
    code_array: &str,
) -> (Option<String>, Option<String>) {
    let mut register_array = None;
    let mut stack_var = None;
    for body in handlers.values() {
        for stmt in body {
            stmt.for_each_expr(&mut |e| match &e.kind {
                ExprKind::Member {
                    object,
                    computed: true,
                    ..
                } => {
                    if let ExprKind::Identifier { name, .. } = &object.kind {
                        if name != code_array && name != pc_var && register_array.is_none() {
                            register_array = Some(name.clone());
                        }
                    }
                }
                ExprKind::Call { callee, .. } => {
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
                            if (method == "push" || method == "pop") && stack_var.is_none() {
                                stack_var = Some(recv.clone());
                            }
                        }
                    }
                }
                _ => {}
            });
        }
    }
    (register_array, stack_var)
}

/// Phase 3: the longest plausible numeric array in scope is the virtual
/// program; also recognises `Uint8Array([...])` construction
pub fn extract_bytecode(
    body: &[StmtNode],
    min_length: usize,
) -> Option<(String, Vec<i64>)> {
    let mut best: Option<(String, Vec<i64>)> = None;
    for stmt in body {
        stmt.for_each_stmt(&mut |s| {
            let StmtKind::VarDecl { declarators, .. } = &s.kind else {
                return;
            };
            for declarator in declarators {
                let Some(init) = &declarator.init else { continue };
                let elements = match &init.kind {
                    ExprKind::Array { elements } => Some(elements),
                    ExprKind::Call { callee, arguments } => {
                        // new Uint8Array([...]) arrives as a call in this IR
                        let is_typed_array = matches!(
                            &callee.kind,
                            ExprKind::Identifier { name, .. } if name.ends_with("Array")
                        );
                        if is_typed_array {
                            arguments.first().and_then(|a| match &a.kind {
                                ExprKind::Array { elements } => Some(elements),
                                _ => None,
                            })
                        } else {
                            None
                        }
                    }
                    _ => None,
                };
                let Some(elements) = elements else { continue };
                let mut values = Vec::with_capacity(elements.len());
                for element in elements {
                    match &element.kind {
                        ExprKind::Literal(Literal::Number(n)) if n.fract() == 0.0 => {
                            values.push(*n as i64)
                        }
                        _ => return,
                    }
                }
                if values.len() >= min_length
                    && best.as_ref().map(|(_, b)| values.len() > b.len()).unwrap_or(true)
                {
                    best = Some((declarator.name.clone(), values));
                }
            }
        });
    }
    best
}

/// Initial contents of the register array, when it is seeded with a
/// numeric literal array
pub fn extract_initial_registers(body: &[StmtNode], register_array: &str) -> Vec<i64> {
    let mut initial = Vec::new();
    for stmt in body {
        stmt.for_each_stmt(&mut |s| {
            let StmtKind::VarDecl { declarators, .. } = &s.kind else {
                return;
            };
            for declarator in declarators {
                if declarator.name != register_array {
                    continue;
                }
                let Some(ExprKind::Array { elements }) =
                    declarator.init.as_ref().map(|i| &i.kind)
                else {
                    continue;
                };
                initial = elements
                    .iter()
                    .filter_map(|e| match &e.kind {
                        ExprKind::Literal(Literal::Number(n)) => Some(*n as i64),
                        _ => None,
                    })
                    .collect();
            }
        });
    }
    initial
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::factory;
    use crate::ir::node::SwitchCase;

    /// while (true) { switch (ops[pc++]) { case 1: ...; break; case 2: return regs[0]; } }
    pub fn sample_dispatcher() -> Vec<StmtNode> {
        let pc_read = || {
            factory::index_member(
                factory::identifier("ops"),
                factory::update(UpdateOp::Increment, false, factory::identifier("pc")),
            )
        };
        let reg_at = |index: ExprNode| factory::index_member(factory::identifier("regs"), index);

        let add_handler = vec![
            factory::expression_stmt(factory::assign(
                reg_at(pc_read()),
                factory::binary(BinaryOp::Add, reg_at(pc_read()), reg_at(pc_read())),
            )),
            factory::break_stmt(None),
        ];
        let return_handler = vec![factory::return_stmt(Some(reg_at(factory::number(0.0))))];

        vec![
            factory::let_single(
                "ops",
                factory::array(
                    [1.0, 0.0, 0.0, 1.0, 2.0]
                        .iter()
                        .map(|n| factory::number(*n))
                        .collect(),
                ),
            ),
            factory::let_single(
                "regs",
                factory::array(
                    [5.0, 7.0, 0.0].iter().map(|n| factory::number(*n)).collect(),
                ),
            ),
            factory::let_single("pc", factory::number(0.0)),
            factory::while_stmt(
                factory::boolean(true),
                factory::block(vec![factory::switch_stmt(
                    pc_read(),
                    vec![
                        SwitchCase {
                            test: Some(factory::number(1.0)),
                            body: add_handler,
                        },
                        SwitchCase {
                            test: Some(factory::number(2.0)),
                            body: return_handler,
                        },
                    ],
                )]),
            ),
        ]
    }

    #[test]
    fn test_detects_switch_dispatcher() {
        let body = sample_dispatcher();
        let info = detect_dispatcher(&body).expect("dispatcher detected");
        assert_eq!(info.code_array, "ops");
        assert_eq!(info.pc_var, "pc");
        assert_eq!(info.register_array.as_deref(), Some("regs"));
        assert_eq!(info.kind, VmKind::Register);
        assert_eq!(info.handlers.len(), 2);
        assert!(info.confidence >= 0.6);
    }

    #[test]
    fn test_ordinary_loop_not_detected() {
        let body = vec![factory::while_stmt(
            factory::binary(
                BinaryOp::Lt,
                factory::identifier("i"),
                factory::number(10.0),
            ),
            factory::expression_stmt(factory::update(
                UpdateOp::Increment,
                false,
                factory::identifier("i"),
            )),
        )];
        assert!(detect_dispatcher(&body).is_none());
    }

    #[test]
    fn test_extract_bytecode_finds_longest() {
        let body = sample_dispatcher();
        let (name, values) = extract_bytecode(&body, 4).expect("bytecode array");
        assert_eq!(name, "ops");
        assert_eq!(values, vec![1, 0, 0, 1, 2]);
    }

    #[test]
    fn test_extract_initial_registers() {
        let body = sample_dispatcher();
        assert_eq!(extract_initial_registers(&body, "regs"), vec![5, 7, 0]);
    }

    #[test]
    fn test_detects_if_chain_dispatcher() {
        let pc_read = || {
            factory::index_member(
                factory::identifier("code"),
                factory::update(UpdateOp::Increment, false, factory::identifier("ip")),
            )
        };
        let body = vec![factory::while_stmt(
            factory::boolean(true),
            factory::block(vec![
                factory::let_single("op", pc_read()),
                factory::if_stmt(
                    factory::binary(
                        BinaryOp::StrictEq,
                        factory::identifier("op"),
                        factory::number(1.0),
                    ),
                    factory::expression_stmt(factory::call(
                        factory::static_member(factory::identifier("stack"), "push"),
                        vec![pc_read()],
                    )),
                    Some(factory::if_stmt(
                        factory::binary(
                            BinaryOp::StrictEq,
                            factory::identifier("op"),
                            factory::number(9.0),
                        ),
                        factory::return_stmt(Some(factory::call(
                            factory::static_member(factory::identifier("stack"), "pop"),
                            vec![],
                        ))),
                        None,
                    )),
                ),
            ]),
        )];
        let info = detect_dispatcher(&body).expect("if-chain dispatcher detected");
        assert_eq!(info.code_array, "code");
        assert_eq!(info.kind, VmKind::Stack);
        assert_eq!(info.handlers.len(), 2);
    }
}
