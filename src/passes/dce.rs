//! Dead-code elimination
//!
//! Per-block used/defined sets are kept as bitsets over a per-function
//! variable index; liveness iterates live-in = used ∪ (live-out − defined)
//! to convergence. Deletions are conservative: a declarator's initialiser
//! may be removed only when every call inside it targets a callee
//! classified as pure, and calls to unknown callees are never deleted.

use std::collections::{HashMap, HashSet};

use bitvec::prelude::*;
use tracing::debug;

use crate::common::types::{AssignOp, BlockId, NodeId};
use crate::analysis::cfg::{ControlFlowGraph, Terminator};
use crate::ir::node::{ExprKind, ExprNode, StmtKind, StmtNode};
use crate::ir::state::IrState;
use crate::passes::{Pass, PassMetrics, PassOutcome};

/// Callees whose invocations are side-effect free
const PURE_CALLEES: [&str; 5] = ["parseInt", "parseFloat", "String", "Number", "Boolean"];

/// Liveness-driven removal of dead declarations, statements and branches
pub struct DeadCodeElimination;

impl DeadCodeElimination {
    /// Create the pass
    pub fn new() -> Self {
        Self
    }
}

impl Default for DeadCodeElimination {
    fn default() -> Self {
        Self::new()
    }
}

impl Pass for DeadCodeElimination {
    fn name(&self) -> &'static str {
        "dead-code-elimination"
    }

    fn description(&self) -> &'static str {
        "liveness-based removal of unused declarations and effect-free statements"
    }

    fn execute(&self, state: &IrState) -> PassOutcome {
        let started = std::time::Instant::now();
        let mut new_state = state.clone();
        let mut removed = 0u64;
        let mut visited = 0u64;

        for (index, function) in new_state.program.functions.iter_mut().enumerate() {
            let Some(analysis) = state.analysis(index) else {
                continue;
            };
            let referenced = referenced_names(&function.body);
            let dead_stores = find_dead_stores(&analysis.cfg);
            visited += function.body.iter().map(count_stmts).sum::<u64>();

            let body = std::mem::take(&mut function.body);
            function.body = sweep_stmts(body, &referenced, &dead_stores, &mut removed);
        }

        let changed = removed > 0;
        if changed {
            new_state.request_recompute();
        }
        debug!(removed, "dead-code elimination done");

        PassOutcome {
            state: new_state,
            changed,
            warnings: Vec::new(),
            metrics: PassMetrics {
                nodes_visited: visited,
                nodes_changed: removed,
                duration_us: started.elapsed().as_micros() as u64,
                warnings: 0,
            },
        }
    }
}

fn count_stmts(stmt: &StmtNode) -> u64 {
    let mut count = 0;
    stmt.for_each_stmt(&mut |_| count += 1);
    count
}

/// Every identifier name read anywhere in the statements, including inside
/// nested function bodies; assignment targets do not count as reads
fn referenced_names(body: &[StmtNode]) -> HashSet<String> {
    let mut names = HashSet::new();
    for stmt in body {
        collect_reads_stmt(stmt, &mut names);
    }
    names
}

fn collect_reads_stmt(stmt: &StmtNode, names: &mut HashSet<String>) {
    match &stmt.kind {
        StmtKind::Expression(expr) => collect_reads_expr(expr, names),
        StmtKind::VarDecl { declarators, .. } => {
            for declarator in declarators {
                if let Some(init) = &declarator.init {
                    collect_reads_expr(init, names);
                }
            }
        }
        StmtKind::Block(body) => {
            for stmt in body {
                collect_reads_stmt(stmt, names);
            }
        }
        StmtKind::If {
            test,
            consequent,
            alternate,
        } => {
            collect_reads_expr(test, names);
            collect_reads_stmt(consequent, names);
            if let Some(alternate) = alternate {
                collect_reads_stmt(alternate, names);
            }
        }
        StmtKind::While { test, body } => {
            collect_reads_expr(test, names);
            collect_reads_stmt(body, names);
        }
        StmtKind::DoWhile { body, test } => {
            collect_reads_stmt(body, names);
            collect_reads_expr(test, names);
        }
        StmtKind::For {
            init,
            test,
            update,
            body,
        } => {
            if let Some(init) = init {
                collect_reads_stmt(init, names);
            }
            if let Some(test) = test {
                collect_reads_expr(test, names);
            }
            if let Some(update) = update {
                collect_reads_expr(update, names);
            }
            collect_reads_stmt(body, names);
        }
        StmtKind::Switch {
            discriminant,
            cases,
        } => {
            collect_reads_expr(discriminant, names);
            for case in cases {
                if let Some(test) = &case.test {
                    collect_reads_expr(test, names);
                }
                for stmt in &case.body {
                    collect_reads_stmt(stmt, names);
                }
            }
        }
        StmtKind::Return(Some(argument)) | StmtKind::Throw(argument) => {
            collect_reads_expr(argument, names)
        }
        StmtKind::Try {
            block,
            handler,
            finalizer,
        } => {
            for stmt in block {
                collect_reads_stmt(stmt, names);
            }
            if let Some(handler) = handler {
                for stmt in &handler.body {
                    collect_reads_stmt(stmt, names);
                }
            }
            if let Some(finalizer) = finalizer {
                for stmt in finalizer {
                    collect_reads_stmt(stmt, names);
                }
            }
        }
        StmtKind::FunctionDecl { body, .. } => {
            for stmt in body {
                collect_reads_stmt(stmt, names);
            }
        }
        StmtKind::Labeled { body, .. } => collect_reads_stmt(body, names),
        StmtKind::Return(None)
        | StmtKind::Break(_)
        | StmtKind::Continue(_)
        | StmtKind::Empty => {}
    }
}

fn collect_reads_expr(expr: &ExprNode, names: &mut HashSet<String>) {
    match &expr.kind {
        ExprKind::Identifier { name, .. } => {
            names.insert(name.clone());
        }
        ExprKind::Assignment { op, target, value } => {
            if let ExprKind::Identifier { name, .. } = &target.kind {
                // Plain assignment targets are writes, compound also reads
                if matches!(op, AssignOp::Compound(_)) {
                    names.insert(name.clone());
                }
            } else {
                collect_reads_expr(target, names);
            }
            collect_reads_expr(value, names);
        }
        ExprKind::Function { body, .. } => {
            for stmt in body {
                collect_reads_stmt(stmt, names);
            }
        }
        _ => {
            // All remaining positions are reads
            let mut first = true;
            expr.for_each_expr(&mut |e| {
                if first {
                    first = false;
                    return;
                }
                match &e.kind {
                    ExprKind::Identifier { name, .. } => {
                        names.insert(name.clone());
                    }
                    ExprKind::Function { body, .. } => {
                        for stmt in body {
                            collect_reads_stmt(stmt, names);
                        }
                    }
                    _ => {}
                }
            });
        }
    }
}

/// Per-block liveness over a bitset variable index, then a backward
/// in-block scan marking dead pure stores
fn find_dead_stores(cfg: &ControlFlowGraph) -> HashSet<NodeId> {
    // Variable index
    let mut index: HashMap<String, usize> = HashMap::new();
    for block in &cfg.blocks {
        for stmt in &block.instructions {
            names_in_stmt(stmt, &mut |name| {
                let next = index.len();
                index.entry(name.to_string()).or_insert(next);
            });
        }
        terminator_uses(&block.terminator, &mut |name| {
            let next = index.len();
            index.entry(name.to_string()).or_insert(next);
        });
    }
    let nvars = index.len();
    if nvars == 0 {
        return HashSet::new();
    }

    // used/defined bitsets per block, in evaluation order
    let mut used: HashMap<BlockId, BitVec> = HashMap::new();
    let mut defined: HashMap<BlockId, BitVec> = HashMap::new();
    for block in &cfg.blocks {
        let mut use_bits = bitvec![0; nvars];
        let mut def_bits = bitvec![0; nvars];
        for stmt in &block.instructions {
            uses_of_stmt(stmt, &mut |name| {
                let i = index[name];
                if !def_bits[i] {
                    use_bits.set(i, true);
                }
            });
            defs_of_stmt(stmt, &mut |name| {
                def_bits.set(index[name], true);
            });
        }
        terminator_uses(&block.terminator, &mut |name| {
            let i = index[name];
            if !def_bits[i] {
                use_bits.set(i, true);
            }
        });
        used.insert(block.id, use_bits);
        defined.insert(block.id, def_bits);
    }

    // live-in = used ∪ (live-out − defined), to convergence
    let mut live_in: HashMap<BlockId, BitVec> = cfg
        .blocks
        .iter()
        .map(|b| (b.id, used[&b.id].clone()))
        .collect();
    loop {
        let mut changed = false;
        for block in &cfg.blocks {
            let mut live_out = bitvec![0; nvars];
            for &succ in cfg.successors(block.id) {
                for i in live_in[&succ].iter_ones() {
                    live_out.set(i, true);
                }
            }
            let mut updated = used[&block.id].clone();
            for i in live_out.iter_ones() {
                if !defined[&block.id][i] {
                    updated.set(i, true);
                }
            }
            if updated != live_in[&block.id] {
                live_in.insert(block.id, updated);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    // Backward scan inside each block
    let mut dead = HashSet::new();
    for block in &cfg.blocks {
        let mut live = bitvec![0; nvars];
        for &succ in cfg.successors(block.id) {
            for i in live_in[&succ].iter_ones() {
                live.set(i, true);
            }
        }
        terminator_uses(&block.terminator, &mut |name| {
            live.set(index[name], true);
        });
        for stmt in block.instructions.iter().rev() {
            if let Some(name) = pure_store_target(stmt) {
                let i = index[&name];
                if !live[i] {
                    dead.insert(stmt.id);
                    continue;
                }
            }
            defs_of_stmt(stmt, &mut |name| {
                live.set(index[name], false);
            });
            uses_of_stmt(stmt, &mut |name| {
                live.set(index[name], true);
            });
        }
    }
    dead
}

/// `x = <pure>` as a whole statement; returns the target name
fn pure_store_target(stmt: &StmtNode) -> Option<String> {
    let StmtKind::Expression(expr) = &stmt.kind else {
        return None;
    };
    let ExprKind::Assignment {
        op: AssignOp::Assign,
        target,
        value,
    } = &expr.kind
    else {
        return None;
    };
    let ExprKind::Identifier { name, .. } = &target.kind else {
        return None;
    };
    if is_pure_expr(value) {
        Some(name.clone())
    } else {
        None
    }
}

fn names_in_stmt(stmt: &StmtNode, f: &mut impl FnMut(&str)) {
    uses_of_stmt(stmt, f);
    defs_of_stmt(stmt, f);
}

fn uses_of_stmt(stmt: &StmtNode, f: &mut impl FnMut(&str)) {
    let mut names = HashSet::new();
    collect_reads_stmt(stmt, &mut names);
    for name in names {
        f(&name);
    }
}

fn defs_of_stmt(stmt: &StmtNode, f: &mut impl FnMut(&str)) {
    match &stmt.kind {
        StmtKind::VarDecl { declarators, .. } => {
            for declarator in declarators {
                f(&declarator.name);
            }
        }
        StmtKind::FunctionDecl { name, .. } => f(name),
        StmtKind::Expression(expr) => {
            expr.for_each_expr(&mut |e| match &e.kind {
                ExprKind::Assignment { target, .. } => {
                    if let ExprKind::Identifier { name, .. } = &target.kind {
                        f(name);
                    }
                }
                ExprKind::Update { argument, .. } => {
                    if let ExprKind::Identifier { name, .. } = &argument.kind {
                        f(name);
                    }
                }
                _ => {}
            });
        }
        _ => {}
    }
}

fn terminator_uses(terminator: &Terminator, f: &mut impl FnMut(&str)) {
    let expr = match terminator {
        Terminator::Branch { condition, .. } => condition,
        Terminator::Return(Some(argument)) | Terminator::Throw(argument) => argument,
        _ => return,
    };
    let mut names = HashSet::new();
    collect_reads_expr(expr, &mut names);
    for name in names {
        f(&name);
    }
}

/// True when evaluating the expression has no observable effect: no
/// assignments or updates, and every call targets a pure callee
pub fn is_pure_expr(expr: &ExprNode) -> bool {
    let mut pure = true;
    expr.for_each_expr(&mut |e| match &e.kind {
        ExprKind::Assignment { .. } | ExprKind::Update { .. } => pure = false,
        ExprKind::Call { callee, .. } => {
            if !is_pure_callee(callee) {
                pure = false;
            }
        }
        _ => {}
    });
    pure
}

fn is_pure_callee(callee: &ExprNode) -> bool {
    match &callee.kind {
        ExprKind::Identifier { name, .. } => PURE_CALLEES.contains(&name.as_str()),
        ExprKind::Member {
            object, property, ..
        } => {
            matches!(&object.kind, ExprKind::Identifier { name, .. } if name == "Math")
                && matches!(property.kind, ExprKind::Identifier { .. })
        }
        _ => false,
    }
}

/// Rewrite a statement list, dropping dead code
fn sweep_stmts(
    body: Vec<StmtNode>,
    referenced: &HashSet<String>,
    dead_stores: &HashSet<NodeId>,
    removed: &mut u64,
) -> Vec<StmtNode> {
    let mut out = Vec::new();
    let mut unreachable = false;
    for stmt in body {
        if unreachable {
            *removed += 1;
            continue;
        }
        let terminal = matches!(stmt.kind, StmtKind::Return(_) | StmtKind::Throw(_));
        if let Some(stmt) = sweep_stmt(stmt, referenced, dead_stores, removed) {
            out.push(stmt);
        }
        if terminal {
            unreachable = true;
        }
    }
    out
}

/// Sweep one statement; a survivor whose substructure shrank gets a fresh
/// identifier, keeping surviving identifiers structurally stable
fn sweep_stmt(
    stmt: StmtNode,
    referenced: &HashSet<String>,
    dead_stores: &HashSet<NodeId>,
    removed: &mut u64,
) -> Option<StmtNode> {
    let original = stmt.id;
    let before = *removed;
    let mut out = sweep_stmt_inner(stmt, referenced, dead_stores, removed)?;
    if *removed > before && out.id == original {
        out.id = crate::ir::factory::fresh_node_id();
    }
    Some(out)
}

fn sweep_stmt_inner(
    stmt: StmtNode,
    referenced: &HashSet<String>,
    dead_stores: &HashSet<NodeId>,
    removed: &mut u64,
) -> Option<StmtNode> {
    if dead_stores.contains(&stmt.id) {
        *removed += 1;
        return None;
    }
    let StmtNode { id, span, kind } = stmt;
    let kind = match kind {
        StmtKind::Empty => {
            *removed += 1;
            return None;
        }
        StmtKind::Expression(expr) => {
            // `undefined`-valued expression statements carry no effect
            if matches!(expr.kind, ExprKind::Literal(crate::common::types::Literal::Undefined))
                || (is_pure_expr(&expr) && matches!(expr.kind, ExprKind::Literal(_)))
            {
                *removed += 1;
                return None;
            }
            StmtKind::Expression(expr)
        }
        StmtKind::VarDecl { kind, declarators } => {
            let kept: Vec<_> = declarators
                .into_iter()
                .filter(|declarator| {
                    let dead = !referenced.contains(&declarator.name)
                        && declarator
                            .init
                            .as_ref()
                            .map(is_pure_expr)
                            .unwrap_or(true);
                    if dead {
                        *removed += 1;
                    }
                    !dead
                })
                .collect();
            if kept.is_empty() {
                return None;
            }
            StmtKind::VarDecl {
                kind,
                declarators: kept,
            }
        }
        StmtKind::FunctionDecl { name, params, body } => {
            if !referenced.contains(&name) {
                *removed += 1;
                return None;
            }
            StmtKind::FunctionDecl { name, params, body }
        }
        StmtKind::Block(body) => {
            let swept = sweep_stmts(body, referenced, dead_stores, removed);
            if swept.is_empty() {
                *removed += 1;
                return None;
            }
            // A block around a single scope-free statement is noise left
            // behind by branch folding
            if swept.len() == 1
                && !matches!(
                    swept[0].kind,
                    StmtKind::VarDecl { .. } | StmtKind::FunctionDecl { .. }
                )
            {
                *removed += 1;
                return swept.into_iter().next();
            }
            StmtKind::Block(swept)
        }
        StmtKind::If {
            test,
            consequent,
            alternate,
        } => {
            let consequent = sweep_stmt(*consequent, referenced, dead_stores, removed)
                .unwrap_or_else(empty_stmt);
            let alternate = alternate
                .and_then(|alt| sweep_stmt(*alt, referenced, dead_stores, removed))
                .map(Box::new);
            StmtKind::If {
                test,
                consequent: Box::new(consequent),
                alternate,
            }
        }
        StmtKind::While { test, body } => StmtKind::While {
            test,
            body: Box::new(
                sweep_stmt(*body, referenced, dead_stores, removed).unwrap_or_else(empty_stmt),
            ),
        },
        StmtKind::DoWhile { body, test } => StmtKind::DoWhile {
            body: Box::new(
                sweep_stmt(*body, referenced, dead_stores, removed).unwrap_or_else(empty_stmt),
            ),
            test,
        },
        StmtKind::For {
            init,
            test,
            update,
            body,
        } => StmtKind::For {
            init: init.and_then(|i| sweep_stmt(*i, referenced, dead_stores, removed).map(Box::new)),
            test,
            update,
            body: Box::new(
                sweep_stmt(*body, referenced, dead_stores, removed).unwrap_or_else(empty_stmt),
            ),
        },
        StmtKind::Switch {
            discriminant,
            cases,
        } => StmtKind::Switch {
            discriminant,
            cases: cases
                .into_iter()
                .map(|mut case| {
                    case.body = sweep_stmts(case.body, referenced, dead_stores, removed);
                    case
                })
                .collect(),
        },
        StmtKind::Try {
            block,
            handler,
            finalizer,
        } => StmtKind::Try {
            block: sweep_stmts(block, referenced, dead_stores, removed),
            handler: handler.map(|mut h| {
                h.body = sweep_stmts(h.body, referenced, dead_stores, removed);
                h
            }),
            finalizer: finalizer.map(|f| sweep_stmts(f, referenced, dead_stores, removed)),
        },
        StmtKind::Labeled { label, body } => StmtKind::Labeled {
            label,
            body: Box::new(
                sweep_stmt(*body, referenced, dead_stores, removed).unwrap_or_else(empty_stmt),
            ),
        },
        other => other,
    };
    Some(StmtNode { id, span, kind })
}

fn empty_stmt() -> StmtNode {
    crate::ir::factory::empty_stmt()
}
