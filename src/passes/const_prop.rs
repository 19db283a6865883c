//! Constant propagation over SSA form
//!
//! A forward dataflow on a three-point lattice: Top (unknown), Bottom
//! (unreachable) and Constant(value, confidence). Expression values are
//! cached by node identifier; because the CFG instruction lists share node
//! identifiers with the program tree, the rewrite phase can replace tree
//! expressions directly from the cache. Evaluation follows JavaScript
//! semantics: IEEE-754 doubles with NaN propagation, string concatenation
//! on `+`, 32-bit two's-complement bitwise operators and short-circuiting
//! logical connectives. Division by zero, regex literals and calls to
//! unknown functions yield Top.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::common::config::PipelineConfig;
use crate::common::types::{
    number_to_int32, number_to_uint32, AssignOp, BinaryOp, Literal, LogicalOp, NodeId, SsaName,
    UnaryOp, UpdateOp, Warning, WarningKind,
};
use crate::analysis::cfg::Terminator;
use crate::ir::factory;
use crate::ir::node::{ExprKind, ExprNode, StmtKind, StmtNode};
use crate::ir::state::{FunctionAnalysis, IrState};
use crate::passes::{Pass, PassMetrics, PassOutcome};

/// A point in the constant lattice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LatticeValue {
    /// Unknown
    Top,
    /// Unreachable / not yet evaluated
    Bottom,
    /// Known constant with a confidence in [0, 1]
    Constant { value: Literal, confidence: f64 },
}

impl LatticeValue {
    /// Known constant with full confidence
    pub fn constant(value: Literal) -> Self {
        LatticeValue::Constant {
            value,
            confidence: 1.0,
        }
    }

    /// Lattice join: Bottom ∨ x = x; Constant(a) ∨ Constant(b) keeps the
    /// value only when a = b; anything joined with Top is Top
    pub fn join(&self, other: &LatticeValue) -> LatticeValue {
        match (self, other) {
            (LatticeValue::Bottom, x) | (x, LatticeValue::Bottom) => x.clone(),
            (LatticeValue::Top, _) | (_, LatticeValue::Top) => LatticeValue::Top,
            (
                LatticeValue::Constant {
                    value: a,
                    confidence: ca,
                },
                LatticeValue::Constant {
                    value: b,
                    confidence: cb,
                },
            ) => {
                if a.strict_equals(b) == Some(true) {
                    LatticeValue::Constant {
                        value: a.clone(),
                        confidence: ca.min(*cb),
                    }
                } else {
                    LatticeValue::Top
                }
            }
        }
    }

    /// Height in the lattice order (Bottom < Constant < Top); used to
    /// assert monotonicity
    pub fn height(&self) -> u8 {
        match self {
            LatticeValue::Bottom => 0,
            LatticeValue::Constant { .. } => 1,
            LatticeValue::Top => 2,
        }
    }

    fn known(&self) -> Option<(&Literal, f64)> {
        match self {
            LatticeValue::Constant { value, confidence } => Some((value, *confidence)),
            _ => None,
        }
    }
}

/// Lattice-based constant propagation and branch folding
pub struct ConstantPropagation {
    rewrite_threshold: f64,
    max_dataflow_iterations: u32,
}

impl ConstantPropagation {
    /// Create the pass from pipeline configuration
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            rewrite_threshold: config.rewrite_confidence_threshold,
            max_dataflow_iterations: config.max_dataflow_iterations,
        }
    }
}

impl Pass for ConstantPropagation {
    fn name(&self) -> &'static str {
        "constant-propagation"
    }

    fn description(&self) -> &'static str {
        "forward dataflow constant propagation with literal rewriting and branch folding"
    }

    fn execute(&self, state: &IrState) -> PassOutcome {
        let started = std::time::Instant::now();
        let mut warnings = Vec::new();
        let mut cache: HashMap<NodeId, LatticeValue> = HashMap::new();

        for (index, _function) in state.program.functions.iter().enumerate() {
            let Some(analysis) = state.analysis(index) else {
                continue;
            };
            let mut evaluator = Evaluator::new(analysis);
            evaluator.run(self.max_dataflow_iterations, &mut warnings);
            cache.extend(evaluator.cache);
        }

        let nodes_visited = cache.len() as u64;
        let mut rewriter = Rewriter {
            cache: &cache,
            threshold: self.rewrite_threshold,
            rewrites: 0,
        };

        let mut new_state = state.clone();
        for function in &mut new_state.program.functions {
            let body = std::mem::take(&mut function.body);
            function.body = body
                .into_iter()
                .map(|stmt| rewriter.rewrite_stmt(stmt))
                .collect();
        }

        let changed = rewriter.rewrites > 0;
        if changed {
            new_state.request_recompute();
        }
        debug!(rewrites = rewriter.rewrites, "constant propagation done");

        PassOutcome {
            state: new_state,
            changed,
            metrics: PassMetrics {
                nodes_visited,
                nodes_changed: rewriter.rewrites,
                duration_us: started.elapsed().as_micros() as u64,
                warnings: warnings.len() as u64,
            },
            warnings,
        }
    }
}

/// Per-function dataflow evaluator
struct Evaluator<'a> {
    analysis: &'a FunctionAnalysis,
    values: HashMap<SsaName, LatticeValue>,
    cache: HashMap<NodeId, LatticeValue>,
}

impl<'a> Evaluator<'a> {
    fn new(analysis: &'a FunctionAnalysis) -> Self {
        Self {
            analysis,
            values: HashMap::new(),
            cache: HashMap::new(),
        }
    }

    fn run(&mut self, max_iterations: u32, warnings: &mut Vec<Warning>) {
        let order = self.analysis.cfg.reverse_postorder();
        let mut iterations = 0u32;
        loop {
            let mut changed = false;
            for &block in &order {
                changed |= self.eval_block(block);
            }
            iterations += 1;
            if !changed {
                break;
            }
            if iterations >= max_iterations {
                warnings.push(Warning::new(
                    WarningKind::IterationLimit,
                    format!(
                        "constant propagation stopped after {} dataflow iterations",
                        iterations
                    ),
                ));
                break;
            }
        }
    }

    fn lookup(&self, name: &SsaName) -> LatticeValue {
        if name.version == 0 {
            // Live-on-entry values (parameters, outer-scope reads) are
            // unknown
            return LatticeValue::Top;
        }
        self.values.get(name).cloned().unwrap_or(LatticeValue::Bottom)
    }

    /// Set a definition, joining with the previous value so the lattice
    /// never decreases between iterations
    fn define(&mut self, name: SsaName, value: LatticeValue) -> bool {
        let old = self.values.get(&name).cloned().unwrap_or(LatticeValue::Bottom);
        let merged = old.join(&value);
        if merged != old {
            self.values.insert(name, merged);
            true
        } else {
            false
        }
    }

    fn eval_block(&mut self, block: usize) -> bool {
        let mut changed = false;
        let phis = self.analysis.cfg.blocks[block].phis.clone();
        for phi in &phis {
            let mut merged = LatticeValue::Bottom;
            for (_, &version) in &phi.operands {
                let name = SsaName::new(phi.var.clone(), version);
                merged = merged.join(&self.lookup(&name));
            }
            changed |= self.define(phi.target.clone(), merged);
        }

        let instructions = self.analysis.cfg.blocks[block].instructions.clone();
        for stmt in &instructions {
            changed |= self.eval_stmt(stmt);
        }
        match self.analysis.cfg.blocks[block].terminator.clone() {
            Terminator::Branch { condition, .. } => {
                self.eval_expr(&condition);
            }
            Terminator::Return(Some(argument)) | Terminator::Throw(argument) => {
                self.eval_expr(&argument);
            }
            _ => {}
        }
        changed
    }

    fn eval_stmt(&mut self, stmt: &StmtNode) -> bool {
        match &stmt.kind {
            StmtKind::Expression(expr) => {
                self.eval_expr(expr);
                self.flush_defs(expr)
            }
            StmtKind::VarDecl { declarators, .. } => {
                let mut changed = false;
                for declarator in declarators {
                    let value = match &declarator.init {
                        Some(init) => {
                            self.eval_expr(init);
                            let v = self.cached(init.id);
                            changed |= self.flush_defs(init);
                            v
                        }
                        None => LatticeValue::constant(Literal::Undefined),
                    };
                    if let Some(name) = self.analysis.ssa.def_names.get(&declarator.id) {
                        changed |= self.define(name.clone(), value);
                    }
                }
                changed
            }
            StmtKind::FunctionDecl { .. } => {
                if let Some(name) = self.analysis.ssa.def_names.get(&stmt.id) {
                    self.define(name.clone(), LatticeValue::Top)
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    /// Record definitions made by assignments and updates inside `expr`
    fn flush_defs(&mut self, expr: &ExprNode) -> bool {
        let mut pending: Vec<(NodeId, LatticeValue)> = Vec::new();
        expr.for_each_expr(&mut |e| match &e.kind {
            ExprKind::Assignment { target, .. } => {
                if let ExprKind::Identifier { .. } = &target.kind {
                    pending.push((target.id, self.cached(e.id)));
                }
            }
            ExprKind::Update { op, argument, .. } => {
                if let ExprKind::Identifier { .. } = &argument.kind {
                    let old = self
                        .analysis
                        .ssa
                        .use_names
                        .get(&argument.id)
                        .map(|n| self.lookup(n))
                        .unwrap_or(LatticeValue::Top);
                    let delta = match op {
                        UpdateOp::Increment => BinaryOp::Add,
                        UpdateOp::Decrement => BinaryOp::Sub,
                    };
                    let new = apply_binary(delta, &old, &LatticeValue::constant(Literal::Number(1.0)));
                    pending.push((argument.id, new));
                }
            }
            _ => {}
        });
        let mut changed = false;
        for (node, value) in pending {
            if let Some(name) = self.analysis.ssa.def_names.get(&node).cloned() {
                changed |= self.define(name, value);
            }
        }
        changed
    }

    fn cached(&self, id: NodeId) -> LatticeValue {
        self.cache.get(&id).cloned().unwrap_or(LatticeValue::Top)
    }

    fn eval_expr(&mut self, expr: &ExprNode) -> LatticeValue {
        let value = match &expr.kind {
            ExprKind::Literal(literal) => match literal {
                // Regex descriptors are never constant-folded
                Literal::Regex { .. } => LatticeValue::Top,
                other => LatticeValue::constant(other.clone()),
            },
            ExprKind::Identifier { .. } => self
                .analysis
                .ssa
                .use_names
                .get(&expr.id)
                .map(|name| self.lookup(name))
                .unwrap_or(LatticeValue::Top),
            ExprKind::Binary { op, left, right } => {
                let l = self.eval_expr(left);
                let r = self.eval_expr(right);
                apply_binary(*op, &l, &r)
            }
            ExprKind::Logical { op, left, right } => {
                let l = self.eval_expr(left);
                let r = self.eval_expr(right);
                apply_logical(*op, &l, &r)
            }
            ExprKind::Unary { op, argument } => {
                let a = self.eval_expr(argument);
                apply_unary(*op, &a)
            }
            ExprKind::Update { op, prefix, argument } => {
                let old = self.eval_expr(argument);
                let delta = match op {
                    UpdateOp::Increment => BinaryOp::Add,
                    UpdateOp::Decrement => BinaryOp::Sub,
                };
                let new = apply_binary(delta, &old, &LatticeValue::constant(Literal::Number(1.0)));
                if *prefix {
                    new
                } else {
                    old
                }
            }
            ExprKind::Conditional {
                test,
                consequent,
                alternate,
            } => {
                let t = self.eval_expr(test);
                let c = self.eval_expr(consequent);
                let a = self.eval_expr(alternate);
                match t.known().and_then(|(v, _)| v.to_boolean()) {
                    Some(true) => c,
                    Some(false) => a,
                    None => c.join(&a),
                }
            }
            ExprKind::Assignment { op, target, value } => {
                let assigned = self.eval_expr(value);
                let result = match op {
                    AssignOp::Assign => assigned,
                    AssignOp::Compound(binop) => {
                        let old = if let ExprKind::Identifier { .. } = &target.kind {
                            self.analysis
                                .ssa
                                .use_names
                                .get(&target.id)
                                .map(|n| self.lookup(n))
                                .unwrap_or(LatticeValue::Top)
                        } else {
                            self.eval_expr(target);
                            LatticeValue::Top
                        };
                        apply_binary(*binop, &old, &assigned)
                    }
                };
                if !matches!(target.kind, ExprKind::Identifier { .. }) {
                    self.eval_expr(target);
                }
                result
            }
            ExprKind::Call { callee, arguments } => {
                self.eval_expr(callee);
                for argument in arguments {
                    self.eval_expr(argument);
                }
                // Calls to unknown functions yield Top
                LatticeValue::Top
            }
            ExprKind::Member {
                object, property, ..
            } => {
                self.eval_expr(object);
                self.eval_expr(property);
                LatticeValue::Top
            }
            ExprKind::Array { elements } => {
                for element in elements {
                    self.eval_expr(element);
                }
                LatticeValue::Top
            }
            ExprKind::Object { properties } => {
                for property in properties {
                    self.eval_expr(&property.value);
                }
                LatticeValue::Top
            }
            ExprKind::Function { .. } | ExprKind::Phi { .. } => LatticeValue::Top,
        };
        self.cache.insert(expr.id, value.clone());
        value
    }
}

/// Tree rewriter driven by the lattice cache
struct Rewriter<'a> {
    cache: &'a HashMap<NodeId, LatticeValue>,
    threshold: f64,
    rewrites: u64,
}

impl Rewriter<'_> {
    fn constant_for(&self, id: NodeId) -> Option<Literal> {
        match self.cache.get(&id) {
            Some(LatticeValue::Constant { value, confidence }) if *confidence >= self.threshold => {
                // Never materialise NaN; the printed form would not
                // round-trip as a literal
                if matches!(value, Literal::Number(n) if n.is_nan()) {
                    return None;
                }
                Some(value.clone())
            }
            _ => None,
        }
    }

    fn truthiness_for(&self, id: NodeId) -> Option<bool> {
        match self.cache.get(&id) {
            Some(LatticeValue::Constant { value, confidence }) if *confidence >= self.threshold => {
                value.to_boolean()
            }
            _ => None,
        }
    }

    /// Rewrite a statement; a statement whose substructure changed gets a
    /// fresh identifier, so surviving identifiers always denote identical
    /// structure
    fn rewrite_stmt(&mut self, stmt: StmtNode) -> StmtNode {
        let original = stmt.id;
        let before = self.rewrites;
        let mut out = self.rewrite_stmt_inner(stmt);
        if self.rewrites > before && out.id == original {
            out.id = factory::fresh_node_id();
        }
        out
    }

    fn rewrite_stmt_inner(&mut self, stmt: StmtNode) -> StmtNode {
        let StmtNode { id, span, kind } = stmt;
        let kind = match kind {
            StmtKind::Expression(expr) => StmtKind::Expression(self.rewrite_expr(expr)),
            StmtKind::VarDecl { kind, declarators } => StmtKind::VarDecl {
                kind,
                declarators: declarators
                    .into_iter()
                    .map(|mut declarator| {
                        declarator.init = declarator.init.map(|init| self.rewrite_expr(init));
                        declarator
                    })
                    .collect(),
            },
            StmtKind::Block(body) => {
                StmtKind::Block(body.into_iter().map(|s| self.rewrite_stmt(s)).collect())
            }
            StmtKind::If {
                test,
                consequent,
                alternate,
            } => {
                let verdict = self.truthiness_for(test.id);
                let test = self.rewrite_expr(test);
                let consequent = Box::new(self.rewrite_stmt(*consequent));
                let alternate = alternate.map(|alt| Box::new(self.rewrite_stmt(*alt)));
                match verdict {
                    Some(true) => {
                        self.rewrites += 1;
                        return *consequent;
                    }
                    Some(false) => {
                        self.rewrites += 1;
                        return match alternate {
                            Some(alt) => *alt,
                            None => StmtNode {
                                id: factory::fresh_node_id(),
                                span,
                                kind: StmtKind::Empty,
                            },
                        };
                    }
                    None => StmtKind::If {
                        test,
                        consequent,
                        alternate,
                    },
                }
            }
            StmtKind::While { test, body } => {
                let verdict = self.truthiness_for(test.id);
                let test = self.rewrite_expr(test);
                let body = Box::new(self.rewrite_stmt(*body));
                if verdict == Some(false) {
                    self.rewrites += 1;
                    StmtKind::Empty
                } else {
                    StmtKind::While { test, body }
                }
            }
            StmtKind::DoWhile { body, test } => StmtKind::DoWhile {
                body: Box::new(self.rewrite_stmt(*body)),
                test: self.rewrite_expr(test),
            },
            StmtKind::For {
                init,
                test,
                update,
                body,
            } => StmtKind::For {
                init: init.map(|i| Box::new(self.rewrite_stmt(*i))),
                test: test.map(|t| self.rewrite_expr(t)),
                update: update.map(|u| self.rewrite_expr(u)),
                body: Box::new(self.rewrite_stmt(*body)),
            },
            StmtKind::Switch {
                discriminant,
                cases,
            } => StmtKind::Switch {
                discriminant: self.rewrite_expr(discriminant),
                cases: cases
                    .into_iter()
                    .map(|mut case| {
                        case.test = case.test.map(|t| self.rewrite_expr(t));
                        case.body = case.body.into_iter().map(|s| self.rewrite_stmt(s)).collect();
                        case
                    })
                    .collect(),
            },
            StmtKind::Return(argument) => {
                StmtKind::Return(argument.map(|a| self.rewrite_expr(a)))
            }
            StmtKind::Throw(argument) => StmtKind::Throw(self.rewrite_expr(argument)),
            StmtKind::Try {
                block,
                handler,
                finalizer,
            } => StmtKind::Try {
                block: block.into_iter().map(|s| self.rewrite_stmt(s)).collect(),
                handler: handler.map(|mut h| {
                    h.body = h.body.into_iter().map(|s| self.rewrite_stmt(s)).collect();
                    h
                }),
                finalizer: finalizer
                    .map(|f| f.into_iter().map(|s| self.rewrite_stmt(s)).collect()),
            },
            StmtKind::Labeled { label, body } => StmtKind::Labeled {
                label,
                body: Box::new(self.rewrite_stmt(*body)),
            },
            other @ (StmtKind::Break(_)
            | StmtKind::Continue(_)
            | StmtKind::FunctionDecl { .. }
            | StmtKind::Empty) => other,
        };
        StmtNode { id, span, kind }
    }

    fn rewrite_expr(&mut self, expr: ExprNode) -> ExprNode {
        let original = expr.id;
        let before = self.rewrites;
        let mut out = self.rewrite_expr_inner(expr);
        if self.rewrites > before && out.id == original {
            out.id = factory::fresh_node_id();
        }
        out
    }

    fn rewrite_expr_inner(&mut self, expr: ExprNode) -> ExprNode {
        let ExprNode { id, span, kind } = expr;

        // Definition sites and side-effecting forms are preserved
        // structurally; only their operand positions are rewritten
        let kind = match kind {
            ExprKind::Assignment { op, target, value } => {
                let target = if matches!(target.kind, ExprKind::Identifier { .. }) {
                    target
                } else {
                    Box::new(self.rewrite_expr(*target))
                };
                return ExprNode {
                    id,
                    span,
                    kind: ExprKind::Assignment {
                        op,
                        target,
                        value: Box::new(self.rewrite_expr(*value)),
                    },
                };
            }
            ExprKind::Update { op, prefix, argument } => {
                return ExprNode {
                    id,
                    span,
                    kind: ExprKind::Update { op, prefix, argument },
                };
            }
            other => other,
        };

        let kind = match kind {
            ExprKind::Binary { op, left, right } => ExprKind::Binary {
                op,
                left: Box::new(self.rewrite_expr(*left)),
                right: Box::new(self.rewrite_expr(*right)),
            },
            ExprKind::Logical { op, left, right } => ExprKind::Logical {
                op,
                left: Box::new(self.rewrite_expr(*left)),
                right: Box::new(self.rewrite_expr(*right)),
            },
            ExprKind::Unary { op, argument } => ExprKind::Unary {
                op,
                argument: Box::new(self.rewrite_expr(*argument)),
            },
            ExprKind::Conditional {
                test,
                consequent,
                alternate,
            } => {
                let verdict = self.truthiness_for(test.id);
                let consequent = self.rewrite_expr(*consequent);
                let alternate = self.rewrite_expr(*alternate);
                match verdict {
                    Some(true) => {
                        self.rewrites += 1;
                        return consequent;
                    }
                    Some(false) => {
                        self.rewrites += 1;
                        return alternate;
                    }
                    None => ExprKind::Conditional {
                        test: Box::new(self.rewrite_expr(*test)),
                        consequent: Box::new(consequent),
                        alternate: Box::new(alternate),
                    },
                }
            }
            ExprKind::Call { callee, arguments } => ExprKind::Call {
                callee: Box::new(self.rewrite_expr(*callee)),
                arguments: arguments
                    .into_iter()
                    .map(|a| self.rewrite_expr(a))
                    .collect(),
            },
            ExprKind::Member {
                object,
                property,
                computed,
            } => ExprKind::Member {
                object: Box::new(self.rewrite_expr(*object)),
                property: if computed {
                    Box::new(self.rewrite_expr(*property))
                } else {
                    property
                },
                computed,
            },
            ExprKind::Array { elements } => ExprKind::Array {
                elements: elements
                    .into_iter()
                    .map(|e| self.rewrite_expr(e))
                    .collect(),
            },
            ExprKind::Object { properties } => ExprKind::Object {
                properties: properties
                    .into_iter()
                    .map(|mut p| {
                        p.value = self.rewrite_expr(p.value);
                        p
                    })
                    .collect(),
            },
            other => other,
        };

        // Replace the whole expression by a literal when the cached value
        // crosses the confidence threshold
        if !matches!(kind, ExprKind::Literal(_)) {
            if let Some(value) = self.constant_for(id) {
                self.rewrites += 1;
                return factory::literal(value);
            }
        }
        ExprNode { id, span, kind }
    }
}

/// JavaScript binary evaluation over lattice values
pub fn apply_binary(op: BinaryOp, l: &LatticeValue, r: &LatticeValue) -> LatticeValue {
    let (Some((lv, lc)), Some((rv, rc))) = (l.known(), r.known()) else {
        return LatticeValue::Top;
    };
    match js_binary(op, lv, rv) {
        Some(value) => LatticeValue::Constant {
            value,
            confidence: lc.min(rc),
        },
        None => LatticeValue::Top,
    }
}

fn apply_logical(op: LogicalOp, l: &LatticeValue, r: &LatticeValue) -> LatticeValue {
    let Some((lv, _)) = l.known() else {
        return LatticeValue::Top;
    };
    match op {
        LogicalOp::And => match lv.to_boolean() {
            Some(false) => l.clone(),
            Some(true) => r.clone(),
            None => LatticeValue::Top,
        },
        LogicalOp::Or => match lv.to_boolean() {
            Some(true) => l.clone(),
            Some(false) => r.clone(),
            None => LatticeValue::Top,
        },
        LogicalOp::Nullish => {
            if matches!(lv, Literal::Null | Literal::Undefined) {
                r.clone()
            } else {
                l.clone()
            }
        }
    }
}

fn apply_unary(op: UnaryOp, a: &LatticeValue) -> LatticeValue {
    let Some((value, confidence)) = a.known() else {
        // typeof is decidable for Top only at runtime; everything unknown
        return LatticeValue::Top;
    };
    match js_unary(op, value) {
        Some(value) => LatticeValue::Constant { value, confidence },
        None => LatticeValue::Top,
    }
}

/// Evaluate a binary operator on literals; `None` means "not statically
/// evaluable" and maps to Top
pub fn js_binary(op: BinaryOp, l: &Literal, r: &Literal) -> Option<Literal> {
    use BinaryOp::*;
    match op {
        Add => {
            if matches!(l, Literal::Str(_)) || matches!(r, Literal::Str(_)) {
                let ls = js_to_string(l)?;
                let rs = js_to_string(r)?;
                return Some(Literal::Str(format!("{}{}", ls, rs)));
            }
            let a = l.to_number()?;
            let b = r.to_number()?;
            Some(Literal::Number(a + b))
        }
        Sub => numeric(l, r, |a, b| a - b),
        Mul => numeric(l, r, |a, b| a * b),
        Div => {
            let b = r.to_number()?;
            if b == 0.0 {
                // Division by zero yields Top
                return None;
            }
            numeric(l, r, |a, b| a / b)
        }
        Mod => {
            let b = r.to_number()?;
            if b == 0.0 {
                return None;
            }
            numeric(l, r, |a, b| a % b)
        }
        Exp => numeric(l, r, f64::powf),
        BitAnd => bitwise(l, r, |a, b| a & b),
        BitOr => bitwise(l, r, |a, b| a | b),
        BitXor => bitwise(l, r, |a, b| a ^ b),
        Shl => bitwise(l, r, |a, b| a.wrapping_shl(b as u32 & 31)),
        Shr => bitwise(l, r, |a, b| a >> (b as u32 & 31)),
        UShr => {
            let a = number_to_uint32(l.to_number()?);
            let b = number_to_uint32(r.to_number()?) & 31;
            Some(Literal::Number((a >> b) as f64))
        }
        Eq => l.loose_equals(r).map(Literal::Bool),
        NotEq => l.loose_equals(r).map(|b| Literal::Bool(!b)),
        StrictEq => l.strict_equals(r).map(Literal::Bool),
        StrictNotEq => l.strict_equals(r).map(|b| Literal::Bool(!b)),
        Lt => relational(l, r, |o| o == std::cmp::Ordering::Less, |a, b| a < b),
        Le => relational(l, r, |o| o != std::cmp::Ordering::Greater, |a, b| a <= b),
        Gt => relational(l, r, |o| o == std::cmp::Ordering::Greater, |a, b| a > b),
        Ge => relational(l, r, |o| o != std::cmp::Ordering::Less, |a, b| a >= b),
        In | InstanceOf => None,
    }
}

fn numeric(l: &Literal, r: &Literal, f: impl Fn(f64, f64) -> f64) -> Option<Literal> {
    Some(Literal::Number(f(l.to_number()?, r.to_number()?)))
}

/// 32-bit two's-complement evaluation
fn bitwise(l: &Literal, r: &Literal, f: impl Fn(i32, i32) -> i32) -> Option<Literal> {
    let a = number_to_int32(l.to_number()?);
    let b = number_to_int32(r.to_number()?);
    Some(Literal::Number(f(a, b) as f64))
}

fn relational(
    l: &Literal,
    r: &Literal,
    string_case: impl Fn(std::cmp::Ordering) -> bool,
    number_case: impl Fn(f64, f64) -> bool,
) -> Option<Literal> {
    if let (Literal::Str(a), Literal::Str(b)) = (l, r) {
        return Some(Literal::Bool(string_case(a.cmp(b))));
    }
    let a = l.to_number()?;
    let b = r.to_number()?;
    if a.is_nan() || b.is_nan() {
        return Some(Literal::Bool(false));
    }
    Some(Literal::Bool(number_case(a, b)))
}

/// Evaluate a unary operator on a literal
pub fn js_unary(op: UnaryOp, a: &Literal) -> Option<Literal> {
    match op {
        UnaryOp::Neg => Some(Literal::Number(-a.to_number()?)),
        UnaryOp::Plus => Some(Literal::Number(a.to_number()?)),
        UnaryOp::Not => Some(Literal::Bool(!a.to_boolean()?)),
        UnaryOp::BitNot => Some(Literal::Number(!a.to_int32()? as f64)),
        UnaryOp::TypeOf => Some(Literal::Str(a.type_of().to_string())),
        UnaryOp::Void => Some(Literal::Undefined),
        UnaryOp::Delete => None,
    }
}

/// JavaScript ToString for literals where the result is exact
///
/// Non-integral numbers bail: their JS decimal rendering is not worth
/// imitating bit-for-bit.
pub fn js_to_string(literal: &Literal) -> Option<String> {
    match literal {
        Literal::Str(s) => Some(s.clone()),
        Literal::Bool(b) => Some(b.to_string()),
        Literal::Null => Some("null".to_string()),
        Literal::Undefined => Some("undefined".to_string()),
        Literal::BigInt(digits) => Some(digits.clone()),
        Literal::Number(n) => {
            if n.is_nan() {
                Some("NaN".to_string())
            } else if n.is_infinite() {
                Some(if *n > 0.0 { "Infinity" } else { "-Infinity" }.to_string())
            } else if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
                Some(format!("{}", *n as i64))
            } else {
                None
            }
        }
        Literal::Regex { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::node::IrProgram;

    fn run_pass(program: IrProgram) -> (IrProgram, bool) {
        let mut state = IrState::new(program);
        state.analyze();
        let pass = ConstantPropagation::new(&PipelineConfig::default());
        let outcome = pass.execute(&state);
        (outcome.state.program, outcome.changed)
    }

    #[test]
    fn test_join_laws() {
        let three = LatticeValue::constant(Literal::Number(3.0));
        let four = LatticeValue::constant(Literal::Number(4.0));
        assert_eq!(LatticeValue::Top.join(&three), LatticeValue::Top);
        assert_eq!(LatticeValue::Bottom.join(&three), three);
        assert_eq!(three.join(&three), three);
        assert_eq!(three.join(&four), LatticeValue::Top);
    }

    #[test]
    fn test_folds_arithmetic_and_branch() {
        // let x = 1 + 2; if (x === 3) { use(x); } else { dead(); }
        let program = IrProgram {
            functions: vec![factory::ir_function(
                "main",
                vec![],
                vec![
                    factory::let_single(
                        "x",
                        factory::binary(BinaryOp::Add, factory::number(1.0), factory::number(2.0)),
                    ),
                    factory::if_stmt(
                        factory::binary(
                            BinaryOp::StrictEq,
                            factory::identifier("x"),
                            factory::number(3.0),
                        ),
                        factory::expression_stmt(factory::call(
                            factory::identifier("use"),
                            vec![factory::identifier("x")],
                        )),
                        Some(factory::expression_stmt(factory::call(
                            factory::identifier("dead"),
                            vec![],
                        ))),
                    ),
                ],
            )],
        };
        let (program, changed) = run_pass(program);
        assert!(changed);
        let body = &program.functions[0].body;
        // Declaration init folded to 3
        let StmtKind::VarDecl { declarators, .. } = &body[0].kind else {
            panic!("expected declaration");
        };
        assert_eq!(
            declarators[0].init.as_ref().unwrap().kind,
            ExprKind::Literal(Literal::Number(3.0))
        );
        // Branch folded to the call with its argument now literal
        let StmtKind::Expression(expr) = &body[1].kind else {
            panic!("expected use(3) call, got {:?}", body[1].kind);
        };
        let ExprKind::Call { arguments, .. } = &expr.kind else {
            panic!("expected call");
        };
        assert_eq!(arguments[0].kind, ExprKind::Literal(Literal::Number(3.0)));
    }

    #[test]
    fn test_division_by_zero_stays() {
        let program = IrProgram {
            functions: vec![factory::ir_function(
                "main",
                vec![],
                vec![factory::return_stmt(Some(factory::binary(
                    BinaryOp::Div,
                    factory::number(1.0),
                    factory::number(0.0),
                )))],
            )],
        };
        let (program, changed) = run_pass(program);
        assert!(!changed);
        let StmtKind::Return(Some(expr)) = &program.functions[0].body[0].kind else {
            panic!("expected return");
        };
        assert!(matches!(expr.kind, ExprKind::Binary { .. }));
    }

    #[test]
    fn test_unknown_call_blocks_folding() {
        let program = IrProgram {
            functions: vec![factory::ir_function(
                "main",
                vec![],
                vec![factory::return_stmt(Some(factory::binary(
                    BinaryOp::Mul,
                    factory::call(factory::identifier("f"), vec![]),
                    factory::number(0.0),
                )))],
            )],
        };
        let (program, changed) = run_pass(program);
        assert!(!changed);
        let StmtKind::Return(Some(expr)) = &program.functions[0].body[0].kind else {
            panic!("expected return");
        };
        assert!(matches!(expr.kind, ExprKind::Binary { .. }));
    }

    #[test]
    fn test_string_concat_on_plus() {
        assert_eq!(
            js_binary(
                BinaryOp::Add,
                &Literal::Str("a".into()),
                &Literal::Number(1.0)
            ),
            Some(Literal::Str("a1".into()))
        );
        assert_eq!(
            js_binary(BinaryOp::Add, &Literal::Number(1.0), &Literal::Number(2.0)),
            Some(Literal::Number(3.0))
        );
    }

    #[test]
    fn test_bitwise_uses_int32() {
        assert_eq!(
            js_binary(
                BinaryOp::BitOr,
                &Literal::Number(4294967296.0),
                &Literal::Number(1.0)
            ),
            Some(Literal::Number(1.0))
        );
        assert_eq!(
            js_binary(
                BinaryOp::UShr,
                &Literal::Number(-1.0),
                &Literal::Number(0.0)
            ),
            Some(Literal::Number(4294967295.0))
        );
    }

    #[test]
    fn test_idempotent() {
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
        let (program, changed) = run_pass(program);
        assert!(changed);
        let (program2, changed2) = run_pass(program.clone());
        assert!(!changed2);
        assert_eq!(program, program2);
    }
}
