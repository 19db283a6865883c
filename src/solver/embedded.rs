//! Embedded algebraic solver
//!
//! A stand-in for an external SMT process that recognises the identities
//! behind the known opaque-predicate patterns. It decides by algebraic
//! normalisation (constant folding plus idempotence and annihilator rules)
//! and falls back to deterministic sampled evaluation to witness
//! satisfiability. When it can neither refute nor witness it answers
//! `Unknown`, which the opaque-predicate pass treats as non-opaque.

use crate::common::errors::SolverError;
use crate::solver::{SatResult, SmtBinOp, SmtExpr, SmtSolver, SmtUnOp};

/// Sample points used to witness satisfiability
const SAMPLES: [i64; 10] = [
    -2,
    -1,
    0,
    1,
    2,
    3,
    31,
    42,
    i32::MAX as i64,
    i32::MIN as i64,
];

/// In-process solver implementing the [`SmtSolver`] contract
#[derive(Debug, Default)]
pub struct EmbeddedSolver {
    assertions: Vec<SmtExpr>,
    frames: Vec<usize>,
    timeout_ms: u64,
}

impl EmbeddedSolver {
    /// Create a solver with the default timeout
    pub fn new() -> Self {
        Self {
            assertions: Vec::new(),
            frames: Vec::new(),
            timeout_ms: 5000,
        }
    }
}

impl SmtSolver for EmbeddedSolver {
    fn push(&mut self) {
        self.frames.push(self.assertions.len());
    }

    fn pop(&mut self) -> Result<(), SolverError> {
        let mark = self.frames.pop().ok_or(SolverError::EmptyStack)?;
        self.assertions.truncate(mark);
        Ok(())
    }

    fn assert(&mut self, expr: SmtExpr) {
        self.assertions.push(expr.to_bool());
    }

    fn check(&mut self) -> SatResult {
        let simplified: Vec<SmtExpr> = self.assertions.iter().map(simplify).collect();

        if simplified.iter().any(|a| *a == SmtExpr::BoolConst(false)) {
            return SatResult::Unsat;
        }
        if simplified.iter().all(|a| *a == SmtExpr::BoolConst(true)) {
            return SatResult::Sat;
        }

        // Sampled witness search
        let mut vars = Vec::new();
        for assertion in &simplified {
            for var in assertion.variables() {
                if !vars.contains(&var) {
                    vars.push(var);
                }
            }
        }
        if witness_exists(&simplified, &vars) {
            return SatResult::Sat;
        }
        SatResult::Unknown
    }

    fn set_timeout(&mut self, ms: u64) {
        self.timeout_ms = ms;
    }

    fn reset(&mut self) {
        self.assertions.clear();
        self.frames.clear();
    }
}

/// Search the sample grid for an assignment satisfying every assertion
fn witness_exists(assertions: &[SmtExpr], vars: &[String]) -> bool {
    if vars.is_empty() {
        // No free variables and not fully folded: evaluation must decide
        return assertions
            .iter()
            .all(|a| eval(a, &[]) == Some(Value::Bool(true)));
    }
    if vars.len() <= 2 {
        let mut assignment = vec![0i64; vars.len()];
        return product_search(assertions, vars, &SAMPLES, &mut assignment, 0);
    }
    if vars.len() == 3 {
        const REDUCED: [i64; 5] = [-1, 0, 1, 2, 31];
        let mut assignment = vec![0i64; vars.len()];
        return product_search(assertions, vars, &REDUCED, &mut assignment, 0);
    }
    // Many variables: deterministic pseudo-random tuples
    let mut seed: u64 = 0x9e3779b97f4a7c15;
    for _ in 0..128 {
        let assignment: Vec<i64> = (0..vars.len())
            .map(|_| {
                seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                SAMPLES[(seed >> 33) as usize % SAMPLES.len()]
            })
            .collect();
        let env: Vec<(String, i64)> = vars
            .iter()
            .cloned()
            .zip(assignment.iter().copied())
            .collect();
        if assertions.iter().all(|a| eval(a, &env) == Some(Value::Bool(true))) {
            return true;
        }
    }
    false
}

fn product_search(
    assertions: &[SmtExpr],
    vars: &[String],
    samples: &[i64],
    assignment: &mut Vec<i64>,
    depth: usize,
) -> bool {
    if depth == vars.len() {
        let env: Vec<(String, i64)> = vars
            .iter()
            .cloned()
            .zip(assignment.iter().copied())
            .collect();
        return assertions.iter().all(|a| eval(a, &env) == Some(Value::Bool(true)));
    }
    for &sample in samples {
        assignment[depth] = sample;
        if product_search(assertions, vars, samples, assignment, depth + 1) {
            return true;
        }
    }
    false
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Value {
    Int(i64),
    Bool(bool),
    Bv(u32),
}

/// Evaluate under an integer assignment; `None` on division by zero
fn eval(expr: &SmtExpr, env: &[(String, i64)]) -> Option<Value> {
    match expr {
        SmtExpr::IntConst(v) => Some(Value::Int(*v)),
        SmtExpr::BoolConst(b) => Some(Value::Bool(*b)),
        SmtExpr::BvConst(v) => Some(Value::Bv(*v)),
        SmtExpr::IntVar(name) => env
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| Value::Int(*v)),
        SmtExpr::Unary(op, inner) => {
            let inner = eval(inner, env)?;
            match (op, inner) {
                (SmtUnOp::Not, Value::Bool(b)) => Some(Value::Bool(!b)),
                (SmtUnOp::Neg, Value::Int(v)) => Some(Value::Int(v.wrapping_neg())),
                (SmtUnOp::BvNot, Value::Bv(v)) => Some(Value::Bv(!v)),
                (SmtUnOp::ToBv, Value::Int(v)) => Some(Value::Bv(v as u32)),
                (SmtUnOp::FromBv, Value::Bv(v)) => Some(Value::Int(v as i32 as i64)),
                _ => None,
            }
        }
        SmtExpr::Binary(op, left, right) => {
            let l = eval(left, env)?;
            let r = eval(right, env)?;
            eval_binary(*op, l, r)
        }
    }
}

fn eval_binary(op: SmtBinOp, l: Value, r: Value) -> Option<Value> {
    use SmtBinOp::*;
    match (op, l, r) {
        (Add, Value::Int(a), Value::Int(b)) => Some(Value::Int(a.wrapping_add(b))),
        (Sub, Value::Int(a), Value::Int(b)) => Some(Value::Int(a.wrapping_sub(b))),
        (Mul, Value::Int(a), Value::Int(b)) => Some(Value::Int(a.wrapping_mul(b))),
        (Div, Value::Int(a), Value::Int(b)) => {
            if b == 0 {
                None
            } else {
                Some(Value::Int(a.wrapping_div(b)))
            }
        }
        (Mod, Value::Int(a), Value::Int(b)) => {
            if b == 0 {
                None
            } else {
                Some(Value::Int(a.wrapping_rem(b)))
            }
        }
        (Eq, a, b) => Some(Value::Bool(a == b)),
        (Ne, a, b) => Some(Value::Bool(a != b)),
        (Lt, Value::Int(a), Value::Int(b)) => Some(Value::Bool(a < b)),
        (Le, Value::Int(a), Value::Int(b)) => Some(Value::Bool(a <= b)),
        (Gt, Value::Int(a), Value::Int(b)) => Some(Value::Bool(a > b)),
        (Ge, Value::Int(a), Value::Int(b)) => Some(Value::Bool(a >= b)),
        (And, Value::Bool(a), Value::Bool(b)) => Some(Value::Bool(a && b)),
        (Or, Value::Bool(a), Value::Bool(b)) => Some(Value::Bool(a || b)),
        (BvAnd, Value::Bv(a), Value::Bv(b)) => Some(Value::Bv(a & b)),
        (BvOr, Value::Bv(a), Value::Bv(b)) => Some(Value::Bv(a | b)),
        (BvXor, Value::Bv(a), Value::Bv(b)) => Some(Value::Bv(a ^ b)),
        (BvShl, Value::Bv(a), Value::Bv(b)) => Some(Value::Bv(a.wrapping_shl(b & 31))),
        (BvAshr, Value::Bv(a), Value::Bv(b)) => {
            Some(Value::Bv(((a as i32) >> (b & 31)) as u32))
        }
        (BvLshr, Value::Bv(a), Value::Bv(b)) => Some(Value::Bv(a >> (b & 31))),
        _ => None,
    }
}

/// Algebraic normalisation: constant folding plus the identity table
fn simplify(expr: &SmtExpr) -> SmtExpr {
    match expr {
        SmtExpr::Unary(op, inner) => {
            let inner = simplify(inner);
            match (op, &inner) {
                (SmtUnOp::Not, SmtExpr::BoolConst(b)) => SmtExpr::BoolConst(!*b),
                (SmtUnOp::Not, SmtExpr::Unary(SmtUnOp::Not, nested)) => (**nested).clone(),
                (SmtUnOp::Neg, SmtExpr::IntConst(v)) => SmtExpr::IntConst(v.wrapping_neg()),
                (SmtUnOp::BvNot, SmtExpr::BvConst(v)) => SmtExpr::BvConst(!*v),
                (SmtUnOp::ToBv, SmtExpr::IntConst(v)) => SmtExpr::BvConst(*v as u32),
                // bv → int → bv round-trips exactly
                (SmtUnOp::ToBv, SmtExpr::Unary(SmtUnOp::FromBv, nested)) => (**nested).clone(),
                (SmtUnOp::FromBv, SmtExpr::BvConst(v)) => {
                    SmtExpr::IntConst(*v as i32 as i64)
                }
                _ => SmtExpr::Unary(*op, Box::new(inner)),
            }
        }
        SmtExpr::Binary(op, left, right) => {
            let l = simplify(left);
            let r = simplify(right);
            simplify_binary(*op, l, r)
        }
        _ => expr.clone(),
    }
}

fn simplify_binary(op: SmtBinOp, l: SmtExpr, r: SmtExpr) -> SmtExpr {
    use SmtBinOp::*;

    // Constant folding through the evaluator
    if is_const(&l) && is_const(&r) {
        if let (Some(lv), Some(rv)) = (eval(&l, &[]), eval(&r, &[])) {
            if let Some(folded) = eval_binary(op, lv, rv) {
                return match folded {
                    Value::Int(v) => SmtExpr::IntConst(v),
                    Value::Bool(b) => SmtExpr::BoolConst(b),
                    Value::Bv(v) => SmtExpr::BvConst(v),
                };
            }
        }
    }

    // Reflexive comparisons: SMT terms are pure, so `t == t` is decidable
    if l == r {
        match op {
            Eq | Le | Ge => return SmtExpr::BoolConst(true),
            Ne | Lt | Gt => return SmtExpr::BoolConst(false),
            Sub => return SmtExpr::IntConst(0),
            BvXor => return SmtExpr::BvConst(0),
            BvAnd | BvOr => return l,
            _ => {}
        }
    }

    // Identities and annihilators
    match op {
        Add => {
            if l == SmtExpr::IntConst(0) {
                return r;
            }
            if r == SmtExpr::IntConst(0) {
                return l;
            }
        }
        Mul => {
            if l == SmtExpr::IntConst(1) {
                return r;
            }
            if r == SmtExpr::IntConst(1) {
                return l;
            }
            if l == SmtExpr::IntConst(0) || r == SmtExpr::IntConst(0) {
                return SmtExpr::IntConst(0);
            }
        }
        BvOr | BvXor => {
            if l == SmtExpr::BvConst(0) {
                return r;
            }
            if r == SmtExpr::BvConst(0) {
                return l;
            }
        }
        BvAnd => {
            if l == SmtExpr::BvConst(0) || r == SmtExpr::BvConst(0) {
                return SmtExpr::BvConst(0);
            }
        }
        And => {
            if l == SmtExpr::BoolConst(true) {
                return r;
            }
            if r == SmtExpr::BoolConst(true) {
                return l;
            }
            if l == SmtExpr::BoolConst(false) || r == SmtExpr::BoolConst(false) {
                return SmtExpr::BoolConst(false);
            }
        }
        Or => {
            if l == SmtExpr::BoolConst(false) {
                return r;
            }
            if r == SmtExpr::BoolConst(false) {
                return l;
            }
            if l == SmtExpr::BoolConst(true) || r == SmtExpr::BoolConst(true) {
                return SmtExpr::BoolConst(true);
            }
        }
        _ => {}
    }

    SmtExpr::Binary(op, Box::new(l), Box::new(r))
}

fn is_const(expr: &SmtExpr) -> bool {
    matches!(
        expr,
        SmtExpr::IntConst(_) | SmtExpr::BoolConst(_) | SmtExpr::BvConst(_)
    )
}
