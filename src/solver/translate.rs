//! Translation of IR predicates to SMT expressions
//!
//! The mapping: numeric arithmetic → integer arithmetic, 32-bit bitwise
//! operators → bitvector operators, comparisons → comparisons, logical
//! connectives → boolean connectives. Variables become existentially-free
//! integer variables. Unsupported constructs (calls, property access,
//! non-integer literals) make the translator bail; the caller then
//! classifies the predicate as non-opaque.

use thiserror::Error;

use crate::common::types::{BinaryOp, Literal, LogicalOp, UnaryOp};
use crate::ir::node::{ExprKind, ExprNode};
use crate::solver::{SmtBinOp, SmtExpr, SmtUnOp};

/// Why a predicate could not be translated
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranslateError {
    #[error("unsupported construct: {0}")]
    Unsupported(&'static str),

    #[error("non-integer literal")]
    NonIntegerLiteral,

    #[error("predicate exceeds complexity budget ({nodes} > {budget} nodes)")]
    TooComplex { nodes: usize, budget: usize },
}

/// Translate a predicate into a boolean-sorted SMT expression
///
/// `budget` is the syntactic complexity cap in operator nodes.
pub fn translate_predicate(
    predicate: &ExprNode,
    budget: usize,
) -> Result<SmtExpr, TranslateError> {
    let nodes = predicate.node_count();
    if nodes > budget {
        return Err(TranslateError::TooComplex { nodes, budget });
    }
    Ok(translate_expr(predicate)?.to_bool())
}

fn translate_expr(expr: &ExprNode) -> Result<SmtExpr, TranslateError> {
    match &expr.kind {
        ExprKind::Literal(literal) => translate_literal(literal),
        ExprKind::Identifier { name, .. } => Ok(SmtExpr::IntVar(name.clone())),
        ExprKind::Unary { op, argument } => {
            let inner = translate_expr(argument)?;
            match op {
                UnaryOp::Not => Ok(SmtExpr::Unary(SmtUnOp::Not, Box::new(inner.to_bool()))),
                UnaryOp::Neg => Ok(SmtExpr::Unary(SmtUnOp::Neg, Box::new(as_int(inner)?))),
                UnaryOp::Plus => as_int(inner),
                UnaryOp::BitNot => Ok(SmtExpr::Unary(
                    SmtUnOp::FromBv,
                    Box::new(SmtExpr::Unary(SmtUnOp::BvNot, Box::new(as_bv(inner)?))),
                )),
                UnaryOp::TypeOf | UnaryOp::Void | UnaryOp::Delete => {
                    Err(TranslateError::Unsupported("typeof/void/delete"))
                }
            }
        }
        ExprKind::Binary { op, left, right } => {
            let lhs = translate_expr(left)?;
            let rhs = translate_expr(right)?;
            translate_binary(*op, lhs, rhs)
        }
        ExprKind::Logical { op, left, right } => {
            let lhs = translate_expr(left)?.to_bool();
            let rhs = translate_expr(right)?.to_bool();
            match op {
                LogicalOp::And => Ok(SmtExpr::Binary(
                    SmtBinOp::And,
                    Box::new(lhs),
                    Box::new(rhs),
                )),
                LogicalOp::Or => Ok(SmtExpr::Binary(
                    SmtBinOp::Or,
                    Box::new(lhs),
                    Box::new(rhs),
                )),
                LogicalOp::Nullish => Err(TranslateError::Unsupported("nullish coalescing")),
            }
        }
        ExprKind::Call { .. } => Err(TranslateError::Unsupported("call")),
        ExprKind::Member { .. } => Err(TranslateError::Unsupported("property access")),
        ExprKind::Assignment { .. } | ExprKind::Update { .. } => {
            Err(TranslateError::Unsupported("assignment in predicate"))
        }
        ExprKind::Conditional { .. } => Err(TranslateError::Unsupported("conditional")),
        ExprKind::Array { .. } | ExprKind::Object { .. } => {
            Err(TranslateError::Unsupported("aggregate literal"))
        }
        ExprKind::Function { .. } => Err(TranslateError::Unsupported("function expression")),
        ExprKind::Phi { .. } => Err(TranslateError::Unsupported("phi")),
    }
}

fn translate_literal(literal: &Literal) -> Result<SmtExpr, TranslateError> {
    match literal {
        Literal::Number(n) => {
            if n.fract() == 0.0 && n.is_finite() && n.abs() <= i64::MAX as f64 {
                Ok(SmtExpr::IntConst(*n as i64))
            } else {
                Err(TranslateError::NonIntegerLiteral)
            }
        }
        Literal::Bool(b) => Ok(SmtExpr::BoolConst(*b)),
        _ => Err(TranslateError::NonIntegerLiteral),
    }
}

fn translate_binary(
    op: BinaryOp,
    lhs: SmtExpr,
    rhs: SmtExpr,
) -> Result<SmtExpr, TranslateError> {
    let int_op = |op: SmtBinOp, l: SmtExpr, r: SmtExpr| -> Result<SmtExpr, TranslateError> {
        Ok(SmtExpr::Binary(op, Box::new(as_int(l)?), Box::new(as_int(r)?)))
    };
    let bv_op = |op: SmtBinOp, l: SmtExpr, r: SmtExpr| -> Result<SmtExpr, TranslateError> {
        Ok(SmtExpr::Unary(
            SmtUnOp::FromBv,
            Box::new(SmtExpr::Binary(
                op,
                Box::new(as_bv(l)?),
                Box::new(as_bv(r)?),
            )),
        ))
    };
    match op {
        BinaryOp::Add => int_op(SmtBinOp::Add, lhs, rhs),
        BinaryOp::Sub => int_op(SmtBinOp::Sub, lhs, rhs),
        BinaryOp::Mul => int_op(SmtBinOp::Mul, lhs, rhs),
        BinaryOp::Div => int_op(SmtBinOp::Div, lhs, rhs),
        BinaryOp::Mod => int_op(SmtBinOp::Mod, lhs, rhs),
        BinaryOp::Exp => Err(TranslateError::Unsupported("exponentiation")),
        BinaryOp::BitAnd => bv_op(SmtBinOp::BvAnd, lhs, rhs),
        BinaryOp::BitOr => bv_op(SmtBinOp::BvOr, lhs, rhs),
        BinaryOp::BitXor => bv_op(SmtBinOp::BvXor, lhs, rhs),
        BinaryOp::Shl => bv_op(SmtBinOp::BvShl, lhs, rhs),
        BinaryOp::Shr => bv_op(SmtBinOp::BvAshr, lhs, rhs),
        BinaryOp::UShr => bv_op(SmtBinOp::BvLshr, lhs, rhs),
        BinaryOp::Eq | BinaryOp::StrictEq => int_op(SmtBinOp::Eq, lhs, rhs),
        BinaryOp::NotEq | BinaryOp::StrictNotEq => int_op(SmtBinOp::Ne, lhs, rhs),
        BinaryOp::Lt => int_op(SmtBinOp::Lt, lhs, rhs),
        BinaryOp::Le => int_op(SmtBinOp::Le, lhs, rhs),
        BinaryOp::Gt => int_op(SmtBinOp::Gt, lhs, rhs),
        BinaryOp::Ge => int_op(SmtBinOp::Ge, lhs, rhs),
        BinaryOp::In | BinaryOp::InstanceOf => {
            Err(TranslateError::Unsupported("relational object operator"))
        }
    }
}

/// Coerce to integer sort; booleans are not implicitly numeric here
fn as_int(expr: SmtExpr) -> Result<SmtExpr, TranslateError> {
    match expr.sort() {
        crate::solver::Sort::Int => Ok(expr),
        crate::solver::Sort::BitVec => Ok(SmtExpr::Unary(SmtUnOp::FromBv, Box::new(expr))),
        crate::solver::Sort::Bool => Err(TranslateError::Unsupported("boolean in numeric context")),
    }
}

/// Coerce to bitvector sort
fn as_bv(expr: SmtExpr) -> Result<SmtExpr, TranslateError> {
    match expr.sort() {
        crate::solver::Sort::BitVec => Ok(expr),
        crate::solver::Sort::Int => Ok(SmtExpr::Unary(SmtUnOp::ToBv, Box::new(expr))),
        crate::solver::Sort::Bool => Err(TranslateError::Unsupported("boolean in bitvector context")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::factory;

    #[test]
    fn test_translates_comparison() {
        let predicate = factory::binary(
            BinaryOp::StrictEq,
            factory::identifier("x"),
            factory::number(3.0),
        );
        let smt = translate_predicate(&predicate, 100).unwrap();
        assert_eq!(smt.sort(), crate::solver::Sort::Bool);
        assert_eq!(smt.variables(), vec!["x".to_string()]);
    }

    #[test]
    fn test_bitwise_goes_through_bitvectors() {
        let predicate = factory::binary(
            BinaryOp::BitXor,
            factory::identifier("x"),
            factory::identifier("x"),
        );
        let smt = translate_predicate(&predicate, 100).unwrap();
        // A bare numeric predicate is wrapped into `!= 0`
        assert_eq!(smt.sort(), crate::solver::Sort::Bool);
    }

    #[test]
    fn test_call_bails() {
        let predicate = factory::call(factory::identifier("f"), vec![]);
        assert_eq!(
            translate_predicate(&predicate, 100),
            Err(TranslateError::Unsupported("call"))
        );
    }

    #[test]
    fn test_fractional_literal_bails() {
        let predicate = factory::binary(
            BinaryOp::Lt,
            factory::identifier("x"),
            factory::number(0.5),
        );
        assert_eq!(
            translate_predicate(&predicate, 100),
            Err(TranslateError::NonIntegerLiteral)
        );
    }

    #[test]
    fn test_budget_enforced() {
        let mut expr = factory::identifier("x");
        for _ in 0..60 {
            expr = factory::binary(BinaryOp::Add, expr, factory::identifier("x"));
        }
        assert!(matches!(
            translate_predicate(&expr, 100),
            Err(TranslateError::TooComplex { .. })
        ));
    }
}
