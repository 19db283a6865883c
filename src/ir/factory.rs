//! IR node factory
//!
//! Constructors for every node variant plus three helpers: fresh node
//! identifier, fresh SSA version for a variable, fresh variable name.
//! Constructors perform no semantic validation beyond tag membership; they
//! assign the node identifier and leave the location unset (callers attach
//! spans when the parser supplies them).
//!
//! The identifier and name counters are process-wide and atomic: independent
//! pipeline invocations may run in parallel threads and must still observe
//! strictly monotone values.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::common::types::{
    AssignOp, BinaryOp, BlockId, Literal, LogicalOp, NodeId, UnaryOp, UpdateOp,
};
use crate::ir::node::{
    CatchClause, DeclKind, Declarator, ExprKind, ExprNode, IrFunction, ObjectProperty, StmtKind,
    StmtNode, SwitchCase,
};

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_TEMP_NAME: AtomicU64 = AtomicU64::new(0);

/// Allocate a fresh node identifier, unique for the lifetime of the process
pub fn fresh_node_id() -> NodeId {
    NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Allocate a fresh synthetic variable name (`t0`, `t1`, ...)
pub fn fresh_variable_name() -> String {
    let n = NEXT_TEMP_NAME.fetch_add(1, Ordering::Relaxed);
    format!("t{}", n)
}

/// Per-function SSA version allocator
///
/// Version 0 is the live-on-entry placeholder, so the first allocated
/// version for any variable is 1.
#[derive(Debug, Default)]
pub struct VersionAllocator {
    current: HashMap<String, u32>,
}

impl VersionAllocator {
    /// Create an allocator with all variables at version 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh version for `var`
    pub fn fresh_version(&mut self, var: &str) -> u32 {
        let slot = self.current.entry(var.to_string()).or_insert(0);
        *slot += 1;
        *slot
    }

    /// The most recently allocated version for `var` (0 if none)
    pub fn current_version(&self, var: &str) -> u32 {
        self.current.get(var).copied().unwrap_or(0)
    }

    /// Final version counters, keyed by variable
    pub fn into_versions(self) -> HashMap<String, u32> {
        self.current
    }
}

fn expr(kind: ExprKind) -> ExprNode {
    ExprNode {
        id: fresh_node_id(),
        span: None,
        kind,
    }
}

fn stmt(kind: StmtKind) -> StmtNode {
    StmtNode {
        id: fresh_node_id(),
        span: None,
        kind,
    }
}

// Expression constructors

pub fn literal(value: Literal) -> ExprNode {
    expr(ExprKind::Literal(value))
}

pub fn number(value: f64) -> ExprNode {
    literal(Literal::Number(value))
}

pub fn string(value: impl Into<String>) -> ExprNode {
    literal(Literal::Str(value.into()))
}

pub fn boolean(value: bool) -> ExprNode {
    literal(Literal::Bool(value))
}

pub fn undefined() -> ExprNode {
    literal(Literal::Undefined)
}

pub fn null() -> ExprNode {
    literal(Literal::Null)
}

pub fn identifier(name: impl Into<String>) -> ExprNode {
    expr(ExprKind::Identifier {
        name: name.into(),
        version: None,
    })
}

/// An identifier carrying an explicit SSA version
pub fn versioned_identifier(name: impl Into<String>, version: u32) -> ExprNode {
    expr(ExprKind::Identifier {
        name: name.into(),
        version: Some(version),
    })
}

pub fn binary(op: BinaryOp, left: ExprNode, right: ExprNode) -> ExprNode {
    expr(ExprKind::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    })
}

pub fn logical(op: LogicalOp, left: ExprNode, right: ExprNode) -> ExprNode {
    expr(ExprKind::Logical {
        op,
        left: Box::new(left),
        right: Box::new(right),
    })
}

pub fn unary(op: UnaryOp, argument: ExprNode) -> ExprNode {
    expr(ExprKind::Unary {
        op,
        argument: Box::new(argument),
    })
}

pub fn update(op: UpdateOp, prefix: bool, argument: ExprNode) -> ExprNode {
    expr(ExprKind::Update {
        op,
        prefix,
        argument: Box::new(argument),
    })
}

pub fn conditional(test: ExprNode, consequent: ExprNode, alternate: ExprNode) -> ExprNode {
    expr(ExprKind::Conditional {
        test: Box::new(test),
        consequent: Box::new(consequent),
        alternate: Box::new(alternate),
    })
}

pub fn assign(target: ExprNode, value: ExprNode) -> ExprNode {
    expr(ExprKind::Assignment {
        op: AssignOp::Assign,
        target: Box::new(target),
        value: Box::new(value),
    })
}

pub fn compound_assign(op: BinaryOp, target: ExprNode, value: ExprNode) -> ExprNode {
    expr(ExprKind::Assignment {
        op: AssignOp::Compound(op),
        target: Box::new(target),
        value: Box::new(value),
    })
}

pub fn call(callee: ExprNode, arguments: Vec<ExprNode>) -> ExprNode {
    expr(ExprKind::Call {
        callee: Box::new(callee),
        arguments,
    })
}

pub fn member(object: ExprNode, property: ExprNode, computed: bool) -> ExprNode {
    expr(ExprKind::Member {
        object: Box::new(object),
        property: Box::new(property),
        computed,
    })
}

/// `object.name` member access
pub fn static_member(object: ExprNode, name: impl Into<String>) -> ExprNode {
    member(object, identifier(name), false)
}

/// `object[index]` member access
pub fn index_member(object: ExprNode, index: ExprNode) -> ExprNode {
    member(object, index, true)
}

pub fn array(elements: Vec<ExprNode>) -> ExprNode {
    expr(ExprKind::Array { elements })
}

pub fn object(properties: Vec<ObjectProperty>) -> ExprNode {
    expr(ExprKind::Object { properties })
}

pub fn function_expr(
    name: Option<String>,
    params: Vec<String>,
    body: Vec<StmtNode>,
    is_arrow: bool,
) -> ExprNode {
    expr(ExprKind::Function {
        name,
        params,
        body,
        is_arrow,
    })
}

pub fn phi(variable: impl Into<String>, operands: BTreeMap<BlockId, u32>) -> ExprNode {
    expr(ExprKind::Phi {
        variable: variable.into(),
        operands,
    })
}

// Statement constructors

pub fn expression_stmt(e: ExprNode) -> StmtNode {
    stmt(StmtKind::Expression(e))
}

pub fn var_decl(kind: DeclKind, declarators: Vec<Declarator>) -> StmtNode {
    stmt(StmtKind::VarDecl { kind, declarators })
}

/// A single `let name = init;`
pub fn let_single(name: impl Into<String>, init: ExprNode) -> StmtNode {
    var_decl(DeclKind::Let, vec![declarator(name, Some(init))])
}

pub fn declarator(name: impl Into<String>, init: Option<ExprNode>) -> Declarator {
    Declarator {
        id: fresh_node_id(),
        name: name.into(),
        init,
    }
}

pub fn block(body: Vec<StmtNode>) -> StmtNode {
    stmt(StmtKind::Block(body))
}

pub fn if_stmt(test: ExprNode, consequent: StmtNode, alternate: Option<StmtNode>) -> StmtNode {
    stmt(StmtKind::If {
        test,
        consequent: Box::new(consequent),
        alternate: alternate.map(Box::new),
    })
}

pub fn while_stmt(test: ExprNode, body: StmtNode) -> StmtNode {
    stmt(StmtKind::While {
        test,
        body: Box::new(body),
    })
}

pub fn do_while_stmt(body: StmtNode, test: ExprNode) -> StmtNode {
    stmt(StmtKind::DoWhile {
        body: Box::new(body),
        test,
    })
}

pub fn for_stmt(
    init: Option<StmtNode>,
    test: Option<ExprNode>,
    update: Option<ExprNode>,
    body: StmtNode,
) -> StmtNode {
    stmt(StmtKind::For {
        init: init.map(Box::new),
        test,
        update,
        body: Box::new(body),
    })
}

pub fn switch_stmt(discriminant: ExprNode, cases: Vec<SwitchCase>) -> StmtNode {
    stmt(StmtKind::Switch {
        discriminant,
        cases,
    })
}

pub fn return_stmt(argument: Option<ExprNode>) -> StmtNode {
    stmt(StmtKind::Return(argument))
}

pub fn throw_stmt(argument: ExprNode) -> StmtNode {
    stmt(StmtKind::Throw(argument))
}

pub fn try_stmt(
    block: Vec<StmtNode>,
    handler: Option<CatchClause>,
    finalizer: Option<Vec<StmtNode>>,
) -> StmtNode {
    stmt(StmtKind::Try {
        block,
        handler,
        finalizer,
    })
}

pub fn break_stmt(label: Option<String>) -> StmtNode {
    stmt(StmtKind::Break(label))
}

pub fn continue_stmt(label: Option<String>) -> StmtNode {
    stmt(StmtKind::Continue(label))
}

pub fn function_decl(
    name: impl Into<String>,
    params: Vec<String>,
    body: Vec<StmtNode>,
) -> StmtNode {
    stmt(StmtKind::FunctionDecl {
        name: name.into(),
        params,
        body,
    })
}

pub fn labeled_stmt(label: impl Into<String>, body: StmtNode) -> StmtNode {
    stmt(StmtKind::Labeled {
        label: label.into(),
        body: Box::new(body),
    })
}

pub fn empty_stmt() -> StmtNode {
    stmt(StmtKind::Empty)
}

/// Build a top-level function
pub fn ir_function(
    name: impl Into<String>,
    params: Vec<String>,
    body: Vec<StmtNode>,
) -> IrFunction {
    IrFunction {
        id: fresh_node_id(),
        name: name.into(),
        params,
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_ids_are_monotone() {
        let a = identifier("a");
        let b = identifier("b");
        let c = number(1.0);
        assert!(a.id < b.id);
        assert!(b.id < c.id);
    }

    #[test]
    fn test_fresh_variable_names_are_unique() {
        let a = fresh_variable_name();
        let b = fresh_variable_name();
        assert_ne!(a, b);
        assert!(a.starts_with('t'));
    }

    #[test]
    fn test_version_allocator_starts_above_entry() {
        let mut versions = VersionAllocator::new();
        assert_eq!(versions.current_version("x"), 0);
        assert_eq!(versions.fresh_version("x"), 1);
        assert_eq!(versions.fresh_version("x"), 2);
        assert_eq!(versions.fresh_version("y"), 1);
        assert_eq!(versions.current_version("x"), 2);
    }
}
