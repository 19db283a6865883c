//! Tagged IR tree: expressions, statements, functions and programs
//!
//! The node model is a closed variant set; visitation is tagged-union
//! dispatch, never open inheritance. Every node carries a process-wide
//! identifier and an optional source location. Substructure is owned by its
//! parent, so a node identifier has at most one owner in a tree.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::common::types::{
    AssignOp, BinaryOp, BlockId, Literal, LogicalOp, NodeId, Span, UnaryOp, UpdateOp,
};

/// An expression node: identifier, location and payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExprNode {
    /// Stable node identifier
    pub id: NodeId,
    /// Source location, when the parser provided one
    pub span: Option<Span>,
    /// Expression payload
    pub kind: ExprKind,
}

/// A statement node: identifier, location and payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StmtNode {
    /// Stable node identifier
    pub id: NodeId,
    /// Source location, when the parser provided one
    pub span: Option<Span>,
    /// Statement payload
    pub kind: StmtKind,
}

/// Expression variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    /// Immutable scalar literal
    Literal(Literal),
    /// Variable reference; `version` is set once the tree is in SSA form
    Identifier { name: String, version: Option<u32> },
    Binary {
        op: BinaryOp,
        left: Box<ExprNode>,
        right: Box<ExprNode>,
    },
    Logical {
        op: LogicalOp,
        left: Box<ExprNode>,
        right: Box<ExprNode>,
    },
    Unary {
        op: UnaryOp,
        argument: Box<ExprNode>,
    },
    Update {
        op: UpdateOp,
        prefix: bool,
        argument: Box<ExprNode>,
    },
    Conditional {
        test: Box<ExprNode>,
        consequent: Box<ExprNode>,
        alternate: Box<ExprNode>,
    },
    Assignment {
        op: AssignOp,
        target: Box<ExprNode>,
        value: Box<ExprNode>,
    },
    Call {
        callee: Box<ExprNode>,
        arguments: Vec<ExprNode>,
    },
    Member {
        object: Box<ExprNode>,
        property: Box<ExprNode>,
        computed: bool,
    },
    Array {
        elements: Vec<ExprNode>,
    },
    Object {
        properties: Vec<ObjectProperty>,
    },
    /// Function or arrow expression
    Function {
        name: Option<String>,
        params: Vec<String>,
        body: Vec<StmtNode>,
        is_arrow: bool,
    },
    /// φ pseudo-assignment source; operand map keys are the predecessor
    /// blocks of the φ's block, values are the SSA versions flowing in
    Phi {
        variable: String,
        operands: BTreeMap<BlockId, u32>,
    },
}

/// Statement variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StmtKind {
    Expression(ExprNode),
    VarDecl {
        kind: DeclKind,
        declarators: Vec<Declarator>,
    },
    Block(Vec<StmtNode>),
    If {
        test: ExprNode,
        consequent: Box<StmtNode>,
        alternate: Option<Box<StmtNode>>,
    },
    While {
        test: ExprNode,
        body: Box<StmtNode>,
    },
    DoWhile {
        body: Box<StmtNode>,
        test: ExprNode,
    },
    For {
        init: Option<Box<StmtNode>>,
        test: Option<ExprNode>,
        update: Option<ExprNode>,
        body: Box<StmtNode>,
    },
    Switch {
        discriminant: ExprNode,
        cases: Vec<SwitchCase>,
    },
    Return(Option<ExprNode>),
    Throw(ExprNode),
    Try {
        block: Vec<StmtNode>,
        handler: Option<CatchClause>,
        finalizer: Option<Vec<StmtNode>>,
    },
    Break(Option<String>),
    Continue(Option<String>),
    FunctionDecl {
        name: String,
        params: Vec<String>,
        body: Vec<StmtNode>,
    },
    Labeled {
        label: String,
        body: Box<StmtNode>,
    },
    Empty,
}

/// `let` / `const` / `var`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeclKind {
    Let,
    Const,
    Var,
}

impl DeclKind {
    /// Source keyword
    pub fn as_str(&self) -> &'static str {
        match self {
            DeclKind::Let => "let",
            DeclKind::Const => "const",
            DeclKind::Var => "var",
        }
    }
}

/// A single `name = init` declarator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Declarator {
    /// Node identifier of the binding itself (used as a definition site)
    pub id: NodeId,
    /// Bound name
    pub name: String,
    /// Initialiser, when present
    pub init: Option<ExprNode>,
}

/// One `case`/`default` arm of a switch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchCase {
    /// Case test; `None` for `default`
    pub test: Option<ExprNode>,
    /// Arm body (falls through unless it breaks)
    pub body: Vec<StmtNode>,
}

/// `catch (param) { body }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchClause {
    /// Caught binding, when present
    pub param: Option<String>,
    /// Handler body
    pub body: Vec<StmtNode>,
}

/// Object literal entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectProperty {
    /// Property key (identifier or string form)
    pub key: String,
    /// Property value
    pub value: ExprNode,
}

/// A top-level function of an IR program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrFunction {
    /// Node identifier of the function itself
    pub id: NodeId,
    /// Function name
    pub name: String,
    /// Parameter names in declaration order
    pub params: Vec<String>,
    /// Function body statements
    pub body: Vec<StmtNode>,
}

/// A whole IR program: the unit moved through the pipeline
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IrProgram {
    /// Top-level functions
    pub functions: Vec<IrFunction>,
}

impl IrProgram {
    /// Create an empty program
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of IR nodes across all function bodies
    pub fn node_count(&self) -> u64 {
        let mut count = 0u64;
        for function in &self.functions {
            for stmt in &function.body {
                stmt.for_each_stmt(&mut |_| count += 1);
                stmt.for_each_expr(&mut |_| count += 1);
            }
        }
        count
    }
}

impl ExprNode {
    /// Visit this expression and every subexpression, pre-order
    ///
    /// Does not descend into nested function bodies; analyses are
    /// per-function.
    pub fn for_each_expr(&self, f: &mut impl FnMut(&ExprNode)) {
        f(self);
        match &self.kind {
            ExprKind::Literal(_) | ExprKind::Identifier { .. } | ExprKind::Phi { .. } => {}
            ExprKind::Binary { left, right, .. } | ExprKind::Logical { left, right, .. } => {
                left.for_each_expr(f);
                right.for_each_expr(f);
            }
            ExprKind::Unary { argument, .. } | ExprKind::Update { argument, .. } => {
                argument.for_each_expr(f);
            }
            ExprKind::Conditional {
                test,
                consequent,
                alternate,
            } => {
                test.for_each_expr(f);
                consequent.for_each_expr(f);
                alternate.for_each_expr(f);
            }
            ExprKind::Assignment { target, value, .. } => {
                target.for_each_expr(f);
                value.for_each_expr(f);
            }
            ExprKind::Call { callee, arguments } => {
                callee.for_each_expr(f);
                for arg in arguments {
                    arg.for_each_expr(f);
                }
            }
            ExprKind::Member {
                object, property, ..
            } => {
                object.for_each_expr(f);
                property.for_each_expr(f);
            }
            ExprKind::Array { elements } => {
                for element in elements {
                    element.for_each_expr(f);
                }
            }
            ExprKind::Object { properties } => {
                for property in properties {
                    property.value.for_each_expr(f);
                }
            }
            ExprKind::Function { .. } => {}
        }
    }

    /// Number of operator/leaf nodes in this expression
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        self.for_each_expr(&mut |_| count += 1);
        count
    }

    /// True when evaluating this expression can have an observable effect:
    /// a call, an assignment or an update anywhere inside it
    pub fn has_side_effects(&self) -> bool {
        let mut found = false;
        self.for_each_expr(&mut |e| {
            if matches!(
                e.kind,
                ExprKind::Call { .. } | ExprKind::Assignment { .. } | ExprKind::Update { .. }
            ) {
                found = true;
            }
        });
        found
    }

    /// Structural equality ignoring node identifiers, spans and SSA versions
    pub fn structurally_equal(&self, other: &ExprNode) -> bool {
        match (&self.kind, &other.kind) {
            (ExprKind::Literal(a), ExprKind::Literal(b)) => a == b,
            (
                ExprKind::Identifier { name: a, .. },
                ExprKind::Identifier { name: b, .. },
            ) => a == b,
            (
                ExprKind::Binary {
                    op: ao,
                    left: al,
                    right: ar,
                },
                ExprKind::Binary {
                    op: bo,
                    left: bl,
                    right: br,
                },
            ) => ao == bo && al.structurally_equal(bl) && ar.structurally_equal(br),
            (
                ExprKind::Logical {
                    op: ao,
                    left: al,
                    right: ar,
                },
                ExprKind::Logical {
                    op: bo,
                    left: bl,
                    right: br,
                },
            ) => ao == bo && al.structurally_equal(bl) && ar.structurally_equal(br),
            (
                ExprKind::Unary {
                    op: ao,
                    argument: aa,
                },
                ExprKind::Unary {
                    op: bo,
                    argument: ba,
                },
            ) => ao == bo && aa.structurally_equal(ba),
            (
                ExprKind::Member {
                    object: ao,
                    property: ap,
                    computed: ac,
                },
                ExprKind::Member {
                    object: bo,
                    property: bp,
                    computed: bc,
                },
            ) => ac == bc && ao.structurally_equal(bo) && ap.structurally_equal(bp),
            (
                ExprKind::Conditional {
                    test: at,
                    consequent: ac,
                    alternate: aa,
                },
                ExprKind::Conditional {
                    test: bt,
                    consequent: bc,
                    alternate: ba,
                },
            ) => {
                at.structurally_equal(bt)
                    && ac.structurally_equal(bc)
                    && aa.structurally_equal(ba)
            }
            _ => false,
        }
    }
}

impl StmtNode {
    /// Visit this statement and every nested statement, pre-order
    ///
    /// Does not descend into nested function bodies.
    pub fn for_each_stmt(&self, f: &mut impl FnMut(&StmtNode)) {
        f(self);
        match &self.kind {
            StmtKind::Block(stmts) => {
                for stmt in stmts {
                    stmt.for_each_stmt(f);
                }
            }
            StmtKind::If {
                consequent,
                alternate,
                ..
            } => {
                consequent.for_each_stmt(f);
                if let Some(alt) = alternate {
                    alt.for_each_stmt(f);
                }
            }
            StmtKind::While { body, .. } | StmtKind::DoWhile { body, .. } => {
                body.for_each_stmt(f);
            }
            StmtKind::For { init, body, .. } => {
                if let Some(init) = init {
                    init.for_each_stmt(f);
                }
                body.for_each_stmt(f);
            }
            StmtKind::Switch { cases, .. } => {
                for case in cases {
                    for stmt in &case.body {
                        stmt.for_each_stmt(f);
                    }
                }
            }
            StmtKind::Try {
                block,
                handler,
                finalizer,
            } => {
                for stmt in block {
                    stmt.for_each_stmt(f);
                }
                if let Some(handler) = handler {
                    for stmt in &handler.body {
                        stmt.for_each_stmt(f);
                    }
                }
                if let Some(finalizer) = finalizer {
                    for stmt in finalizer {
                        stmt.for_each_stmt(f);
                    }
                }
            }
            StmtKind::Labeled { body, .. } => body.for_each_stmt(f),
            StmtKind::Expression(_)
            | StmtKind::VarDecl { .. }
            | StmtKind::Return(_)
            | StmtKind::Throw(_)
            | StmtKind::Break(_)
            | StmtKind::Continue(_)
            | StmtKind::FunctionDecl { .. }
            | StmtKind::Empty => {}
        }
    }

    /// Visit every expression hanging off this statement tree, pre-order
    pub fn for_each_expr(&self, f: &mut impl FnMut(&ExprNode)) {
        self.for_each_stmt(&mut |stmt| match &stmt.kind {
            StmtKind::Expression(expr) => expr.for_each_expr(f),
            StmtKind::VarDecl { declarators, .. } => {
                for declarator in declarators {
                    if let Some(init) = &declarator.init {
                        init.for_each_expr(f);
                    }
                }
            }
            StmtKind::If { test, .. } => test.for_each_expr(f),
            StmtKind::While { test, .. } | StmtKind::DoWhile { test, .. } => {
                test.for_each_expr(f)
            }
            StmtKind::For { test, update, .. } => {
                if let Some(test) = test {
                    test.for_each_expr(f);
                }
                if let Some(update) = update {
                    update.for_each_expr(f);
                }
            }
            StmtKind::Switch {
                discriminant,
                cases,
            } => {
                discriminant.for_each_expr(f);
                for case in cases {
                    if let Some(test) = &case.test {
                        test.for_each_expr(f);
                    }
                }
            }
            StmtKind::Return(Some(expr)) | StmtKind::Throw(expr) => expr.for_each_expr(f),
            _ => {}
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::factory;

    #[test]
    fn test_structural_equality_ignores_ids() {
        let a = factory::binary(
            BinaryOp::BitXor,
            factory::identifier("x"),
            factory::identifier("x"),
        );
        let b = factory::binary(
            BinaryOp::BitXor,
            factory::identifier("x"),
            factory::identifier("x"),
        );
        assert_ne!(a.id, b.id);
        assert!(a.structurally_equal(&b));
    }

    #[test]
    fn test_structural_equality_distinguishes_names() {
        let a = factory::identifier("x");
        let b = factory::identifier("y");
        assert!(!a.structurally_equal(&b));
    }

    #[test]
    fn test_side_effect_detection() {
        let pure = factory::binary(
            BinaryOp::Add,
            factory::number(1.0),
            factory::identifier("x"),
        );
        assert!(!pure.has_side_effects());

        let call = factory::call(factory::identifier("f"), vec![]);
        let tainted = factory::binary(BinaryOp::Mul, call, factory::number(0.0));
        assert!(tainted.has_side_effects());
    }

    #[test]
    fn test_for_each_expr_counts_subtree() {
        let expr = factory::binary(
            BinaryOp::Add,
            factory::number(1.0),
            factory::binary(BinaryOp::Mul, factory::number(2.0), factory::number(3.0)),
        );
        assert_eq!(expr.node_count(), 5);
    }
}
