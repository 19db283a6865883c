//! Algebraic laws of the pass pipeline: idempotence and bounded order
//! independence

mod common;

use common::structural_json;
use unweave::common::config::PipelineConfig;
use unweave::common::types::BinaryOp;
use unweave::ir::factory;
use unweave::ir::node::IrProgram;
use unweave::ir::IrState;
use unweave::passes::{ConstantPropagation, DeadCodeElimination, Pass};

/// A program with foldable arithmetic, a dead declaration and a dead
/// branch
fn workload() -> IrProgram {
    IrProgram {
        functions: vec![factory::ir_function(
            "main",
            vec!["input".into()],
            vec![
                factory::let_single(
                    "a",
                    factory::binary(BinaryOp::Mul, factory::number(6.0), factory::number(7.0)),
                ),
                factory::let_single("unused", factory::number(0.0)),
                factory::if_stmt(
                    factory::binary(
                        BinaryOp::Lt,
                        factory::identifier("a"),
                        factory::number(100.0),
                    ),
                    factory::return_stmt(Some(factory::identifier("a"))),
                    Some(factory::return_stmt(Some(factory::identifier("input")))),
                ),
            ],
        )],
    }
}

fn apply(pass: &dyn Pass, state: IrState) -> IrState {
    let outcome = pass.execute(&state);
    let mut next = outcome.state;
    if next.needs_analysis() {
        next.analyze();
    }
    next
}

fn fresh_state(program: IrProgram) -> IrState {
    let mut state = IrState::new(program);
    state.analyze();
    state
}

#[test]
fn test_const_prop_idempotent() {
    let pass = ConstantPropagation::new(&PipelineConfig::default());
    let once = apply(&pass, fresh_state(workload()));
    let twice = apply(&pass, once.clone());
    assert_eq!(
        structural_json(&once.program),
        structural_json(&twice.program)
    );
}

#[test]
fn test_dce_idempotent() {
    let pass = DeadCodeElimination::new();
    let once = apply(&pass, fresh_state(workload()));
    let twice = apply(&pass, once.clone());
    assert_eq!(
        structural_json(&once.program),
        structural_json(&twice.program)
    );
}

#[test]
fn test_opaque_idempotent() {
    let config = unweave::DeobfuscatorConfig::default();
    let pass = unweave::passes::OpaquePredicateElimination::new(&config.pipeline, &config.solver);
    let program = IrProgram {
        functions: vec![factory::ir_function(
            "main",
            vec!["x".into()],
            vec![factory::if_stmt(
                factory::binary(
                    BinaryOp::BitXor,
                    factory::identifier("x"),
                    factory::identifier("x"),
                ),
                factory::expression_stmt(factory::call(factory::identifier("foo"), vec![])),
                Some(factory::expression_stmt(factory::call(
                    factory::identifier("bar"),
                    vec![],
                ))),
            )],
        )],
    };
    let once = apply(&pass, fresh_state(program));
    let twice = apply(&pass, once.clone());
    assert_eq!(
        structural_json(&once.program),
        structural_json(&twice.program)
    );
}

#[test]
fn test_bounded_order_independence() {
    // const-prop ; DCE  versus  DCE ; const-prop ; DCE differ only in
    // metrics, never in the resulting IR
    let const_prop = ConstantPropagation::new(&PipelineConfig::default());
    let dce = DeadCodeElimination::new();

    let mut left = fresh_state(workload());
    left = apply(&const_prop, left);
    left = apply(&dce, left);

    let mut right = fresh_state(workload());
    right = apply(&dce, right);
    right = apply(&const_prop, right);
    right = apply(&dce, right);

    assert_eq!(
        structural_json(&left.program),
        structural_json(&right.program)
    );
}

#[test]
fn test_structural_sharing_preserves_untouched_nodes() {
    // Node identifiers present before and after a pass denote nodes of
    // identical structure
    let pass = ConstantPropagation::new(&PipelineConfig::default());
    let before = fresh_state(workload());
    let after = apply(&pass, before.clone());

    let mut before_ids = std::collections::HashMap::new();
    for function in &before.program.functions {
        for stmt in &function.body {
            stmt.for_each_expr(&mut |e| {
                before_ids.insert(e.id, structural_json(e));
            });
        }
    }
    for function in &after.program.functions {
        for stmt in &function.body {
            stmt.for_each_expr(&mut |e| {
                if let Some(previous) = before_ids.get(&e.id) {
                    assert_eq!(previous, &structural_json(e), "node {} changed shape", e.id);
                }
            });
        }
    }
}
