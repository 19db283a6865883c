//! End-to-end scenarios through the public facade

mod common;

use common::{SamplePoolEntry, SampleQjsModule, SampleVirsModule};
use unweave::common::types::{BinaryOp, Literal, UpdateOp, WarningKind};
use unweave::ir::factory;
use unweave::ir::node::{ExprKind, IrProgram, StmtKind, SwitchCase};
use unweave::{Deobfuscator, DeobfuscatorConfig};

fn deobfuscator() -> Deobfuscator {
    common::init_tracing();
    Deobfuscator::new(DeobfuscatorConfig::default())
}

/// The single statement `callee(...)` at the top of a function body
fn sole_call_name(program: &IrProgram, function: usize) -> String {
    let body = &program.functions[function].body;
    assert_eq!(body.len(), 1, "expected one statement, got {:?}", body);
    let StmtKind::Expression(expr) = &body[0].kind else {
        panic!("expected expression statement, got {:?}", body[0].kind);
    };
    let ExprKind::Call { callee, .. } = &expr.kind else {
        panic!("expected call, got {:?}", expr.kind);
    };
    let ExprKind::Identifier { name, .. } = &callee.kind else {
        panic!("expected identifier callee");
    };
    name.clone()
}

#[test]
fn test_constant_fold_and_dead_branch() {
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
                    factory::block(vec![factory::expression_stmt(factory::call(
                        factory::identifier("use"),
                        vec![factory::identifier("x")],
                    ))]),
                    Some(factory::block(vec![factory::expression_stmt(
                        factory::call(factory::identifier("dead"), vec![]),
                    )])),
                ),
            ],
        )],
    };

    let result = deobfuscator().deobfuscate(program).unwrap();
    assert_eq!(sole_call_name(&result.program, 0), "use");

    // The argument has been folded to the literal 3
    let StmtKind::Expression(expr) = &result.program.functions[0].body[0].kind else {
        unreachable!();
    };
    let ExprKind::Call { arguments, .. } = &expr.kind else {
        unreachable!();
    };
    assert_eq!(arguments[0].kind, ExprKind::Literal(Literal::Number(3.0)));
}

#[test]
fn test_self_xor_collapses_via_pattern_oracle() {
    // if (a ^ a) { foo(); } else { bar(); }
    let program = IrProgram {
        functions: vec![factory::ir_function(
            "main",
            vec!["a".into()],
            vec![factory::if_stmt(
                factory::binary(
                    BinaryOp::BitXor,
                    factory::identifier("a"),
                    factory::identifier("a"),
                ),
                factory::expression_stmt(factory::call(factory::identifier("foo"), vec![])),
                Some(factory::expression_stmt(factory::call(
                    factory::identifier("bar"),
                    vec![],
                ))),
            )],
        )],
    };
    let result = deobfuscator().deobfuscate(program).unwrap();
    assert_eq!(sole_call_name(&result.program, 0), "bar");
}

fn smt_tautology_program() -> IrProgram {
    // if ((y | 0) === (y | 0)) { p(); } else { q(); }
    let side = || {
        factory::binary(
            BinaryOp::BitOr,
            factory::identifier("y"),
            factory::number(0.0),
        )
    };
    IrProgram {
        functions: vec![factory::ir_function(
            "main",
            vec!["y".into()],
            vec![factory::if_stmt(
                factory::binary(BinaryOp::StrictEq, side(), side()),
                factory::expression_stmt(factory::call(factory::identifier("p"), vec![])),
                Some(factory::expression_stmt(factory::call(
                    factory::identifier("q"),
                    vec![],
                ))),
            )],
        )],
    }
}

#[test]
fn test_smt_tautology_collapses_with_solver() {
    let result = deobfuscator().deobfuscate(smt_tautology_program()).unwrap();
    assert_eq!(sole_call_name(&result.program, 0), "p");
}

#[test]
fn test_smt_tautology_survives_without_solver() {
    let mut config = DeobfuscatorConfig::default();
    config.solver.enabled = false;
    let result = Deobfuscator::new(config)
        .deobfuscate(smt_tautology_program())
        .unwrap();
    assert!(matches!(
        result.program.functions[0].body[0].kind,
        StmtKind::If { .. }
    ));
    assert!(result
        .warnings
        .iter()
        .any(|w| w.kind == WarningKind::SolverUnavailable));
}

#[test]
fn test_stack_engine_lift_and_fold() {
    // push_const 1, push_const 2, add, return with pool {0: 1, 1: 2}
    let module = SampleQjsModule::single(
        vec![SamplePoolEntry::Int(1), SamplePoolEntry::Int(2)],
        vec![0x01, 0, 0, 0x01, 1, 0, 0x30, 0x70],
    );
    let result = deobfuscator().lift_stack_module(&module.to_bytes()).unwrap();
    assert_eq!(result.program.functions.len(), 1);
    let body = &result.program.functions[0].body;
    assert_eq!(body.len(), 1);
    let StmtKind::Return(Some(value)) = &body[0].kind else {
        panic!("expected return, got {:?}", body[0].kind);
    };
    assert_eq!(value.kind, ExprKind::Literal(Literal::Number(3.0)));
}

#[test]
fn test_register_engine_lift_and_fold() {
    // LdaSmi 5, Star r0, LdaSmi 7, Add r0, Return
    let module = SampleVirsModule::single(vec![], vec![0x01, 5, 0x11, 0, 0x01, 7, 0x20, 0, 0x80]);
    let result = deobfuscator()
        .lift_register_module(&module.to_bytes())
        .unwrap();
    assert_eq!(result.program.functions.len(), 1);
    let body = &result.program.functions[0].body;
    assert_eq!(body.len(), 1, "expected only the return, got {:?}", body);
    let StmtKind::Return(Some(value)) = &body[0].kind else {
        panic!("expected return");
    };
    assert_eq!(value.kind, ExprKind::Literal(Literal::Number(12.0)));
}

#[test]
fn test_devirtualisation_end_to_end() {
    // while(true){switch(ops[pc++]){case 1: regs[ops[pc++]] =
    // regs[ops[pc++]] + regs[ops[pc++]]; break; case 2: return regs[0];}}
    // with ops adding regs[0] and regs[1] into regs[0], preloaded [5,7,0]
    let pc_read = || {
        factory::index_member(
            factory::identifier("ops"),
            factory::update(UpdateOp::Increment, false, factory::identifier("pc")),
        )
    };
    let reg_at = |index| factory::index_member(factory::identifier("regs"), index);
    let program = IrProgram {
        functions: vec![factory::ir_function(
            "vm_entry",
            vec![],
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
                        [5.0, 7.0, 0.0]
                            .iter()
                            .map(|n| factory::number(*n))
                            .collect(),
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
                                body: vec![
                                    factory::expression_stmt(factory::assign(
                                        reg_at(pc_read()),
                                        factory::binary(
                                            BinaryOp::Add,
                                            reg_at(pc_read()),
                                            reg_at(pc_read()),
                                        ),
                                    )),
                                    factory::break_stmt(None),
                                ],
                            },
                            SwitchCase {
                                test: Some(factory::number(2.0)),
                                body: vec![factory::return_stmt(Some(reg_at(factory::number(
                                    0.0,
                                ))))],
                            },
                        ],
                    )]),
                ),
            ],
        )],
    };

    let result = deobfuscator().deobfuscate(program).unwrap();
    let body = &result.program.functions[0].body;
    assert_eq!(body.len(), 1, "expected only the return, got {:?}", body);
    let StmtKind::Return(Some(value)) = &body[0].kind else {
        panic!("expected return");
    };
    assert_eq!(value.kind, ExprKind::Literal(Literal::Number(12.0)));
}

#[test]
fn test_lift_round_trip_preserves_signatures() {
    // A module accepted without warnings survives an unparse/re-parse
    // cycle (modelled by serde) with the same function count and
    // parameter counts
    let mut module = SampleQjsModule::single(
        vec![SamplePoolEntry::Int(1), SamplePoolEntry::Int(2)],
        vec![0x01, 0, 0, 0x01, 1, 0, 0x30, 0x70],
    );
    module.functions[0].param_count = 2;
    let result = deobfuscator().lift_stack_module(&module.to_bytes()).unwrap();
    assert!(result.warnings.is_empty(), "warnings: {:?}", result.warnings);

    let serialized = serde_json::to_string(&result.program).unwrap();
    let reparsed: IrProgram = serde_json::from_str(&serialized).unwrap();
    assert_eq!(
        reparsed.functions.len(),
        result.program.functions.len()
    );
    for (a, b) in reparsed.functions.iter().zip(&result.program.functions) {
        assert_eq!(a.params.len(), b.params.len());
    }
}

#[test]
fn test_unknown_opcode_keeps_placeholder_and_warns() {
    // An unknown opcode in an otherwise valid stream keeps positions via
    // a placeholder and never aborts the module
    let module = SampleQjsModule::single(vec![], vec![0xEE, 0x71]);
    let result = deobfuscator().lift_stack_module(&module.to_bytes()).unwrap();
    assert!(result
        .warnings
        .iter()
        .any(|w| w.kind == WarningKind::UnknownOpcode));
    assert_eq!(result.program.functions.len(), 1);
}

#[test]
fn test_malformed_function_skips_but_module_continues() {
    // First function underflows the stack; second is fine
    let module = SampleQjsModule {
        atoms: vec!["bad".into(), "good".into()],
        functions: vec![
            common::SampleQjsFunction {
                name_atom: 0,
                param_count: 0,
                pool: vec![],
                bytecode: vec![0x30, 0x70], // add on empty stack
            },
            common::SampleQjsFunction {
                name_atom: 1,
                param_count: 0,
                pool: vec![SamplePoolEntry::Int(4)],
                bytecode: vec![0x01, 0, 0, 0x70], // push_const 0; ret
            },
        ],
    };
    let result = deobfuscator().lift_stack_module(&module.to_bytes()).unwrap();
    assert_eq!(result.program.functions.len(), 1);
    assert_eq!(result.program.functions[0].name, "good");
    assert!(result
        .warnings
        .iter()
        .any(|w| w.kind == WarningKind::FunctionSkipped));
}
