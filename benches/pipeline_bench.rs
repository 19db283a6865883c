//! Performance benchmarks for the deobfuscation pipeline

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use unweave::common::types::BinaryOp;
use unweave::ir::factory;
use unweave::ir::node::{IrProgram, StmtNode};
use unweave::{Deobfuscator, DeobfuscatorConfig};

/// A chain of foldable declarations ending in a constant-testable branch
fn foldable_program(width: usize) -> IrProgram {
    let mut body: Vec<StmtNode> = Vec::with_capacity(width + 1);
    body.push(factory::let_single("v0", factory::number(1.0)));
    for i in 1..width {
        body.push(factory::let_single(
            format!("v{}", i),
            factory::binary(
                BinaryOp::Add,
                factory::identifier(format!("v{}", i - 1)),
                factory::number(1.0),
            ),
        ));
    }
    body.push(factory::return_stmt(Some(factory::identifier(format!(
        "v{}",
        width - 1
    )))));
    IrProgram {
        functions: vec![factory::ir_function("chain", vec![], body)],
    }
}

fn qjs_add_module() -> Vec<u8> {
    use unweave::lifters::reader::{write_string, write_varint_i32, write_varint_u32};
    let mut out = Vec::new();
    out.extend_from_slice(b"qjs\0");
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes());
    write_string(&mut out, "main");
    out.extend_from_slice(&0u32.to_le_bytes());
    for value in [0u32, 0, 0, 0, 8, 0] {
        write_varint_u32(&mut out, value);
    }
    write_varint_u32(&mut out, 2);
    out.push(4);
    write_varint_i32(&mut out, 1);
    out.push(4);
    write_varint_i32(&mut out, 2);
    let code = [0x01u8, 0, 0, 0x01, 1, 0, 0x30, 0x70];
    write_varint_u32(&mut out, code.len() as u32);
    out.extend_from_slice(&code);
    out
}

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");
    for width in [8usize, 64, 256] {
        let program = foldable_program(width);
        group.bench_with_input(
            BenchmarkId::new("const_fold_chain", width),
            &program,
            |b, program| {
                let deobfuscator = Deobfuscator::new(DeobfuscatorConfig::default());
                b.iter(|| {
                    let _ = deobfuscator.deobfuscate(program.clone()).unwrap();
                });
            },
        );
    }
    group.finish();
}

fn bench_stack_lift(c: &mut Criterion) {
    let mut group = c.benchmark_group("stack_lift");
    let bytes = qjs_add_module();
    group.throughput(Throughput::Bytes(bytes.len() as u64));
    group.bench_function("parse_lift_fold", |b| {
        let deobfuscator = Deobfuscator::new(DeobfuscatorConfig::default());
        b.iter(|| {
            let _ = deobfuscator.lift_stack_module(&bytes).unwrap();
        });
    });
    group.finish();
}

criterion_group!(benches, bench_pipeline, bench_stack_lift);
criterion_main!(benches);
