//! Benchmarks for the Kelp interpreter.
//!
//! Run with: `cargo bench` in the core/ directory.
//!
//! Benchmark groups:
//! 1. arithmetic_loop: a counting loop, measuring dispatch and scope access
//! 2. function_calls: recursive calls, measuring frame setup
//! 3. debugger_overhead: the counting loop with an attached debugger that
//!    never stops, measuring the cost of observation

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use kelp_core::{
    Assembler, CodeBlock, Debugger, DebuggerOptions, ExecutionContext, OpCode, Program, VM,
    scope::SymbolTable,
    values::{BinaryOp, CompareOp},
};

/// total := 0
/// for i := range range(n) { total += i }
fn counting_loop(n: i64) -> Program {
    let mut asm = Assembler::new(Some("bench.kelp"));
    asm.line(1).push(0).store("total");
    asm.line(2).for_range(
        "i",
        None,
        |a| {
            a.global("range").push(n).call(1);
        },
        |a| {
            a.line(3).load("total").load("i").emit(OpCode::SelfAssign(BinaryOp::Add));
        },
    );
    asm.finish()
}

/// fib := (n) => n < 2 ? n : fib(n - 1) + fib(n - 2)
/// r := fib(n)
fn fibonacci(n: i64) -> Program {
    let mut asm = Assembler::new(Some("bench.kelp"));
    asm.declare("fib");
    asm.line(1).function("fib", &["n"], false, |f| {
        f.if_else(
            |c| {
                c.load("n").push(2).compare(CompareOp::Lt);
            },
            |then| {
                then.load("n").ret();
            },
            |otherwise| {
                otherwise.load("fib").load("n").push(1).binary(BinaryOp::Sub).call(1);
                otherwise.load("fib").load("n").push(2).binary(BinaryOp::Sub).call(1);
                otherwise.binary(BinaryOp::Add).ret();
            },
        );
    });
    asm.store("fib");
    asm.line(2).load("fib").push(n).call(1).store("r");
    asm.finish()
}

fn no_expressions(_: &str, _: &Arc<SymbolTable>) -> Result<Arc<CodeBlock>, String> {
    Err("expressions are not used here".to_string())
}

fn bench_arithmetic_loop(c: &mut Criterion) {
    let mut group = c.benchmark_group("arithmetic_loop");

    for size in [100, 1_000, 10_000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let vm = VM::default();
            let program = counting_loop(size);
            let ctx = ExecutionContext::new();
            b.iter(|| {
                vm.execute_code(&ctx, "", black_box(&program))
                    .expect("loop should run");
                black_box(vm.get_global("total"))
            });
        });
    }

    group.finish();
}

fn bench_function_calls(c: &mut Criterion) {
    let mut group = c.benchmark_group("function_calls");

    for n in [10, 15, 20] {
        group.bench_with_input(BenchmarkId::new("fib", n), &n, |b, &n| {
            let vm = VM::default();
            let program = fibonacci(n);
            let ctx = ExecutionContext::new();
            b.iter(|| {
                vm.execute_code(&ctx, "", black_box(&program))
                    .expect("fib should run");
                black_box(vm.get_global("r"))
            });
        });
    }

    group.finish();
}

fn bench_debugger_overhead(c: &mut Criterion) {
    let mut group = c.benchmark_group("debugger_overhead");
    let size = 1_000;
    group.throughput(Throughput::Elements(size as u64));

    group.bench_function("detached", |b| {
        let vm = VM::default();
        let program = counting_loop(size);
        let ctx = ExecutionContext::new();
        b.iter(|| vm.execute_code(&ctx, "", black_box(&program)));
    });

    group.bench_function("attached", |b| {
        let vm = VM::default();
        let program = counting_loop(size);
        let ctx = ExecutionContext::new();
        let debugger = Debugger::attach(&vm, DebuggerOptions::default(), no_expressions);
        // A breakpoint on a line that never runs keeps the lookup path hot.
        debugger
            .set_breakpoint("bench.kelp", 99, None, None)
            .expect("unknown lines are accepted before loading");
        b.iter(|| vm.execute_code(&ctx, "", black_box(&program)));
        // Drain events so the queue does not grow across iterations.
        while debugger.events().try_recv().is_ok() {}
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_arithmetic_loop,
    bench_function_calls,
    bench_debugger_overhead
);
criterion_main!(benches);
