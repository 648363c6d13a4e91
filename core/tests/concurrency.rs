//! Async tasks: shared scopes, waiting, failures and cancellation.

mod common;

use common::{global, run};
use kelp_core::{
    Assembler, CancelToken, ExecutionContext, ExecutionErrorKind, OpCode, Program, VM, Value,
};
use pretty_assertions::assert_eq;

fn range(a: &mut Assembler, n: i64) {
    a.global("range").push(n).call(1);
}

/// counter := 0
/// inc := () => { for _ := range range(per_task) { counter++ } }
/// for i := range range(tasks) { go inc() }
/// waitAllAsyncCallFinish()
fn counter_program(tasks: i64, per_task: i64) -> Program {
    let mut asm = Assembler::new(None);
    asm.push(0).store("counter");
    asm.function("inc", &[], false, |f| {
        f.for_range(
            "_",
            None,
            |a| range(a, per_task),
            |a| {
                a.load("counter").emit(OpCode::PlusPlus);
            },
        );
    });
    asm.store("inc");
    asm.for_range(
        "i",
        None,
        |a| range(a, tasks),
        |a| {
            a.load("inc").emit(OpCode::AsyncCall(0));
        },
    );
    asm.call_global("waitAllAsyncCallFinish", vec![]);
    asm.finish()
}

#[test]
fn test_async_increments_are_all_applied() {
    let vm = run(&counter_program(5, 1));
    assert_eq!(global(&vm, "counter"), Value::Int(5));
}

#[test]
fn test_concurrent_increments_are_atomic() {
    let vm = run(&counter_program(20, 50));
    assert_eq!(global(&vm, "counter"), Value::Int(1000));
}

#[test]
fn test_concurrent_map_entry_increments_are_atomic() {
    // counts := {"n": 0}
    // inc := () => { for _ := range range(50) { counts["n"]++ } }
    // for i := range range(20) { go inc() }
    let mut asm = Assembler::new(None);
    asm.push("n").push(0).emit(OpCode::NewMap(1)).store("counts");
    asm.function("inc", &[], false, |f| {
        f.for_range(
            "_",
            None,
            |a| range(a, 50),
            |a| {
                a.load("counts").push("n").emit(OpCode::Index);
                a.emit(OpCode::PlusPlus);
            },
        );
    });
    asm.store("inc");
    asm.for_range(
        "i",
        None,
        |a| range(a, 20),
        |a| {
            a.load("inc").emit(OpCode::AsyncCall(0));
        },
    );
    asm.call_global("waitAllAsyncCallFinish", vec![]);
    asm.load("counts").push("n").emit(OpCode::Index).store("n");
    let vm = run(&asm.finish());

    assert_eq!(global(&vm, "n"), Value::Int(1000));
}

#[test]
fn test_async_call_passes_arguments() {
    // total := 0
    // add := (n) => { total += n }
    // go add(3); go add(4); waitAllAsyncCallFinish()
    let mut asm = Assembler::new(None);
    asm.push(0).store("total");
    asm.function("add", &["n"], false, |f| {
        f.load("total").load("n").emit(OpCode::SelfAssign(kelp_core::values::BinaryOp::Add));
    });
    asm.store("add");
    asm.load("add").push(3).emit(OpCode::AsyncCall(1));
    asm.load("add").push(4).emit(OpCode::AsyncCall(1));
    asm.call_global("waitAllAsyncCallFinish", vec![]);
    let vm = run(&asm.finish());

    assert_eq!(global(&vm, "total"), Value::Int(7));
}

#[test]
fn test_async_failure_does_not_fail_caller() {
    let mut asm = Assembler::new(None);
    asm.function("boom", &[], false, |f| {
        f.push("async boom").emit(OpCode::Panic);
    });
    asm.store("boom");
    asm.load("boom").emit(OpCode::AsyncCall(0));
    asm.call_global("waitAllAsyncCallFinish", vec![]);
    asm.push(true).store("done");
    let vm = run(&asm.finish());

    assert_eq!(global(&vm, "done"), Value::Bool(true));
    let failures = vm.task_failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].error.to_value(), Some(Value::from("async boom")));
    assert!(failures[0].task_name.starts_with("async-"));
}

#[test]
fn test_waiting_for_all_tasks_inside_one_fails() {
    // waiter := () => waitAllAsyncCallFinish()
    // go waiter(); waitAllAsyncCallFinish()
    let mut asm = Assembler::new(None);
    asm.function("waiter", &[], false, |f| {
        f.call_global("waitAllAsyncCallFinish", vec![]);
    });
    asm.store("waiter");
    asm.load("waiter").emit(OpCode::AsyncCall(0));
    asm.call_global("waitAllAsyncCallFinish", vec![]);
    asm.push(true).store("done");
    let vm = run(&asm.finish());

    assert_eq!(global(&vm, "done"), Value::Bool(true));
    let failures = vm.task_failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(
        failures[0].error.to_value(),
        Some(Value::from(
            "waitAllAsyncCallFinish: cannot wait for all async tasks from inside one"
        ))
    );
}

#[test]
fn test_async_call_of_non_function_fails_immediately() {
    let mut asm = Assembler::new(None);
    asm.push(1).emit(OpCode::AsyncCall(0));
    let program = asm.finish();

    let vm = VM::default();
    let err = vm
        .execute_code(&ExecutionContext::new(), "", &program)
        .unwrap_err();
    assert_eq!(err.runtime().unwrap().to_string(), "cannot call a value of type int");
}

#[test]
fn test_host_spawn_and_wait() {
    let mut asm = Assembler::new(None);
    asm.push(0).store("count");
    asm.function("bump", &[], false, |f| {
        f.load("count").emit(OpCode::PlusPlus);
    });
    asm.store("bump");
    let vm = run(&asm.finish());

    let bump = global(&vm, "bump");
    let ctx = ExecutionContext::new();
    for _ in 0..3 {
        vm.spawn_async(&ctx, bump.clone(), vec![]).unwrap();
    }
    vm.wait_all_async();
    assert_eq!(global(&vm, "count"), Value::Int(3));
}

#[test]
fn test_cancellation_reaches_spawned_tasks() {
    // spin := () => { while true {} }
    // go spin(); waitAllAsyncCallFinish()
    let mut asm = Assembler::new(None);
    asm.line(1).function("spin", &[], false, |f| {
        let head = f.label();
        f.bind(head).line(2).push(true).jmp_if_true(head);
    });
    asm.store("spin");
    asm.line(3).load("spin").emit(OpCode::AsyncCall(0));
    let program = asm.finish();

    let token = CancelToken::new();
    let vm = VM::default();
    vm.execute_code(&ExecutionContext::with_cancel(token.clone()), "", &program)
        .unwrap();
    token.cancel();
    vm.wait_all_async();

    let failures = vm.task_failures();
    assert_eq!(failures.len(), 1);
    assert!(matches!(failures[0].error.kind, ExecutionErrorKind::Cancelled));
}
