//! Multi-assignment, destructuring and assignment targets.

mod common;

use std::thread;
use std::time::Duration;

use common::{global, ints, run, run_err};
use kelp_core::values::BinaryOp;
use kelp_core::{
    Assembler, ExecutionContext, OpCode, RuntimeError, VM, Value, ValueKind,
};
use pretty_assertions::assert_eq;

#[test]
fn test_pairwise_assignment() {
    // a, b = 1, 2
    let mut asm = Assembler::new(None);
    asm.push(1).push(2).load_left("a").load_left("b");
    asm.emit(OpCode::Assign { lefts: 2, rights: 2 });
    let vm = run(&asm.finish());

    assert_eq!(global(&vm, "a"), Value::Int(1));
    assert_eq!(global(&vm, "b"), Value::Int(2));
}

#[test]
fn test_swap() {
    // a, b = 1, 2; a, b = b, a
    let mut asm = Assembler::new(None);
    asm.push(1).store("a").push(2).store("b");
    asm.load("b").load("a").load_left("a").load_left("b");
    asm.emit(OpCode::Assign { lefts: 2, rights: 2 });
    let vm = run(&asm.finish());

    assert_eq!(global(&vm, "a"), Value::Int(2));
    assert_eq!(global(&vm, "b"), Value::Int(1));
}

#[test]
fn test_single_target_collects_values() {
    // x = 1, 2, 3
    let mut asm = Assembler::new(None);
    asm.push(1).push(2).push(3).load_left("x");
    asm.emit(OpCode::Assign { lefts: 1, rights: 3 });
    let vm = run(&asm.finish());

    assert_eq!(global(&vm, "x"), ints(&[1, 2, 3]));
}

#[test]
fn test_destructure_list() {
    // p, q = [7, 8]
    let mut asm = Assembler::new(None);
    asm.push(vec![Value::Int(7), Value::Int(8)]).load_left("p").load_left("q");
    asm.emit(OpCode::Assign { lefts: 2, rights: 1 });
    let vm = run(&asm.finish());

    assert_eq!(global(&vm, "p"), Value::Int(7));
    assert_eq!(global(&vm, "q"), Value::Int(8));
}

#[test]
fn test_destructure_length_mismatch() {
    let mut asm = Assembler::new(None);
    asm.push(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    asm.load_left("p").load_left("q");
    asm.emit(OpCode::Assign { lefts: 2, rights: 1 });
    let err = run_err(&asm.finish());

    assert!(matches!(
        err.runtime(),
        Some(RuntimeError::AssignMismatch { lefts: 2, rights: 3 })
    ));
}

#[test]
fn test_count_mismatch() {
    // a, b = 1, 2, 3
    let mut asm = Assembler::new(None);
    asm.push(1).push(2).push(3).load_left("a").load_left("b");
    asm.emit(OpCode::Assign { lefts: 2, rights: 3 });
    let err = run_err(&asm.finish());

    assert_eq!(
        err.runtime().unwrap().to_string(),
        "assignment mismatch: 2 variables but 3 values"
    );
}

#[test]
fn test_destructure_non_iterable() {
    let mut asm = Assembler::new(None);
    asm.push(5).load_left("a").load_left("b");
    asm.emit(OpCode::Assign { lefts: 2, rights: 1 });
    let err = run_err(&asm.finish());

    assert!(matches!(
        err.runtime(),
        Some(RuntimeError::NotIterable(ValueKind::Int))
    ));
}

#[test]
fn test_index_assignment_writes_through_shared_list() {
    // l = [1, 2, 3]; alias = l; l[1] = 20
    let mut asm = Assembler::new(None);
    asm.push(1).push(2).push(3).emit(OpCode::NewList(3)).store("l");
    asm.load("l").store("alias");
    asm.push(20).load("l").push(1).emit(OpCode::IndexLeft);
    asm.emit(OpCode::Assign { lefts: 1, rights: 1 });
    let vm = run(&asm.finish());

    assert_eq!(global(&vm, "l"), ints(&[1, 20, 3]));
    assert_eq!(global(&vm, "alias"), ints(&[1, 20, 3]));
}

#[test]
fn test_compound_assignment_on_map_entry() {
    // m = {"k": 1}; m["k"] += 5
    let mut asm = Assembler::new(None);
    asm.push("k").push(1).emit(OpCode::NewMap(1)).store("m");
    asm.load("m").push("k").emit(OpCode::Index);
    asm.push(5).emit(OpCode::SelfAssign(BinaryOp::Add));
    asm.load("m").push("k").emit(OpCode::Index).store("k");
    let vm = run(&asm.finish());

    assert_eq!(global(&vm, "k"), Value::Int(6));
}

#[test]
fn test_compound_assignment_reading_its_own_container() {
    // l = [[1]]; l[0] += l
    let mut asm = Assembler::new(None);
    asm.push(1).emit(OpCode::NewList(1)).emit(OpCode::NewList(1)).store("l");
    asm.load("l").push(0).emit(OpCode::Index);
    asm.load("l").emit(OpCode::SelfAssign(BinaryOp::Add));
    asm.load("l").push(0).emit(OpCode::Index).store("first");
    let program = asm.finish();

    let (done, finished) = crossbeam_channel::bounded(1);
    thread::spawn(move || {
        let vm = VM::default();
        let result = vm.execute_code(&ExecutionContext::new(), "", &program);
        done.send((vm, result)).ok();
    });
    let (vm, result) = finished
        .recv_timeout(Duration::from_secs(10))
        .expect("compound assignment must not block on its own container");
    result.unwrap();

    // [1] + l == [1, <the old inner list>]
    let first = global(&vm, "first");
    assert_eq!(first.len(), Some(2));
    assert_eq!(first, Value::list(vec![Value::Int(1), ints(&[1])]));
}

#[test]
fn test_increment_and_decrement() {
    let mut asm = Assembler::new(None);
    asm.push(5).store("n");
    asm.load("n").emit(OpCode::PlusPlus);
    asm.load("n").emit(OpCode::PlusPlus);
    asm.load("n").emit(OpCode::MinusMinus);
    let vm = run(&asm.finish());

    assert_eq!(global(&vm, "n"), Value::Int(6));
}

#[test]
fn test_assigning_to_a_temporary_fails() {
    let mut asm = Assembler::new(None);
    asm.push(5).push(1).emit(OpCode::Assign { lefts: 1, rights: 1 });
    let err = run_err(&asm.finish());

    assert!(matches!(err.runtime(), Some(RuntimeError::NotAssignable)));
}

#[test]
fn test_assignment_updates_existing_global() {
    let vm = VM::default();
    vm.import_global("hits", 1);

    let mut asm = Assembler::new(None);
    asm.load("hits").emit(OpCode::PlusPlus);
    asm.push(10).load_left("hits").emit(OpCode::Assign { lefts: 1, rights: 1 });
    asm.load("hits").emit(OpCode::PlusPlus);
    vm.execute_code(&ExecutionContext::new(), "", &asm.finish())
        .unwrap();

    assert_eq!(vm.get_global("hits"), Some(Value::Int(11)));
}

#[test]
fn test_type_cast() {
    let mut asm = Assembler::new(None);
    asm.push("42").emit(OpCode::TypeCast(ValueKind::Int)).store("n");
    asm.push(7).emit(OpCode::TypeCast(ValueKind::Str)).store("s");
    let vm = run(&asm.finish());

    assert_eq!(global(&vm, "n"), Value::Int(42));
    assert_eq!(global(&vm, "s"), Value::from("7"));
}
