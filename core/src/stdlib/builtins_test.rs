use pretty_assertions::assert_eq;

use crate::api::ExecutionContext;
use crate::errors::RuntimeError;
use crate::values::Value;
use crate::vm::VM;

fn call(vm: &VM, name: &str, args: Vec<Value>) -> Result<Value, crate::errors::ExecutionError> {
    let function = vm
        .get_global(name)
        .unwrap_or_else(|| panic!("builtin {} should be registered", name));
    vm.call_function(&ExecutionContext::new(), &function, args)
}

fn ints(values: &[i64]) -> Value {
    Value::list(values.iter().copied().map(Value::Int).collect())
}

#[test]
fn test_len() {
    let vm = VM::default();
    assert_eq!(call(&vm, "len", vec![Value::from("héllo")]).unwrap(), Value::Int(5));
    assert_eq!(call(&vm, "len", vec![ints(&[1, 2, 3])]).unwrap(), Value::Int(3));
    let err = call(&vm, "len", vec![Value::Int(3)]).unwrap_err();
    assert_eq!(err.runtime().unwrap().to_string(), "len: int has no length");
}

#[test]
fn test_append_returns_new_list() {
    let vm = VM::default();
    let original = ints(&[1]);
    let appended = call(
        &vm,
        "append",
        vec![original.clone(), Value::Int(2), Value::Int(3)],
    )
    .unwrap();
    assert_eq!(appended, ints(&[1, 2, 3]));
    assert_eq!(original, ints(&[1]));

    let from_nothing = call(&vm, "append", vec![Value::Undefined, Value::Int(1)]).unwrap();
    assert_eq!(from_nothing, ints(&[1]));
}

#[test]
fn test_range_forms() {
    let vm = VM::default();
    assert_eq!(call(&vm, "range", vec![Value::Int(3)]).unwrap(), ints(&[0, 1, 2]));
    assert_eq!(
        call(&vm, "range", vec![Value::Int(2), Value::Int(5)]).unwrap(),
        ints(&[2, 3, 4])
    );
    assert_eq!(
        call(&vm, "range", vec![Value::Int(5), Value::Int(0), Value::Int(-2)]).unwrap(),
        ints(&[5, 3, 1])
    );
    assert_eq!(call(&vm, "range", vec![Value::Int(-1)]).unwrap(), ints(&[]));
}

#[test]
fn test_range_rejects_zero_step() {
    let vm = VM::default();
    let err = call(&vm, "range", vec![Value::Int(0), Value::Int(3), Value::Int(0)]).unwrap_err();
    assert!(matches!(err.runtime(), Some(RuntimeError::Native { .. })));
}

#[test]
fn test_keys_are_sorted() {
    let vm = VM::default();
    let map = Value::map(vec![
        (Value::from("b"), Value::Int(2)),
        (Value::from("a"), Value::Int(1)),
    ])
    .unwrap();
    assert_eq!(
        call(&vm, "keys", vec![map]).unwrap(),
        Value::list(vec![Value::from("a"), Value::from("b")])
    );
}

#[test]
fn test_typeof_and_str() {
    let vm = VM::default();
    assert_eq!(call(&vm, "typeof", vec![Value::Float(1.0)]).unwrap(), Value::from("float"));
    assert_eq!(call(&vm, "typeof", vec![Value::Undefined]).unwrap(), Value::from("undefined"));
    assert_eq!(call(&vm, "str", vec![Value::Float(3.0)]).unwrap(), Value::from("3.0"));
    assert_eq!(call(&vm, "str", vec![ints(&[1, 2])]).unwrap(), Value::from("[1, 2]"));
}

#[test]
fn test_wait_all_with_no_tasks_returns() {
    let vm = VM::default();
    assert!(call(&vm, "waitAllAsyncCallFinish", vec![]).unwrap().is_undefined());
}
