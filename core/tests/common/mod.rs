//! Helpers shared by the integration suites: running assembled programs and
//! a tiny expression compiler for debugger conditions and watches.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;
use kelp_core::debugger::StoppedEvent;
use kelp_core::scope::SymbolTable;
use kelp_core::values::{BinaryOp, CompareOp};
use kelp_core::vm::{Code, SourceSpan};
use kelp_core::{
    CodeBlock, DebugEvent, ExecutionContext, ExecutionError, OpCode, Program, VM, Value,
};

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Run `program` on a fresh VM and return the VM for inspection.
pub fn run(program: &Program) -> VM {
    let vm = VM::default();
    if let Err(err) = vm.execute_code(&ExecutionContext::new(), "", program) {
        panic!("program failed: {}", err);
    }
    vm
}

/// Run `program` on a fresh VM and return its error.
pub fn run_err(program: &Program) -> ExecutionError {
    let vm = VM::default();
    match vm.execute_code(&ExecutionContext::new(), "", program) {
        Ok(()) => panic!("program should have failed"),
        Err(err) => err,
    }
}

pub fn global(vm: &VM, name: &str) -> Value {
    vm.get_global(name)
        .unwrap_or_else(|| panic!("`{}` should be defined", name))
}

pub fn ints(values: &[i64]) -> Value {
    Value::list(values.iter().copied().map(Value::Int).collect())
}

pub fn strs(values: &[&str]) -> Value {
    Value::list(values.iter().copied().map(Value::from).collect())
}

/// Next `Stopped` event, skipping everything else.
pub fn next_stop(events: &Receiver<DebugEvent>) -> StoppedEvent {
    loop {
        match events.recv_timeout(EVENT_TIMEOUT) {
            Ok(DebugEvent::Stopped(stopped)) => return stopped,
            Ok(DebugEvent::Terminated { error }) => {
                panic!("program terminated before stopping (error: {:?})", error)
            }
            Ok(_) => continue,
            Err(err) => panic!("no stop within {:?}: {}", EVENT_TIMEOUT, err),
        }
    }
}

/// Drain events up to `Terminated`, returning the stops seen on the way and
/// the program's error text.
pub fn until_terminated(events: &Receiver<DebugEvent>) -> (Vec<StoppedEvent>, Option<String>) {
    let mut stops = Vec::new();
    loop {
        match events.recv_timeout(EVENT_TIMEOUT) {
            Ok(DebugEvent::Stopped(stopped)) => stops.push(stopped),
            Ok(DebugEvent::Terminated { error }) => return (stops, error),
            Ok(_) => continue,
            Err(err) => panic!("program did not terminate within {:?}: {}", EVENT_TIMEOUT, err),
        }
    }
}

/// Compile `name`, `42` or `lhs op rhs` into a block that returns the value.
///
/// Names known to `table` become `PushRef`s; the rest are looked up as VM
/// globals.
pub fn compile_expression(expr: &str, table: &Arc<SymbolTable>) -> Result<Arc<CodeBlock>, String> {
    let tokens: Vec<&str> = expr.split_whitespace().collect();
    let mut ops = Vec::new();
    match tokens.as_slice() {
        [operand] => ops.push(operand_op(operand, table)?),
        [left, op, right] => {
            ops.push(operand_op(left, table)?);
            ops.push(operand_op(right, table)?);
            ops.push(operator_op(op)?);
        }
        _ => return Err(format!("cannot parse `{}`", expr)),
    }
    ops.push(OpCode::Return);
    let codes = ops
        .into_iter()
        .map(|op| Code::new(op, SourceSpan::default()))
        .collect();
    Ok(Arc::new(CodeBlock::new(None, codes)))
}

fn operand_op(token: &str, table: &Arc<SymbolTable>) -> Result<OpCode, String> {
    if let Ok(n) = token.parse::<i64>() {
        return Ok(OpCode::Push(Value::Int(n)));
    }
    let mut chars = token.chars();
    let is_name = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !is_name {
        return Err(format!("unexpected token `{}`", token));
    }
    Ok(match table.lookup(token) {
        Some(id) => OpCode::PushRef(id),
        None => OpCode::PushId(token.into()),
    })
}

fn operator_op(token: &str) -> Result<OpCode, String> {
    Ok(match token {
        "==" => OpCode::Compare(CompareOp::Eq),
        "!=" => OpCode::Compare(CompareOp::NotEq),
        "<" => OpCode::Compare(CompareOp::Lt),
        "<=" => OpCode::Compare(CompareOp::LtEq),
        ">" => OpCode::Compare(CompareOp::Gt),
        ">=" => OpCode::Compare(CompareOp::GtEq),
        "+" => OpCode::Binary(BinaryOp::Add),
        "-" => OpCode::Binary(BinaryOp::Sub),
        "*" => OpCode::Binary(BinaryOp::Mul),
        other => return Err(format!("unknown operator `{}`", other)),
    })
}
