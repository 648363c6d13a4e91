use std::io::Write as _;

use crate::errors::{ExecutionError, RuntimeError};
use crate::values::value::sorted_entries;
use crate::values::{NativeFunction, Value, ValueKind};
use crate::vm::{NativeContext, VM};

// ============================================================================
// Collections
// ============================================================================

/// Number of elements of a list, map, string (in chars) or byte sequence.
fn len(value: Value) -> Result<i64, RuntimeError> {
    value
        .len()
        .map(|n| n as i64)
        .ok_or_else(|| RuntimeError::native("len", format!("{} has no length", value.kind())))
}

/// `append(list, items...)`: a new list with `items` added at the end.
fn append(_: &NativeContext<'_>, args: &[Value]) -> Result<Value, ExecutionError> {
    let Some((first, rest)) = args.split_first() else {
        return Err(RuntimeError::ArgumentCount {
            name: "append".to_string(),
            expected: 1,
            got: 0,
        }
        .into());
    };
    let mut items = match first {
        Value::Undefined => Vec::new(),
        other => other.to_vec().ok_or(RuntimeError::ArgumentType {
            name: "append".to_string(),
            index: 0,
            expected: ValueKind::List,
            got: other.kind(),
        })?,
    };
    items.extend(rest.iter().cloned());
    Ok(Value::list(items))
}

/// `range(end)`, `range(start, end)` or `range(start, end, step)`.
fn range(_: &NativeContext<'_>, args: &[Value]) -> Result<Value, ExecutionError> {
    let mut bounds = Vec::with_capacity(args.len());
    for (index, arg) in args.iter().enumerate() {
        let n = match arg {
            Value::Int(n) => *n,
            other => {
                return Err(RuntimeError::ArgumentType {
                    name: "range".to_string(),
                    index,
                    expected: ValueKind::Int,
                    got: other.kind(),
                }
                .into());
            }
        };
        bounds.push(n);
    }
    let (start, end, step) = match bounds[..] {
        [end] => (0, end, 1),
        [start, end] => (start, end, 1),
        [start, end, step] => (start, end, step),
        _ => {
            return Err(RuntimeError::ArgumentCount {
                name: "range".to_string(),
                expected: 1,
                got: args.len(),
            }
            .into());
        }
    };
    if step == 0 {
        return Err(RuntimeError::native("range", "step must not be zero").into());
    }

    let mut items = Vec::new();
    let mut n = start;
    while (step > 0 && n < end) || (step < 0 && n > end) {
        items.push(Value::Int(n));
        n = match n.checked_add(step) {
            Some(next) => next,
            None => break,
        };
    }
    Ok(Value::list(items))
}

/// Keys of a map in a stable order.
fn keys(value: Value) -> Result<Vec<Value>, RuntimeError> {
    let Some(map) = value.as_map() else {
        return Err(RuntimeError::ArgumentType {
            name: "keys".to_string(),
            index: 0,
            expected: ValueKind::Map,
            got: value.kind(),
        });
    };
    let entries = sorted_entries(&map.read());
    Ok(entries.into_iter().map(|(key, _)| key.to_value()).collect())
}

// ============================================================================
// Conversion & output
// ============================================================================

fn type_of(value: Value) -> Result<&'static str, RuntimeError> {
    Ok(value.kind().name())
}

fn to_str(value: Value) -> Result<String, RuntimeError> {
    Ok(value.to_string())
}

/// Print arguments separated by spaces. The text also goes to the VM's
/// observer so a debugger session can forward it.
fn println(ctx: &NativeContext<'_>, args: &[Value]) -> Result<Value, ExecutionError> {
    let mut line = args
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join(" ");
    line.push('\n');
    std::io::stdout()
        .lock()
        .write_all(line.as_bytes())
        .map_err(|err| RuntimeError::native("println", err))?;
    ctx.vm().emit_output(ctx.task(), &line);
    Ok(Value::Undefined)
}

/// Blocks until every async task has finished. An async task would wait for
/// itself, so it gets an error instead.
fn wait_all(ctx: &NativeContext<'_>, _: &[Value]) -> Result<Value, ExecutionError> {
    if ctx.task().spawned {
        return Err(RuntimeError::native(
            "waitAllAsyncCallFinish",
            "cannot wait for all async tasks from inside one",
        )
        .into());
    }
    ctx.vm().wait_all_async();
    Ok(Value::Undefined)
}

pub(crate) fn register(vm: &VM) {
    vm.register_fn("len", len);
    vm.register_fn("keys", keys);
    vm.register_fn("typeof", type_of);
    vm.register_fn("str", to_str);
    vm.import_global("append", NativeFunction::new("append", append));
    vm.import_global("range", NativeFunction::new("range", range));
    vm.import_global("println", NativeFunction::new("println", println));
    vm.import_global(
        "waitAllAsyncCallFinish",
        NativeFunction::new("waitAllAsyncCallFinish", wait_all),
    );
}

#[cfg(test)]
#[path = "builtins_test.rs"]
mod builtins_test;
