//! Operator semantics over [`Value`]s.
//!
//! Integer arithmetic wraps instead of panicking on overflow; integer division
//! and modulo by zero are errors. Mixed int/float operands promote to float,
//! and float arithmetic follows IEEE 754 (division by zero yields `inf`/`nan`).

use core::fmt;
use std::cmp::Ordering;
use std::sync::Arc;

use ecow::EcoString;
use serde::{Deserialize, Serialize};

use crate::errors::RuntimeError;
use crate::values::{MapKey, Value, ValueKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    AndNot,
}

impl BinaryOp {
    pub const fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::AndNot => "&^",
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    pub const fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::NotEq => "!=",
            CompareOp::Lt => "<",
            CompareOp::LtEq => "<=",
            CompareOp::Gt => ">",
            CompareOp::GtEq => ">=",
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
    BitNot,
}

impl UnaryOp {
    pub const fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Plus => "+",
            UnaryOp::Not => "!",
            UnaryOp::BitNot => "^",
        }
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

// ============================================================================
// Binary operators
// ============================================================================

fn mismatch(op: BinaryOp, left: &Value, right: &Value) -> RuntimeError {
    RuntimeError::TypeMismatch {
        op: op.symbol(),
        left: left.kind(),
        right: right.kind(),
    }
}

/// Evaluate a binary operation on two integers.
pub(crate) fn eval_binary_int(op: BinaryOp, left: i64, right: i64) -> Result<i64, RuntimeError> {
    match op {
        BinaryOp::Add => Ok(left.wrapping_add(right)),
        BinaryOp::Sub => Ok(left.wrapping_sub(right)),
        BinaryOp::Mul => Ok(left.wrapping_mul(right)),
        BinaryOp::Div => {
            if right == 0 {
                Err(RuntimeError::DivisionByZero)
            } else {
                // i64::MIN / -1
                Ok(left.wrapping_div(right))
            }
        }
        BinaryOp::Mod => {
            if right == 0 {
                Err(RuntimeError::DivisionByZero)
            } else {
                Ok(left.wrapping_rem(right))
            }
        }
        BinaryOp::BitAnd => Ok(left & right),
        BinaryOp::BitOr => Ok(left | right),
        BinaryOp::BitXor => Ok(left ^ right),
        BinaryOp::AndNot => Ok(left & !right),
        BinaryOp::Shl => Ok(if (0..64).contains(&right) {
            left.wrapping_shl(right as u32)
        } else {
            0
        }),
        BinaryOp::Shr => Ok(if (0..64).contains(&right) {
            left.wrapping_shr(right as u32)
        } else if left < 0 {
            -1
        } else {
            0
        }),
    }
}

/// Evaluate a binary operation on two floats. Bitwise operators are rejected
/// by the caller.
pub(crate) fn eval_binary_float(op: BinaryOp, left: f64, right: f64) -> Option<f64> {
    match op {
        BinaryOp::Add => Some(left + right),
        BinaryOp::Sub => Some(left - right),
        BinaryOp::Mul => Some(left * right),
        BinaryOp::Div => Some(left / right),
        BinaryOp::Mod => Some(left % right),
        _ => None,
    }
}

/// Apply a binary operator.
///
/// Strings concatenate with strings; once bytes are involved the result is
/// bytes. `string * int` repeats the string, `list + list` concatenates into a
/// new list.
pub fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, RuntimeError> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => eval_binary_int(op, *a, *b).map(Value::Int),
        (Value::Float(_), Value::Float(_) | Value::Int(_)) | (Value::Int(_), Value::Float(_)) => {
            let (a, b) = (left.as_float(), right.as_float());
            match (a, b) {
                (Some(a), Some(b)) => eval_binary_float(op, a, b)
                    .map(Value::Float)
                    .ok_or_else(|| mismatch(op, left, right)),
                _ => Err(mismatch(op, left, right)),
            }
        }
        (Value::Bool(a), Value::Bool(b)) => match op {
            BinaryOp::BitAnd => Ok(Value::Bool(a & b)),
            BinaryOp::BitOr => Ok(Value::Bool(a | b)),
            BinaryOp::BitXor => Ok(Value::Bool(a ^ b)),
            _ => Err(mismatch(op, left, right)),
        },
        (Value::Str(a), Value::Str(b)) if op == BinaryOp::Add => {
            let mut out = EcoString::with_capacity(a.len() + b.len());
            out.push_str(a);
            out.push_str(b);
            Ok(Value::Str(out))
        }
        (Value::Str(_) | Value::Bytes(_), Value::Str(_) | Value::Bytes(_))
            if op == BinaryOp::Add =>
        {
            let mut out = Vec::with_capacity(byte_len(left) + byte_len(right));
            out.extend_from_slice(string_like_bytes(left));
            out.extend_from_slice(string_like_bytes(right));
            Ok(Value::Bytes(Arc::from(out)))
        }
        (Value::Str(s), Value::Int(n)) | (Value::Int(n), Value::Str(s)) if op == BinaryOp::Mul => {
            repeat(s, *n).map(Value::Str)
        }
        (Value::List(a), Value::List(b)) if op == BinaryOp::Add => {
            let mut items = a.read().clone();
            items.extend(b.read().iter().cloned());
            Ok(Value::list(items))
        }
        _ => Err(mismatch(op, left, right)),
    }
}

/// Longest string `string * int` may build.
pub const MAX_REPEAT_LEN: usize = 1 << 30;

/// `s` repeated `n` times; a negative count gives the empty string.
fn repeat(s: &EcoString, n: i64) -> Result<EcoString, RuntimeError> {
    let times = usize::try_from(n).unwrap_or(0);
    if s.is_empty() || times == 0 {
        return Ok(EcoString::new());
    }
    match s.len().checked_mul(times) {
        Some(len) if len <= MAX_REPEAT_LEN => Ok(s.repeat(times)),
        _ => Err(RuntimeError::TooLarge {
            op: "*",
            max: MAX_REPEAT_LEN,
        }),
    }
}

fn string_like_bytes(value: &Value) -> &[u8] {
    match value {
        Value::Str(s) => s.as_bytes(),
        Value::Bytes(b) => b,
        _ => &[],
    }
}

fn byte_len(value: &Value) -> usize {
    string_like_bytes(value).len()
}

// ============================================================================
// Comparison
// ============================================================================

/// Ordering between two values, if they are ordered relative to each other.
fn partial_cmp(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Float(_) | Value::Int(_), Value::Float(_) | Value::Int(_)) => {
            left.as_float()?.partial_cmp(&right.as_float()?)
        }
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Apply a comparison operator.
///
/// Equality is defined for every pair of values; ordering comparisons require
/// both operands to be numbers, strings, bytes or bools. Comparisons involving
/// `nan` are false.
pub fn compare(op: CompareOp, left: &Value, right: &Value) -> Result<Value, RuntimeError> {
    let result = match op {
        CompareOp::Eq => left == right,
        CompareOp::NotEq => left != right,
        _ => {
            let ordered = matches!(
                (left.kind(), right.kind()),
                (
                    ValueKind::Int | ValueKind::Float,
                    ValueKind::Int | ValueKind::Float
                ) | (ValueKind::Str, ValueKind::Str)
                    | (ValueKind::Bytes, ValueKind::Bytes)
                    | (ValueKind::Bool, ValueKind::Bool)
            );
            if !ordered {
                return Err(RuntimeError::TypeMismatch {
                    op: op.symbol(),
                    left: left.kind(),
                    right: right.kind(),
                });
            }
            match partial_cmp(left, right) {
                None => false,
                Some(ordering) => match op {
                    CompareOp::Lt => ordering == Ordering::Less,
                    CompareOp::LtEq => ordering != Ordering::Greater,
                    CompareOp::Gt => ordering == Ordering::Greater,
                    CompareOp::GtEq => ordering != Ordering::Less,
                    CompareOp::Eq | CompareOp::NotEq => unreachable!("handled above"),
                },
            }
        }
    };
    Ok(Value::Bool(result))
}

// ============================================================================
// Unary operators
// ============================================================================

pub fn unary(op: UnaryOp, operand: &Value) -> Result<Value, RuntimeError> {
    let mismatch = || RuntimeError::UnaryTypeMismatch {
        op: op.symbol(),
        operand: operand.kind(),
    };
    match op {
        UnaryOp::Not => Ok(Value::Bool(!operand.is_truthy())),
        UnaryOp::Neg => match operand {
            Value::Int(i) => Ok(Value::Int(i.wrapping_neg())),
            Value::Float(f) => Ok(Value::Float(-f)),
            _ => Err(mismatch()),
        },
        UnaryOp::Plus => match operand {
            Value::Int(_) | Value::Float(_) => Ok(operand.clone()),
            _ => Err(mismatch()),
        },
        UnaryOp::BitNot => match operand {
            Value::Int(i) => Ok(Value::Int(!i)),
            _ => Err(mismatch()),
        },
    }
}

// ============================================================================
// Containers
// ============================================================================

/// Membership test: element of a list, key of a map, substring of a string,
/// byte or subsequence of bytes.
pub fn contains(container: &Value, item: &Value) -> Result<bool, RuntimeError> {
    match (container, item) {
        (Value::List(items), _) => Ok(items.read().iter().any(|v| v == item)),
        (Value::Map(map), _) => {
            let key = MapKey::try_from(item)?;
            Ok(map.read().contains_key(&key))
        }
        (Value::Str(haystack), Value::Str(needle)) => Ok(haystack.contains(needle.as_str())),
        (Value::Bytes(haystack), Value::Int(byte)) => {
            Ok(u8::try_from(*byte).is_ok_and(|b| haystack.contains(&b)))
        }
        (Value::Bytes(haystack), Value::Bytes(needle)) => Ok(needle.is_empty()
            || haystack.windows(needle.len()).any(|window| window == &needle[..])),
        _ => Err(RuntimeError::TypeMismatch {
            op: "in",
            left: item.kind(),
            right: container.kind(),
        }),
    }
}

/// Resolve a possibly negative index against a sequence length.
fn normalize_index(index: i64, len: usize) -> Result<usize, RuntimeError> {
    let resolved = if index < 0 {
        index + len as i64
    } else {
        index
    };
    if resolved < 0 || resolved >= len as i64 {
        Err(RuntimeError::IndexOutOfBounds { index, len })
    } else {
        Ok(resolved as usize)
    }
}

fn index_operand(key: &Value) -> Result<i64, RuntimeError> {
    match key {
        Value::Int(i) => Ok(*i),
        Value::Float(f) if f.fract() == 0.0 => Ok(*f as i64),
        other => Err(RuntimeError::TypeMismatch {
            op: "[]",
            left: ValueKind::Int,
            right: other.kind(),
        }),
    }
}

/// Read `container[key]`.
///
/// Sequences accept negative indices counted from the end. A missing map key
/// yields `undefined`.
pub fn index(container: &Value, key: &Value) -> Result<Value, RuntimeError> {
    match container {
        Value::List(items) => {
            let items = items.read();
            let i = normalize_index(index_operand(key)?, items.len())?;
            Ok(items[i].clone())
        }
        Value::Map(map) => {
            let key = MapKey::try_from(key)?;
            Ok(map.read().get(&key).cloned().unwrap_or_default())
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let i = normalize_index(index_operand(key)?, chars.len())?;
            Ok(Value::Str(chars[i].into()))
        }
        Value::Bytes(b) => {
            let i = normalize_index(index_operand(key)?, b.len())?;
            Ok(Value::Int(b[i] as i64))
        }
        other => Err(RuntimeError::NotIndexable(other.kind())),
    }
}

/// Write `container[key] = value`. Lists must already contain the index;
/// maps insert or overwrite.
pub fn set_index(container: &Value, key: &Value, value: Value) -> Result<(), RuntimeError> {
    match container {
        Value::List(items) => {
            let mut items = items.write();
            let i = normalize_index(index_operand(key)?, items.len())?;
            items[i] = value;
            Ok(())
        }
        Value::Map(map) => {
            let key = MapKey::try_from(key)?;
            map.write().insert(key, value);
            Ok(())
        }
        other => Err(RuntimeError::NotIndexable(other.kind())),
    }
}

/// Read-modify-write of `container[key]`.
///
/// `f` runs without the container's lock, so it may read the container
/// itself. If another writer replaced the element in the meantime, `f` runs
/// again on the new element.
pub fn update_index(
    container: &Value,
    key: &Value,
    f: impl Fn(&Value) -> Result<Value, RuntimeError>,
) -> Result<Value, RuntimeError> {
    match container {
        Value::List(items) => {
            let index = index_operand(key)?;
            loop {
                let old = {
                    let current = items.read();
                    current[normalize_index(index, current.len())?].clone()
                };
                let new = f(&old)?;
                let mut current = items.write();
                let i = normalize_index(index, current.len())?;
                if current[i].is_same(&old) {
                    current[i] = new.clone();
                    return Ok(new);
                }
            }
        }
        Value::Map(map) => {
            let key = MapKey::try_from(key)?;
            loop {
                let old = map.read().get(&key).cloned().unwrap_or_default();
                let new = f(&old)?;
                let mut current = map.write();
                let unchanged = current
                    .get(&key)
                    .map_or(old.is_undefined(), |value| value.is_same(&old));
                if unchanged {
                    current.insert(key, new.clone());
                    return Ok(new);
                }
            }
        }
        other => Err(RuntimeError::NotIndexable(other.kind())),
    }
}

// ============================================================================
// Casts
// ============================================================================

/// Convert a value to the given kind.
///
/// Supported targets are `int`, `float`, `string`, `bytes` and `bool`;
/// casting to the value's own kind is the identity.
pub fn cast(value: &Value, to: ValueKind) -> Result<Value, RuntimeError> {
    let from = value.kind();
    if from == to {
        return Ok(value.clone());
    }
    let fail = |message: &str| RuntimeError::Cast {
        from,
        to,
        message: message.into(),
    };
    match (value, to) {
        (_, ValueKind::Bool) => Ok(Value::Bool(value.is_truthy())),
        (_, ValueKind::Str) => Ok(Value::Str(match value {
            Value::Bytes(b) => String::from_utf8_lossy(b).as_ref().into(),
            other => other.to_string().into(),
        })),
        (Value::Float(f), ValueKind::Int) => {
            if f.is_finite() {
                // Saturating truncation toward zero.
                Ok(Value::Int(*f as i64))
            } else {
                Err(fail("value is not finite"))
            }
        }
        (Value::Bool(b), ValueKind::Int) => Ok(Value::Int(*b as i64)),
        (Value::Str(s), ValueKind::Int) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|e| fail(&e.to_string())),
        (Value::Int(i), ValueKind::Float) => Ok(Value::Float(*i as f64)),
        (Value::Bool(b), ValueKind::Float) => Ok(Value::Float(if *b { 1.0 } else { 0.0 })),
        (Value::Str(s), ValueKind::Float) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|e| fail(&e.to_string())),
        (Value::Str(s), ValueKind::Bytes) => Ok(Value::Bytes(Arc::from(s.as_bytes()))),
        (Value::List(items), ValueKind::Bytes) => {
            let items = items.read();
            let mut out = Vec::with_capacity(items.len());
            for item in items.iter() {
                match item {
                    Value::Int(i) => out.push(u8::try_from(*i).map_err(|_| fail("byte out of range"))?),
                    _ => return Err(fail("list elements must be ints")),
                }
            }
            Ok(Value::Bytes(Arc::from(out)))
        }
        (Value::Bytes(b), ValueKind::List) => Ok(Value::list(
            b.iter().map(|byte| Value::Int(*byte as i64)).collect(),
        )),
        (Value::Str(s), ValueKind::List) => Ok(Value::list(
            s.chars().map(|c| Value::Str(c.into())).collect(),
        )),
        _ => Err(fail("unsupported conversion")),
    }
}
