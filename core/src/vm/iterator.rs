//! Iterators driven by `EnterFR` / `RangeNext` / `InNext` / `ExitFR`.
//!
//! An iterator snapshots its source when the loop starts, so mutating a list
//! or map inside the loop body does not change the sequence being walked.

use std::sync::Arc;

use crate::errors::RuntimeError;
use crate::values::{Value, value::sorted_entries};

pub(crate) enum ValueIterator {
    /// List elements, keyed by index.
    Items { items: Vec<Value>, pos: usize },
    /// Map entries in key order.
    Entries {
        entries: Vec<(Value, Value)>,
        pos: usize,
    },
    /// String characters, keyed by character index.
    Chars { chars: Vec<char>, pos: usize },
    /// Bytes as ints, keyed by index.
    Bytes { bytes: Arc<[u8]>, pos: usize },
    /// `0..end`, key and value both the counter.
    Count { next: i64, end: i64 },
}

impl ValueIterator {
    pub(crate) fn new(iterable: &Value) -> Result<Self, RuntimeError> {
        match iterable {
            Value::List(items) => Ok(ValueIterator::Items {
                items: items.read().clone(),
                pos: 0,
            }),
            Value::Map(map) => Ok(ValueIterator::Entries {
                entries: sorted_entries(&map.read())
                    .into_iter()
                    .map(|(k, v)| (k.to_value(), v))
                    .collect(),
                pos: 0,
            }),
            Value::Str(s) => Ok(ValueIterator::Chars {
                chars: s.chars().collect(),
                pos: 0,
            }),
            Value::Bytes(bytes) => Ok(ValueIterator::Bytes {
                bytes: bytes.clone(),
                pos: 0,
            }),
            Value::Int(n) => Ok(ValueIterator::Count { next: 0, end: *n }),
            other => Err(RuntimeError::NotIterable(other.kind())),
        }
    }

    /// Whether a single-variable `in` loop binds the key (maps) rather than
    /// the element.
    pub(crate) fn yields_keys(&self) -> bool {
        matches!(self, ValueIterator::Entries { .. })
    }

    /// Advance, returning `(key, value)`.
    pub(crate) fn next_pair(&mut self) -> Option<(Value, Value)> {
        match self {
            ValueIterator::Items { items, pos } => {
                let item = items.get(*pos)?.clone();
                let key = Value::from(*pos);
                *pos += 1;
                Some((key, item))
            }
            ValueIterator::Entries { entries, pos } => {
                let entry = entries.get(*pos)?.clone();
                *pos += 1;
                Some(entry)
            }
            ValueIterator::Chars { chars, pos } => {
                let c = *chars.get(*pos)?;
                let key = Value::from(*pos);
                *pos += 1;
                Some((key, Value::Str(c.into())))
            }
            ValueIterator::Bytes { bytes, pos } => {
                let b = *bytes.get(*pos)?;
                let key = Value::from(*pos);
                *pos += 1;
                Some((key, Value::Int(b as i64)))
            }
            ValueIterator::Count { next, end } => {
                if *next >= *end {
                    return None;
                }
                let i = *next;
                *next += 1;
                Some((Value::Int(i), Value::Int(i)))
            }
        }
    }
}
