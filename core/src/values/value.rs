//! The dynamically-typed runtime value.
//!
//! A [`Value`] is a closed sum over the kinds the interpreter understands.
//! Scalars (`Bool`, `Int`, `Float`, `Str`, `Bytes`) are immutable and cheap to
//! clone. Lists and maps are shared, mutable containers: cloning a `Value` that
//! holds a list clones the handle, so every holder observes writes made through
//! any other holder. Equality is structural for containers and numeric across
//! `Int`/`Float`.

use core::fmt;
use std::sync::Arc;

use ecow::EcoString;
use hashbrown::HashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::errors::RuntimeError;
use crate::values::function::{Callable, NativeFunction};

/// Shared handle to a list's storage.
pub type ListRef = Arc<RwLock<Vec<Value>>>;

/// Shared handle to a map's storage.
pub type MapRef = Arc<RwLock<HashMap<MapKey, Value>>>;

/// A runtime datum.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(EcoString),
    Bytes(Arc<[u8]>),
    List(ListRef),
    Map(MapRef),
    Function(Callable),
}

static_assertions::assert_impl_all!(Value: Send, Sync);

/// The type tag of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Undefined,
    Bool,
    Int,
    Float,
    #[serde(rename = "string")]
    Str,
    Bytes,
    List,
    Map,
    Function,
}

impl ValueKind {
    pub const fn name(self) -> &'static str {
        match self {
            ValueKind::Undefined => "undefined",
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Str => "string",
            ValueKind::Bytes => "bytes",
            ValueKind::List => "list",
            ValueKind::Map => "map",
            ValueKind::Function => "function",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A hashable projection of a scalar [`Value`], used as a map key.
///
/// Floats with an integral value are normalized to `Int` so that `m[1]` and
/// `m[1.0]` address the same entry, matching numeric equality on values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MapKey {
    Bool(bool),
    Int(i64),
    /// Bit pattern of a non-integral float.
    Float(u64),
    Str(EcoString),
    Bytes(Arc<[u8]>),
}

impl MapKey {
    pub fn to_value(&self) -> Value {
        match self {
            MapKey::Bool(b) => Value::Bool(*b),
            MapKey::Int(i) => Value::Int(*i),
            MapKey::Float(bits) => Value::Float(f64::from_bits(*bits)),
            MapKey::Str(s) => Value::Str(s.clone()),
            MapKey::Bytes(b) => Value::Bytes(b.clone()),
        }
    }
}

impl TryFrom<&Value> for MapKey {
    type Error = RuntimeError;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        match value {
            Value::Bool(b) => Ok(MapKey::Bool(*b)),
            Value::Int(i) => Ok(MapKey::Int(*i)),
            Value::Float(f) => {
                if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                    Ok(MapKey::Int(*f as i64))
                } else {
                    Ok(MapKey::Float(f.to_bits()))
                }
            }
            Value::Str(s) => Ok(MapKey::Str(s.clone())),
            Value::Bytes(b) => Ok(MapKey::Bytes(b.clone())),
            other => Err(RuntimeError::Unhashable(other.kind())),
        }
    }
}

impl Value {
    // ============================================================================
    // Construction
    // ============================================================================

    pub fn str(s: impl Into<EcoString>) -> Self {
        Value::Str(s.into())
    }

    pub fn bytes(b: impl Into<Arc<[u8]>>) -> Self {
        Value::Bytes(b.into())
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Arc::new(RwLock::new(items)))
    }

    /// Build a map from key/value pairs. Fails if a key is not hashable.
    pub fn map<I>(entries: I) -> Result<Self, RuntimeError>
    where
        I: IntoIterator<Item = (Value, Value)>,
    {
        let mut map = HashMap::new();
        for (key, value) in entries {
            map.insert(MapKey::try_from(&key)?, value);
        }
        Ok(Value::Map(Arc::new(RwLock::new(map))))
    }

    pub fn native(function: NativeFunction) -> Self {
        Value::Function(Callable::Native(function))
    }

    // ============================================================================
    // Inspection
    // ============================================================================

    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Undefined => ValueKind::Undefined,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Str(_) => ValueKind::Str,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::List(_) => ValueKind::List,
            Value::Map(_) => ValueKind::Map,
            Value::Function(_) => ValueKind::Function,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Identity that never looks inside containers: lists, maps and
    /// functions compare by pointer, scalars by value (floats bitwise).
    pub fn is_same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => Arc::ptr_eq(a, b) || a == b,
            (Value::List(a), Value::List(b)) => Arc::ptr_eq(a, b),
            (Value::Map(a), Value::Map(b)) => Arc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => a.same_as(b),
            _ => false,
        }
    }

    /// Truthiness used by conditional jumps and logical operators.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Bytes(b) => !b.is_empty(),
            Value::List(items) => !items.read().is_empty(),
            Value::Map(map) => !map.read().is_empty(),
            Value::Function(_) => true,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view with int-to-float promotion.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&ListRef> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&MapRef> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_callable(&self) -> Option<&Callable> {
        match self {
            Value::Function(callable) => Some(callable),
            _ => None,
        }
    }

    /// Snapshot of a list's elements.
    pub fn to_vec(&self) -> Option<Vec<Value>> {
        self.as_list().map(|items| items.read().clone())
    }

    /// Number of elements for sized values.
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::Str(s) => Some(s.chars().count()),
            Value::Bytes(b) => Some(b.len()),
            Value::List(items) => Some(items.read().len()),
            Value::Map(map) => Some(map.read().len()),
            _ => None,
        }
    }

    /// Whether the value is a container with child values worth expanding in
    /// an inspector.
    pub fn has_children(&self) -> bool {
        matches!(self, Value::List(_) | Value::Map(_))
    }

    /// Child values as `(label, value)` pairs, map entries sorted by key.
    pub fn children(&self) -> Vec<(String, Value)> {
        match self {
            Value::List(items) => items
                .read()
                .iter()
                .enumerate()
                .map(|(i, v)| (i.to_string(), v.clone()))
                .collect(),
            Value::Map(map) => sorted_entries(&map.read())
                .into_iter()
                .map(|(k, v)| (format!("{:?}", k.to_value()), v))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Map entries ordered by key, for deterministic display and iteration.
pub(crate) fn sorted_entries(map: &HashMap<MapKey, Value>) -> Vec<(MapKey, Value)> {
    let mut entries: Vec<_> = map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries
}

// ============================================================================
// Equality
// ============================================================================

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.read(), b.read());
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x == y)
            }
            (Value::Map(a), Value::Map(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.read(), b.read());
                a.len() == b.len()
                    && a.iter().all(|(k, v)| b.get(k).is_some_and(|other| v == other))
            }
            (Value::Function(a), Value::Function(b)) => a.same_as(b),
            _ => false,
        }
    }
}

// ============================================================================
// Conversions
// ============================================================================

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s.into())
    }
}

impl From<EcoString> for Value {
    fn from(s: EcoString) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::list(items)
    }
}

impl From<NativeFunction> for Value {
    fn from(function: NativeFunction) -> Self {
        Value::native(function)
    }
}

// ============================================================================
// Display
// ============================================================================

/// Format a float ensuring it always reads back as a float.
fn format_float(f: &mut fmt::Formatter<'_>, value: f64) -> fmt::Result {
    if value.is_nan() {
        write!(f, "nan")
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            write!(f, "inf")
        } else {
            write!(f, "-inf")
        }
    } else {
        let s = value.to_string();
        if s.contains('.') || s.contains('e') || s.contains('E') {
            write!(f, "{}", s)
        } else {
            write!(f, "{}.0", s)
        }
    }
}

fn format_bytes(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    write!(f, "b\"")?;
    for &b in bytes {
        match b {
            b'"' => write!(f, "\\\"")?,
            b'\\' => write!(f, "\\\\")?,
            0x20..=0x7e => write!(f, "{}", b as char)?,
            _ => write!(f, "\\x{:02x}", b)?,
        }
    }
    write!(f, "\"")
}

/// Writes `value` in literal form (strings quoted), as used inside containers
/// and by `Debug`.
fn write_repr(f: &mut fmt::Formatter<'_>, value: &Value) -> fmt::Result {
    match value {
        Value::Str(s) => write!(f, "{:?}", s.as_str()),
        other => write!(f, "{}", other),
    }
}

/// `Display` prints strings raw; containers print their elements in literal
/// form.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => format_float(f, *x),
            Value::Str(s) => write!(f, "{}", s),
            Value::Bytes(b) => format_bytes(f, b),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.read().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write_repr(f, item)?;
                }
                write!(f, "]")
            }
            Value::Map(map) => {
                write!(f, "{{")?;
                for (i, (key, value)) in sorted_entries(&map.read()).iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write_repr(f, &key.to_value())?;
                    write!(f, ": ")?;
                    write_repr(f, value)?;
                }
                write!(f, "}}")
            }
            Value::Function(callable) => write!(f, "<function {}>", callable.name()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_repr(f, self)
    }
}
