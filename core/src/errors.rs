//! Runtime error taxonomy.
//!
//! Errors raised while executing a code stream fall into four groups:
//!
//! - **Runtime errors**: language-level panics and invalid operations (type
//!   mismatch, out-of-range index, arity mismatch, calling a non-function).
//!   These can be intercepted by a `CatchError` region or by `Recover` inside a
//!   deferred block.
//!
//! - **Resource exceeded errors**: fatal resource limit violations (call depth).
//!   They unwind through every catch region so that runaway recursion cannot be
//!   hidden by user code.
//!
//! - **Bug errors**: malformed code streams handed over by the compiler (empty
//!   code, jump targets out of range, a `break` escaping its function). These
//!   are never catchable.
//!
//! - **Cancellation**: the execution context's token was cancelled.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::values::{Value, ValueKind};
use crate::vm::SourceSpan;

/// Errors that a `catch` region or `Recover` can intercept.
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    /// Raised by the `Panic` opcode with an arbitrary value.
    #[error("{0}")]
    Panic(Value),

    #[error("unsupported operand types for {op}: {left} and {right}")]
    TypeMismatch {
        op: &'static str,
        left: ValueKind,
        right: ValueKind,
    },

    #[error("unsupported operand type for {op}: {operand}")]
    UnaryTypeMismatch { op: &'static str, operand: ValueKind },

    #[error("division by zero")]
    DivisionByZero,

    #[error("index {index} out of bounds (length: {len})")]
    IndexOutOfBounds { index: i64, len: usize },

    #[error("assignment mismatch: {lefts} variables but {rights} values")]
    AssignMismatch { lefts: usize, rights: usize },

    #[error("{name}: expected {expected} arguments, got {got}")]
    ArgumentCount {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("{name}: argument {index} should be {expected}, got {got}")]
    ArgumentType {
        name: String,
        index: usize,
        expected: ValueKind,
        got: ValueKind,
    },

    #[error("cannot call a value of type {0}")]
    NotCallable(ValueKind),

    #[error("cannot iterate over a value of type {0}")]
    NotIterable(ValueKind),

    #[error("a value of type {0} cannot be used as a map key")]
    Unhashable(ValueKind),

    #[error("cannot index a value of type {0}")]
    NotIndexable(ValueKind),

    #[error("cannot assign to a temporary value")]
    NotAssignable,

    #[error("cannot convert {from} to {to}: {message}")]
    Cast {
        from: ValueKind,
        to: ValueKind,
        message: String,
    },

    #[error("{op}: result would exceed {max} bytes")]
    TooLarge { op: &'static str, max: usize },

    #[error("{name}: {message}")]
    Native { name: String, message: String },
}

impl RuntimeError {
    /// Build a host-function error.
    pub fn native(name: impl Into<String>, message: impl fmt::Display) -> Self {
        RuntimeError::Native {
            name: name.into(),
            message: message.to_string(),
        }
    }

    /// The value a `catch` region binds for this error.
    ///
    /// Panics carry their own value; every other error binds its message.
    pub fn to_value(&self) -> Value {
        match self {
            RuntimeError::Panic(value) => value.clone(),
            other => Value::from(other.to_string()),
        }
    }
}

/// Resource limits that terminate execution regardless of catch regions.
#[derive(Debug, Clone, Error)]
pub enum ResourceExceededError {
    #[error("call stack overflow: depth {depth} exceeds maximum of {max_depth}")]
    StackOverflow { depth: usize, max_depth: usize },

    #[error("operand stack overflow: more than {max_size} values")]
    OperandStackOverflow { max_size: usize },
}

/// Violations of the contract between the compiler and the interpreter.
#[derive(Debug, Clone, Error)]
pub enum BugError {
    #[error("empty code stream")]
    EmptyCode,

    #[error("jump target {target} out of range (code length {len})")]
    JumpOutOfRange { target: usize, len: usize },

    #[error("{op} escapes its function: unwinding {requested} scopes with {available} open")]
    EscapingJump {
        op: &'static str,
        requested: usize,
        available: usize,
    },

    #[error("operand stack underflow at {op}")]
    StackUnderflow { op: &'static str },

    #[error("iterator stack underflow at {op}")]
    IteratorUnderflow { op: &'static str },

    #[error("scope underflow at ScopeEnd")]
    ScopeUnderflow,

    #[error("StopCatchError without a matching CatchError")]
    TryUnderflow,

    #[error("halt instruction reached")]
    Halt,
}

#[derive(Debug, Clone, Error)]
pub enum ExecutionErrorKind {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    ResourceExceeded(#[from] ResourceExceededError),

    #[error("BUG: {0}")]
    Bug(#[from] BugError),

    #[error("execution cancelled")]
    Cancelled,
}

/// Source position an error is attributed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePosition {
    pub file: Option<Arc<str>>,
    pub span: SourceSpan,
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let file = self.file.as_deref().unwrap_or("<script>");
        write!(f, "{}:{}:{}", file, self.span.start_line, self.span.start_column)
    }
}

/// An error that terminated (or is unwinding) an execution.
#[derive(Debug, Clone)]
pub struct ExecutionError {
    pub kind: ExecutionErrorKind,
    /// Position of the instruction that raised the error.
    pub position: Option<SourcePosition>,
    /// Raw source text of the program, attached at the top-level entry point.
    pub source: Option<Arc<str>>,
    /// Set once an observer (the debugger) has been told about this error.
    pub(crate) observed: bool,
}

impl ExecutionError {
    pub fn new(kind: impl Into<ExecutionErrorKind>) -> Self {
        Self {
            kind: kind.into(),
            position: None,
            source: None,
            observed: false,
        }
    }

    pub fn cancelled() -> Self {
        Self::new(ExecutionErrorKind::Cancelled)
    }

    /// Whether a catch region or `Recover` may intercept this error.
    pub fn is_catchable(&self) -> bool {
        matches!(self.kind, ExecutionErrorKind::Runtime(_))
    }

    pub fn runtime(&self) -> Option<&RuntimeError> {
        match &self.kind {
            ExecutionErrorKind::Runtime(err) => Some(err),
            _ => None,
        }
    }

    /// The value bound by a catch region, or `None` for uncatchable errors.
    pub fn to_value(&self) -> Option<Value> {
        self.runtime().map(RuntimeError::to_value)
    }

    pub(crate) fn at(mut self, position: SourcePosition) -> Self {
        if self.position.is_none() {
            self.position = Some(position);
        }
        self
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(position) = &self.position {
            write!(f, " at {}", position)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExecutionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

impl From<ExecutionErrorKind> for ExecutionError {
    fn from(kind: ExecutionErrorKind) -> Self {
        ExecutionError::new(kind)
    }
}

impl From<RuntimeError> for ExecutionError {
    fn from(err: RuntimeError) -> Self {
        ExecutionError::new(err)
    }
}

impl From<ResourceExceededError> for ExecutionError {
    fn from(err: ResourceExceededError) -> Self {
        ExecutionError::new(err)
    }
}

impl From<BugError> for ExecutionError {
    fn from(err: BugError) -> Self {
        ExecutionError::new(err)
    }
}
