//! Function values: interpreted closures and host (native) functions.

use core::fmt;
use std::sync::Arc;

use ecow::EcoString;

use crate::errors::ExecutionError;
use crate::scope::{Scope, SymbolId, SymbolTable};
use crate::values::Value;
use crate::vm::{CodeBlock, NativeContext};

/// The compile-time half of a closure: code plus parameter layout.
///
/// A prototype is produced once by the compiler (or the assembler) and shared
/// by every closure created from it.
#[derive(Debug)]
pub struct FunctionProto {
    /// Display name, `"<anonymous>"` for unnamed literals.
    pub name: EcoString,
    /// Slot the function was declared under, if it was a named declaration.
    pub symbol: Option<SymbolId>,
    /// Parameter slots in declaration order, all declared in `table`.
    pub params: Vec<SymbolId>,
    /// When set, the last parameter collects all remaining arguments as a list.
    pub variadic: bool,
    pub block: Arc<CodeBlock>,
    /// Symbol table of the function body, a child of the defining table.
    pub table: Arc<SymbolTable>,
}

impl FunctionProto {
    pub fn uuid(&self) -> uuid::Uuid {
        self.block.id
    }
}

/// A closure: a prototype bound to the scope that was current when its
/// literal was evaluated.
///
/// The scope is captured by reference, so every closure created in the same
/// scope observes the same variables.
pub struct Function {
    pub proto: Arc<FunctionProto>,
    pub scope: Arc<Scope>,
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.proto.name)
            .field("uuid", &self.proto.block.id)
            .field("scope", &self.scope.id())
            .finish()
    }
}

/// Signature of a host function.
pub type NativeFn =
    dyn Fn(&NativeContext<'_>, &[Value]) -> Result<Value, ExecutionError> + Send + Sync;

/// A host function callable from scripts.
#[derive(Clone)]
pub struct NativeFunction {
    pub name: EcoString,
    pub func: Arc<NativeFn>,
}

impl NativeFunction {
    pub fn new<F>(name: impl Into<EcoString>, func: F) -> Self
    where
        F: Fn(&NativeContext<'_>, &[Value]) -> Result<Value, ExecutionError> + Send + Sync + 'static,
    {
        NativeFunction {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn call(&self, ctx: &NativeContext<'_>, args: &[Value]) -> Result<Value, ExecutionError> {
        (self.func)(ctx, args)
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFunction({})", self.name)
    }
}

/// Anything a `Call` opcode can invoke.
#[derive(Debug, Clone)]
pub enum Callable {
    Closure(Arc<Function>),
    Native(NativeFunction),
}

impl Callable {
    pub fn name(&self) -> &str {
        match self {
            Callable::Closure(function) => &function.proto.name,
            Callable::Native(native) => &native.name,
        }
    }

    /// Identity comparison: two callables are the same only if they share
    /// their allocation.
    pub fn same_as(&self, other: &Callable) -> bool {
        match (self, other) {
            (Callable::Closure(a), Callable::Closure(b)) => Arc::ptr_eq(a, b),
            (Callable::Native(a), Callable::Native(b)) => Arc::ptr_eq(&a.func, &b.func),
            _ => false,
        }
    }
}

impl From<Function> for Value {
    fn from(function: Function) -> Self {
        Value::Function(Callable::Closure(Arc::new(function)))
    }
}
