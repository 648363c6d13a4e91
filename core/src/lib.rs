//! Kelp core: a bytecode virtual machine for a small dynamic language, with
//! closures, try/catch, deferred blocks, async tasks and an interactive
//! debugger.
//!
//! Code is produced by a front end (or by [`vm::Assembler`]) as a
//! [`vm::Program`] and run with [`vm::VM::execute_code`].

pub mod api;
pub mod debugger;
pub mod errors;
pub mod scope;
pub mod stdlib;
pub mod values;
pub mod vm;

pub use api::{CancelToken, DebuggerOptions, ExecutionContext, VmOptions};
pub use debugger::{DebugError, DebugEvent, Debugger, ExpressionCompiler, StopReason};
pub use errors::{ExecutionError, ExecutionErrorKind, RuntimeError};
pub use values::{Value, ValueKind};
pub use vm::{Assembler, CodeBlock, OpCode, Program, VM};
