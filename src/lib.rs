//! Kelp - an embeddable bytecode virtual machine with an interactive debugger
//!
//! # Overview
//!
//! Kelp executes code streams produced by a front end (or by the
//! [`Assembler`]) for a small dynamic language: closures over shared scopes,
//! try/catch, deferred blocks with recovery, and tasks started with
//! `AsyncCall` that run on their own threads. A [`Debugger`] can attach to a
//! running [`VM`] to set breakpoints, step, and inspect frames.
//!
//! # Quick Start
//!
//! ```
//! use kelp::{Assembler, ExecutionContext, Value, VM};
//! use kelp::values::BinaryOp;
//!
//! let mut asm = Assembler::new(Some("main.kelp"));
//! asm.line(1).push(20).store("a");
//! asm.line(2).load("a").push(22).binary(BinaryOp::Add).store("b");
//!
//! let vm = VM::default();
//! vm.execute_code(&ExecutionContext::new(), "", &asm.finish()).unwrap();
//! assert_eq!(vm.get_global("b"), Some(Value::Int(42)));
//! ```
//!
//! # Host Functions
//!
//! ```
//! use kelp::{ExecutionContext, Value, VM};
//!
//! let vm = VM::default();
//! vm.register_fn("add", |a: i64, b: i64| Ok(a + b));
//! let add = vm.get_global("add").unwrap();
//! let sum = vm
//!     .call_function(&ExecutionContext::new(), &add, vec![Value::Int(1), Value::Int(2)])
//!     .unwrap();
//! assert_eq!(sum, Value::Int(3));
//! ```

pub use kelp_core::{api, debugger, errors, scope, stdlib, values, vm};

pub use kelp_core::{
    Assembler, CancelToken, CodeBlock, DebugError, DebugEvent, Debugger, DebuggerOptions,
    ExecutionContext, ExecutionError, ExecutionErrorKind, ExpressionCompiler, OpCode, Program,
    RuntimeError, StopReason, VM, Value, ValueKind, VmOptions,
};

pub mod error_renderer;

pub use error_renderer::{
    render_error, render_error_to, render_error_to_string, render_error_to_string_no_color,
};
