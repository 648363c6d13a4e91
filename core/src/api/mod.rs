//! Public configuration and execution context for the Kelp runtime.
//!
//! # Example
//!
//! ```ignore
//! use kelp_core::api::{ExecutionContext, VmOptions};
//! use kelp_core::vm::{Assembler, VM};
//!
//! let vm = VM::new(VmOptions::default());
//! let program = Assembler::new(Some("main.kelp")).finish();
//! vm.execute_code(&ExecutionContext::new(), "", &program)?;
//! ```

pub mod context;
pub mod options;

pub use context::{CancelToken, ExecutionContext};
pub use options::{DebuggerOptions, VmOptions};
