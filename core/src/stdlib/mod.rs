//! Kelp Standard Library
//!
//! Builtin functions registered as VM globals when
//! [`VmOptions::register_stdlib`](crate::api::VmOptions) is set:
//! - `len`, `append`, `range`, `keys`: collection helpers
//! - `typeof`, `str`: introspection and conversion
//! - `println`: output, mirrored to the debugger's output events
//! - `waitAllAsyncCallFinish`: joins every task started by `AsyncCall`

use crate::vm::VM;

pub mod builtins;

/// Register all builtins on `vm`.
///
/// Hosts that want a different set can construct the VM with
/// `register_stdlib: false` and register functions individually with
/// [`VM::register_fn`] or [`VM::import_global`].
pub fn register_stdlib(vm: &VM) {
    builtins::register(vm);
}
