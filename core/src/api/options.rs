//! Configuration options for the Kelp virtual machine and debugger.

use std::time::Duration;

use serde::Deserialize;

/// Configuration options for a [`VM`](crate::vm::VM).
///
/// These options control resource limits and what the VM registers on
/// construction.
///
/// # Example
///
/// ```
/// use kelp_core::api::VmOptions;
///
/// let options = VmOptions {
///     max_depth: 200,
///     ..VmOptions::default()
/// };
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VmOptions {
    /// Maximum call depth (for recursion protection).
    ///
    /// Default: 1000
    pub max_depth: usize,

    /// Maximum number of entries on one frame's operand stack.
    ///
    /// Default: 4096
    pub max_stack_size: usize,

    /// Register the builtin functions (`len`, `range`, ...) as globals.
    ///
    /// Default: true
    pub register_stdlib: bool,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            max_depth: 1000,
            max_stack_size: 4096,
            register_stdlib: true,
        }
    }
}

/// Configuration options for a [`Debugger`](crate::debugger::Debugger).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DebuggerOptions {
    /// Stop before the first instruction of the first program executed.
    ///
    /// Default: false
    pub stop_on_entry: bool,

    /// How long a stopped task waits for a resume command before continuing
    /// on its own. `None` waits indefinitely.
    ///
    /// Default: None
    pub resume_timeout: Option<Duration>,
}
