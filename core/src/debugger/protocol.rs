//! Serializable request results and events, shaped after the Debug Adapter
//! Protocol so a thin transport can forward them to an editor unchanged.

use serde::{Deserialize, Serialize};

/// A task that currently has frames on its stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    /// Frame handle, valid until the stopped task resumes.
    pub id: u64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeInfo {
    pub name: String,
    pub variables_reference: u64,
    pub expensive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub name: String,
    /// Display form of the value (strings quoted).
    pub value: String,
    #[serde(rename = "type")]
    pub type_name: String,
    /// Handle for the value's children, `0` when it has none.
    pub variables_reference: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointInfo {
    pub id: u64,
    pub verified: bool,
    pub file: String,
    pub line: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopReason {
    Entry,
    Step,
    Breakpoint,
    Pause,
    Exception,
    /// The main program ended while a step was pending. Reported without
    /// suspending anything.
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoppedEvent {
    pub reason: StopReason,
    pub thread_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Error text for exception stops.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub hit_breakpoint_ids: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "body", rename_all = "camelCase")]
pub enum DebugEvent {
    Stopped(StoppedEvent),
    #[serde(rename_all = "camelCase")]
    Continued { thread_id: u64 },
    Output { category: String, output: String },
    #[serde(rename_all = "camelCase")]
    ThreadStarted { thread_id: u64 },
    #[serde(rename_all = "camelCase")]
    ThreadExited { thread_id: u64 },
    /// The main program finished; `error` holds its uncaught error, if any.
    Terminated {
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}
