use thiserror::Error;

use crate::errors::ExecutionError;

/// Failure of a debugger command.
#[derive(Debug, Clone, Error)]
pub enum DebugError {
    /// The command needs a stopped task and none is stopped.
    #[error("no task is stopped")]
    NotPaused,

    /// A frame or variables reference is unknown or from an earlier stop.
    #[error("invalid or expired reference {0}")]
    InvalidHandle(u64),

    #[error("no code at {file}:{line}")]
    NoCodeAtLine { file: String, line: u32 },

    /// An expression, condition or hit condition did not compile.
    #[error("cannot compile `{expr}`: {message}")]
    Compile { expr: String, message: String },

    #[error("evaluation failed: {0}")]
    Evaluation(ExecutionError),

    #[error("debugger is detached")]
    Detached,

    #[error("unknown thread {0}")]
    UnknownThread(u64),
}
