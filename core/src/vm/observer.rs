//! Hooks that let a debugger watch and suspend execution.
//!
//! When an observer is installed on a [`VM`], every frame publishes a
//! [`FrameTrace`]: a shared, read-mostly view of its position, scope and try
//! depth that another thread can inspect while the frame is suspended.
//! Frames running on behalf of the observer itself (condition and watch
//! evaluation) are not observed.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use ecow::EcoString;
use parking_lot::Mutex;

use crate::api::ExecutionContext;
use crate::errors::ExecutionError;
use crate::scope::Scope;
use crate::values::Value;
use crate::vm::{CodeBlock, SourceSpan, VM};

/// A task: the main program or one `AsyncCall`.
#[derive(Debug)]
pub struct TaskInfo {
    pub id: u64,
    pub name: EcoString,
    /// Started by `AsyncCall` or [`VM::spawn_async`].
    pub spawned: bool,
    pub(crate) ctx: ExecutionContext,
}

impl TaskInfo {
    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }
}

/// The observable state of one running frame.
#[derive(Debug)]
pub struct FrameTrace {
    pub id: u64,
    pub task: Arc<TaskInfo>,
    pub name: EcoString,
    pub block: Arc<CodeBlock>,
    /// Frames of this task below and including this one.
    pub depth: usize,
    ip: AtomicUsize,
    line: AtomicU32,
    try_depth: AtomicUsize,
    scope: Mutex<Arc<Scope>>,
}

impl FrameTrace {
    pub(crate) fn new(
        id: u64,
        task: Arc<TaskInfo>,
        name: EcoString,
        block: Arc<CodeBlock>,
        depth: usize,
        scope: Arc<Scope>,
    ) -> Self {
        FrameTrace {
            id,
            task,
            name,
            block,
            depth,
            ip: AtomicUsize::new(0),
            line: AtomicU32::new(0),
            try_depth: AtomicUsize::new(0),
            scope: Mutex::new(scope),
        }
    }

    /// Index of the instruction about to execute (or executing).
    pub fn ip(&self) -> usize {
        self.ip.load(Ordering::Acquire)
    }

    /// Source line of the current instruction, `0` before the first one.
    pub fn line(&self) -> u32 {
        self.line.load(Ordering::Acquire)
    }

    pub fn span(&self) -> SourceSpan {
        self.block
            .codes
            .get(self.ip())
            .map(|code| code.span)
            .unwrap_or_default()
    }

    pub fn scope(&self) -> Arc<Scope> {
        self.scope.lock().clone()
    }

    /// Number of try regions currently open in this frame.
    pub fn try_depth(&self) -> usize {
        self.try_depth.load(Ordering::Acquire)
    }

    pub(crate) fn set_position(&self, ip: usize, line: u32) {
        self.ip.store(ip, Ordering::Release);
        self.line.store(line, Ordering::Release);
    }

    pub(crate) fn set_scope(&self, scope: Arc<Scope>) {
        *self.scope.lock() = scope;
    }

    pub(crate) fn set_try_depth(&self, depth: usize) {
        self.try_depth.store(depth, Ordering::Release);
    }
}

/// What happened between the previous instruction of a frame and this one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstructionEvent {
    /// The source line differs from the previous instruction's line.
    pub line_changed: bool,
    /// The previous instruction transferred control here.
    pub jumped: bool,
}

/// Receives execution events from every observed frame of a [`VM`].
///
/// Hooks run on the executing thread. `on_instruction` and `on_error` may
/// block to suspend that thread.
pub trait ExecutionObserver: Send + Sync {
    /// A top-level program is about to run.
    fn on_program(&self, _task: &Arc<TaskInfo>, _block: &Arc<CodeBlock>) {}

    /// A top-level program finished.
    fn on_program_end(&self, _task: &Arc<TaskInfo>, _result: Result<(), &ExecutionError>) {}

    fn on_task_start(&self, _task: &Arc<TaskInfo>) {}

    fn on_task_end(&self, _task: &Arc<TaskInfo>, _result: Result<&Value, &ExecutionError>) {}

    fn on_frame_enter(&self, _frame: &Arc<FrameTrace>) {}

    fn on_frame_exit(&self, _frame: &Arc<FrameTrace>) {}

    /// Called before each instruction of an observed frame.
    fn on_instruction(&self, _vm: &VM, _frame: &Arc<FrameTrace>, _event: InstructionEvent) {}

    /// An error is leaving `frame` after its deferred blocks ran. Called once
    /// per error, for the innermost frame it escapes.
    fn on_error(&self, _vm: &VM, _frame: &Arc<FrameTrace>, _error: &ExecutionError) {}

    /// Output produced by `println`.
    fn on_output(&self, _task: &Arc<TaskInfo>, _text: &str) {}
}
