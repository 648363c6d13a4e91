//! Interactive debugging of a running [`VM`].
//!
//! A [`Debugger`] installs itself as the VM's execution observer. Tasks that
//! reach a breakpoint, finish a step, hit an uncaught error or see a pause
//! request are suspended on their own thread and reported through
//! [`DebugEvent::Stopped`]. While a task is stopped, the controller inspects
//! it with [`Debugger::stack_trace`], [`Debugger::scopes`],
//! [`Debugger::variables`] and [`Debugger::evaluate`], then resumes it with
//! one of [`Debugger::continue_`], [`Debugger::step_next`],
//! [`Debugger::step_in`] or [`Debugger::step_out`].
//!
//! Expressions (breakpoint conditions, watches, evaluation requests) are
//! turned into code by an [`ExpressionCompiler`] supplied by the host, and run
//! against the stopped frame's scope without being observed themselves.
//!
//! Frame and variables references are only valid until the stopped task
//! resumes.

use std::sync::Arc;

use crossbeam_channel::Receiver;

use crate::api::DebuggerOptions;
use crate::scope::{Scope, SymbolTable};
use crate::values::Value;
use crate::vm::{CodeBlock, ExecutionObserver, VM};

mod breakpoint;
mod error;
mod handles;
pub mod protocol;
mod session;
mod step;

pub use breakpoint::HitCondition;
pub use error::DebugError;
pub use protocol::{
    BreakpointInfo, DebugEvent, ScopeInfo, StackFrame, StopReason, StoppedEvent, Thread, Variable,
};

use session::{DebuggerInner, RefKey, VarRef};
use step::ResumeCommand;

/// Turns debugger expressions into code.
///
/// The returned block must leave the expression's value with `Return`. Names
/// should be resolved through `table`, the symbol table of the scope the
/// expression will run in.
pub trait ExpressionCompiler: Send + Sync {
    fn compile(&self, expr: &str, table: &Arc<SymbolTable>) -> Result<Arc<CodeBlock>, String>;
}

impl<F> ExpressionCompiler for F
where
    F: Fn(&str, &Arc<SymbolTable>) -> Result<Arc<CodeBlock>, String> + Send + Sync,
{
    fn compile(&self, expr: &str, table: &Arc<SymbolTable>) -> Result<Arc<CodeBlock>, String> {
        self(expr, table)
    }
}

/// A debugging session attached to one [`VM`]. Dropping it detaches.
pub struct Debugger {
    vm: VM,
    inner: Arc<DebuggerInner>,
}

static_assertions::assert_impl_all!(Debugger: Send, Sync);

impl Debugger {
    /// Attach to `vm`, replacing any observer it had.
    pub fn attach(
        vm: &VM,
        options: DebuggerOptions,
        compiler: impl ExpressionCompiler + 'static,
    ) -> Self {
        let inner = Arc::new(DebuggerInner::new(options, Arc::new(compiler)));
        let observer: Arc<dyn ExecutionObserver> = inner.clone();
        vm.set_observer(Some(observer));
        Debugger {
            vm: vm.clone(),
            inner,
        }
    }

    pub fn vm(&self) -> &VM {
        &self.vm
    }

    /// Events of this session. Every call returns a handle to the same
    /// queue.
    pub fn events(&self) -> Receiver<DebugEvent> {
        self.inner.events_rx.clone()
    }

    fn ensure_attached(&self) -> Result<(), DebugError> {
        if self.inner.is_detached() {
            return Err(DebugError::Detached);
        }
        Ok(())
    }

    // ========================================================================
    // Breakpoints & watches
    // ========================================================================

    /// Set a breakpoint at `file:line`, replacing the one already there.
    ///
    /// `hit_condition` is one of `N`, `>N`, `>=N` or `%N`, counted over the
    /// hits where `condition` holds.
    pub fn set_breakpoint(
        &self,
        file: &str,
        line: u32,
        condition: Option<&str>,
        hit_condition: Option<&str>,
    ) -> Result<u64, DebugError> {
        self.ensure_attached()?;
        let hit_condition = hit_condition
            .map(|text| {
                text.parse::<HitCondition>()
                    .map_err(|message| DebugError::Compile {
                        expr: text.to_string(),
                        message,
                    })
            })
            .transpose()?;
        if let Some(condition) = condition {
            self.check_syntax(condition)?;
        }
        self.inner.breakpoints.write().set(
            file,
            line,
            condition.map(str::to_string),
            hit_condition,
        )
    }

    /// Remove the breakpoints of `file` except those on `lines`.
    pub fn clear_breakpoints_except(&self, file: &str, lines: &[u32]) {
        self.inner.breakpoints.write().clear_except(file, lines);
    }

    pub fn set_breakpoint_enabled(&self, id: u64, enabled: bool) -> Result<(), DebugError> {
        if self.inner.breakpoints.write().set_enabled(id, enabled) {
            Ok(())
        } else {
            Err(DebugError::InvalidHandle(id))
        }
    }

    pub fn breakpoints(&self) -> Vec<BreakpointInfo> {
        self.inner.breakpoints.read().infos()
    }

    /// Stop whenever the value of `expr` changes between two lines of a
    /// frame.
    pub fn add_watch(&self, expr: &str) -> Result<u64, DebugError> {
        self.ensure_attached()?;
        self.check_syntax(expr)?;
        Ok(self.inner.add_watch(expr))
    }

    pub fn remove_watch(&self, id: u64) -> bool {
        self.inner.remove_watch(id)
    }

    /// Compile against an empty table to reject malformed expressions early.
    fn check_syntax(&self, expr: &str) -> Result<(), DebugError> {
        self.inner
            .compiler()
            .compile(expr, &SymbolTable::new_root())
            .map(|_| ())
            .map_err(|message| DebugError::Compile {
                expr: expr.to_string(),
                message,
            })
    }

    // ========================================================================
    // Execution control
    // ========================================================================

    fn resume(&self, command: ResumeCommand) -> Result<(), DebugError> {
        self.ensure_attached()?;
        if self.inner.resume(command) {
            Ok(())
        } else {
            Err(DebugError::NotPaused)
        }
    }

    pub fn continue_(&self) -> Result<(), DebugError> {
        self.resume(ResumeCommand::Continue)
    }

    /// Resume until the stopped task reaches a new line in the same frame or
    /// a caller.
    pub fn step_next(&self) -> Result<(), DebugError> {
        self.resume(ResumeCommand::Next)
    }

    /// Resume until the stopped task reaches any new line.
    pub fn step_in(&self) -> Result<(), DebugError> {
        self.resume(ResumeCommand::StepIn)
    }

    /// Resume until the stopped frame returns.
    pub fn step_out(&self) -> Result<(), DebugError> {
        self.resume(ResumeCommand::StepOut)
    }

    /// Stop the next task that executes an instruction.
    pub fn pause(&self) -> Result<(), DebugError> {
        self.ensure_attached()?;
        self.inner.request_pause();
        Ok(())
    }

    /// Id of the stopped task, if any.
    pub fn stopped_thread(&self) -> Option<u64> {
        self.inner.paused.lock().as_ref().map(|paused| paused.task.id)
    }

    /// Stop observing the VM and release a stopped task.
    pub fn detach(&self) {
        if self.inner.is_detached() {
            return;
        }
        self.vm.set_observer(None);
        self.inner.detach();
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Tasks that currently have frames, by id.
    pub fn threads(&self) -> Vec<Thread> {
        self.inner
            .stacks
            .lock()
            .values()
            .filter(|stack| !stack.frames.is_empty())
            .map(|stack| Thread {
                id: stack.task.id,
                name: stack.task.name.to_string(),
            })
            .collect()
    }

    /// Frames of `thread_id`, innermost first. A `count` of `0` returns all
    /// frames from `start`.
    pub fn stack_trace(
        &self,
        thread_id: u64,
        start: usize,
        count: usize,
    ) -> Result<Vec<StackFrame>, DebugError> {
        let traces = {
            let stacks = self.inner.stacks.lock();
            let stack = stacks
                .get(&thread_id)
                .ok_or(DebugError::UnknownThread(thread_id))?;
            stack.frames.clone()
        };
        let count = if count == 0 { usize::MAX } else { count };
        let mut handles = self.inner.frames.lock();
        Ok(traces
            .into_iter()
            .rev()
            .skip(start)
            .take(count)
            .map(|trace| {
                let span = trace.span();
                let id = handles.intern(trace.id, || trace.clone());
                StackFrame {
                    id,
                    name: trace.name.to_string(),
                    file: trace.block.file.as_deref().map(str::to_string),
                    line: trace.line(),
                    column: span.start_column,
                }
            })
            .collect())
    }

    /// Variable groups visible from a frame: its locals (when it is inside a
    /// function or block), the program's outermost scope, and VM globals.
    pub fn scopes(&self, frame_id: u64) -> Result<Vec<ScopeInfo>, DebugError> {
        let frame = self
            .inner
            .frames
            .lock()
            .get(frame_id)
            .cloned()
            .ok_or(DebugError::InvalidHandle(frame_id))?;
        let scope = frame.scope();
        let mut root = scope.clone();
        while let Some(parent) = root.parent() {
            root = parent.clone();
        }

        let mut refs = self.inner.refs.lock();
        let mut scopes = Vec::with_capacity(3);
        if scope.parent().is_some() {
            let reference = refs.intern(RefKey::Locals(scope.id()), || VarRef::Locals(scope.clone()));
            scopes.push(ScopeInfo {
                name: "Locals".to_string(),
                variables_reference: reference,
                expensive: false,
            });
        }
        let reference = refs.intern(RefKey::Scope(root.id()), || VarRef::Scope(root.clone()));
        scopes.push(ScopeInfo {
            name: "Script".to_string(),
            variables_reference: reference,
            expensive: false,
        });
        scopes.push(ScopeInfo {
            name: "Globals".to_string(),
            variables_reference: refs.intern(RefKey::Globals, || VarRef::Globals),
            expensive: true,
        });
        Ok(scopes)
    }

    /// Children of a scope or container reference.
    pub fn variables(&self, reference: u64) -> Result<Vec<Variable>, DebugError> {
        let target = self
            .inner
            .refs
            .lock()
            .get(reference)
            .cloned()
            .ok_or(DebugError::InvalidHandle(reference))?;
        let entries: Vec<(String, Value)> = match target {
            VarRef::Locals(scope) => locals(&scope),
            VarRef::Scope(scope) => scope
                .variables()
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
            VarRef::Globals => self
                .vm
                .globals_snapshot()
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
            VarRef::Value(value) => value.children(),
        };
        Ok(entries
            .into_iter()
            .map(|(name, value)| self.variable(name, value))
            .collect())
    }

    /// Evaluate `expr` in a frame's scope, or in the stopped frame when
    /// `frame_id` is `None`.
    pub fn evaluate(&self, expr: &str, frame_id: Option<u64>) -> Result<Variable, DebugError> {
        self.ensure_attached()?;
        let frame = match frame_id {
            Some(id) => self
                .inner
                .frames
                .lock()
                .get(id)
                .cloned()
                .ok_or(DebugError::InvalidHandle(id))?,
            None => self
                .inner
                .paused
                .lock()
                .as_ref()
                .map(|paused| paused.frame.clone())
                .ok_or(DebugError::NotPaused)?,
        };
        let scope = frame.scope();
        let block = self
            .inner
            .compiler()
            .compile(expr, scope.table())
            .map_err(|message| DebugError::Compile {
                expr: expr.to_string(),
                message,
            })?;
        let value = self
            .vm
            .evaluate_in_scope(&frame.task, block, scope)
            .map_err(DebugError::Evaluation)?;
        Ok(self.variable(expr.to_string(), value))
    }

    fn variable(&self, name: String, value: Value) -> Variable {
        let variables_reference = match container_key(&value) {
            Some(key) => self
                .inner
                .refs
                .lock()
                .intern(RefKey::Value(key), || VarRef::Value(value.clone())),
            None => 0,
        };
        Variable {
            name,
            value: format!("{:?}", value),
            type_name: value.kind().name().to_string(),
            variables_reference,
        }
    }
}

impl Drop for Debugger {
    fn drop(&mut self) {
        self.detach();
    }
}

impl core::fmt::Debug for Debugger {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Debugger")
            .field("detached", &self.inner.is_detached())
            .field("stopped_thread", &self.stopped_thread())
            .finish()
    }
}

/// Variables of `scope` and its ancestors below the outermost scope, inner
/// declarations shadowing outer ones.
fn locals(scope: &Arc<Scope>) -> Vec<(String, Value)> {
    let mut seen = hashbrown::HashSet::new();
    let mut entries = Vec::new();
    let mut current = Some(scope);
    while let Some(scope) = current {
        if scope.parent().is_none() {
            break;
        }
        for (name, value) in scope.variables() {
            if seen.insert(name.clone()) {
                entries.push((name.to_string(), value));
            }
        }
        current = scope.parent();
    }
    entries
}

/// Identity of a container's storage, for stable child references.
fn container_key(value: &Value) -> Option<usize> {
    match value {
        Value::List(items) => Some(Arc::as_ptr(items) as *const () as usize),
        Value::Map(map) => Some(Arc::as_ptr(map) as *const () as usize),
        _ => None,
    }
}
