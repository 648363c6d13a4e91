//! The observer half of a debugger: runs on the executing threads, decides
//! when to stop, and parks the stopped thread until a resume command.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender};
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::api::DebuggerOptions;
use crate::debugger::ExpressionCompiler;
use crate::debugger::breakpoint::BreakpointSet;
use crate::debugger::handles::HandleTable;
use crate::debugger::protocol::{DebugEvent, StopReason, StoppedEvent};
use crate::debugger::step::{ResumeCommand, StepIntent};
use crate::errors::{ExecutionError, ExecutionErrorKind};
use crate::scope::Scope;
use crate::values::Value;
use crate::vm::{CodeBlock, ExecutionObserver, FrameTrace, InstructionEvent, TaskInfo, VM};

/// The task a debugger is stopped in.
pub(crate) struct Paused {
    pub(crate) task: Arc<TaskInfo>,
    pub(crate) frame: Arc<FrameTrace>,
}

/// What a variables reference points at.
#[derive(Clone)]
pub(crate) enum VarRef {
    /// A scope and its ancestors, excluding the outermost one.
    Locals(Arc<Scope>),
    /// A single scope.
    Scope(Arc<Scope>),
    Globals,
    Value(Value),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum RefKey {
    Locals(u64),
    Scope(u64),
    Globals,
    /// Address of a container's shared storage.
    Value(usize),
}

struct Watch {
    id: u64,
    expr: String,
    /// Last value seen per observed frame.
    baselines: HashMap<u64, Value>,
}

/// A task's observed frames, outermost first.
pub(crate) struct TaskStack {
    pub(crate) task: Arc<TaskInfo>,
    pub(crate) frames: Vec<Arc<FrameTrace>>,
}

pub(crate) struct DebuggerInner {
    options: DebuggerOptions,
    compiler: Arc<dyn ExpressionCompiler>,
    pub(crate) breakpoints: RwLock<BreakpointSet>,
    /// Compiled conditions and watches by expression and symbol table.
    compiled: Mutex<HashMap<(String, u64), Option<Arc<CodeBlock>>>>,
    steps: Mutex<HashMap<u64, StepIntent>>,
    pub(crate) stacks: Mutex<BTreeMap<u64, TaskStack>>,
    watches: Mutex<Vec<Watch>>,
    next_watch: AtomicU64,
    pause_requested: AtomicBool,
    entry_pending: AtomicBool,
    detached: AtomicBool,
    /// Serializes stops: one task is stopped at a time.
    stop_turn: Mutex<()>,
    pub(crate) paused: Mutex<Option<Paused>>,
    resume_tx: Sender<ResumeCommand>,
    resume_rx: Receiver<ResumeCommand>,
    events_tx: Sender<DebugEvent>,
    pub(crate) events_rx: Receiver<DebugEvent>,
    pub(crate) frames: Mutex<HandleTable<u64, Arc<FrameTrace>>>,
    pub(crate) refs: Mutex<HandleTable<RefKey, VarRef>>,
}

impl DebuggerInner {
    pub(crate) fn new(options: DebuggerOptions, compiler: Arc<dyn ExpressionCompiler>) -> Self {
        // One slot: exactly one command is sent per stop, and it must not
        // block the controller if the stopped thread is not receiving yet.
        let (resume_tx, resume_rx) = crossbeam_channel::bounded(1);
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        DebuggerInner {
            entry_pending: AtomicBool::new(options.stop_on_entry),
            options,
            compiler,
            breakpoints: RwLock::new(BreakpointSet::new()),
            compiled: Mutex::new(HashMap::new()),
            steps: Mutex::new(HashMap::new()),
            stacks: Mutex::new(BTreeMap::new()),
            watches: Mutex::new(Vec::new()),
            next_watch: AtomicU64::new(1),
            pause_requested: AtomicBool::new(false),
            detached: AtomicBool::new(false),
            stop_turn: Mutex::new(()),
            paused: Mutex::new(None),
            resume_tx,
            resume_rx,
            events_tx,
            events_rx,
            frames: Mutex::new(HandleTable::new()),
            refs: Mutex::new(HandleTable::new()),
        }
    }

    pub(crate) fn compiler(&self) -> &Arc<dyn ExpressionCompiler> {
        &self.compiler
    }

    fn emit(&self, event: DebugEvent) {
        // The receiver lives as long as `self`.
        let _ = self.events_tx.send(event);
    }

    pub(crate) fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    // ========================================================================
    // Controller side
    // ========================================================================

    /// Hand `command` to the stopped task.
    pub(crate) fn resume(&self, command: ResumeCommand) -> bool {
        let mut paused = self.paused.lock();
        if paused.take().is_none() {
            return false;
        }
        self.resume_tx.try_send(command).is_ok()
    }

    pub(crate) fn request_pause(&self) {
        self.pause_requested.store(true, Ordering::Release);
    }

    pub(crate) fn add_watch(&self, expr: &str) -> u64 {
        let id = self.next_watch.fetch_add(1, Ordering::Relaxed);
        self.watches.lock().push(Watch {
            id,
            expr: expr.to_string(),
            baselines: HashMap::new(),
        });
        id
    }

    pub(crate) fn remove_watch(&self, id: u64) -> bool {
        let mut watches = self.watches.lock();
        let before = watches.len();
        watches.retain(|watch| watch.id != id);
        watches.len() != before
    }

    pub(crate) fn detach(&self) {
        self.detached.store(true, Ordering::Release);
        self.pause_requested.store(false, Ordering::Release);
        self.steps.lock().clear();
        self.resume(ResumeCommand::Continue);
    }

    // ========================================================================
    // Executing side
    // ========================================================================

    /// Park the calling thread until the controller resumes it.
    fn stop(
        &self,
        frame: &Arc<FrameTrace>,
        reason: StopReason,
        description: Option<String>,
        text: Option<String>,
        hit_breakpoint_ids: Vec<u64>,
    ) {
        let _turn = self.stop_turn.lock();
        let task = frame.task.clone();
        {
            let mut paused = self.paused.lock();
            if self.is_detached() {
                return;
            }
            *paused = Some(Paused {
                task: task.clone(),
                frame: frame.clone(),
            });
        }
        self.pause_requested.store(false, Ordering::Release);
        self.steps.lock().remove(&task.id);

        debug!(task = task.id, ?reason, line = frame.line(), "debugger stopped");
        self.emit(DebugEvent::Stopped(StoppedEvent {
            reason,
            thread_id: task.id,
            description,
            text,
            hit_breakpoint_ids,
        }));

        let command = self.wait_for_resume();
        self.frames.lock().invalidate();
        self.refs.lock().invalidate();
        if let Some(intent) = StepIntent::new(command, frame) {
            debug!(task = task.id, ?intent, "stepping");
            self.steps.lock().insert(task.id, intent);
        }
        self.emit(DebugEvent::Continued { thread_id: task.id });
    }

    fn wait_for_resume(&self) -> ResumeCommand {
        let received = match self.options.resume_timeout {
            Some(timeout) => self.resume_rx.recv_timeout(timeout).ok(),
            None => self.resume_rx.recv().ok(),
        };
        if let Some(command) = received {
            return command;
        }
        // Timed out. Unless a command raced in, resume as if continued.
        if self.paused.lock().take().is_some() {
            warn!("no resume command before timeout, continuing");
            return ResumeCommand::Continue;
        }
        self.resume_rx.recv().unwrap_or(ResumeCommand::Continue)
    }

    fn load(&self, block: &Arc<CodeBlock>) {
        if self.breakpoints.read().contains_block(&block.id) {
            return;
        }
        self.breakpoints.write().load(block);
    }

    /// Compile `expr` for `frame`'s scope, caching by symbol table.
    fn compiled(&self, expr: &str, frame: &FrameTrace) -> Option<Arc<CodeBlock>> {
        let scope = frame.scope();
        let key = (expr.to_string(), scope.table().id());
        if let Some(cached) = self.compiled.lock().get(&key) {
            return cached.clone();
        }
        let block = match self.compiler.compile(expr, scope.table()) {
            Ok(block) => Some(block),
            Err(message) => {
                debug!(expr, error = %message, "cannot compile debugger expression");
                None
            }
        };
        self.compiled.lock().insert(key, block.clone());
        block
    }

    /// Evaluate `expr` in `frame`'s scope without observation. Failures are
    /// logged and yield `None`.
    fn evaluate_quietly(&self, vm: &VM, frame: &FrameTrace, expr: &str) -> Option<Value> {
        let block = self.compiled(expr, frame)?;
        match vm.evaluate_in_scope(&frame.task, block, frame.scope()) {
            Ok(value) => Some(value),
            Err(err) => {
                debug!(expr, error = %err, "debugger expression failed");
                None
            }
        }
    }

    /// Condition first, then the hit count; a failing condition is not met.
    fn breakpoint_fires(&self, vm: &VM, frame: &FrameTrace, id: u64) -> bool {
        let (condition, hit_condition) = match self.breakpoints.read().find(id) {
            Some(breakpoint) => (breakpoint.condition.clone(), breakpoint.hit_condition),
            None => return false,
        };
        if let Some(condition) = condition {
            let met = self
                .evaluate_quietly(vm, frame, &condition)
                .is_some_and(|value| value.is_truthy());
            if !met {
                return false;
            }
        }
        let hits = match self.breakpoints.write().find_mut(id) {
            Some(breakpoint) => {
                breakpoint.hits += 1;
                breakpoint.hits
            }
            None => return false,
        };
        hit_condition.is_none_or(|hit_condition| hit_condition.is_met(hits))
    }

    /// Description of the first watch whose value changed in `frame` since
    /// the frame's previous line.
    fn changed_watch(&self, vm: &VM, frame: &FrameTrace) -> Option<String> {
        let exprs: Vec<(u64, String)> = {
            let watches = self.watches.lock();
            if watches.is_empty() {
                return None;
            }
            watches
                .iter()
                .map(|watch| (watch.id, watch.expr.clone()))
                .collect()
        };
        let values: Vec<(u64, Value)> = exprs
            .iter()
            .filter_map(|(id, expr)| Some((*id, self.evaluate_quietly(vm, frame, expr)?)))
            .collect();

        let mut changed = None;
        let mut watches = self.watches.lock();
        for (id, value) in values {
            let Some(watch) = watches.iter_mut().find(|watch| watch.id == id) else {
                continue;
            };
            let previous = watch.baselines.insert(frame.id, value.clone());
            if let Some(old) = previous {
                if old != value && changed.is_none() {
                    changed = Some(format!(
                        "watch `{}` changed: {:?} -> {:?}",
                        watch.expr, old, value
                    ));
                }
            }
        }
        changed
    }

    fn in_try_region(&self, task: u64) -> bool {
        self.stacks
            .lock()
            .get(&task)
            .is_some_and(|stack| stack.frames.iter().any(|frame| frame.try_depth() > 0))
    }
}

impl ExecutionObserver for DebuggerInner {
    fn on_program(&self, task: &Arc<TaskInfo>, block: &Arc<CodeBlock>) {
        self.load(block);
        self.emit(DebugEvent::ThreadStarted { thread_id: task.id });
    }

    fn on_program_end(&self, task: &Arc<TaskInfo>, result: Result<(), &ExecutionError>) {
        self.stacks.lock().remove(&task.id);
        if self.steps.lock().remove(&task.id).is_some() {
            self.emit(DebugEvent::Stopped(StoppedEvent {
                reason: StopReason::Finished,
                thread_id: task.id,
                description: None,
                text: None,
                hit_breakpoint_ids: Vec::new(),
            }));
        }
        self.emit(DebugEvent::ThreadExited { thread_id: task.id });
        self.emit(DebugEvent::Terminated {
            error: result.err().map(ToString::to_string),
        });
    }

    fn on_task_start(&self, task: &Arc<TaskInfo>) {
        self.emit(DebugEvent::ThreadStarted { thread_id: task.id });
    }

    fn on_task_end(&self, task: &Arc<TaskInfo>, _result: Result<&Value, &ExecutionError>) {
        self.stacks.lock().remove(&task.id);
        self.steps.lock().remove(&task.id);
        self.emit(DebugEvent::ThreadExited { thread_id: task.id });
    }

    fn on_frame_enter(&self, frame: &Arc<FrameTrace>) {
        self.load(&frame.block);
        self.stacks
            .lock()
            .entry(frame.task.id)
            .or_insert_with(|| TaskStack {
                task: frame.task.clone(),
                frames: Vec::new(),
            })
            .frames
            .push(frame.clone());
    }

    fn on_frame_exit(&self, frame: &Arc<FrameTrace>) {
        if let Some(stack) = self.stacks.lock().get_mut(&frame.task.id) {
            if let Some(position) = stack.frames.iter().rposition(|f| f.id == frame.id) {
                stack.frames.remove(position);
            }
        }
        for watch in self.watches.lock().iter_mut() {
            watch.baselines.remove(&frame.id);
        }
    }

    fn on_instruction(&self, vm: &VM, frame: &Arc<FrameTrace>, event: InstructionEvent) {
        if self.is_detached() {
            return;
        }
        if self.entry_pending.load(Ordering::Acquire)
            && self.entry_pending.swap(false, Ordering::AcqRel)
        {
            self.stop(frame, StopReason::Entry, None, None, Vec::new());
            return;
        }

        let hit = self.breakpoints.read().matching(frame, event);
        if let Some(id) = hit {
            if self.breakpoint_fires(vm, frame, id) {
                self.stop(frame, StopReason::Breakpoint, None, None, vec![id]);
                return;
            }
        }

        let step = self.steps.lock().get(&frame.task.id).copied();
        if step.is_some_and(|intent| intent.is_satisfied(frame, event)) {
            self.stop(frame, StopReason::Step, None, None, Vec::new());
            return;
        }

        if self.pause_requested.load(Ordering::Acquire) {
            self.stop(frame, StopReason::Pause, None, None, Vec::new());
            return;
        }

        if event.line_changed {
            if let Some(description) = self.changed_watch(vm, frame) {
                self.stop(frame, StopReason::Breakpoint, Some(description), None, Vec::new());
            }
        }
    }

    fn on_error(&self, _vm: &VM, frame: &Arc<FrameTrace>, error: &ExecutionError) {
        if self.is_detached() || matches!(error.kind, ExecutionErrorKind::Cancelled) {
            return;
        }
        if error.is_catchable() && self.in_try_region(frame.task.id) {
            return;
        }
        self.stop(
            frame,
            StopReason::Exception,
            Some("Paused on exception".to_string()),
            Some(error.to_string()),
            Vec::new(),
        );
    }

    fn on_output(&self, _task: &Arc<TaskInfo>, text: &str) {
        self.emit(DebugEvent::Output {
            category: "stdout".to_string(),
            output: text.to_string(),
        });
    }
}
