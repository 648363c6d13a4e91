//! One activation record and the opcode dispatch loop.
//!
//! A [`Frame`] owns an operand stack, an iterator stack, a try stack and the
//! list of deferred blocks for one run of a [`CodeBlock`]. Calls to
//! interpreted functions create a nested `Frame` on the Rust stack; errors
//! propagate back as `Err` values, running deferred blocks and consulting
//! try regions at each level.

use std::sync::Arc;

use ecow::EcoString;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::api::ExecutionContext;
use crate::errors::{
    BugError, ExecutionError, ExecutionErrorKind, RuntimeError, SourcePosition,
};
use crate::scope::{Scope, SymbolId};
use crate::values::{BinaryOp, Function, Value, ops};
use crate::vm::iterator::ValueIterator;
use crate::vm::observer::{ExecutionObserver, FrameTrace, InstructionEvent, TaskInfo};
use crate::vm::{CodeBlock, OpCode, SourceSpan, Stack, VM};

/// Where an operand stack entry was read from, for assignment opcodes.
#[derive(Clone)]
pub(crate) enum Binding {
    Slot { scope: Arc<Scope>, id: SymbolId },
    Global(EcoString),
    Index { container: Value, key: Value },
}

impl Binding {
    fn store(&self, vm: &VM, value: Value) -> Result<(), RuntimeError> {
        match self {
            Binding::Slot { scope, id } => {
                scope.set_local(*id, value);
                Ok(())
            }
            Binding::Global(name) => {
                vm.set_global(name, value);
                Ok(())
            }
            Binding::Index { container, key } => ops::set_index(container, key, value),
        }
    }

    /// Atomic read-modify-write of the bound location.
    fn update(
        &self,
        vm: &VM,
        f: impl Fn(&Value) -> Result<Value, RuntimeError>,
    ) -> Result<Value, RuntimeError> {
        match self {
            Binding::Slot { scope, id } => scope.update(*id, f),
            Binding::Global(name) => vm.update_global(name, f),
            Binding::Index { container, key } => ops::update_index(container, key, f),
        }
    }
}

#[derive(Clone)]
pub(crate) struct Operand {
    value: Value,
    binding: Option<Binding>,
}

impl Operand {
    fn new(value: Value) -> Self {
        Operand {
            value,
            binding: None,
        }
    }

    fn bound(value: Value, binding: Binding) -> Self {
        Operand {
            value,
            binding: Some(binding),
        }
    }
}

/// Frame state recorded by `CatchError`, restored when the region catches.
struct TryEntry {
    catch: usize,
    slot: Option<SymbolId>,
    scope: Arc<Scope>,
    scope_depth: usize,
    stack_len: usize,
    iter_len: usize,
}

struct Deferred {
    block: Arc<CodeBlock>,
    scope: Arc<Scope>,
}

#[derive(Default)]
struct RecoverState {
    error: Option<ExecutionError>,
    recovered: bool,
}

/// The error a deferred block may take with `Recover`. Shared with functions
/// the deferred block calls directly.
#[derive(Clone)]
pub(crate) struct RecoverSlot(Arc<Mutex<RecoverState>>);

impl RecoverSlot {
    fn new(error: Option<ExecutionError>) -> Self {
        RecoverSlot(Arc::new(Mutex::new(RecoverState {
            error,
            recovered: false,
        })))
    }

    fn take(&self) -> Option<ExecutionError> {
        let mut state = self.0.lock();
        let error = state.error.take();
        if error.is_some() {
            state.recovered = true;
        }
        error
    }

    fn recovered(&self) -> bool {
        self.0.lock().recovered
    }
}

/// Everything a frame needs from the task it runs on.
#[derive(Clone, Copy)]
pub(crate) struct Env<'a> {
    pub(crate) vm: &'a VM,
    pub(crate) task: &'a Arc<TaskInfo>,
    /// Depth of the frame that runs with this environment (1 for a task's
    /// first frame).
    pub(crate) depth: usize,
    /// Whether frames publish traces to the VM's observer.
    pub(crate) observe: bool,
}

impl<'a> Env<'a> {
    pub(crate) fn ctx(&self) -> &'a ExecutionContext {
        &self.task.ctx
    }

    /// Environment for a frame called from this one.
    pub(crate) fn callee(self) -> Self {
        Env {
            depth: self.depth + 1,
            ..self
        }
    }
}

enum Flow {
    Next,
    Jump(usize),
    Return(Value),
}

pub(crate) struct Frame<'a> {
    env: Env<'a>,
    name: EcoString,
    block: Arc<CodeBlock>,
    ip: usize,
    stack: Stack<Operand>,
    scope: Arc<Scope>,
    /// Scopes opened by `NewScope` and not yet closed.
    scope_depth: usize,
    iterators: Vec<ValueIterator>,
    tries: Vec<TryEntry>,
    defers: Vec<Deferred>,
    recover: Option<RecoverSlot>,
    in_defer: bool,
    observer: Option<Arc<dyn ExecutionObserver>>,
    trace: Option<Arc<FrameTrace>>,
    last_line: u32,
    jumped: bool,
}

impl<'a> Frame<'a> {
    pub(crate) fn new(
        env: Env<'a>,
        name: &EcoString,
        block: Arc<CodeBlock>,
        scope: Arc<Scope>,
    ) -> Self {
        let observer = if env.observe { env.vm.observer() } else { None };
        let trace = observer.as_ref().map(|_| {
            Arc::new(FrameTrace::new(
                env.vm.next_frame_id(),
                env.task.clone(),
                name.clone(),
                block.clone(),
                env.depth,
                scope.clone(),
            ))
        });
        Frame {
            env,
            name: name.clone(),
            block,
            ip: 0,
            stack: Stack::new(env.vm.options().max_stack_size),
            scope,
            scope_depth: 0,
            iterators: Vec::new(),
            tries: Vec::new(),
            defers: Vec::new(),
            recover: None,
            in_defer: false,
            observer,
            trace,
            last_line: 0,
            jumped: false,
        }
    }

    pub(crate) fn with_recover(mut self, recover: Option<RecoverSlot>, in_defer: bool) -> Self {
        self.recover = recover;
        self.in_defer = in_defer;
        self
    }

    /// Run the block to completion, then its deferred blocks.
    pub(crate) fn run(mut self) -> Result<Value, ExecutionError> {
        if let (Some(observer), Some(trace)) = (&self.observer, &self.trace) {
            observer.on_frame_enter(trace);
        }

        let result = self.execute();
        let mut result = self.run_defers(result);

        if let (Some(observer), Some(trace)) = (&self.observer, &self.trace) {
            if let Err(err) = &mut result {
                if !err.observed {
                    trace.set_try_depth(0);
                    observer.on_error(self.env.vm, trace, err);
                    err.observed = true;
                }
            }
            observer.on_frame_exit(trace);
        }
        result
    }

    fn execute(&mut self) -> Result<Value, ExecutionError> {
        if self.block.is_empty() {
            return Err(BugError::EmptyCode.into());
        }
        let block = self.block.clone();
        loop {
            let Some(code) = block.codes.get(self.ip) else {
                // Falling off the end returns `undefined`.
                return Ok(Value::Undefined);
            };

            let outcome = self
                .before_instruction(code.line())
                .and_then(|()| self.dispatch(&code.op))
                .and_then(|flow| self.advance(flow));

            match outcome {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => {}
                Err(err) => {
                    let position = self.position(code.span);
                    let catch = self.handle_error(err.at(position.clone()))?;
                    self.jump(catch).map_err(|err| err.at(position))?;
                }
            }
        }
    }

    fn position(&self, span: SourceSpan) -> SourcePosition {
        SourcePosition {
            file: self.block.file.clone(),
            span,
        }
    }

    /// Publish the position to the observer and check for cancellation at
    /// line boundaries.
    fn before_instruction(&mut self, line: u32) -> Result<(), ExecutionError> {
        let line_changed = line != 0 && line != self.last_line;
        if let (Some(observer), Some(trace)) = (&self.observer, &self.trace) {
            trace.set_position(self.ip, if line == 0 { self.last_line } else { line });
            observer.on_instruction(
                self.env.vm,
                trace,
                InstructionEvent {
                    line_changed,
                    jumped: self.jumped,
                },
            );
        }
        if line_changed {
            self.last_line = line;
            if self.env.ctx().is_cancelled() {
                return Err(ExecutionError::cancelled());
            }
        }
        Ok(())
    }

    fn advance(&mut self, flow: Flow) -> Result<Option<Value>, ExecutionError> {
        match flow {
            Flow::Next => {
                self.ip += 1;
                self.jumped = false;
                Ok(None)
            }
            Flow::Jump(target) => self.jump(target).map(|()| None),
            Flow::Return(value) => Ok(Some(value)),
        }
    }

    fn jump(&mut self, target: usize) -> Result<(), ExecutionError> {
        let len = self.block.len();
        if target > len {
            return Err(BugError::JumpOutOfRange { target, len }.into());
        }
        if target <= self.ip && self.env.ctx().is_cancelled() {
            return Err(ExecutionError::cancelled());
        }
        self.ip = target;
        self.jumped = true;
        Ok(())
    }

    /// Route a catchable error to the innermost try region, returning the
    /// catch entry point. Other errors are handed back.
    fn handle_error(&mut self, err: ExecutionError) -> Result<usize, ExecutionError> {
        if !err.is_catchable() {
            return Err(err);
        }
        let Some(entry) = self.tries.pop() else {
            return Err(err);
        };
        debug!(
            frame = %self.name,
            catch = entry.catch,
            error = %err,
            "error caught by try region"
        );
        self.stack.truncate(entry.stack_len);
        self.iterators.truncate(entry.iter_len);
        self.set_scope(entry.scope, entry.scope_depth);
        if let Some(slot) = entry.slot {
            self.scope
                .set_local(slot, err.to_value().unwrap_or_default());
        }
        self.sync_try_depth();
        Ok(entry.catch)
    }

    // ========================================================================
    // Stack helpers
    // ========================================================================

    fn push(&mut self, value: Value) -> Result<(), ExecutionError> {
        Ok(self.stack.push(Operand::new(value))?)
    }

    fn pop(&mut self, op: &'static str) -> Result<Operand, ExecutionError> {
        self.stack
            .pop()
            .ok_or_else(|| BugError::StackUnderflow { op }.into())
    }

    fn pop_value(&mut self, op: &'static str) -> Result<Value, ExecutionError> {
        self.pop(op).map(|operand| operand.value)
    }

    fn pop_values(&mut self, n: usize, op: &'static str) -> Result<Vec<Value>, ExecutionError> {
        let operands = self
            .stack
            .pop_n(n)
            .ok_or(BugError::StackUnderflow { op })?;
        Ok(operands.into_iter().map(|operand| operand.value).collect())
    }

    fn set_scope(&mut self, scope: Arc<Scope>, depth: usize) {
        if let Some(trace) = &self.trace {
            trace.set_scope(scope.clone());
        }
        self.scope = scope;
        self.scope_depth = depth;
    }

    fn sync_try_depth(&self) {
        if let Some(trace) = &self.trace {
            trace.set_try_depth(self.tries.len());
        }
    }

    // ========================================================================
    // Name resolution
    // ========================================================================

    fn slot_name(&self, id: SymbolId) -> Option<EcoString> {
        self.scope.table().name_of(id)
    }

    /// Read a variable: scope chain, then VM globals by name, then the
    /// fallback resolver.
    fn resolve_ref(&self, id: SymbolId) -> Operand {
        if let Some(owner) = self.scope.owner_of(id) {
            let value = owner.get_local(id).unwrap_or_default();
            return Operand::bound(value, Binding::Slot { scope: owner, id });
        }
        if let Some(name) = self.slot_name(id) {
            if let Some(value) = self.env.vm.lookup_global(&name) {
                return Operand::bound(value, Binding::Global(name));
            }
        }
        let scope = self
            .scope
            .declaring_scope(id)
            .unwrap_or_else(|| self.scope.clone());
        Operand::bound(Value::Undefined, Binding::Slot { scope, id })
    }

    /// Where a write to `id` goes: the scope already holding it, an existing
    /// VM global of that name, the scope whose table declares it, or the
    /// current scope.
    fn resolve_left(&self, id: SymbolId) -> Binding {
        if let Some(owner) = self.scope.owner_of(id) {
            return Binding::Slot { scope: owner, id };
        }
        if let Some(name) = self.slot_name(id) {
            if self.env.vm.has_global(&name) {
                return Binding::Global(name);
            }
        }
        let scope = self
            .scope
            .declaring_scope(id)
            .unwrap_or_else(|| self.scope.clone());
        Binding::Slot { scope, id }
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Calls skip `step` so that its frame is not on the native stack while
    /// the callee runs.
    fn dispatch(&mut self, op: &OpCode) -> Result<Flow, ExecutionError> {
        match op {
            OpCode::Call(n) => self.call_op("Call", *n, false),
            OpCode::VariadicCall(n) => self.call_op("VariadicCall", *n, true),
            _ => self.step(op),
        }
    }

    #[inline(never)]
    fn step(&mut self, op: &OpCode) -> Result<Flow, ExecutionError> {
        use OpCode::*;
        match op {
            Halt => return Err(BugError::Halt.into()),
            Nop => {}

            Push(value) => self.push(value.clone())?,
            Pop => {
                self.pop("Pop")?;
            }
            Dup => {
                if !self.stack.dup()? {
                    return Err(BugError::StackUnderflow { op: "Dup" }.into());
                }
            }
            PushRef(id) => {
                let operand = self.resolve_ref(*id);
                self.stack.push(operand)?;
            }
            PushLeftRef(id) => {
                let binding = self.resolve_left(*id);
                self.stack.push(Operand::bound(Value::Undefined, binding))?;
            }
            PushId(name) => {
                let value = self.env.vm.lookup_global(name).unwrap_or_default();
                self.stack
                    .push(Operand::bound(value, Binding::Global(name.clone())))?;
            }
            Assign { lefts, rights } => self.assign(*lefts, *rights)?,
            FastAssign(id) => {
                let value = self.pop_value("FastAssign")?;
                self.resolve_left(*id).store(self.env.vm, value)?;
            }
            SelfAssign(op) => {
                let rhs = self.pop_value("SelfAssign")?;
                let target = self.pop("SelfAssign")?;
                self.update_target(target, |old| ops::binary(*op, old, &rhs))?;
            }
            PlusPlus => {
                let target = self.pop("PlusPlus")?;
                self.update_target(target, |old| {
                    ops::binary(BinaryOp::Add, old, &Value::Int(1))
                })?;
            }
            MinusMinus => {
                let target = self.pop("MinusMinus")?;
                self.update_target(target, |old| {
                    ops::binary(BinaryOp::Sub, old, &Value::Int(1))
                })?;
            }

            Binary(op) => {
                let right = self.pop_value("Binary")?;
                let left = self.pop_value("Binary")?;
                self.push(ops::binary(*op, &left, &right)?)?;
            }
            Compare(op) => {
                let right = self.pop_value("Compare")?;
                let left = self.pop_value("Compare")?;
                self.push(ops::compare(*op, &left, &right)?)?;
            }
            Unary(op) => {
                let operand = self.pop_value("Unary")?;
                self.push(ops::unary(*op, &operand)?)?;
            }
            In => {
                let container = self.pop_value("In")?;
                let item = self.pop_value("In")?;
                self.push(Value::Bool(ops::contains(&container, &item)?))?;
            }
            TypeCast(kind) => {
                let value = self.pop_value("TypeCast")?;
                self.push(ops::cast(&value, *kind)?)?;
            }

            NewList(n) => {
                let items = self.pop_values(*n, "NewList")?;
                self.push(Value::list(items))?;
            }
            NewMap(n) => {
                let flat = self.pop_values(n * 2, "NewMap")?;
                let mut entries = Vec::with_capacity(*n);
                let mut flat = flat.into_iter();
                while let (Some(key), Some(value)) = (flat.next(), flat.next()) {
                    entries.push((key, value));
                }
                self.push(Value::map(entries)?)?;
            }
            Index => {
                let key = self.pop_value("Index")?;
                let container = self.pop_value("Index")?;
                let value = ops::index(&container, &key)?;
                self.stack
                    .push(Operand::bound(value, Binding::Index { container, key }))?;
            }
            IndexLeft => {
                let key = self.pop_value("IndexLeft")?;
                let container = self.pop_value("IndexLeft")?;
                if !matches!(container, Value::List(_) | Value::Map(_)) {
                    return Err(RuntimeError::NotIndexable(container.kind()).into());
                }
                self.stack.push(Operand::bound(
                    Value::Undefined,
                    Binding::Index { container, key },
                ))?;
            }

            NewScope(table) => {
                let scope = Scope::new_child(&self.scope, table);
                self.set_scope(scope, self.scope_depth + 1);
            }
            ScopeEnd => {
                if self.scope_depth == 0 {
                    return Err(BugError::ScopeUnderflow.into());
                }
                let parent = self
                    .scope
                    .parent()
                    .cloned()
                    .ok_or(BugError::ScopeUnderflow)?;
                self.set_scope(parent, self.scope_depth - 1);
            }

            Jmp(target) => return Ok(Flow::Jump(*target)),
            JmpT(target) => {
                if self.pop_value("JmpT")?.is_truthy() {
                    return Ok(Flow::Jump(*target));
                }
            }
            JmpF(target) => {
                if !self.pop_value("JmpF")?.is_truthy() {
                    return Ok(Flow::Jump(*target));
                }
            }
            JmpTop(target) => {
                let truthy = self.peek_truthy("JmpTop")?;
                if truthy {
                    return Ok(Flow::Jump(*target));
                }
                self.pop("JmpTop")?;
            }
            JmpFop(target) => {
                let truthy = self.peek_truthy("JmpFop")?;
                if !truthy {
                    return Ok(Flow::Jump(*target));
                }
                self.pop("JmpFop")?;
            }
            Break { target, scopes } => {
                self.unwind_scopes("Break", *scopes)?;
                return Ok(Flow::Jump(*target));
            }
            Continue { target, scopes } => {
                self.unwind_scopes("Continue", *scopes)?;
                return Ok(Flow::Jump(*target));
            }

            EnterFR => {
                let iterable = self.pop_value("EnterFR")?;
                self.iterators.push(ValueIterator::new(&iterable)?);
            }
            RangeNext { exit, count } => return self.iterate("RangeNext", *exit, *count, false),
            InNext { exit, count } => return self.iterate("InNext", *exit, *count, true),
            ExitFR => {
                self.iterators
                    .pop()
                    .ok_or(BugError::IteratorUnderflow { op: "ExitFR" })?;
            }

            CatchError { catch, slot } => {
                self.tries.push(TryEntry {
                    catch: *catch,
                    slot: *slot,
                    scope: self.scope.clone(),
                    scope_depth: self.scope_depth,
                    stack_len: self.stack.len(),
                    iter_len: self.iterators.len(),
                });
                trace!(frame = %self.name, catch = *catch, "entered try region");
                self.sync_try_depth();
            }
            StopCatchError => {
                self.tries.pop().ok_or(BugError::TryUnderflow)?;
                self.sync_try_depth();
            }
            Panic => {
                let value = self.pop_value("Panic")?;
                return Err(RuntimeError::Panic(value).into());
            }
            Recover => {
                let value = self
                    .recover
                    .as_ref()
                    .and_then(RecoverSlot::take)
                    .and_then(|err| err.to_value())
                    .unwrap_or_default();
                self.push(value)?;
            }

            NewFunction(proto) => {
                let function = Function {
                    proto: proto.clone(),
                    scope: self.scope.clone(),
                };
                self.push(Value::from(function))?;
            }
            Call(n) => return self.call_op("Call", *n, false),
            VariadicCall(n) => return self.call_op("VariadicCall", *n, true),
            AsyncCall(n) => {
                let args = self.pop_values(*n, "AsyncCall")?;
                let callee = self.pop_value("AsyncCall")?;
                self.env
                    .vm
                    .spawn_task(self.env.ctx().clone(), callee, args)?;
            }
            Return => {
                let value = self
                    .stack
                    .pop()
                    .map(|operand| operand.value)
                    .unwrap_or_default();
                return Ok(Flow::Return(value));
            }
            Defer(block) => self.defers.push(Deferred {
                block: block.clone(),
                scope: self.scope.clone(),
            }),
        }
        Ok(Flow::Next)
    }

    fn peek_truthy(&self, op: &'static str) -> Result<bool, ExecutionError> {
        self.stack
            .peek()
            .map(|operand| operand.value.is_truthy())
            .ok_or_else(|| BugError::StackUnderflow { op }.into())
    }

    fn update_target(
        &self,
        target: Operand,
        f: impl Fn(&Value) -> Result<Value, RuntimeError>,
    ) -> Result<(), ExecutionError> {
        let binding = target.binding.ok_or(RuntimeError::NotAssignable)?;
        binding.update(self.env.vm, f)?;
        Ok(())
    }

    fn assign(&mut self, lefts: usize, rights: usize) -> Result<(), ExecutionError> {
        let targets = self
            .stack
            .pop_n(lefts)
            .ok_or(BugError::StackUnderflow { op: "Assign" })?;
        let mut values = self.pop_values(rights, "Assign")?;

        let values = if lefts == 1 && rights != 1 {
            vec![Value::list(values)]
        } else if lefts > 1 && rights == 1 {
            let source = values.pop().unwrap_or_default();
            let items = source
                .to_vec()
                .ok_or(RuntimeError::NotIterable(source.kind()))?;
            if items.len() != lefts {
                return Err(RuntimeError::AssignMismatch {
                    lefts,
                    rights: items.len(),
                }
                .into());
            }
            items
        } else if lefts == rights {
            values
        } else {
            return Err(RuntimeError::AssignMismatch { lefts, rights }.into());
        };

        for (target, value) in targets.into_iter().zip(values) {
            let binding = target.binding.ok_or(RuntimeError::NotAssignable)?;
            binding.store(self.env.vm, value)?;
        }
        Ok(())
    }

    /// Close `count` scopes for `Break`/`Continue` and drop the try regions
    /// opened inside them.
    fn unwind_scopes(&mut self, op: &'static str, count: usize) -> Result<(), ExecutionError> {
        if count > self.scope_depth {
            return Err(BugError::EscapingJump {
                op,
                requested: count,
                available: self.scope_depth,
            }
            .into());
        }
        let mut scope = self.scope.clone();
        for _ in 0..count {
            scope = scope.parent().cloned().ok_or(BugError::ScopeUnderflow)?;
        }
        let depth = self.scope_depth - count;
        self.set_scope(scope, depth);
        // Try bodies open their own scope, so a region recorded at a depth
        // >= the new depth lies inside the closed scopes.
        self.tries.retain(|entry| entry.scope_depth < depth);
        self.sync_try_depth();
        Ok(())
    }

    fn iterate(
        &mut self,
        op: &'static str,
        exit: usize,
        count: usize,
        element_first: bool,
    ) -> Result<Flow, ExecutionError> {
        let iterator = self
            .iterators
            .last_mut()
            .ok_or(BugError::IteratorUnderflow { op })?;
        let yields_keys = iterator.yields_keys();
        let Some((key, value)) = iterator.next_pair() else {
            return Ok(Flow::Jump(exit));
        };
        match count {
            0 => {}
            1 if element_first && !yields_keys => self.push(value)?,
            1 => self.push(key)?,
            _ => {
                self.push(key)?;
                self.push(value)?;
            }
        }
        Ok(Flow::Next)
    }

    /// `Call`/`VariadicCall`: pop the arguments and the callee, push the
    /// result. A variadic call spreads its last argument.
    #[inline(never)]
    fn call_op(
        &mut self,
        op: &'static str,
        n: usize,
        variadic: bool,
    ) -> Result<Flow, ExecutionError> {
        let mut args = self.pop_values(n, op)?;
        let callee = self.pop_value(op)?;
        if variadic {
            if let Some(spread) = args.pop() {
                let items = spread
                    .to_vec()
                    .ok_or(RuntimeError::NotIterable(spread.kind()))?;
                args.extend(items);
            }
        }
        let result = self.call(&callee, args)?;
        self.push(result)?;
        Ok(Flow::Next)
    }

    fn call(&self, callee: &Value, args: Vec<Value>) -> Result<Value, ExecutionError> {
        // Only functions called directly by a deferred block may recover.
        let recover = if self.in_defer {
            self.recover.clone()
        } else {
            None
        };
        self.env
            .vm
            .call_value(self.env.callee(), callee, args, recover)
    }

    /// Run deferred blocks in reverse registration order. Each block sees the
    /// pending error through `Recover`; taking it turns the frame's result
    /// into `undefined`. An error raised by a deferred block replaces the
    /// pending result.
    fn run_defers(
        &mut self,
        mut result: Result<Value, ExecutionError>,
    ) -> Result<Value, ExecutionError> {
        if let Err(err) = &result {
            if matches!(err.kind, ExecutionErrorKind::Cancelled) {
                return result;
            }
        }
        while let Some(deferred) = self.defers.pop() {
            let pending = match &result {
                Err(err) if err.is_catchable() => Some(err.clone()),
                _ => None,
            };
            let slot = RecoverSlot::new(pending);
            let outcome = Frame::new(self.env.callee(), &self.name, deferred.block, deferred.scope)
                .with_recover(Some(slot.clone()), true)
                .run();
            if slot.recovered() {
                debug!(frame = %self.name, "error recovered by deferred block");
                result = Ok(Value::Undefined);
            }
            if let Err(err) = outcome {
                result = Err(err);
            }
        }
        result
    }
}

#[cfg(test)]
#[path = "frame_test.rs"]
mod frame_test;
