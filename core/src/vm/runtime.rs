//! The virtual machine: globals, tasks and the execution entry points.
//!
//! A [`VM`] is a cheap, cloneable handle. All clones share the same global
//! variables, hijack table and task bookkeeping, so a handle can be moved
//! into every thread started by `AsyncCall`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use ecow::EcoString;
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::api::{ExecutionContext, VmOptions};
use crate::errors::{ExecutionError, ResourceExceededError, RuntimeError};
use crate::scope::Scope;
use crate::values::{Callable, Function, NativeFunction, Value};
use crate::vm::frame::{Env, Frame, RecoverSlot};
use crate::vm::function_adapter::FunctionAdapter;
use crate::vm::observer::{ExecutionObserver, TaskInfo};
use crate::vm::wait_group::{DoneGuard, WaitGroup};
use crate::vm::{CodeBlock, Program};

/// Native stack reserved per level of interpreted calls. Every interpreted
/// call nests a few Rust frames, so tasks run on threads sized for
/// `VmOptions::max_depth` instead of the caller's stack.
const STACK_PER_CALL: usize = 64 * 1024;

/// Native stack for everything outside the interpreted calls: natives,
/// observers and debugger expressions.
const BASE_STACK_SIZE: usize = 2 * 1024 * 1024;

/// Resolves names that are neither in scope nor VM globals.
pub type GlobalFallback = dyn Fn(&str) -> Option<Value> + Send + Sync;

/// A failure captured from an async task.
#[derive(Debug, Clone)]
pub struct TaskFailure {
    pub task_id: u64,
    pub task_name: EcoString,
    pub error: ExecutionError,
}

struct VmShared {
    options: VmOptions,
    globals: RwLock<HashMap<EcoString, Value>>,
    hijacks: RwLock<HashMap<EcoString, NativeFunction>>,
    fallback: RwLock<Option<Arc<GlobalFallback>>>,
    /// Outermost scope of the most recent top-level program.
    root_scope: RwLock<Option<Arc<Scope>>>,
    observer: RwLock<Option<Arc<dyn ExecutionObserver>>>,
    wait_group: WaitGroup,
    task_failures: Mutex<Vec<TaskFailure>>,
    next_task: AtomicU64,
    next_frame: AtomicU64,
}

#[derive(Clone)]
pub struct VM {
    shared: Arc<VmShared>,
}

static_assertions::assert_impl_all!(VM: Send, Sync);

impl core::fmt::Debug for VM {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("VM")
            .field("options", &self.shared.options)
            .field("globals", &self.shared.globals.read().len())
            .field("pending_tasks", &self.shared.wait_group.count())
            .finish()
    }
}

impl Default for VM {
    fn default() -> Self {
        VM::new(VmOptions::default())
    }
}

impl VM {
    pub fn new(options: VmOptions) -> Self {
        let register_stdlib = options.register_stdlib;
        let vm = VM {
            shared: Arc::new(VmShared {
                options,
                globals: RwLock::new(HashMap::new()),
                hijacks: RwLock::new(HashMap::new()),
                fallback: RwLock::new(None),
                root_scope: RwLock::new(None),
                observer: RwLock::new(None),
                wait_group: WaitGroup::new(),
                task_failures: Mutex::new(Vec::new()),
                next_task: AtomicU64::new(1),
                next_frame: AtomicU64::new(1),
            }),
        };
        if register_stdlib {
            crate::stdlib::register_stdlib(&vm);
        }
        vm
    }

    pub fn options(&self) -> &VmOptions {
        &self.shared.options
    }

    // ========================================================================
    // Execution entry points
    // ========================================================================

    /// Run a top-level program, blocking the calling thread until it ends.
    /// The program itself runs on a thread sized for `max_depth`.
    ///
    /// The program's outermost scope is kept so that [`VM::get_global`] can
    /// read its variables afterwards. Async tasks the program started keep
    /// running; use [`VM::wait_all_async`] to wait for them.
    pub fn execute_code(
        &self,
        ctx: &ExecutionContext,
        source: &str,
        program: &Program,
    ) -> Result<(), ExecutionError> {
        self.on_task_thread("main", || self.run_program(ctx, source, program))
    }

    fn run_program(
        &self,
        ctx: &ExecutionContext,
        source: &str,
        program: &Program,
    ) -> Result<(), ExecutionError> {
        let task = self.new_task("main".into(), ctx.clone());
        let scope = Scope::new_root(&program.table);
        *self.shared.root_scope.write() = Some(scope.clone());

        let observer = self.observer();
        if let Some(observer) = &observer {
            observer.on_program(&task, &program.block);
        }

        debug!(task = task.id, block = %program.block.id, "executing program");
        let env = Env {
            vm: self,
            task: &task,
            depth: 1,
            observe: true,
        };
        let result = Frame::new(env, &task.name, program.block.clone(), scope)
            .run()
            .map(|_| ())
            .map_err(|mut err| {
                err.source = Some(Arc::from(source));
                err
            });

        if let Some(observer) = &observer {
            observer.on_program_end(&task, result.as_ref().map(|_| ()));
        }
        result
    }

    /// Call a function value from the host, blocking until it returns.
    pub fn call_function(
        &self,
        ctx: &ExecutionContext,
        function: &Value,
        args: Vec<Value>,
    ) -> Result<Value, ExecutionError> {
        self.on_task_thread("host", move || {
            let task = self.new_task("host".into(), ctx.clone());
            let env = Env {
                vm: self,
                task: &task,
                depth: 1,
                observe: true,
            };
            self.call_value(env, function, args, None)
        })
    }

    /// Start a function on its own task without waiting for it. Returns the
    /// task id.
    pub fn spawn_async(
        &self,
        ctx: &ExecutionContext,
        function: Value,
        args: Vec<Value>,
    ) -> Result<u64, ExecutionError> {
        self.spawn_task(ctx.clone(), function, args)
    }

    /// Block until every task started with `AsyncCall` or
    /// [`VM::spawn_async`] has finished.
    pub fn wait_all_async(&self) {
        self.shared.wait_group.wait();
    }

    /// Failures of async tasks so far, in completion order.
    pub fn task_failures(&self) -> Vec<TaskFailure> {
        self.shared.task_failures.lock().clone()
    }

    // ========================================================================
    // Globals
    // ========================================================================

    pub fn import_global(&self, name: &str, value: impl Into<Value>) {
        self.shared.globals.write().insert(name.into(), value.into());
    }

    /// Register a typed host function as a global.
    pub fn register_fn<Args, F>(&self, name: &str, function: F)
    where
        F: FunctionAdapter<Args>,
    {
        self.import_global(name, Value::native(function.into_native(name)));
    }

    /// Read a variable of the most recent program's outermost scope, or a VM
    /// global.
    pub fn get_global(&self, name: &str) -> Option<Value> {
        let root = self.shared.root_scope.read().clone();
        if let Some(value) = root.and_then(|scope| scope.lookup_name(name)) {
            return Some(value);
        }
        self.shared.globals.read().get(name).cloned()
    }

    /// Replace the native function named `name` for every call made through
    /// this VM, wherever the original value is stored.
    pub fn hijack(&self, name: &str, replacement: NativeFunction) {
        self.shared.hijacks.write().insert(name.into(), replacement);
    }

    pub fn set_global_fallback<F>(&self, resolver: F)
    where
        F: Fn(&str) -> Option<Value> + Send + Sync + 'static,
    {
        *self.shared.fallback.write() = Some(Arc::new(resolver));
    }

    pub(crate) fn lookup_global(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.shared.globals.read().get(name) {
            return Some(value.clone());
        }
        let fallback = self.shared.fallback.read().clone();
        fallback.and_then(|resolve| resolve(name))
    }

    pub(crate) fn has_global(&self, name: &str) -> bool {
        self.shared.globals.read().contains_key(name)
    }

    pub(crate) fn set_global(&self, name: &str, value: Value) {
        self.shared.globals.write().insert(name.into(), value);
    }

    /// VM globals sorted by name.
    pub(crate) fn globals_snapshot(&self) -> Vec<(EcoString, Value)> {
        let mut globals: Vec<_> = self
            .shared
            .globals
            .read()
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        globals.sort_by(|a, b| a.0.cmp(&b.0));
        globals
    }

    pub(crate) fn update_global(
        &self,
        name: &str,
        f: impl FnOnce(&Value) -> Result<Value, RuntimeError>,
    ) -> Result<Value, RuntimeError> {
        let mut globals = self.shared.globals.write();
        let old = globals.get(name).cloned().unwrap_or_default();
        let new = f(&old)?;
        globals.insert(name.into(), new.clone());
        Ok(new)
    }

    // ========================================================================
    // Observation
    // ========================================================================

    /// Install (or remove) the execution observer. Frames created afterwards
    /// report to it.
    pub fn set_observer(&self, observer: Option<Arc<dyn ExecutionObserver>>) {
        *self.shared.observer.write() = observer;
    }

    pub(crate) fn observer(&self) -> Option<Arc<dyn ExecutionObserver>> {
        self.shared.observer.read().clone()
    }

    pub(crate) fn next_frame_id(&self) -> u64 {
        self.shared.next_frame.fetch_add(1, Ordering::Relaxed)
    }

    /// Run `block` directly in `scope` on behalf of `task`, without reporting
    /// to the observer. Used to evaluate debugger expressions.
    pub(crate) fn evaluate_in_scope(
        &self,
        task: &Arc<TaskInfo>,
        block: Arc<CodeBlock>,
        scope: Arc<Scope>,
    ) -> Result<Value, ExecutionError> {
        let env = Env {
            vm: self,
            task,
            depth: 1,
            observe: false,
        };
        Frame::new(env, &EcoString::from("<eval>"), block, scope).run()
    }

    pub(crate) fn emit_output(&self, task: &Arc<TaskInfo>, text: &str) {
        if let Some(observer) = self.observer() {
            observer.on_output(task, text);
        }
    }

    // ========================================================================
    // Calls & tasks
    // ========================================================================

    fn task_stack_size(&self) -> usize {
        self.shared
            .options
            .max_depth
            .saturating_mul(STACK_PER_CALL)
            .saturating_add(BASE_STACK_SIZE)
    }

    /// Run `f` on a scoped thread sized for `max_depth` and wait for it.
    /// A panic on that thread is resumed on the caller's.
    fn on_task_thread<T, F>(&self, name: &str, f: F) -> Result<T, ExecutionError>
    where
        T: Send,
        F: FnOnce() -> Result<T, ExecutionError> + Send,
    {
        thread::scope(|scope| {
            let handle = thread::Builder::new()
                .name(name.to_string())
                .stack_size(self.task_stack_size())
                .spawn_scoped(scope, f)
                .map_err(|err| ExecutionError::from(RuntimeError::native(name, err)))?;
            handle
                .join()
                .unwrap_or_else(|payload| std::panic::resume_unwind(payload))
        })
    }

    fn new_task(&self, name: EcoString, ctx: ExecutionContext) -> Arc<TaskInfo> {
        let id = self.shared.next_task.fetch_add(1, Ordering::Relaxed);
        Arc::new(TaskInfo {
            id,
            name,
            spawned: false,
            ctx,
        })
    }

    pub(crate) fn call_value(
        &self,
        env: Env<'_>,
        callee: &Value,
        args: Vec<Value>,
        recover: Option<RecoverSlot>,
    ) -> Result<Value, ExecutionError> {
        match callee {
            Value::Function(Callable::Closure(function)) => {
                self.call_closure(env, function, args, recover)
            }
            Value::Function(Callable::Native(native)) => {
                let hijacked = self.shared.hijacks.read().get(&native.name).cloned();
                let native = hijacked.as_ref().unwrap_or(native);
                native.call(&NativeContext { env }, &args)
            }
            other => Err(RuntimeError::NotCallable(other.kind()).into()),
        }
    }

    fn call_closure(
        &self,
        env: Env<'_>,
        function: &Arc<Function>,
        mut args: Vec<Value>,
        recover: Option<RecoverSlot>,
    ) -> Result<Value, ExecutionError> {
        let max_depth = self.shared.options.max_depth;
        if env.depth > max_depth {
            return Err(ResourceExceededError::StackOverflow {
                depth: env.depth,
                max_depth,
            }
            .into());
        }

        let proto = &function.proto;
        let scope = Scope::new_child(&function.scope, &proto.table);
        match proto.params.split_last() {
            Some((rest_param, fixed)) if proto.variadic => {
                let rest = if args.len() > fixed.len() {
                    args.split_off(fixed.len())
                } else {
                    Vec::new()
                };
                args.resize(fixed.len(), Value::Undefined);
                for (id, value) in fixed.iter().zip(args) {
                    scope.set_local(*id, value);
                }
                scope.set_local(*rest_param, Value::list(rest));
            }
            _ => {
                if args.len() > proto.params.len() {
                    return Err(RuntimeError::ArgumentCount {
                        name: proto.name.to_string(),
                        expected: proto.params.len(),
                        got: args.len(),
                    }
                    .into());
                }
                args.resize(proto.params.len(), Value::Undefined);
                for (id, value) in proto.params.iter().zip(args) {
                    scope.set_local(*id, value);
                }
            }
        }

        Frame::new(env, &proto.name, proto.block.clone(), scope)
            .with_recover(recover, false)
            .run()
    }

    pub(crate) fn spawn_task(
        &self,
        ctx: ExecutionContext,
        callee: Value,
        args: Vec<Value>,
    ) -> Result<u64, ExecutionError> {
        if callee.as_callable().is_none() {
            return Err(RuntimeError::NotCallable(callee.kind()).into());
        }
        let id = self.shared.next_task.fetch_add(1, Ordering::Relaxed);
        let task = Arc::new(TaskInfo {
            id,
            name: ecow::eco_format!("async-{}", id),
            spawned: true,
            ctx,
        });

        self.shared.wait_group.add();
        let vm = self.clone();
        let spawned = thread::Builder::new()
            .name(task.name.to_string())
            .stack_size(self.task_stack_size())
            .spawn({
                let task = task.clone();
                move || vm.run_task(task, callee, args)
            });
        if let Err(err) = spawned {
            self.shared.wait_group.done();
            return Err(RuntimeError::native("AsyncCall", err).into());
        }
        debug!(task = id, "spawned async task");
        Ok(id)
    }

    fn run_task(&self, task: Arc<TaskInfo>, callee: Value, args: Vec<Value>) {
        let _done = DoneGuard(&self.shared.wait_group);
        let observer = self.observer();
        if let Some(observer) = &observer {
            observer.on_task_start(&task);
        }

        let env = Env {
            vm: self,
            task: &task,
            depth: 1,
            observe: true,
        };
        let result = self.call_value(env, &callee, args, None);
        match &result {
            Ok(_) => debug!(task = task.id, "async task finished"),
            Err(err) => {
                warn!(task = %task.name, error = %err, "async task failed");
                self.shared.task_failures.lock().push(TaskFailure {
                    task_id: task.id,
                    task_name: task.name.clone(),
                    error: err.clone(),
                });
            }
        }

        if let Some(observer) = &observer {
            observer.on_task_end(&task, result.as_ref());
        }
    }
}

/// Access to the VM from inside a native function.
pub struct NativeContext<'a> {
    env: Env<'a>,
}

impl<'a> NativeContext<'a> {
    pub fn vm(&self) -> &'a VM {
        self.env.vm
    }

    pub fn context(&self) -> &'a ExecutionContext {
        self.env.ctx()
    }

    pub fn task(&self) -> &'a Arc<TaskInfo> {
        self.env.task
    }

    /// Call a function value on the current task.
    pub fn call(&self, function: &Value, args: Vec<Value>) -> Result<Value, ExecutionError> {
        self.env.vm.call_value(self.env, function, args, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values::Value;

    #[test]
    fn test_import_and_get_global() {
        let vm = VM::new(VmOptions::default());
        vm.import_global("answer", 42i64);
        assert_eq!(vm.get_global("answer"), Some(Value::Int(42)));
        assert_eq!(vm.get_global("missing"), None);
    }

    #[test]
    fn test_stdlib_registration_is_optional() {
        let bare = VM::new(VmOptions {
            register_stdlib: false,
            ..VmOptions::default()
        });
        assert!(bare.get_global("len").is_none());
        assert!(VM::default().get_global("len").is_some());
    }

    #[test]
    fn test_fallback_resolver() {
        let vm = VM::default();
        vm.set_global_fallback(|name| (name == "magic").then(|| Value::Int(7)));
        assert_eq!(vm.lookup_global("magic"), Some(Value::Int(7)));
        assert_eq!(vm.lookup_global("other"), None);
    }

    #[test]
    fn test_call_native_and_hijack() {
        let vm = VM::default();
        let ctx = ExecutionContext::new();
        let original = NativeFunction::new("greet", |_, _| Ok(Value::from("hello")));
        let value = Value::native(original);
        assert_eq!(
            vm.call_function(&ctx, &value, vec![]).unwrap(),
            Value::from("hello")
        );

        vm.hijack("greet", NativeFunction::new("greet", |_, _| Ok(Value::from("hijacked"))));
        assert_eq!(
            vm.call_function(&ctx, &value, vec![]).unwrap(),
            Value::from("hijacked")
        );
    }

    #[test]
    fn test_calling_non_function_fails() {
        let vm = VM::default();
        let err = vm
            .call_function(&ExecutionContext::new(), &Value::Int(1), vec![])
            .unwrap_err();
        assert!(matches!(
            err.runtime(),
            Some(RuntimeError::NotCallable(crate::values::ValueKind::Int))
        ));
    }
}
