//! Per-execution context: cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A shared cancellation flag.
///
/// Cloning the token shares the flag, so a host can keep one clone and cancel
/// an execution running on another thread. The interpreter checks the token
/// whenever execution reaches a new source line and on every backward jump.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Context passed to every execution entry point.
///
/// Tasks spawned with `AsyncCall` inherit the context of their parent, so
/// cancelling a script also cancels the tasks it started.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub cancel: CancelToken,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(cancel: CancelToken) -> Self {
        Self { cancel }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
