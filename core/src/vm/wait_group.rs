use parking_lot::{Condvar, Mutex};

/// A counter of outstanding tasks that threads can wait on until it drains.
#[derive(Debug, Default)]
pub struct WaitGroup {
    count: Mutex<usize>,
    drained: Condvar,
}

impl WaitGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self) {
        *self.count.lock() += 1;
    }

    pub fn done(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.drained.notify_all();
        }
    }

    pub fn count(&self) -> usize {
        *self.count.lock()
    }

    /// Block until the counter reaches zero.
    pub fn wait(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.drained.wait(&mut count);
        }
    }
}

/// Calls [`WaitGroup::done`] when dropped, so a task is always accounted for,
/// even if its thread unwinds.
pub(crate) struct DoneGuard<'a>(pub(crate) &'a WaitGroup);

impl Drop for DoneGuard<'_> {
    fn drop(&mut self) {
        self.0.done();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use super::*;

    #[test]
    fn test_wait_on_empty_group_returns() {
        WaitGroup::new().wait();
    }

    #[test]
    fn test_wait_for_threads() {
        let group = Arc::new(WaitGroup::new());
        let finished = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            group.add();
            let group = group.clone();
            let finished = finished.clone();
            thread::spawn(move || {
                let _done = DoneGuard(&group);
                finished.fetch_add(1, Ordering::SeqCst);
            });
        }
        group.wait();
        assert_eq!(finished.load(Ordering::SeqCst), 4);
        assert_eq!(group.count(), 0);
    }
}
