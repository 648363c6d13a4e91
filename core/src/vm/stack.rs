use std::fmt;

use crate::errors::ResourceExceededError;

/// A stack data structure with maximum size enforcement.
///
/// This stack is used by frames for operand storage during execution.
/// Unlike a plain `Vec`, pushing past `max_size` reports
/// [`ResourceExceededError::OperandStackOverflow`] so that a runaway code
/// stream terminates the task instead of exhausting memory.
///
/// # Examples
///
/// ```ignore
/// use kelp_core::vm::Stack;
///
/// let mut stack = Stack::new(100);
/// stack.push(42)?;
/// stack.push(17)?;
/// assert_eq!(stack.pop(), Some(17));
/// assert_eq!(stack.peek(), Some(&42));
/// assert_eq!(stack.len(), 1);
/// ```
pub struct Stack<T> {
    /// The underlying storage for stack elements.
    items: Vec<T>,
    /// Maximum allowed stack size.
    max_size: usize,
}

impl<T> Stack<T> {
    /// Creates a new stack with the specified maximum size.
    ///
    /// The stack pre-allocates a small amount of space; frames are created
    /// for every call so the initial capacity stays modest.
    pub fn new(max_size: usize) -> Self {
        Self {
            items: Vec::with_capacity(max_size.min(16)),
            max_size,
        }
    }

    /// Pushes a value onto the stack.
    #[inline]
    pub fn push(&mut self, value: T) -> Result<(), ResourceExceededError> {
        if self.items.len() >= self.max_size {
            return Err(ResourceExceededError::OperandStackOverflow {
                max_size: self.max_size,
            });
        }
        self.items.push(value);
        Ok(())
    }

    /// Removes and returns the top value, or `None` if the stack is empty.
    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop()
    }

    /// Returns a reference to the top value without removing it.
    #[inline]
    pub fn peek(&self) -> Option<&T> {
        self.items.last()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Drops everything above `len`. Used when unwinding to a catch region.
    #[inline]
    pub fn truncate(&mut self, len: usize) {
        self.items.truncate(len);
    }

    /// Removes the top `n` elements and returns them ordered from bottom to
    /// top (so the last element of the result was the top of the stack).
    ///
    /// Returns `None` and leaves the stack untouched if there are fewer than
    /// `n` elements.
    ///
    /// ```ignore
    /// let mut stack = Stack::new(100);
    /// stack.push(10)?;
    /// stack.push(20)?;
    /// stack.push(30)?;
    /// assert_eq!(stack.pop_n(2), Some(vec![20, 30]));
    /// assert_eq!(stack.len(), 1);
    /// ```
    pub fn pop_n(&mut self, n: usize) -> Option<Vec<T>> {
        let len = self.items.len();
        if n > len {
            return None;
        }
        Some(self.items.split_off(len - n))
    }
}

impl<T: Clone> Stack<T> {
    /// Duplicates the top value. Returns `Ok(false)` if the stack is empty.
    pub fn dup(&mut self) -> Result<bool, ResourceExceededError> {
        match self.items.last().cloned() {
            Some(top) => self.push(top).map(|()| true),
            None => Ok(false),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Stack<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.items.iter()).finish()
    }
}
