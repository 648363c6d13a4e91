//! Kelp VM instruction set.
//!
//! The interpreter executes a flat sequence of [`Code`]s. Each one carries an
//! [`OpCode`] with typed operands and the [`SourceSpan`] it was compiled from.
//! Jump targets are absolute indices into the enclosing [`CodeBlock`]; the
//! interpreter never computes them.
//!
//! # Stack Discipline
//!
//! Stack effect notation: `[..., operand1, operand2] -> [..., result]`.
//! Entries on the operand stack may carry a *binding* (the slot, global or
//! container element they were read from). Only assignment opcodes look at
//! bindings.
//!
//! # Scopes
//!
//! `NewScope`/`ScopeEnd` bracket a lexical block. `Break` and `Continue` carry
//! the number of scopes to close before jumping. A try region must open its
//! own scope right after `CatchError` so that unwinding by scope count also
//! tells which try regions are left.
//!
//! [`CodeBlock`]: crate::vm::CodeBlock

use core::fmt;
use std::sync::Arc;

use ecow::EcoString;
use serde::{Deserialize, Serialize};

use crate::scope::{SymbolId, SymbolTable};
use crate::values::{BinaryOp, CompareOp, FunctionProto, UnaryOp, Value, ValueKind};
use crate::vm::CodeBlock;

/// Location in source code. Lines and columns are 1-based; `0` means unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceSpan {
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

impl SourceSpan {
    pub const fn line(line: u32) -> Self {
        SourceSpan {
            start_line: line,
            start_column: 1,
            end_line: line,
            end_column: 1,
        }
    }

    pub const fn new(start_line: u32, start_column: u32, end_line: u32, end_column: u32) -> Self {
        SourceSpan {
            start_line,
            start_column,
            end_line,
            end_column,
        }
    }
}

/// A single instruction with its source position.
#[derive(Clone)]
pub struct Code {
    pub op: OpCode,
    pub span: SourceSpan,
}

impl Code {
    pub fn new(op: OpCode, span: SourceSpan) -> Self {
        Code { op, span }
    }

    pub fn line(&self) -> u32 {
        self.span.start_line
    }
}

impl fmt::Debug for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} @{}", self.op, self.span.start_line)
    }
}

#[derive(Clone)]
pub enum OpCode {
    // ========================================================================
    // Special
    // ========================================================================
    /// Marks unreachable code. Executing it is a compiler bug.
    Halt,

    /// Does nothing.
    Nop,

    // ========================================================================
    // Stack & Bindings
    // ========================================================================
    /// Push a literal.
    /// Stack: [...] -> [..., value]
    Push(Value),

    /// Stack: [..., a] -> [...]
    Pop,

    /// Duplicate the top entry, binding included.
    /// Stack: [..., a] -> [..., a, a]
    Dup,

    /// Read a variable. Resolution walks the scope chain, then the VM
    /// globals by name, then the fallback resolver; unknown names read as
    /// `undefined`.
    /// Stack: [...] -> [..., value{slot}]
    PushRef(SymbolId),

    /// Push an assignable reference to a variable without reading it.
    /// Unbound names bind to the current scope.
    /// Stack: [...] -> [..., undefined{slot}]
    PushLeftRef(SymbolId),

    /// Read a VM global by name.
    /// Stack: [...] -> [..., value{global}]
    PushId(EcoString),

    /// Destructuring assignment of `rights` values to `lefts` references.
    ///
    /// - 1 left, N rights: the rights are wrapped into a list.
    /// - N lefts, 1 right: the right must be a list of exactly N elements,
    ///   assigned by index.
    /// - N lefts, N rights: positional.
    ///
    /// Stack: [..., r1, ..., rN, l1, ..., lM] -> [...]
    Assign { lefts: usize, rights: usize },

    /// Pop a value and store it in a slot, declaring it in the current scope
    /// if unbound.
    /// Stack: [..., value] -> [...]
    FastAssign(SymbolId),

    /// Compound assignment (`+=` and friends), atomic on the target binding.
    /// Stack: [..., target{binding}, rhs] -> [...]
    SelfAssign(BinaryOp),

    /// Stack: [..., target{binding}] -> [...]
    PlusPlus,

    /// Stack: [..., target{binding}] -> [...]
    MinusMinus,

    // ========================================================================
    // Operators
    // ========================================================================
    /// Stack: [..., a, b] -> [..., a op b]
    Binary(BinaryOp),

    /// Stack: [..., a, b] -> [..., bool]
    Compare(CompareOp),

    /// Stack: [..., a] -> [..., op a]
    Unary(UnaryOp),

    /// Membership test.
    /// Stack: [..., item, container] -> [..., bool]
    In,

    /// Stack: [..., value] -> [..., value as kind]
    TypeCast(ValueKind),

    // ========================================================================
    // Collections
    // ========================================================================
    /// Stack: [..., e1, ..., eN] -> [..., list]
    NewList(usize),

    /// Stack: [..., k1, v1, ..., kN, vN] -> [..., map]
    NewMap(usize),

    /// Stack: [..., container, key] -> [..., value{index}]
    Index,

    /// Assignable reference to a container element, without reading it.
    /// Stack: [..., container, key] -> [..., undefined{index}]
    IndexLeft,

    // ========================================================================
    // Scopes
    // ========================================================================
    /// Open a child scope for the given table.
    NewScope(Arc<SymbolTable>),

    /// Close the innermost scope opened in this frame.
    ScopeEnd,

    // ========================================================================
    // Control Flow
    // ========================================================================
    /// Unconditional jump.
    Jmp(usize),

    /// Stack: [..., cond] -> [...], jump if truthy.
    JmpT(usize),

    /// Stack: [..., cond] -> [...], jump if falsy.
    JmpF(usize),

    /// Short-circuit `||`: if the top is truthy, jump and keep it; otherwise
    /// pop it and fall through.
    JmpTop(usize),

    /// Short-circuit `&&`: if the top is falsy, jump and keep it; otherwise
    /// pop it and fall through.
    JmpFop(usize),

    /// Close `scopes` scopes, leave the try regions they contain, and jump
    /// to the loop exit.
    Break { target: usize, scopes: usize },

    /// Close `scopes` scopes, leave the try regions they contain, and jump
    /// to the loop head.
    Continue { target: usize, scopes: usize },

    // ========================================================================
    // Iteration
    // ========================================================================
    /// Start iterating a list, map, string, bytes or int (`0..n`).
    /// Stack: [..., iterable] -> [...]
    EnterFR,

    /// Advance the innermost iterator, pushing `count` of (key, value), or
    /// jump to `exit` when exhausted.
    /// Stack: [...] -> [..., key] | [..., key, value]
    RangeNext { exit: usize, count: usize },

    /// Like `RangeNext`, but a single pushed value is the element (map key for
    /// maps) rather than the index.
    /// Stack: [...] -> [..., item] | [..., key, value]
    InNext { exit: usize, count: usize },

    /// Drop the innermost iterator.
    ExitFR,

    // ========================================================================
    // Errors
    // ========================================================================
    /// Enter a try region. On a catchable error, the frame is restored to its
    /// state here, the error value is bound to `slot`, and execution resumes
    /// at `catch`.
    CatchError {
        catch: usize,
        slot: Option<SymbolId>,
    },

    /// Leave the innermost try region normally.
    StopCatchError,

    /// Stack: [..., value] -> raise
    Panic,

    /// Inside a deferred block, take the propagating error.
    /// Stack: [...] -> [..., error value | undefined]
    Recover,

    // ========================================================================
    // Functions
    // ========================================================================
    /// Create a closure over the current scope.
    /// Stack: [...] -> [..., function]
    NewFunction(Arc<FunctionProto>),

    /// Stack: [..., callee, a1, ..., aN] -> [..., result]
    Call(usize),

    /// Like `Call`, but the last argument is a list spread into the call.
    /// Stack: [..., callee, a1, ..., aN-1, list] -> [..., result]
    VariadicCall(usize),

    /// Run the call on a new task without waiting for it.
    /// Stack: [..., callee, a1, ..., aN] -> [...]
    AsyncCall(usize),

    /// Stack: [..., value] -> return value (`undefined` if empty)
    Return,

    /// Register a block to run when the frame exits, over the current scope.
    Defer(Arc<CodeBlock>),
}

impl OpCode {
    /// Returns true if this instruction can transfer control.
    pub fn is_control_flow(&self) -> bool {
        matches!(
            self,
            OpCode::Jmp(_)
                | OpCode::JmpT(_)
                | OpCode::JmpF(_)
                | OpCode::JmpTop(_)
                | OpCode::JmpFop(_)
                | OpCode::Break { .. }
                | OpCode::Continue { .. }
                | OpCode::RangeNext { .. }
                | OpCode::InNext { .. }
                | OpCode::Return
                | OpCode::Panic
                | OpCode::Halt
        )
    }

    /// The absolute jump target carried by this instruction.
    pub fn jump_target(&self) -> Option<usize> {
        match self {
            OpCode::Jmp(t)
            | OpCode::JmpT(t)
            | OpCode::JmpF(t)
            | OpCode::JmpTop(t)
            | OpCode::JmpFop(t)
            | OpCode::Break { target: t, .. }
            | OpCode::Continue { target: t, .. }
            | OpCode::RangeNext { exit: t, .. }
            | OpCode::InNext { exit: t, .. }
            | OpCode::CatchError { catch: t, .. } => Some(*t),
            _ => None,
        }
    }

    /// Mutable access to the jump target, for back-patching.
    pub fn jump_target_mut(&mut self) -> Option<&mut usize> {
        match self {
            OpCode::Jmp(t)
            | OpCode::JmpT(t)
            | OpCode::JmpF(t)
            | OpCode::JmpTop(t)
            | OpCode::JmpFop(t)
            | OpCode::Break { target: t, .. }
            | OpCode::Continue { target: t, .. }
            | OpCode::RangeNext { exit: t, .. }
            | OpCode::InNext { exit: t, .. }
            | OpCode::CatchError { catch: t, .. } => Some(t),
            _ => None,
        }
    }
}

impl fmt::Debug for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Halt => write!(f, "Halt"),
            Self::Nop => write!(f, "Nop"),
            Self::Push(value) => write!(f, "Push({:?})", value),
            Self::Pop => write!(f, "Pop"),
            Self::Dup => write!(f, "Dup"),
            Self::PushRef(id) => write!(f, "PushRef({})", id),
            Self::PushLeftRef(id) => write!(f, "PushLeftRef({})", id),
            Self::PushId(name) => write!(f, "PushId({})", name),
            Self::Assign { lefts, rights } => write!(f, "Assign({}, {})", lefts, rights),
            Self::FastAssign(id) => write!(f, "FastAssign({})", id),
            Self::SelfAssign(op) => write!(f, "SelfAssign({}=)", op),
            Self::PlusPlus => write!(f, "PlusPlus"),
            Self::MinusMinus => write!(f, "MinusMinus"),
            Self::Binary(op) => write!(f, "Binary({})", op),
            Self::Compare(op) => write!(f, "Compare({})", op),
            Self::Unary(op) => write!(f, "Unary({})", op),
            Self::In => write!(f, "In"),
            Self::TypeCast(kind) => write!(f, "TypeCast({})", kind),
            Self::NewList(n) => write!(f, "NewList({})", n),
            Self::NewMap(n) => write!(f, "NewMap({})", n),
            Self::Index => write!(f, "Index"),
            Self::IndexLeft => write!(f, "IndexLeft"),
            Self::NewScope(table) => {
                write!(f, "NewScope(")?;
                for (i, (name, _)) in table.symbols().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", name)?;
                }
                write!(f, ")")
            }
            Self::ScopeEnd => write!(f, "ScopeEnd"),
            Self::Jmp(t) => write!(f, "Jmp({})", t),
            Self::JmpT(t) => write!(f, "JmpT({})", t),
            Self::JmpF(t) => write!(f, "JmpF({})", t),
            Self::JmpTop(t) => write!(f, "JmpTop({})", t),
            Self::JmpFop(t) => write!(f, "JmpFop({})", t),
            Self::Break { target, scopes } => write!(f, "Break({}, scopes={})", target, scopes),
            Self::Continue { target, scopes } => {
                write!(f, "Continue({}, scopes={})", target, scopes)
            }
            Self::EnterFR => write!(f, "EnterFR"),
            Self::RangeNext { exit, count } => write!(f, "RangeNext({}, count={})", exit, count),
            Self::InNext { exit, count } => write!(f, "InNext({}, count={})", exit, count),
            Self::ExitFR => write!(f, "ExitFR"),
            Self::CatchError { catch, slot: Some(slot) } => {
                write!(f, "CatchError({}, {})", catch, slot)
            }
            Self::CatchError { catch, slot: None } => write!(f, "CatchError({})", catch),
            Self::StopCatchError => write!(f, "StopCatchError"),
            Self::Panic => write!(f, "Panic"),
            Self::Recover => write!(f, "Recover"),
            Self::NewFunction(proto) => {
                write!(f, "NewFunction({}, {})", proto.name, proto.block.id)
            }
            Self::Call(n) => write!(f, "Call({})", n),
            Self::VariadicCall(n) => write!(f, "VariadicCall({})", n),
            Self::AsyncCall(n) => write!(f, "AsyncCall({})", n),
            Self::Return => write!(f, "Return"),
            Self::Defer(block) => write!(f, "Defer({})", block.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_flow() {
        assert!(OpCode::Jmp(10).is_control_flow());
        assert!(OpCode::Return.is_control_flow());
        assert!(!OpCode::Binary(BinaryOp::Add).is_control_flow());
    }

    #[test]
    fn test_jump_target_patching() {
        let mut op = OpCode::Break {
            target: 0,
            scopes: 2,
        };
        *op.jump_target_mut().unwrap() = 17;
        assert_eq!(op.jump_target(), Some(17));
        assert_eq!(OpCode::Pop.jump_target(), None);
    }

    #[test]
    fn test_debug_formatting() {
        assert_eq!(format!("{:?}", OpCode::Binary(BinaryOp::Add)), "Binary(+)");
        assert_eq!(format!("{:?}", OpCode::SelfAssign(BinaryOp::Mul)), "SelfAssign(*=)");
        assert_eq!(format!("{:?}", OpCode::Push(Value::from("a"))), "Push(\"a\")");
        assert_eq!(
            format!("{:?}", OpCode::CatchError { catch: 4, slot: Some(SymbolId(2)) }),
            "CatchError(4, #2)"
        );
    }
}
