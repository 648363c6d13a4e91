//! Builder for code streams.
//!
//! The assembler is the reference producer of [`CodeBlock`]s for embedders
//! and tests. It tracks symbol tables, the current source position, labels
//! with back-patching, and the bookkeeping the interpreter relies on: the
//! number of open scopes for `Break`/`Continue`, and the scope every try body
//! opens. It has no notion of source syntax.
//!
//! ```ignore
//! let mut asm = Assembler::new(Some("main.kelp"));
//! asm.line(1).push(1).store("a");
//! asm.line(2).load("a").push(2).binary(BinaryOp::Add).store("b");
//! let program = asm.finish();
//! ```

use std::sync::Arc;

use ecow::EcoString;

use crate::scope::{SymbolId, SymbolTable};
use crate::values::{BinaryOp, CompareOp, FunctionProto, UnaryOp, Value};
use crate::vm::{Code, CodeBlock, OpCode, Program, SourceSpan};

/// A position in the code stream, bound once and referenced by jumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

struct LoopContext {
    head: Label,
    exit: Label,
    depth: usize,
}

pub struct Assembler {
    file: Option<Arc<str>>,
    /// Innermost table last.
    tables: Vec<Arc<SymbolTable>>,
    codes: Vec<Code>,
    span: SourceSpan,
    labels: Vec<Option<usize>>,
    fixups: Vec<(usize, Label)>,
    loops: Vec<LoopContext>,
    scope_depth: usize,
}

impl Assembler {
    pub fn new(file: Option<&str>) -> Self {
        Self::with_table(file.map(Arc::from), SymbolTable::new_root())
    }

    fn with_table(file: Option<Arc<str>>, table: Arc<SymbolTable>) -> Self {
        Assembler {
            file,
            tables: vec![table],
            codes: Vec::new(),
            span: SourceSpan::line(1),
            labels: Vec::new(),
            fixups: Vec::new(),
            loops: Vec::new(),
            scope_depth: 0,
        }
    }

    /// Current symbol table.
    pub fn table(&self) -> &Arc<SymbolTable> {
        // Never empty: the root table is pushed on construction and
        // `end_scope` keeps it.
        &self.tables[self.tables.len() - 1]
    }

    /// Index the next instruction will have.
    pub fn position(&self) -> usize {
        self.codes.len()
    }

    /// Attribute following instructions to `line`, column 1.
    pub fn line(&mut self, line: u32) -> &mut Self {
        self.span = SourceSpan::line(line);
        self
    }

    /// Attribute following instructions to an explicit span.
    pub fn span(&mut self, span: SourceSpan) -> &mut Self {
        self.span = span;
        self
    }

    pub fn emit(&mut self, op: OpCode) -> &mut Self {
        self.codes.push(Code::new(op, self.span));
        self
    }

    // ========================================================================
    // Symbols
    // ========================================================================

    /// Declare `name` in the current table.
    pub fn declare(&mut self, name: &str) -> SymbolId {
        self.table().declare(name)
    }

    /// Resolve `name` through the table chain, declaring it in the current
    /// table if it is unknown.
    pub fn resolve(&mut self, name: &str) -> SymbolId {
        match self.table().lookup(name) {
            Some(id) => id,
            None => self.declare(name),
        }
    }

    // ========================================================================
    // Labels
    // ========================================================================

    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind `label` to the next instruction.
    pub fn bind(&mut self, label: Label) -> &mut Self {
        self.labels[label.0] = Some(self.codes.len());
        self
    }

    /// Emit a jumping instruction whose target is patched to `label`.
    pub fn emit_jump(&mut self, op: OpCode, label: Label) -> &mut Self {
        self.fixups.push((self.codes.len(), label));
        self.emit(op)
    }

    pub fn jmp(&mut self, label: Label) -> &mut Self {
        self.emit_jump(OpCode::Jmp(0), label)
    }

    pub fn jmp_if_true(&mut self, label: Label) -> &mut Self {
        self.emit_jump(OpCode::JmpT(0), label)
    }

    pub fn jmp_if_false(&mut self, label: Label) -> &mut Self {
        self.emit_jump(OpCode::JmpF(0), label)
    }

    // ========================================================================
    // Shorthands
    // ========================================================================

    pub fn push(&mut self, value: impl Into<Value>) -> &mut Self {
        self.emit(OpCode::Push(value.into()))
    }

    pub fn pop(&mut self) -> &mut Self {
        self.emit(OpCode::Pop)
    }

    /// `PushRef` of `name`.
    pub fn load(&mut self, name: &str) -> &mut Self {
        let id = self.resolve(name);
        self.emit(OpCode::PushRef(id))
    }

    /// `PushLeftRef` of `name`.
    pub fn load_left(&mut self, name: &str) -> &mut Self {
        let id = self.resolve(name);
        self.emit(OpCode::PushLeftRef(id))
    }

    /// Pop the top of the stack into `name` (`FastAssign`).
    pub fn store(&mut self, name: &str) -> &mut Self {
        let id = self.resolve(name);
        self.emit(OpCode::FastAssign(id))
    }

    pub fn global(&mut self, name: &str) -> &mut Self {
        self.emit(OpCode::PushId(EcoString::from(name)))
    }

    pub fn binary(&mut self, op: BinaryOp) -> &mut Self {
        self.emit(OpCode::Binary(op))
    }

    pub fn compare(&mut self, op: CompareOp) -> &mut Self {
        self.emit(OpCode::Compare(op))
    }

    pub fn unary(&mut self, op: UnaryOp) -> &mut Self {
        self.emit(OpCode::Unary(op))
    }

    pub fn call(&mut self, args: usize) -> &mut Self {
        self.emit(OpCode::Call(args))
    }

    pub fn ret(&mut self) -> &mut Self {
        self.emit(OpCode::Return)
    }

    /// Load global function `name`, push `args`, call it, and drop the result.
    pub fn call_global(&mut self, name: &str, args: Vec<Value>) -> &mut Self {
        self.global(name);
        let count = args.len();
        for arg in args {
            self.push(arg);
        }
        self.call(count).pop()
    }

    // ========================================================================
    // Scopes & structured control flow
    // ========================================================================

    /// Open a child scope (`NewScope`) with a fresh table.
    pub fn begin_scope(&mut self) -> &mut Self {
        let table = SymbolTable::new_child(self.table());
        self.tables.push(table.clone());
        self.scope_depth += 1;
        self.emit(OpCode::NewScope(table))
    }

    /// Close the innermost scope (`ScopeEnd`).
    pub fn end_scope(&mut self) -> &mut Self {
        if self.tables.len() > 1 {
            self.tables.pop();
        }
        self.scope_depth = self.scope_depth.saturating_sub(1);
        self.emit(OpCode::ScopeEnd)
    }

    /// `if cond { then } else { otherwise }`. `cond` must push one value.
    pub fn if_else(
        &mut self,
        cond: impl FnOnce(&mut Self),
        then: impl FnOnce(&mut Self),
        otherwise: impl FnOnce(&mut Self),
    ) -> &mut Self {
        let else_label = self.label();
        let end = self.label();
        cond(self);
        self.jmp_if_false(else_label);
        self.begin_scope();
        then(self);
        self.end_scope();
        self.jmp(end);
        self.bind(else_label);
        self.begin_scope();
        otherwise(self);
        self.end_scope();
        self.bind(end)
    }

    /// `for key, value := range iterable { body }` (or a single key when
    /// `value` is `None`). The loop variables live in the enclosing scope and
    /// keep their last values after the loop.
    pub fn for_range(
        &mut self,
        key: &str,
        value: Option<&str>,
        iterable: impl FnOnce(&mut Self),
        body: impl FnOnce(&mut Self),
    ) -> &mut Self {
        let count = if value.is_some() { 2 } else { 1 };
        self.emit_loop(
            key,
            value,
            iterable,
            body,
            OpCode::RangeNext { exit: 0, count },
        )
    }

    /// `for item in iterable { body }`: binds elements (map keys for maps),
    /// or key and value when `value` is given.
    pub fn for_in(
        &mut self,
        item: &str,
        value: Option<&str>,
        iterable: impl FnOnce(&mut Self),
        body: impl FnOnce(&mut Self),
    ) -> &mut Self {
        let count = if value.is_some() { 2 } else { 1 };
        self.emit_loop(
            item,
            value,
            iterable,
            body,
            OpCode::InNext { exit: 0, count },
        )
    }

    fn emit_loop(
        &mut self,
        first: &str,
        second: Option<&str>,
        iterable: impl FnOnce(&mut Self),
        body: impl FnOnce(&mut Self),
        next: OpCode,
    ) -> &mut Self {
        let head = self.label();
        let exit = self.label();
        let done = self.label();
        let header = self.span;
        iterable(self);
        self.emit(OpCode::EnterFR);
        self.bind(head);
        self.emit_jump(next, done);
        if let Some(second) = second {
            self.store(second);
        }
        self.store(first);

        self.loops.push(LoopContext {
            head,
            exit,
            depth: self.scope_depth,
        });
        self.begin_scope();
        body(self);
        // Loop bookkeeping belongs to the header line, not the body's last.
        self.span = header;
        self.end_scope();
        self.loops.pop();

        self.jmp(head);
        // `Break` lands on the same `ExitFR` as exhaustion.
        self.bind(done);
        self.bind(exit);
        self.emit(OpCode::ExitFR)
    }

    /// `Break` out of the innermost loop, closing the scopes opened since.
    pub fn break_loop(&mut self) -> &mut Self {
        match self.loops.last() {
            Some(ctx) => {
                let (exit, scopes) = (ctx.exit, self.scope_depth - ctx.depth);
                self.emit_jump(OpCode::Break { target: 0, scopes }, exit)
            }
            None => self.emit(OpCode::Halt),
        }
    }

    /// `Continue` with the innermost loop.
    pub fn continue_loop(&mut self) -> &mut Self {
        match self.loops.last() {
            Some(ctx) => {
                let (head, scopes) = (ctx.head, self.scope_depth - ctx.depth);
                self.emit_jump(OpCode::Continue { target: 0, scopes }, head)
            }
            None => self.emit(OpCode::Halt),
        }
    }

    /// `try { body } catch name { handler } finally { finally }`.
    ///
    /// The finally code is emitted once, after the handler, and runs on the
    /// fall-through path of both the body and the handler.
    pub fn try_catch(
        &mut self,
        body: impl FnOnce(&mut Self),
        catch_name: Option<&str>,
        handler: impl FnOnce(&mut Self),
        finally: impl FnOnce(&mut Self),
    ) -> &mut Self {
        let catch = self.label();
        let end = self.label();
        let slot = catch_name.map(|name| self.declare(name));
        self.emit_jump(OpCode::CatchError { catch: 0, slot }, catch);
        self.begin_scope();
        body(self);
        self.end_scope();
        self.emit(OpCode::StopCatchError);
        self.jmp(end);
        self.bind(catch);
        self.begin_scope();
        handler(self);
        self.end_scope();
        self.bind(end);
        finally(self);
        self
    }

    // ========================================================================
    // Functions
    // ========================================================================

    /// Emit `NewFunction` for a function literal. `body` assembles the
    /// function's code against a child table holding the parameters.
    pub fn function(
        &mut self,
        name: &str,
        params: &[&str],
        variadic: bool,
        body: impl FnOnce(&mut Assembler),
    ) -> &mut Self {
        let table = SymbolTable::new_child(self.table());
        let params: Vec<SymbolId> = params.iter().map(|param| table.declare(param)).collect();
        let mut inner = Assembler::with_table(self.file.clone(), table.clone());
        inner.span = self.span;
        body(&mut inner);
        let symbol = self.table().lookup(name);
        let proto = FunctionProto {
            name: EcoString::from(name),
            symbol,
            params,
            variadic,
            block: inner.finish_block(),
            table,
        };
        self.emit(OpCode::NewFunction(Arc::new(proto)))
    }

    /// Emit `Defer` for a block assembled against the current table.
    pub fn defer(&mut self, body: impl FnOnce(&mut Assembler)) -> &mut Self {
        let mut inner = Assembler::with_table(self.file.clone(), self.table().clone());
        inner.span = self.span;
        body(&mut inner);
        let block = inner.finish_block();
        self.emit(OpCode::Defer(block))
    }

    // ========================================================================
    // Output
    // ========================================================================

    /// Patch jumps and build the block. Labels that were never bound resolve
    /// to the end of the block.
    pub fn finish_block(mut self) -> Arc<CodeBlock> {
        let end = self.codes.len();
        for (index, label) in std::mem::take(&mut self.fixups) {
            let target = self.labels[label.0].unwrap_or(end);
            if let Some(slot) = self.codes[index].op.jump_target_mut() {
                *slot = target;
            }
        }
        Arc::new(CodeBlock::new(self.file, self.codes))
    }

    pub fn finish(self) -> Program {
        let table = self.tables[0].clone();
        Program {
            block: self.finish_block(),
            table,
        }
    }
}
