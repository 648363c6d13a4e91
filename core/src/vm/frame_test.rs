use std::sync::Arc;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;

use crate::api::{ExecutionContext, VmOptions};
use crate::errors::{BugError, ExecutionError, ExecutionErrorKind, ResourceExceededError};
use crate::test_utils::init_test_logging;
use crate::values::Value;
use crate::vm::{
    Assembler, CodeBlock, ExecutionObserver, FrameTrace, InstructionEvent, OpCode, Program, VM,
};

fn execute(vm: &VM, program: &Program) -> Result<(), ExecutionError> {
    vm.execute_code(&ExecutionContext::new(), "", program)
}

fn bug_of(result: Result<(), ExecutionError>) -> BugError {
    match result.map_err(|err| err.kind) {
        Err(ExecutionErrorKind::Bug(bug)) => bug,
        other => panic!("expected a bug error, got {:?}", other),
    }
}

#[test]
fn test_empty_code_is_a_bug() {
    let program = Program {
        block: Arc::new(CodeBlock::new(None, Vec::new())),
        table: crate::scope::SymbolTable::new_root(),
    };
    let bug = bug_of(execute(&VM::default(), &program));
    assert!(matches!(bug, BugError::EmptyCode));
}

#[test]
fn test_jump_out_of_range() {
    let mut asm = Assembler::new(None);
    asm.emit(OpCode::Jmp(99));
    let bug = bug_of(execute(&VM::default(), &asm.finish()));
    assert!(matches!(bug, BugError::JumpOutOfRange { target: 99, len: 1 }));
}

#[test]
fn test_break_cannot_escape_function() {
    let mut asm = Assembler::new(None);
    asm.function("f", &[], false, |f| {
        f.emit(OpCode::Break { target: 0, scopes: 1 });
    });
    asm.call(0).pop();
    let bug = bug_of(execute(&VM::default(), &asm.finish()));
    assert!(matches!(
        bug,
        BugError::EscapingJump { requested: 1, available: 0, .. }
    ));
}

#[test]
fn test_unbalanced_bookkeeping_is_a_bug() {
    let vm = VM::default();

    let mut asm = Assembler::new(None);
    asm.emit(OpCode::ScopeEnd);
    assert!(matches!(bug_of(execute(&vm, &asm.finish())), BugError::ScopeUnderflow));

    let mut asm = Assembler::new(None);
    asm.emit(OpCode::StopCatchError);
    assert!(matches!(bug_of(execute(&vm, &asm.finish())), BugError::TryUnderflow));

    let mut asm = Assembler::new(None);
    asm.pop();
    assert!(matches!(
        bug_of(execute(&vm, &asm.finish())),
        BugError::StackUnderflow { op: "Pop" }
    ));

    let mut asm = Assembler::new(None);
    asm.emit(OpCode::ExitFR);
    assert!(matches!(
        bug_of(execute(&vm, &asm.finish())),
        BugError::IteratorUnderflow { op: "ExitFR" }
    ));
}

#[test]
fn test_operand_stack_limit() {
    let vm = VM::new(VmOptions {
        max_stack_size: 4,
        ..VmOptions::default()
    });
    let mut asm = Assembler::new(None);
    for i in 0..5 {
        asm.push(i);
    }
    let err = execute(&vm, &asm.finish()).unwrap_err();
    assert!(matches!(
        err.kind,
        ExecutionErrorKind::ResourceExceeded(ResourceExceededError::OperandStackOverflow {
            max_size: 4
        })
    ));
}

#[test]
fn test_break_out_of_try_drops_the_region() {
    // for i := range range(3) { try { break } catch e { caught = e } }
    // panic("after")
    let mut asm = Assembler::new(None);
    asm.declare("caught");
    asm.for_range(
        "i",
        None,
        |a| {
            a.global("range").push(3).call(1);
        },
        |a| {
            a.try_catch(
                |body| {
                    body.break_loop();
                },
                Some("e"),
                |handler| {
                    handler.load("e").store("caught");
                },
                |_| {},
            );
        },
    );
    asm.push("after").emit(OpCode::Panic);
    let vm = VM::default();
    let err = execute(&vm, &asm.finish()).unwrap_err();

    assert_eq!(err.to_value(), Some(Value::from("after")));
    assert_eq!(vm.get_global("caught"), None);
    assert_eq!(vm.get_global("i"), Some(Value::Int(0)));
}

#[derive(Default)]
struct Recorder {
    log: Mutex<Vec<String>>,
}

impl Recorder {
    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.log.lock())
    }
}

impl ExecutionObserver for Recorder {
    fn on_frame_enter(&self, frame: &Arc<FrameTrace>) {
        self.log.lock().push(format!("enter {} depth {}", frame.name, frame.depth));
    }

    fn on_frame_exit(&self, frame: &Arc<FrameTrace>) {
        self.log.lock().push(format!("exit {}", frame.name));
    }

    fn on_instruction(&self, _vm: &VM, frame: &Arc<FrameTrace>, event: InstructionEvent) {
        if event.line_changed {
            let jumped = if event.jumped { " (jump)" } else { "" };
            self.log
                .lock()
                .push(format!("{}:{}{}", frame.name, frame.line(), jumped));
        }
    }

    fn on_error(&self, _vm: &VM, frame: &Arc<FrameTrace>, error: &ExecutionError) {
        self.log
            .lock()
            .push(format!("error in {}: {}", frame.name, error.kind));
    }
}

#[test]
fn test_observer_sees_frames_and_lines() {
    init_test_logging();
    // 1: f := () => {
    // 10:    return 1
    //    }
    // 2: x := f()
    // 3: y := x
    let mut asm = Assembler::new(Some("trace.kelp"));
    asm.line(1).function("f", &[], false, |f| {
        f.line(10).push(1).ret();
    });
    asm.store("f");
    asm.line(2).load("f").call(0).store("x");
    asm.line(3).load("x").store("y");

    let vm = VM::default();
    let recorder = Arc::new(Recorder::default());
    let observer: Arc<dyn ExecutionObserver> = recorder.clone();
    vm.set_observer(Some(observer));
    execute(&vm, &asm.finish()).unwrap();

    assert_eq!(
        recorder.take(),
        vec![
            "enter main depth 1",
            "main:1",
            "main:2",
            "enter f depth 2",
            "f:10",
            "exit f",
            "main:3",
            "exit main",
        ]
    );
}

#[test]
fn test_observer_hears_each_error_once() {
    let mut asm = Assembler::new(None);
    asm.function("inner", &[], false, |f| {
        f.push("deep").emit(OpCode::Panic);
    });
    asm.store("inner");
    asm.function("outer", &[], false, |f| {
        f.load("inner").call(0).ret();
    });
    asm.store("outer");
    asm.load("outer").call(0).pop();

    let vm = VM::default();
    let recorder = Arc::new(Recorder::default());
    let observer: Arc<dyn ExecutionObserver> = recorder.clone();
    vm.set_observer(Some(observer));
    execute(&vm, &asm.finish()).unwrap_err();

    let errors: Vec<_> = recorder
        .take()
        .into_iter()
        .filter(|entry| entry.starts_with("error"))
        .collect();
    assert_eq!(errors, vec!["error in inner: deep"]);
}
