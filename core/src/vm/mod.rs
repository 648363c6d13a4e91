mod assembler;
mod code;
mod frame;
mod function_adapter;
mod instruction_set;
mod iterator;
mod observer;
mod runtime;
mod stack;
mod wait_group;

pub use assembler::{Assembler, Label};
pub use code::{CodeBlock, Program};
pub use function_adapter::{FromValue, FunctionAdapter, IntoValue};
pub use instruction_set::{Code, OpCode, SourceSpan};
pub use observer::{ExecutionObserver, FrameTrace, InstructionEvent, TaskInfo};
pub use runtime::{GlobalFallback, NativeContext, TaskFailure, VM};
pub use wait_group::WaitGroup;

pub(crate) use stack::Stack;
