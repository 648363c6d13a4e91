use crate::vm::{FrameTrace, InstructionEvent};

/// How a stopped task was resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResumeCommand {
    Continue,
    Next,
    StepIn,
    StepOut,
}

/// A pending step of one task, recorded from the frame it stopped in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StepIntent {
    pub(crate) command: ResumeCommand,
    pub(crate) depth: usize,
    pub(crate) line: u32,
}

impl StepIntent {
    /// `None` for `Continue`.
    pub(crate) fn new(command: ResumeCommand, frame: &FrameTrace) -> Option<Self> {
        match command {
            ResumeCommand::Continue => None,
            _ => Some(StepIntent {
                command,
                depth: frame.depth,
                line: frame.line(),
            }),
        }
    }

    /// Whether `frame`, of the same task, is where this step ends.
    ///
    /// - next: a new line in the same frame or one of its callers
    /// - step in: any new line, including inside a callee
    /// - step out: any instruction after the frame has returned
    pub(crate) fn is_satisfied(&self, frame: &FrameTrace, event: InstructionEvent) -> bool {
        match self.command {
            ResumeCommand::Continue => false,
            ResumeCommand::Next => event.line_changed && frame.depth <= self.depth,
            ResumeCommand::StepIn => event.line_changed,
            ResumeCommand::StepOut => frame.depth < self.depth,
        }
    }
}
