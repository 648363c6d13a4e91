//! Error rendering using ariadne
//!
//! Uncaught errors carry the position of the instruction that raised them
//! and the source text of the program. This module turns both into an
//! annotated report pointing at the offending line.

use std::io::Write;
use std::ops::Range;

use ariadne::{Color, Label, Report, ReportKind, Source};
use kelp_core::errors::{ExecutionError, ExecutionErrorKind};
use kelp_core::vm::SourceSpan;

/// Render an error with formatting to stderr
///
/// # Example
/// ```no_run
/// use kelp::{Assembler, ExecutionContext, VM, render_error};
///
/// let mut asm = Assembler::new(Some("main.kelp"));
/// asm.line(1).push(1).push(0).binary(kelp::values::BinaryOp::Div).pop();
/// let vm = VM::default();
/// if let Err(err) = vm.execute_code(&ExecutionContext::new(), "x := 1 / 0", &asm.finish()) {
///     render_error(&err);
/// }
/// ```
pub fn render_error(error: &ExecutionError) {
    render_error_to_writer(error, &mut std::io::stderr(), true).ok();
}

/// Render an error to a specific writer
pub fn render_error_to(error: &ExecutionError, writer: &mut dyn Write) -> std::io::Result<()> {
    render_error_to_writer(error, writer, true)
}

/// Render an error to a String (useful for logs and UIs)
pub fn render_error_to_string(error: &ExecutionError) -> String {
    let mut buf = Vec::new();
    render_error_to_writer(error, &mut buf, true).ok();
    String::from_utf8_lossy(&buf).to_string()
}

/// Render an error to a String without color codes (useful for tests)
pub fn render_error_to_string_no_color(error: &ExecutionError) -> String {
    let mut buf = Vec::new();
    render_error_to_writer(error, &mut buf, false).ok();
    String::from_utf8_lossy(&buf).to_string()
}

fn code_of(kind: &ExecutionErrorKind) -> &'static str {
    match kind {
        ExecutionErrorKind::Runtime(_) => "runtime",
        ExecutionErrorKind::ResourceExceeded(_) => "resource",
        ExecutionErrorKind::Bug(_) => "bug",
        ExecutionErrorKind::Cancelled => "cancelled",
    }
}

fn render_error_to_writer(
    error: &ExecutionError,
    writer: &mut dyn Write,
    use_color: bool,
) -> std::io::Result<()> {
    let message = error.kind.to_string();
    let located = error.source.as_deref().zip(error.position.as_ref());
    let Some((source, position)) = located else {
        return writeln!(writer, "Error: {}", error);
    };
    let Some(range) = char_range(source, position.span) else {
        return writeln!(writer, "Error: {}", error);
    };
    let file = position.file.as_deref().unwrap_or("<script>");

    let mut report = Report::build(ReportKind::Error, (file, range.clone()))
        .with_code(code_of(&error.kind))
        .with_message(&message)
        .with_config(ariadne::Config::default().with_color(use_color))
        .with_label(
            Label::new((file, range))
                .with_message(&message)
                .with_color(Color::Red),
        );
    if matches!(error.kind, ExecutionErrorKind::Bug(_)) {
        report = report.with_note("the code stream is malformed; report this to the compiler authors");
    }
    report
        .finish()
        .write((file, Source::from(source)), &mut *writer)
}

/// Character range of `span` in `source`. Spans that end where they start
/// cover the rest of their line.
fn char_range(source: &str, span: SourceSpan) -> Option<Range<usize>> {
    if span.start_line == 0 {
        return None;
    }
    let (line_start, line_len) = line_bounds(source, span.start_line)?;
    let column = span.start_column.max(1) as usize - 1;
    let start = line_start + column.min(line_len);

    let end = if (span.end_line, span.end_column) > (span.start_line, span.start_column) {
        match line_bounds(source, span.end_line) {
            Some((end_start, end_len)) => {
                end_start + (span.end_column.max(1) as usize - 1).min(end_len)
            }
            None => line_start + line_len,
        }
    } else {
        line_start + line_len
    };
    Some(start..end.max(start + 1))
}

/// Character offset and length (without the newline) of 1-based `line`.
fn line_bounds(source: &str, line: u32) -> Option<(usize, usize)> {
    let mut offset = 0;
    for (index, text) in source.split('\n').enumerate() {
        let len = text.chars().count();
        if index + 1 == line as usize {
            return Some((offset, len));
        }
        offset += len + 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use kelp_core::values::BinaryOp;
    use kelp_core::{Assembler, ExecutionContext, OpCode, VM};
    use pretty_assertions::assert_eq;

    fn failing_run(source: &str, build: impl FnOnce(&mut Assembler)) -> ExecutionError {
        let mut asm = Assembler::new(Some("main.kelp"));
        build(&mut asm);
        VM::default()
            .execute_code(&ExecutionContext::new(), source, &asm.finish())
            .unwrap_err()
    }

    #[test]
    fn test_render_runtime_error_points_at_line() {
        let source = "a := 1\nb := a / 0\n";
        let err = failing_run(source, |asm| {
            asm.line(1).push(1).store("a");
            asm.line(2).load("a").push(0).binary(BinaryOp::Div).store("b");
        });

        let output = render_error_to_string_no_color(&err);
        assert!(output.contains("division by zero"));
        assert!(output.contains("b := a / 0"));
        assert!(output.contains("main.kelp"));
        assert!(output.contains("runtime"));
        assert!(output.lines().count() > 1);
    }

    #[test]
    fn test_render_without_source_falls_back_to_one_line() {
        let err = failing_run("", |asm| {
            asm.line(3).push("boom").emit(OpCode::Panic);
        });

        assert_eq!(
            render_error_to_string_no_color(&err),
            "Error: boom at main.kelp:3:1\n"
        );
    }

    #[test]
    fn test_bug_errors_get_a_note() {
        let err = failing_run("halt\n", |asm| {
            asm.line(1).emit(OpCode::Halt);
        });

        let output = render_error_to_string_no_color(&err);
        assert!(output.contains("BUG: halt instruction reached"));
        assert!(output.contains("malformed"));
    }

    #[test]
    fn test_char_range() {
        let source = "one\ntwö three\n";
        assert_eq!(char_range(source, SourceSpan::line(2)), Some(4..13));
        assert_eq!(char_range(source, SourceSpan::new(2, 5, 2, 10)), Some(8..13));
        assert_eq!(char_range(source, SourceSpan::line(9)), None);
        assert_eq!(char_range(source, SourceSpan::default()), None);
    }
}
