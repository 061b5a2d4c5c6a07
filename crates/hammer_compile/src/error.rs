//! Runtime error type (§7).
//!
//! Compile-time errors (lex/parse/compile) reuse [`hammer_base::SpannedError`]
//! and [`hammer_base::Diagnostics`] directly - scanning, parsing, and
//! compiling all recover locally and accumulate into the same diagnostics
//! sink. Runtime errors are a distinct type: they carry opcode context and a
//! trace of active call frames rather than a single source span, and they
//! always terminate the current `run()` rather than being collected.

use std::fmt;

/// Taxonomy of what went wrong inside the VM (§7's runtime error kinds).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeErrorKind {
    WrongOperandType,
    ArityMismatch,
    OutOfRangeIndex,
    DuplicateGlobal,
    MissingGlobal,
    TreeMismatch,
    StackOverflow,
}

impl fmt::Display for RuntimeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RuntimeErrorKind::WrongOperandType => "wrong operand type",
            RuntimeErrorKind::ArityMismatch => "arity mismatch",
            RuntimeErrorKind::OutOfRangeIndex => "out-of-range index",
            RuntimeErrorKind::DuplicateGlobal => "duplicate global",
            RuntimeErrorKind::MissingGlobal => "missing global",
            RuntimeErrorKind::TreeMismatch => "tree mismatch in destructuring",
            RuntimeErrorKind::StackOverflow => "stack overflow",
        };
        f.write_str(s)
    }
}

/// One entry in a runtime error's frame trace: the function name (`None` for
/// the top-level script frame) and the source line active when the error
/// was raised.
#[derive(Debug, Clone)]
pub struct FrameTrace {
    pub name: Option<String>,
    pub line: u32,
}

#[derive(Debug, Clone)]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub message: String,
    /// Innermost frame first.
    pub trace: Vec<FrameTrace>,
}

impl RuntimeError {
    pub fn new(kind: RuntimeErrorKind, message: impl Into<String>, trace: Vec<FrameTrace>) -> Self {
        RuntimeError { kind, message: message.into(), trace }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}: {}", self.kind, self.message)?;
        for frame in &self.trace {
            match &frame.name {
                Some(name) => writeln!(f, "  at {} (line {})", name, frame.line)?,
                None => writeln!(f, "  at script (line {})", frame.line)?,
            }
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_message() {
        let err = RuntimeError::new(RuntimeErrorKind::ArityMismatch, "expected 2 arguments, got 1", vec![]);
        let text = err.to_string();
        assert!(text.contains("arity mismatch"));
        assert!(text.contains("expected 2 arguments"));
    }

    #[test]
    fn display_includes_frame_trace_in_innermost_first_order() {
        let err = RuntimeError::new(
            RuntimeErrorKind::MissingGlobal,
            "no global named 'foo'",
            vec![
                FrameTrace { name: Some("inner".to_string()), line: 10 },
                FrameTrace { name: None, line: 3 },
            ],
        );
        let text = err.to_string();
        let inner_pos = text.find("inner").unwrap();
        let script_pos = text.find("script").unwrap();
        assert!(inner_pos < script_pos);
    }
}
