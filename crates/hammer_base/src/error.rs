//! Error types with source location tracking.
//!
//! All errors in hammer carry a [`Span`] indicating where in the source text
//! the problem occurred. This enables precise, contextual error messages
//! across the scanner, parser, compiler, and VM.
//!
//! # Example
//!
//! ```
//! use hammer_base::{SpannedError, Span, Result};
//!
//! fn parse_number(s: &str) -> Result<i32> {
//!     s.parse().map_err(|_| SpannedError::new(
//!         format!("invalid number: '{}'", s),
//!         Span::new(0, s.len(), 1),
//!     ))
//! }
//!
//! let err = parse_number("abc").unwrap_err();
//! assert!(err.to_string().contains("invalid number"));
//! ```

use crate::span::Span;
use std::fmt;

/// An error annotated with its source location.
///
/// Implements [`std::error::Error`] and [`fmt::Display`]. The display format is:
/// `{message} at line {line}`.
#[derive(Debug, Clone)]
pub struct SpannedError {
    /// Human-readable error description.
    pub message: String,
    /// Location in source where the error occurred.
    pub span: Span,
}

impl SpannedError {
    /// Creates an error with the given message and source location.
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

impl fmt::Display for SpannedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at line {}", self.message, self.span.line)
    }
}

impl std::error::Error for SpannedError {}

/// Alias for `std::result::Result<T, SpannedError>`.
pub type Result<T> = std::result::Result<T, SpannedError>;

/// Accumulates diagnostics produced during the compile-time phases
/// (scanning, parsing, compiling), which recover locally so that as many
/// problems as possible surface from a single pass.
///
/// A driver must refuse to run the resulting chunk whenever
/// [`Diagnostics::has_errors`] is true.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    errors: Vec<SpannedError>,
    /// Line of the most recently reported error, used to suppress duplicate
    /// reports from the same panic-mode recovery region.
    last_line: Option<u32>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an error unless it falls on the same line as the last one,
    /// which avoids cascades of noise from a single syntax mistake.
    pub fn report(&mut self, error: SpannedError) {
        if self.last_line == Some(error.span.line) {
            return;
        }
        self.last_line = Some(error.span.line);
        self.errors.push(error);
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn errors(&self) -> &[SpannedError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<SpannedError> {
        self.errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spanned_error_display() {
        let err = SpannedError::new("test error", Span::new(5, 10, 3));
        let display = format!("{}", err);
        assert!(display.contains("test error"));
        assert!(display.contains("line 3"));
    }

    #[test]
    fn diagnostics_suppresses_duplicates_on_same_line() {
        let mut diags = Diagnostics::new();
        diags.report(SpannedError::new("first", Span::new(0, 1, 5)));
        diags.report(SpannedError::new("second", Span::new(2, 3, 5)));
        diags.report(SpannedError::new("third", Span::new(0, 1, 6)));
        assert_eq!(diags.errors().len(), 2);
        assert!(diags.has_errors());
    }
}
