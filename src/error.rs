use std::fmt;

use thiserror::Error;

use crate::token::Position;

/// Result alias used by every compiler pass.
pub type Result<T, E = CompileError> = std::result::Result<T, E>;

/// The single error type of the compiler.
///
/// There is no error recovery: the first error aborts the pipeline and is
/// printed as a single line to standard output by the driver.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("Error at line {}, col {}: {kind} error: {message}", .position.line, .position.column)]
pub struct CompileError {
    pub kind: ErrorKind,
    pub position: Position,
    pub message: String,
}

/// Subcategories select the message prefix; all compile errors are handled
/// identically otherwise.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Lexical,
    Syntax,
    Context,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::Lexical => "lexical",
            ErrorKind::Syntax => "syntax",
            ErrorKind::Context => "context",
            ErrorKind::Internal => "internal",
        })
    }
}

impl CompileError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, position: Position) -> CompileError {
        CompileError {
            kind,
            position,
            message: message.into(),
        }
    }

    pub fn lexical(message: impl Into<String>, position: Position) -> CompileError {
        CompileError::new(ErrorKind::Lexical, message, position)
    }

    pub fn syntax(message: impl Into<String>, position: Position) -> CompileError {
        CompileError::new(ErrorKind::Syntax, message, position)
    }

    pub fn context(message: impl Into<String>, position: Position) -> CompileError {
        CompileError::new(ErrorKind::Context, message, position)
    }

    /// A broken compiler invariant. Reported through the same single-line,
    /// exit-code-1 channel as every other compile error.
    pub fn internal(message: impl Into<String>, position: Position) -> CompileError {
        CompileError::new(ErrorKind::Internal, message, position)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn display_format() {
        let error = CompileError::context("x is not declared", Position::new(3, 14));
        assert_eq!(
            error.to_string(),
            "Error at line 3, col 14: context error: x is not declared"
        );
    }

    #[test]
    fn internal_errors_use_the_same_format() {
        let error = CompileError::internal("dangling resolution slot", Position::new(1, 1));
        assert_eq!(
            error.to_string(),
            "Error at line 1, col 1: internal error: dangling resolution slot"
        );
    }
}
