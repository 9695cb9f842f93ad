//! Error handling for the C-minus compiler

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Compiler error
///
/// Every variant except `Io` is fatal to a compilation: the first one raised
/// aborts the pipeline and no program image is produced.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // ==================== Parser Errors ====================

    #[error("line {line}: syntax error: expected {expected}, got {got}")]
    Syntax {
        expected: String,
        got: String,
        line: usize,
    },

    // ==================== Semantic Errors ====================

    #[error("line {line}: undeclared name: {name}")]
    UndeclaredName { name: String, line: usize },

    #[error("line {line}: duplicate declaration: {name}")]
    DuplicateDeclaration { name: String, line: usize },

    #[error("line {line}: duplicate function: {name}")]
    DuplicateFunction { name: String, line: usize },

    #[error("line {line}: type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        expected: String,
        got: String,
        line: usize,
    },

    #[error("line {line}: wrong number of arguments to {name}: expected {expected}, got {got}")]
    ArityMismatch {
        name: String,
        expected: usize,
        got: usize,
        line: usize,
    },

    #[error("line {line}: unknown function: {name}")]
    UnknownFunction { name: String, line: usize },

    #[error("line {line}: argument of put must be a variable or array element")]
    InvalidLvalue { line: usize },

    #[error("line {line}: break outside of a loop")]
    BreakOutsideLoop { line: usize },

    #[error("line {line}: invalid constant: {lexeme}")]
    InvalidConstant { lexeme: String, line: usize },

    #[error("line {line}: print with several arguments needs a leading string format")]
    InvalidPrintArguments { line: usize },

    #[error("line {line}: initializer of static {name} reads a local variable or parameter")]
    StaticInitializer { name: String, line: usize },

    #[error("line {line}: malformed syntax tree: {message}")]
    MalformedTree { message: String, line: usize },

    #[error("IO error: {0}")]
    Io(String),
}

impl Error {
    /// Get the source line associated with this error
    pub fn line(&self) -> Option<usize> {
        match self {
            Self::Syntax { line, .. }
            | Self::UndeclaredName { line, .. }
            | Self::DuplicateDeclaration { line, .. }
            | Self::DuplicateFunction { line, .. }
            | Self::TypeMismatch { line, .. }
            | Self::ArityMismatch { line, .. }
            | Self::UnknownFunction { line, .. }
            | Self::InvalidLvalue { line }
            | Self::BreakOutsideLoop { line }
            | Self::InvalidConstant { line, .. }
            | Self::InvalidPrintArguments { line }
            | Self::StaticInitializer { line, .. }
            | Self::MalformedTree { line, .. } => Some(*line),
            Self::Io(_) => None,
        }
    }

    pub(crate) fn mismatch(expected: impl ToString, got: impl ToString, line: usize) -> Self {
        Self::TypeMismatch {
            expected: expected.to_string(),
            got: got.to_string(),
            line,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_is_reported() {
        let err = Error::UndeclaredName { name: "x".into(), line: 7 };
        assert_eq!(err.line(), Some(7));
        assert_eq!(err.to_string(), "line 7: undeclared name: x");
        assert_eq!(Error::Io("gone".into()).line(), None);
    }
}
