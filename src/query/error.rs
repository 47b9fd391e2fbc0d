//! Compile-time errors
//!
//! Every error the compiler raises carries the 1-based line and column of
//! the offending input, so callers can point at it.

use std::fmt;
use thiserror::Error;

/// Stage that rejected the query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompileErrorKind {
    /// Unterminated string or escaped name, invalid character
    Lex,
    /// Input does not match the grammar
    Syntax,
    /// Variable used without being bound first
    Scope,
    /// Well-formed but meaningless (aggregate in WHERE, RETURN not last, ...)
    Semantic,
}

impl fmt::Display for CompileErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompileErrorKind::Lex => "Lex",
            CompileErrorKind::Syntax => "Syntax",
            CompileErrorKind::Scope => "Scope",
            CompileErrorKind::Semantic => "Semantic",
        };
        f.write_str(name)
    }
}

/// A query that failed to compile
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} error at {line}:{column}: {message}")]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl CompileError {
    pub fn new(kind: CompileErrorKind, line: usize, column: usize, message: impl Into<String>) -> Self {
        Self {
            kind,
            line,
            column,
            message: message.into(),
        }
    }

    pub fn lex(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self::new(CompileErrorKind::Lex, line, column, message)
    }

    pub fn syntax(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self::new(CompileErrorKind::Syntax, line, column, message)
    }

    pub fn scope(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self::new(CompileErrorKind::Scope, line, column, message)
    }

    pub fn semantic(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self::new(CompileErrorKind::Semantic, line, column, message)
    }
}

pub type CompileResult<T> = Result<T, CompileError>;
