//! Compiler error taxonomy.
//!
//! Every fallible operation in the compiler returns `Result<T>` and
//! propagates with `?`. Errors are fatal: the first one aborts the run,
//! and the driver renders `(file:line:col, message)` with a snippet.
//! There is no recovery or multi-error collection; downstream tooling
//! relies on "first error, then stop".

use crate::common::source::Span;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CompileError>;

/// The kinds of errors the compiler reports, each with its rendered message.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ErrorKind {
    #[error("{0}")]
    Syntax(String),

    #[error("redeclaration of '{0}'")]
    Redeclaration(String),

    #[error("use of undeclared identifier '{0}'")]
    UndefinedSymbol(String),

    #[error("{0}")]
    TypeMismatch(String),

    #[error("invalid use of incomplete type '{0}'")]
    IncompleteType(String),

    #[error("cannot dereference expression of type '{0}'")]
    InvalidDereference(String),

    #[error("excess elements in initializer")]
    ExcessInitializer,

    #[error("initializer element is not a compile-time constant")]
    NonConstantInitializer,

    #[error("'{0}' statement not within a loop or switch")]
    MisplacedJump(&'static str),

    #[error("use of undefined label '{0}'")]
    UndefinedLabel(String),

    #[error("duplicate symbol '{0}'")]
    DuplicateSymbol(String),
}

/// A fatal compilation error: what went wrong and where.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileError {
    pub kind: ErrorKind,
    pub span: Span,
}

impl CompileError {
    pub fn new(kind: ErrorKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn syntax(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::Syntax(message.into()), span)
    }

    pub fn redeclaration(name: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::Redeclaration(name.into()), span)
    }

    pub fn undefined_symbol(name: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::UndefinedSymbol(name.into()), span)
    }

    pub fn type_mismatch(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::TypeMismatch(message.into()), span)
    }

    pub fn incomplete_type(type_name: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::IncompleteType(type_name.into()), span)
    }

    pub fn invalid_dereference(type_name: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::InvalidDereference(type_name.into()), span)
    }

    pub fn duplicate_symbol(name: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::DuplicateSymbol(name.into()), span)
    }
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl std::error::Error for CompileError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_render_like_a_c_compiler() {
        let e = CompileError::undefined_symbol("x", Span::dummy());
        assert_eq!(e.to_string(), "use of undeclared identifier 'x'");

        let e = CompileError::new(ErrorKind::MisplacedJump("break"), Span::dummy());
        assert_eq!(e.to_string(), "'break' statement not within a loop or switch");

        let e = CompileError::new(ErrorKind::NonConstantInitializer, Span::dummy());
        assert_eq!(
            e.to_string(),
            "initializer element is not a compile-time constant"
        );
    }
}
