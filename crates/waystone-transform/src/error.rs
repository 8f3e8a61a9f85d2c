//! Transform errors and diagnostics.

use std::fmt;

use thiserror::Error;

use crate::span::Span;

pub type Result<T, E = TransformError> = std::result::Result<T, E>;

/// A lexer or parser failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SyntaxError {
    pub message: String,
    pub span: Span,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

/// What a [`Diagnostic`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// The module does not lex or parse.
    Syntax,
    /// A directive appears after other statements of its body.
    MisplacedDirective,
    /// A function carries both `"use step"` and `"use workflow"`.
    ConflictingDirectives,
    /// A directive function is not `async`.
    NotAsync,
    /// A workflow is declared inside another function.
    NestedWorkflow,
    /// A workflow has no binding to attach its identifier to.
    UnnamedWorkflow,
    /// A step directive on a getter, setter or constructor.
    InvalidStepTarget,
    /// A step assigns to a variable it captures.
    CapturedAssignment,
}

/// A build-failing problem in one declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    /// Name of the offending declaration, or `<anonymous>`.
    pub declaration: String,
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}: {} (in `{}`)",
            self.line, self.column, self.message, self.declaration
        )
    }
}

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("{path}: transform failed{}", render(.diagnostics))]
    Diagnostics {
        path: String,
        diagnostics: Vec<Diagnostic>,
    },

    #[error(transparent)]
    Runtime(#[from] waystone::Error),
}

impl TransformError {
    /// Diagnostics carried by the error; empty for other failures.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            TransformError::Diagnostics { diagnostics, .. } => diagnostics,
            TransformError::Runtime(_) => &[],
        }
    }
}

fn render(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(|d| format!("\n  {d}"))
        .collect()
}
