//! Diagnostic reporting for the analysis passes.
//!
//! Unresolvable references, missing definitions, and unsupported constructs
//! are reported here and the affected edge is skipped; only core-invariant
//! violations abort (those are assertions, not diagnostics).

use crate::program::Span;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// One reported condition, attached to a source span when one is known.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub span: Option<Span>,
}

impl Diagnostic {
    pub fn warning(message: impl Into<String>, span: Option<Span>) -> Self {
        Diagnostic {
            severity: Severity::Warning,
            message: message.into(),
            span,
        }
    }

    pub fn error(message: impl Into<String>, span: Option<Span>) -> Self {
        Diagnostic {
            severity: Severity::Error,
            message: message.into(),
            span,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.span {
            Some(span) => write!(f, "{}: {} (at {}..{})", self.severity, self.message, span.lo, span.hi),
            None => write!(f, "{}: {}", self.severity, self.message),
        }
    }
}

/// Sink for diagnostics produced during analysis.
pub trait DiagnosticHandler {
    fn report(&mut self, diagnostic: Diagnostic);
}

/// Collects diagnostics in memory; the default handler for tests and for
/// hosts that render diagnostics after the run.
#[derive(Debug, Default)]
pub struct CollectingDiagnosticHandler {
    pub diagnostics: Vec<Diagnostic>,
}

impl CollectingDiagnosticHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
    }
}

impl DiagnosticHandler for CollectingDiagnosticHandler {
    fn report(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }
}
