//! Diagnostics sink shared by the front end and the code generation driver.
//!
//! The sink is append-only. Rendering diagnostics for humans is the caller's business;
//! the driver only hands over an identifier plus the context needed to act on it.

use log::debug;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Note,
    Warning,
    Error,
}

/// What went wrong, independent of the message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagId {
    /// No backend target for the triple.
    NoTarget,
    /// The target declined to build a machine for the triple.
    NoTargetMachine,
    ErrorOpeningOutput,
    VerificationFailed,
    CodegenInitFailed,
    EmissionFailed,
    /// Reported by an upstream stage (parser, type checker, lowering).
    Frontend,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub id: DiagId,
    pub message: String,
}

impl Diagnostic {
    pub fn error(id: DiagId, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            id,
            message: message.into(),
        }
    }

    pub fn warning(id: DiagId, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            id,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Note => "note",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{severity}: {}", self.message)
    }
}

/// Destination for diagnostics.
pub trait DiagnosticSink {
    fn diagnose(&self, diagnostic: Diagnostic);

    /// Number of errors reported so far.
    fn error_count(&self) -> usize;

    fn had_error(&self) -> bool {
        self.error_count() > 0
    }
}

/// Collecting sink, safe to share between independent invocations.
#[derive(Debug, Default)]
pub struct DiagnosticEngine {
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl DiagnosticEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything reported so far, in report order.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl DiagnosticSink for DiagnosticEngine {
    fn diagnose(&self, diagnostic: Diagnostic) {
        debug!("diagnostic {:?}: {}", diagnostic.id, diagnostic.message);
        self.diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(diagnostic);
    }

    fn error_count(&self) -> usize {
        self.diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }
}

/// Forwards to a shared sink while counting only the errors reported through it.
///
/// One invocation's failure check must not see errors that other invocations report to
/// the same shared sink in the meantime.
pub struct ScopedDiagnostics<'a> {
    inner: &'a dyn DiagnosticSink,
    errors: AtomicUsize,
}

impl<'a> ScopedDiagnostics<'a> {
    pub fn new(inner: &'a dyn DiagnosticSink) -> Self {
        Self {
            inner,
            errors: AtomicUsize::new(0),
        }
    }
}

impl DiagnosticSink for ScopedDiagnostics<'_> {
    fn diagnose(&self, diagnostic: Diagnostic) {
        if diagnostic.severity == Severity::Error {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        self.inner.diagnose(diagnostic);
    }

    fn error_count(&self) -> usize {
        self.errors.load(Ordering::Relaxed)
    }
}
