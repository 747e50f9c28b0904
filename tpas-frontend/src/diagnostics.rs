use crate::span::SpanLoc;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DiagnosticKind {
    Info,
    Warning,
    Error,
}

pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub locus: SpanLoc,
    pub message: String,
    pub extra_diagnostics: Vec<Diagnostic>,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, locus: SpanLoc, message: String) -> Diagnostic {
        Diagnostic {
            kind,
            locus,
            message,
            extra_diagnostics: vec![],
        }
    }

    pub fn new_with_extra(
        kind: DiagnosticKind,
        locus: SpanLoc,
        message: String,
        extra_diagnostics: Vec<Diagnostic>,
    ) -> Diagnostic {
        Diagnostic {
            kind,
            locus,
            message,
            extra_diagnostics,
        }
    }
}

/// Collects the diagnostics of a compilation job. Analysis and lowering keep
/// going after an error so more of them can be surfaced; the final error
/// count decides whether the job failed.
pub struct Diagnostics {
    diagnostics: Vec<Diagnostic>,
    num_error: usize,
}

impl Diagnostics {
    pub fn new() -> Diagnostics {
        Diagnostics {
            diagnostics: vec![],
            num_error: 0,
        }
    }

    pub fn add(&mut self, kind: DiagnosticKind, locus: SpanLoc, message: String) {
        if kind == DiagnosticKind::Error {
            self.num_error += 1;
        }
        self.diagnostics.push(Diagnostic::new(kind, locus, message));
    }

    pub fn error(&mut self, locus: SpanLoc, message: String) {
        self.add(DiagnosticKind::Error, locus, message);
    }

    pub fn warn(&mut self, locus: SpanLoc, message: String) {
        self.add(DiagnosticKind::Warning, locus, message);
    }

    pub fn add_with_extra(
        &mut self,
        kind: DiagnosticKind,
        locus: SpanLoc,
        message: String,
        extra_diagnostics: Vec<Diagnostic>,
    ) {
        if kind == DiagnosticKind::Error {
            self.num_error += 1;
        }
        self.diagnostics.push(Diagnostic::new_with_extra(
            kind,
            locus,
            message,
            extra_diagnostics,
        ));
    }

    pub fn report(&self, emitter: &dyn DiagnosticEmitter) {
        self.diagnostics.iter().for_each(|d| emitter.emit(d));
    }

    pub fn num_diagnostics(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn num_error(&self) -> usize {
        self.num_error
    }
}

impl Default for Diagnostics {
    fn default() -> Diagnostics {
        Diagnostics::new()
    }
}

pub trait DiagnosticEmitter {
    fn emit(&self, diag: &Diagnostic);
}

use std::process::ExitCode;

// The exit status of the driver reflects the cumulative error count.
impl From<Diagnostics> for ExitCode {
    fn from(diags: Diagnostics) -> ExitCode {
        ExitCode::from(std::cmp::min(diags.num_error(), u8::MAX as usize) as u8)
    }
}
