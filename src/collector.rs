//! Diagnostics accumulated during one structural validation pass.

use std::fmt;

use serde::Serialize;

use crate::error::{Result, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
    Fatal,
}

/// One positioned message reported by the XML layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub line: u32,
    pub column: u32,
    pub message: String,
}

impl Diagnostic {
    pub fn new(severity: Severity, line: u32, column: u32, message: impl Into<String>) -> Self {
        Self {
            severity,
            line,
            column,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Line {}, Column {}: {}",
            self.line, self.column, self.message
        )
    }
}

/// One line per diagnostic, each newline-terminated
pub fn render_diagnostics(diagnostics: &[Diagnostic]) -> String {
    diagnostics.iter().map(|d| format!("{}\n", d)).collect()
}

/// Sink for the warnings and errors of a single pass.
///
/// Fatal diagnostics are kept with the errors; warnings never make a pass fail.
#[derive(Debug, Default)]
pub struct ValidationErrorCollector {
    errors: Vec<Diagnostic>,
    warnings: Vec<Diagnostic>,
}

impl ValidationErrorCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_warning(&mut self, line: u32, column: u32, message: impl Into<String>) {
        self.record(Diagnostic::new(Severity::Warning, line, column, message));
    }

    pub fn on_error(&mut self, line: u32, column: u32, message: impl Into<String>) {
        self.record(Diagnostic::new(Severity::Error, line, column, message));
    }

    pub fn on_fatal(&mut self, line: u32, column: u32, message: impl Into<String>) {
        self.record(Diagnostic::new(Severity::Fatal, line, column, message));
    }

    pub fn record(&mut self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Warning => self.warnings.push(diagnostic),
            Severity::Error | Severity::Fatal => self.errors.push(diagnostic),
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn errors(&self) -> &[Diagnostic] {
        &self.errors
    }

    pub fn warnings(&self) -> &[Diagnostic] {
        &self.warnings
    }

    pub fn errors_as_string(&self) -> String {
        render_diagnostics(&self.errors)
    }

    pub fn warnings_as_string(&self) -> String {
        render_diagnostics(&self.warnings)
    }

    /// Warnings section followed by errors section, empty sections omitted
    pub fn summary(&self) -> String {
        let mut summary = String::new();
        if !self.warnings.is_empty() {
            summary.push_str("Warnings:\n");
            summary.push_str(&self.warnings_as_string());
        }
        if !self.errors.is_empty() {
            summary.push_str("Errors:\n");
            summary.push_str(&self.errors_as_string());
        }
        summary
    }

    /// `Ok` with the warnings when no error was collected
    pub fn into_result(self) -> Result<Vec<Diagnostic>> {
        if self.errors.is_empty() {
            Ok(self.warnings)
        } else {
            Err(ValidationError::StructuralValidationFailure {
                errors: self.errors,
                warnings: self.warnings,
            })
        }
    }
}
