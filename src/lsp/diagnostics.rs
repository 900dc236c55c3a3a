//! Diagnostics conversion from projected results to LSP diagnostics.

use tower_lsp::lsp_types::{Diagnostic, DiagnosticSeverity};

use crate::document::LineIndex;
use crate::engine::{self, ProjectedResult, Severity};

fn severity(severity: Severity) -> DiagnosticSeverity {
    match severity {
        Severity::Error => DiagnosticSeverity::ERROR,
        Severity::Warning => DiagnosticSeverity::WARNING,
    }
}

fn to_diagnostic(diagnostic: &engine::Diagnostic, line_index: &LineIndex) -> Diagnostic {
    Diagnostic {
        range: line_index.span_to_range(&diagnostic.span),
        severity: Some(severity(diagnostic.severity)),
        code: None,
        code_description: None,
        source: Some(diagnostic.source.name().to_string()),
        message: diagnostic.message.clone(),
        related_information: None,
        tags: None,
        data: None,
    }
}

/// Convert every diagnostic of `result` against the buffer it was parsed from.
pub fn to_diagnostics(result: &ProjectedResult, line_index: &LineIndex) -> Vec<Diagnostic> {
    result
        .diagnostics
        .iter()
        .map(|diagnostic| to_diagnostic(diagnostic, line_index))
        .collect()
}
