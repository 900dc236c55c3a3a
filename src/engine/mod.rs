//! The projection engine: reconciles edits with the template tree and
//! derives every view consumers see from one consistent tree.
//!
//! This module provides:
//! - `Reconciler`, which decides between patching and reparsing
//! - `project` and `extract_folds`, the markup and fold views
//! - `ProjectedResult`, the aggregate handed out after each pass

mod folds;
mod project;
mod reconcile;

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tower_lsp::lsp_types::Position;

pub use folds::{extract_folds, FoldRegion};
pub use project::{project, CommentRecord, Projection, COMMENT_CLOSE, COMMENT_OPEN};
pub use reconcile::Reconciler;

use crate::document::LineIndex;
use crate::grammar::{Block, GrammarError, ParseOutcome, Span, TemplateGrammar};
use crate::host::{self, HostCode};
use crate::markup::{self, MarkupDocument};
use crate::settings::GrammarKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// Which view reported a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticSource {
    Template,
    Markup,
    Host,
}

impl DiagnosticSource {
    pub fn name(self) -> &'static str {
        match self {
            DiagnosticSource::Template => "razor",
            DiagnosticSource::Markup => "razor-html",
            DiagnosticSource::Host => "razor-csharp",
        }
    }
}

/// A problem in buffer coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub span: Range<usize>,
    /// Start of `span`.
    pub location: Position,
    pub source: DiagnosticSource,
}

impl Diagnostic {
    fn new(
        severity: Severity,
        source: DiagnosticSource,
        message: impl Into<String>,
        span: Range<usize>,
        line_index: &LineIndex,
    ) -> Self {
        Self {
            severity,
            location: line_index.offset_to_position(span.start),
            message: message.into(),
            span,
            source,
        }
    }
}

/// Everything one parse pass produced. Replaced wholesale by the next pass.
#[derive(Debug, Clone)]
pub struct ProjectedResult {
    pub path: PathBuf,
    pub markup: MarkupDocument,
    /// Generated code and its syntax unit; `None` for a placeholder.
    pub host: Option<Arc<HostCode>>,
    pub spans: Vec<Span>,
    pub comments: Vec<CommentRecord>,
    pub folds: Vec<FoldRegion>,
    pub diagnostics: Vec<Diagnostic>,
    pub host_kind: GrammarKind,
    /// How the edit behind this pass was reconciled; `None` for a placeholder.
    pub outcome: Option<ParseOutcome>,
    /// Pass counter of the owning session; 0 for a placeholder.
    pub generation: u64,
}

impl ProjectedResult {
    /// The empty result for a document with no session.
    pub fn placeholder(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            markup: MarkupDocument::empty(),
            host: None,
            spans: Vec::new(),
            comments: Vec::new(),
            folds: Vec::new(),
            diagnostics: Vec::new(),
            host_kind: GrammarKind::WebPage,
            outcome: None,
            generation: 0,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.outcome.is_none()
    }

    pub fn host_code(&self) -> Option<&str> {
        self.host.as_deref().map(|code| code.text.as_str())
    }

    pub fn host_syntax(&self) -> Option<&host::HostSyntaxUnit> {
        self.host.as_deref().map(|code| &code.syntax)
    }
}

/// Inputs of one projection pass.
pub struct PassInput<'a> {
    pub path: &'a Path,
    pub tree: &'a Block,
    pub errors: &'a [GrammarError],
    pub grammar: &'a TemplateGrammar,
    pub line_index: &'a LineIndex,
    pub outcome: ParseOutcome,
    pub generation: u64,
}

/// Run every view over a settled tree.
pub fn assemble(input: PassInput<'_>) -> ProjectedResult {
    let PassInput {
        path,
        tree,
        errors,
        grammar,
        line_index,
        outcome,
        generation,
    } = input;

    let projection = project(tree, line_index);
    let markup = match markup::parse(&projection.markup_text) {
        Ok(markup) => markup,
        Err(err) => {
            tracing::error!(path = %path.display(), error = %err, "markup sub-parser failed");
            MarkupDocument::empty()
        }
    };
    let folds = extract_folds(tree, &markup, line_index);

    let unit = grammar.generate(tree, line_index, path);
    let host = Arc::new(host::bridge(&unit, grammar.profile()));

    let mut diagnostics: Vec<Diagnostic> = errors
        .iter()
        .map(|error| {
            Diagnostic::new(
                Severity::Error,
                DiagnosticSource::Template,
                &error.message,
                error.span.clone(),
                line_index,
            )
        })
        .collect();
    diagnostics.extend(markup.errors.iter().map(|error| {
        Diagnostic::new(
            Severity::Warning,
            DiagnosticSource::Markup,
            &error.message,
            error.span.clone(),
            line_index,
        )
    }));
    diagnostics.extend(host.source_errors().into_iter().map(|error| {
        Diagnostic::new(
            Severity::Error,
            DiagnosticSource::Host,
            error.message,
            error.span,
            line_index,
        )
    }));

    tracing::debug!(
        path = %path.display(),
        ?outcome,
        generation,
        folds = folds.len(),
        diagnostics = diagnostics.len(),
        "projected"
    );

    ProjectedResult {
        path: path.to_path_buf(),
        markup,
        host: Some(host),
        spans: tree.flatten(),
        comments: projection.comments,
        folds,
        diagnostics,
        host_kind: grammar.profile().kind(),
        outcome: Some(outcome),
        generation,
    }
}
