//! Markup-only view of a template.
//!
//! The projector blanks every code span before handing the text here, so
//! offsets in this tree line up one-to-one with the template buffer.

mod parser;

use std::ops::Range;

use crate::document::LineIndex;
use crate::engine::FoldRegion;

pub use parser::{is_void_element, MAX_DEPTH};

/// Fault that aborts markup parsing altogether.
#[derive(Debug, thiserror::Error)]
pub enum MarkupError {
    #[error("markup nested deeper than {limit} elements at offset {offset}")]
    NestingTooDeep { limit: usize, offset: usize },
}

/// A recoverable markup problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkupDiagnostic {
    pub message: String,
    pub span: Range<usize>,
}

impl MarkupDiagnostic {
    pub fn new(message: impl Into<String>, span: Range<usize>) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkupNodeKind {
    Document,
    Element { name: String },
    Comment,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkupNode {
    pub kind: MarkupNodeKind,
    pub start: usize,
    /// End of the start tag; equal to `start` for non-elements.
    pub start_tag_end: usize,
    pub end: usize,
    /// Whether the node saw its terminator (end tag, `/>`, `-->`).
    pub closed: bool,
    pub children: Vec<MarkupNode>,
}

impl MarkupNode {
    pub fn new(kind: MarkupNodeKind, start: usize) -> Self {
        Self {
            kind,
            start,
            start_tag_end: start,
            end: start,
            closed: false,
            children: Vec::new(),
        }
    }

    pub fn span(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn element_name(&self) -> Option<&str> {
        match &self.kind {
            MarkupNodeKind::Element { name } => Some(name),
            _ => None,
        }
    }

    /// Pre-order walk over this node and its descendants.
    pub fn descendants(&self) -> Vec<&MarkupNode> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(node.children.iter().rev());
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkupDocument {
    pub root: MarkupNode,
    pub errors: Vec<MarkupDiagnostic>,
}

impl MarkupDocument {
    /// The empty tree a sub-parser fault degrades to.
    pub fn empty() -> Self {
        let mut root = MarkupNode::new(MarkupNodeKind::Document, 0);
        root.closed = true;
        Self {
            root,
            errors: Vec::new(),
        }
    }

    /// Multi-line closed elements and comments, in document order.
    pub fn folds(&self, line_index: &LineIndex) -> Vec<FoldRegion> {
        self.root
            .descendants()
            .into_iter()
            .filter(|node| node.closed)
            .filter_map(|node| {
                let label = match &node.kind {
                    MarkupNodeKind::Document => return None,
                    MarkupNodeKind::Element { name } => format!("<{name}>"),
                    MarkupNodeKind::Comment => "<!-- -->".to_string(),
                };
                FoldRegion::spanning(label, node.span(), line_index)
            })
            .collect()
    }
}

/// Parse the synthetic markup text of a template.
pub fn parse(text: &str) -> Result<MarkupDocument, MarkupError> {
    parser::parse(text)
}
