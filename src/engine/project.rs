//! Markup-only projection of a template tree.
//!
//! Code and transition spans are replaced by spaces of the same byte length,
//! keeping `\r` and `\n`, so the synthetic text has exactly the buffer's
//! offsets and line breaks.

use std::ops::Range;

use tower_lsp::lsp_types::Position;

use crate::document::LineIndex;
use crate::grammar::{Block, Span, Visitor};

pub const COMMENT_OPEN: &str = "@*";
pub const COMMENT_CLOSE: &str = "*@";

/// A template comment, widened to include its delimiters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentRecord {
    pub content: String,
    pub open_tag: &'static str,
    pub close_tag: &'static str,
    pub span: Range<usize>,
    pub start: Position,
    pub end: Position,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Projection {
    pub markup_text: String,
    /// Markup-bearing ranges of the buffer; adjacent spans are merged.
    pub markup_ranges: Vec<Range<usize>>,
    pub comments: Vec<CommentRecord>,
}

/// Walk every span of `tree` once, in document order.
pub fn project(tree: &Block, line_index: &LineIndex) -> Projection {
    let mut projector = Projector {
        line_index,
        buffer_len: line_index.source().len(),
        projection: Projection {
            markup_text: String::with_capacity(tree.len()),
            ..Projection::default()
        },
    };
    tree.accept(&mut projector);
    projector.projection
}

struct Projector<'a> {
    line_index: &'a LineIndex,
    buffer_len: usize,
    projection: Projection,
}

impl Projector<'_> {
    fn blank(&mut self, span: &Span) {
        let text = &mut self.projection.markup_text;
        for c in span.content.chars() {
            match c {
                '\r' | '\n' => text.push(c),
                // One space per byte keeps offsets aligned.
                _ => text.extend(std::iter::repeat(' ').take(c.len_utf8())),
            }
        }
    }
}

impl Visitor for Projector<'_> {
    fn visit_markup(&mut self, span: &Span) {
        self.projection.markup_text.push_str(&span.content);
        match self.projection.markup_ranges.last_mut() {
            Some(last) if last.end == span.start => last.end = span.end(),
            _ => self.projection.markup_ranges.push(span.range()),
        }
    }

    fn visit_code(&mut self, span: &Span) {
        self.blank(span);
    }

    fn visit_transition(&mut self, span: &Span) {
        self.blank(span);
    }

    fn visit_comment(&mut self, span: &Span) {
        self.blank(span);
        let start = span.start.saturating_sub(COMMENT_OPEN.len());
        let end = (span.end() + COMMENT_CLOSE.len()).min(self.buffer_len);
        self.projection.comments.push(CommentRecord {
            content: span.content.clone(),
            open_tag: COMMENT_OPEN,
            close_tag: COMMENT_CLOSE,
            span: start..end,
            start: self.line_index.offset_to_position(start),
            end: self.line_index.offset_to_position(end),
        });
    }
}
