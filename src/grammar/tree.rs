//! Span/block tree produced by the template grammar.
//!
//! Leaves are [`Span`]s carrying raw source text; interior nodes are
//! [`Block`]s grouping spans by syntactic role. Sibling nodes are contiguous:
//! concatenating every span's content in document order reproduces the
//! source buffer the tree was parsed from.

use std::ops::Range;

/// Kind tag of a leaf span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpanKind {
    /// Literal markup text.
    Markup,
    /// Host-language code.
    Code,
    /// Body of a template comment (delimiters excluded).
    Comment,
    /// Template delimiters: `@`, `@{`, `}`, `@(`, `)`, `@*`, `*@`, `@:`.
    Transition,
}

/// A leaf of the parse tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub kind: SpanKind,
    /// Byte offset of the first byte of `content` in the source buffer.
    pub start: usize,
    pub content: String,
}

impl Span {
    pub fn new(kind: SpanKind, start: usize, content: impl Into<String>) -> Self {
        Self {
            kind,
            start,
            content: content.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn end(&self) -> usize {
        self.start + self.content.len()
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end()
    }
}

/// Syntactic role of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    /// Markup content; also the document root.
    Markup,
    /// `@{ ... }` and keyword statements (`@if`, `@foreach`, ...).
    Statement,
    /// `@name.member(...)` and `@( ... )`.
    Expression,
    /// `@using`, `@model`, `@inherits`.
    Directive,
    /// `@functions { ... }`.
    Functions,
    /// `@helper Name(...) { ... }`.
    Helper,
    /// `@section Name { ... }`.
    Section,
    /// `@* ... *@`.
    Comment,
}

impl BlockKind {
    pub fn label(self) -> &'static str {
        match self {
            BlockKind::Markup => "markup",
            BlockKind::Statement => "statement",
            BlockKind::Expression => "expression",
            BlockKind::Directive => "directive",
            BlockKind::Functions => "functions",
            BlockKind::Helper => "helper",
            BlockKind::Section => "section",
            BlockKind::Comment => "comment",
        }
    }
}

/// An interior node of the parse tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub kind: BlockKind,
    pub start: usize,
    /// Leading identifier: directive or statement keyword, helper or section name.
    pub name: Option<String>,
    pub children: Vec<Node>,
}

impl Block {
    pub fn new(kind: BlockKind, start: usize) -> Self {
        Self {
            kind,
            start,
            name: None,
            children: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Length in bytes, derived from the last child.
    pub fn len(&self) -> usize {
        self.children
            .last()
            .map(|child| child.end() - self.start)
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn end(&self) -> usize {
        self.start + self.len()
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end()
    }

    /// Short descriptive form: the kind, followed by the leading identifier if any.
    pub fn short_name(&self) -> String {
        match &self.name {
            Some(name) => format!("{} {}", self.kind.label(), name),
            None => self.kind.label().to_string(),
        }
    }

    /// Appends a span, dropping it if empty.
    pub(crate) fn push_span(&mut self, kind: SpanKind, start: usize, content: &str) {
        if !content.is_empty() {
            self.children
                .push(Node::Span(Span::new(kind, start, content)));
        }
    }

    pub(crate) fn push_block(&mut self, block: Block) {
        self.children.push(Node::Block(block));
    }

    /// Direct child blocks.
    pub fn child_blocks(&self) -> impl Iterator<Item = &Block> {
        self.children.iter().filter_map(Node::as_block)
    }

    /// All leaf spans in document order.
    pub fn flatten(&self) -> Vec<Span> {
        let mut collector = SpanCollector::default();
        self.accept(&mut collector);
        collector.spans
    }

    /// Concatenated content of every span; equals the parsed source.
    pub fn text(&self) -> String {
        let mut out = String::with_capacity(self.len());
        for span in self.flatten() {
            out.push_str(&span.content);
        }
        out
    }

    /// Walks the tree in document order, dispatching each span on its kind.
    pub fn accept<V: Visitor + ?Sized>(&self, visitor: &mut V) {
        if !visitor.enter_block(self) {
            return;
        }
        for child in &self.children {
            match child {
                Node::Span(span) => match span.kind {
                    SpanKind::Markup => visitor.visit_markup(span),
                    SpanKind::Code => visitor.visit_code(span),
                    SpanKind::Comment => visitor.visit_comment(span),
                    SpanKind::Transition => visitor.visit_transition(span),
                },
                Node::Block(block) => block.accept(visitor),
            }
        }
        visitor.leave_block(self);
    }

    /// Moves every node starting at or after `from` by `delta` bytes.
    pub(crate) fn shift_from(&mut self, from: usize, delta: isize) {
        for child in &mut self.children {
            if child.start() >= from {
                child.shift(delta);
            } else if let Node::Block(block) = child {
                block.shift_from(from, delta);
            }
        }
    }

    fn shift(&mut self, delta: isize) {
        self.start = offset_by(self.start, delta);
        for child in &mut self.children {
            child.shift(delta);
        }
    }
}

/// A child of a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Span(Span),
    Block(Block),
}

impl Node {
    pub fn start(&self) -> usize {
        match self {
            Node::Span(span) => span.start,
            Node::Block(block) => block.start,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Node::Span(span) => span.len(),
            Node::Block(block) => block.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn end(&self) -> usize {
        self.start() + self.len()
    }

    pub fn is_block(&self) -> bool {
        matches!(self, Node::Block(_))
    }

    pub fn as_block(&self) -> Option<&Block> {
        match self {
            Node::Block(block) => Some(block),
            Node::Span(_) => None,
        }
    }

    pub fn as_span(&self) -> Option<&Span> {
        match self {
            Node::Span(span) => Some(span),
            Node::Block(_) => None,
        }
    }

    pub(crate) fn shift(&mut self, delta: isize) {
        match self {
            Node::Span(span) => span.start = offset_by(span.start, delta),
            Node::Block(block) => block.shift(delta),
        }
    }
}

fn offset_by(offset: usize, delta: isize) -> usize {
    offset.saturating_add_signed(delta)
}

/// Per-kind handlers for [`Block::accept`].
///
/// Returning `false` from `enter_block` skips the block's children (and its
/// `leave_block` call).
pub trait Visitor {
    fn enter_block(&mut self, _block: &Block) -> bool {
        true
    }
    fn leave_block(&mut self, _block: &Block) {}
    fn visit_markup(&mut self, _span: &Span) {}
    fn visit_code(&mut self, _span: &Span) {}
    fn visit_comment(&mut self, _span: &Span) {}
    fn visit_transition(&mut self, _span: &Span) {}
}

#[derive(Default)]
struct SpanCollector {
    spans: Vec<Span>,
}

impl Visitor for SpanCollector {
    fn visit_markup(&mut self, span: &Span) {
        self.spans.push(span.clone());
    }
    fn visit_code(&mut self, span: &Span) {
        self.spans.push(span.clone());
    }
    fn visit_comment(&mut self, span: &Span) {
        self.spans.push(span.clone());
    }
    fn visit_transition(&mut self, span: &Span) {
        self.spans.push(span.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Block {
        // <p>@x</p>
        let mut expr = Block::new(BlockKind::Expression, 3);
        expr.push_span(SpanKind::Transition, 3, "@");
        expr.push_span(SpanKind::Code, 4, "x");

        let mut root = Block::new(BlockKind::Markup, 0);
        root.push_span(SpanKind::Markup, 0, "<p>");
        root.push_block(expr);
        root.push_span(SpanKind::Markup, 5, "</p>");
        root
    }

    #[test]
    fn block_length_is_derived_from_children() {
        let root = sample();
        assert_eq!(root.len(), 9);
        assert_eq!(root.child_blocks().next().map(Block::range), Some(3..5));
    }

    #[test]
    fn flatten_keeps_document_order() {
        let root = sample();
        let kinds: Vec<_> = root.flatten().iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                SpanKind::Markup,
                SpanKind::Transition,
                SpanKind::Code,
                SpanKind::Markup
            ]
        );
        assert_eq!(root.text(), "<p>@x</p>");
    }

    #[test]
    fn empty_spans_are_dropped() {
        let mut block = Block::new(BlockKind::Statement, 0);
        block.push_span(SpanKind::Code, 0, "");
        assert!(block.children.is_empty());
        assert!(block.is_empty());
    }

    #[test]
    fn shift_moves_only_trailing_nodes() {
        let mut root = sample();
        root.shift_from(5, 2);
        let starts: Vec<_> = root.flatten().iter().map(|s| s.start).collect();
        assert_eq!(starts, vec![0, 3, 4, 7]);
    }

    #[test]
    fn short_name_includes_identifier() {
        let block = Block::new(BlockKind::Helper, 0).with_name("Bold");
        assert_eq!(block.short_name(), "helper Bold");
        assert_eq!(Block::new(BlockKind::Statement, 0).short_name(), "statement");
    }
}
