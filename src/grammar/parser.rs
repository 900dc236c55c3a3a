//! Full parse of a template buffer into a span/block tree.
//!
//! The scanner works on bytes: every structural token is ASCII, so span
//! boundaries always land on character boundaries of the UTF-8 source.

use std::ops::Range;

use crate::markup::is_void_element;

use super::tree::{Block, BlockKind, Node, Span, SpanKind};

pub(crate) const UNTERMINATED_BLOCK: &str =
    "unterminated block: the code block is missing a closing \"}\" character";

const STATEMENT_KEYWORDS: &[&str] = &[
    "if", "for", "foreach", "while", "switch", "lock", "try", "do",
];

const DIRECTIVE_KEYWORDS: &[&str] = &["using", "model", "inherits"];

/// A recoverable error reported by the template grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrammarError {
    pub message: String,
    pub span: Range<usize>,
}

impl GrammarError {
    pub fn new(message: impl Into<String>, span: Range<usize>) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

/// Best-effort tree plus every error recovered while building it.
#[derive(Debug, Clone)]
pub struct ParseResults {
    pub root: Block,
    pub errors: Vec<GrammarError>,
}

/// Parse a whole buffer. Never fails; malformed input yields errors.
pub fn parse(source: &str) -> ParseResults {
    let mut parser = Parser::new(source);
    let mut root = Block::new(BlockKind::Markup, 0);
    parser.markup(&mut root, MarkupEnd::Eof);
    ParseResults {
        root,
        errors: parser.errors,
    }
}

/// Parse document-level nodes of `source` from `start`, which must be where a
/// top-level node begins.
///
/// After each nested construct, `resume` is asked whether the scan has
/// reached a boundary it can stop at; its answer is returned alongside the
/// nodes. `None` means the scan ran to the end of input.
pub(crate) fn rescan(
    source: &str,
    start: usize,
    mut resume: impl FnMut(usize) -> Option<usize>,
) -> (Vec<Node>, Option<usize>) {
    let mut parser = Parser::new(source);
    parser.pos = start;
    let mut block = Block::new(BlockKind::Markup, start);
    let mut literal_start = start;
    while let Some(b) = parser.peek(0) {
        if b != b'@' {
            parser.advance(1);
            continue;
        }
        if parser.peek(1) == Some(b'@') {
            parser.advance(2);
            continue;
        }
        if parser.is_email_at() {
            parser.advance(1);
            continue;
        }
        parser.flush(&mut block, SpanKind::Markup, literal_start);
        let node = parser.transition();
        block.children.push(node);
        literal_start = parser.pos;
        if let Some(index) = resume(parser.pos) {
            return (block.children, Some(index));
        }
    }
    parser.flush(&mut block, SpanKind::Markup, literal_start);
    (block.children, None)
}

pub(crate) fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

pub(crate) fn is_ident(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

/// What ends a run of markup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MarkupEnd {
    /// End of input (document root).
    Eof,
    /// First unbalanced `}` (section bodies).
    Brace,
    /// The end tag matching the first start tag (markup nested in code).
    Element,
    /// End of line (`@:` lines).
    Line,
}

struct Parser<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    errors: Vec<GrammarError>,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
            errors: Vec::new(),
        }
    }

    fn peek(&self, ahead: usize) -> Option<u8> {
        self.bytes.get(self.pos + ahead).copied()
    }

    fn advance(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.bytes.len());
    }

    fn error(&mut self, message: impl Into<String>, span: Range<usize>) {
        self.errors.push(GrammarError::new(message, span));
    }

    /// Identifier starting at `at` (empty if none).
    fn word_at(&self, at: usize) -> &'a str {
        let src = self.src;
        if !self.bytes.get(at).is_some_and(|&c| is_ident_start(c)) {
            return "";
        }
        let end = self.scan_while(at, is_ident);
        &src[at..end]
    }

    fn scan_while(&self, mut at: usize, pred: impl Fn(u8) -> bool) -> usize {
        while self.bytes.get(at).is_some_and(|&c| pred(c)) {
            at += 1;
        }
        at
    }

    fn skip_ws_index(&self, at: usize) -> usize {
        self.scan_while(at, |c| c.is_ascii_whitespace())
    }

    fn flush(&self, block: &mut Block, kind: SpanKind, start: usize) {
        let src = self.src;
        if start < self.pos {
            block.push_span(kind, start, &src[start..self.pos]);
        }
    }

    fn is_email_at(&self) -> bool {
        self.pos > 0
            && self.bytes[self.pos - 1].is_ascii_alphanumeric()
            && self.peek(1).is_some_and(|c| c.is_ascii_alphanumeric())
    }

    // -----------------------------------------------------------------------
    // Markup
    // -----------------------------------------------------------------------

    /// Returns whether the run ended on its terminator.
    fn markup(&mut self, block: &mut Block, end: MarkupEnd) -> bool {
        let src = self.src;
        let mut literal_start = self.pos;
        let mut braces = 0usize;
        let mut depth = 0isize;
        let mut in_tag = false;
        let mut closing = false;
        let mut tag_name = "";

        while let Some(b) = self.peek(0) {
            match (end, b) {
                (MarkupEnd::Brace, b'{') => braces += 1,
                (MarkupEnd::Brace, b'}') => {
                    if braces == 0 {
                        self.flush(block, SpanKind::Markup, literal_start);
                        return true;
                    }
                    braces -= 1;
                }
                (MarkupEnd::Line, b'\n') => {
                    self.advance(1);
                    self.flush(block, SpanKind::Markup, literal_start);
                    return true;
                }
                _ => {}
            }

            if b == b'@' {
                if self.peek(1) == Some(b'@') {
                    self.advance(2);
                    continue;
                }
                if self.is_email_at() {
                    self.advance(1);
                    continue;
                }
                self.flush(block, SpanKind::Markup, literal_start);
                let node = self.transition();
                block.children.push(node);
                literal_start = self.pos;
                continue;
            }

            if end == MarkupEnd::Element {
                match b {
                    b'<' if self.peek(1) == Some(b'/') => {
                        closing = true;
                        in_tag = true;
                    }
                    b'<' if self.peek(1).is_some_and(|c| c.is_ascii_alphabetic()) => {
                        let name_start = self.pos + 1;
                        let name_end = self.scan_while(name_start, |c| {
                            c.is_ascii_alphanumeric() || c == b'-' || c == b':'
                        });
                        tag_name = &src[name_start..name_end];
                        closing = false;
                        in_tag = true;
                        self.pos = name_end;
                        continue;
                    }
                    b'>' if in_tag => {
                        in_tag = false;
                        let self_closing = self.bytes[self.pos - 1] == b'/';
                        if closing {
                            depth -= 1;
                        } else if !self_closing && !is_void_element(tag_name) {
                            depth += 1;
                        }
                        self.advance(1);
                        if depth <= 0 {
                            self.flush(block, SpanKind::Markup, literal_start);
                            return true;
                        }
                        continue;
                    }
                    _ => {}
                }
            }

            self.advance(1);
        }

        self.flush(block, SpanKind::Markup, literal_start);
        end == MarkupEnd::Eof
    }

    /// Markup nested in code, starting at a `<`.
    fn markup_element(&mut self) -> Block {
        let start = self.pos;
        let name = self.word_at(start + 1);
        let mut block = Block::new(BlockKind::Markup, start);
        if !self.markup(&mut block, MarkupEnd::Element) {
            self.error(
                format!("unclosed element: <{name}> is missing its end tag"),
                start..start + 1 + name.len(),
            );
        }
        block
    }

    /// `@:` markup line inside code.
    fn markup_line(&mut self) -> Block {
        let start = self.pos;
        let mut block = Block::new(BlockKind::Markup, start);
        block.push_span(SpanKind::Transition, start, "@:");
        self.advance(2);
        self.markup(&mut block, MarkupEnd::Line);
        block
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Parse the construct introduced by the `@` at the current position.
    fn transition(&mut self) -> Node {
        let start = self.pos;
        match self.peek(1) {
            Some(b'*') => Node::Block(self.comment()),
            Some(b'{') => Node::Block(self.statement_block()),
            Some(b'(') => Node::Block(self.explicit_expression()),
            Some(c) if is_ident_start(c) => {
                let word = self.word_at(start + 1);
                let after = self.skip_ws_index(start + 1 + word.len());
                let block = if STATEMENT_KEYWORDS.contains(&word)
                    || (word == "using" && self.bytes.get(after) == Some(&b'('))
                {
                    self.keyword_statement(word)
                } else if DIRECTIVE_KEYWORDS.contains(&word) {
                    self.directive(word)
                } else if word == "helper" {
                    self.helper()
                } else if word == "functions" {
                    self.functions()
                } else if word == "section" {
                    self.section()
                } else {
                    self.implicit_expression()
                };
                Node::Block(block)
            }
            next => {
                let message = match next {
                    None => "unexpected end of file after \"@\"",
                    Some(c) if c.is_ascii_whitespace() => {
                        "unexpected whitespace after \"@\": only identifiers, keywords, comments, \"(\" and \"{\" may follow it"
                    }
                    Some(_) => "unexpected character after \"@\"",
                };
                self.error(message, start..start + 1);
                let mut block = Block::new(BlockKind::Expression, start);
                block.push_span(SpanKind::Transition, start, "@");
                self.advance(1);
                Node::Block(block)
            }
        }
    }

    fn comment(&mut self) -> Block {
        let src = self.src;
        let start = self.pos;
        let mut block = Block::new(BlockKind::Comment, start);
        block.push_span(SpanKind::Transition, start, "@*");
        self.advance(2);
        let body_start = self.pos;
        match src[body_start..].find("*@") {
            Some(rel) => {
                let end = body_start + rel;
                // Empty comments keep their span.
                block.children.push(Node::Span(Span::new(
                    SpanKind::Comment,
                    body_start,
                    &src[body_start..end],
                )));
                block.push_span(SpanKind::Transition, end, "*@");
                self.pos = end + 2;
            }
            None => {
                block.children.push(Node::Span(Span::new(
                    SpanKind::Comment,
                    body_start,
                    &src[body_start..],
                )));
                self.pos = src.len();
                self.error(
                    "unterminated comment: missing closing \"*@\"",
                    start..start + 2,
                );
            }
        }
        block
    }

    fn statement_block(&mut self) -> Block {
        let start = self.pos;
        let mut block = Block::new(BlockKind::Statement, start);
        block.push_span(SpanKind::Transition, start, "@{");
        self.advance(2);
        if self.code_body(&mut block, self.pos) {
            block.push_span(SpanKind::Transition, self.pos, "}");
            self.advance(1);
        } else {
            self.error(UNTERMINATED_BLOCK, start..start + 2);
        }
        block
    }

    fn explicit_expression(&mut self) -> Block {
        let start = self.pos;
        let mut block = Block::new(BlockKind::Expression, start);
        block.push_span(SpanKind::Transition, start, "@(");
        self.advance(2);
        let code_start = self.pos;
        let mut depth = 0usize;
        while let Some(b) = self.peek(0) {
            match b {
                b'"' | b'\'' => {
                    self.skip_literal(b);
                    continue;
                }
                b'(' => depth += 1,
                b')' if depth == 0 => {
                    self.flush(&mut block, SpanKind::Code, code_start);
                    block.push_span(SpanKind::Transition, self.pos, ")");
                    self.advance(1);
                    return block;
                }
                b')' => depth -= 1,
                _ => {}
            }
            self.advance(1);
        }
        self.flush(&mut block, SpanKind::Code, code_start);
        self.error(
            "unterminated explicit expression: missing closing \")\"",
            start..start + 2,
        );
        block
    }

    fn implicit_expression(&mut self) -> Block {
        let start = self.pos;
        let mut block = Block::new(BlockKind::Expression, start);
        block.push_span(SpanKind::Transition, start, "@");
        self.advance(1);
        let code_start = self.pos;
        self.pos = self.scan_while(self.pos, is_ident);
        loop {
            match self.peek(0) {
                Some(b'.') if self.peek(1).is_some_and(is_ident_start) => {
                    self.pos = self.scan_while(self.pos + 1, is_ident);
                }
                Some(open @ (b'(' | b'[')) => {
                    let at = self.pos;
                    let close = if open == b'(' { b')' } else { b']' };
                    if !self.skip_balanced(open, close) {
                        self.error(
                            format!("unbalanced \"{}\" in expression", open as char),
                            at..at + 1,
                        );
                        break;
                    }
                }
                _ => break,
            }
        }
        self.flush(&mut block, SpanKind::Code, code_start);
        block
    }

    fn directive(&mut self, keyword: &str) -> Block {
        let start = self.pos;
        let mut block = Block::new(BlockKind::Directive, start).with_name(keyword);
        block.push_span(SpanKind::Transition, start, "@");
        self.advance(1);
        let code_start = self.pos;
        self.pos = self.scan_while(self.pos, |c| c != b'\n' && c != b'\r');
        self.flush(&mut block, SpanKind::Code, code_start);
        block
    }

    fn keyword_statement(&mut self, keyword: &str) -> Block {
        let start = self.pos;
        let mut block = Block::new(BlockKind::Statement, start).with_name(keyword);
        block.push_span(SpanKind::Transition, start, "@");
        self.advance(1);
        let mut code_start = self.pos;

        loop {
            if !self.code_header() {
                self.flush(&mut block, SpanKind::Code, code_start);
                self.error(
                    format!("expected \"{{\" after \"@{keyword}\""),
                    start..start + 1 + keyword.len(),
                );
                return block;
            }
            self.advance(1);
            if !self.code_body(&mut block, code_start) {
                self.error(UNTERMINATED_BLOCK, start..start + 1 + keyword.len());
                return block;
            }

            code_start = self.pos;
            self.advance(1);
            let after = self.skip_ws_index(self.pos);
            let next = self.word_at(after);
            let continues = match keyword {
                "if" => next == "else",
                "try" => next == "catch" || next == "finally",
                "do" => next == "while",
                _ => false,
            };
            if !continues {
                break;
            }
            if keyword == "do" {
                self.pos = self.scan_while(after, |c| c != b';' && c != b'\n');
                if self.peek(0) == Some(b';') {
                    self.advance(1);
                }
                break;
            }
            self.pos = after + next.len();
        }

        self.flush(&mut block, SpanKind::Code, code_start);
        block
    }

    /// `@helper Name(args) { body }`.
    fn helper(&mut self) -> Block {
        let start = self.pos;
        let mut block = Block::new(BlockKind::Helper, start);
        block.push_span(SpanKind::Transition, start, "@");
        self.advance(1);
        let header_start = self.pos;
        self.advance("helper".len());
        let name = self.word_at(self.skip_ws_index(self.pos));
        if name.is_empty() {
            self.error("helper name expected after \"@helper\"", start..self.pos);
        } else {
            block.name = Some(name.to_string());
        }
        self.braced_code(&mut block, header_start, "@helper");
        block
    }

    /// `@functions { members }`.
    fn functions(&mut self) -> Block {
        let start = self.pos;
        let mut block = Block::new(BlockKind::Functions, start);
        block.push_span(SpanKind::Transition, start, "@");
        self.advance(1);
        let header_start = self.pos;
        self.advance("functions".len());
        self.braced_code(&mut block, header_start, "@functions");
        block
    }

    /// Header code up to and including `{` as its own span, then the body,
    /// then the closing `}` as its own span.
    fn braced_code(&mut self, block: &mut Block, header_start: usize, what: &str) {
        if !self.code_header() {
            self.flush(block, SpanKind::Code, header_start);
            self.error(
                format!("expected \"{{\" after \"{what}\""),
                block.start..block.start + what.len(),
            );
            return;
        }
        self.advance(1);
        self.flush(block, SpanKind::Code, header_start);
        if self.code_body(block, self.pos) {
            block.push_span(SpanKind::Code, self.pos, "}");
            self.advance(1);
        } else {
            self.error(UNTERMINATED_BLOCK, block.start..block.start + what.len());
        }
    }

    /// `@section Name { markup }`.
    fn section(&mut self) -> Block {
        let start = self.pos;
        let mut block = Block::new(BlockKind::Section, start);
        block.push_span(SpanKind::Transition, start, "@");
        self.advance(1);
        let header_start = self.pos;
        self.advance("section".len());
        let name = self.word_at(self.skip_ws_index(self.pos));
        if name.is_empty() {
            self.error("section name expected after \"@section\"", start..self.pos);
        } else {
            block.name = Some(name.to_string());
        }
        if !self.code_header() {
            self.flush(&mut block, SpanKind::Code, header_start);
            self.error("expected \"{\" after \"@section\"", start..start + 8);
            return block;
        }
        self.advance(1);
        self.flush(&mut block, SpanKind::Code, header_start);

        let mut body = Block::new(BlockKind::Markup, self.pos);
        let closed = self.markup(&mut body, MarkupEnd::Brace);
        if !body.children.is_empty() {
            block.push_block(body);
        }
        if closed {
            block.push_span(SpanKind::Code, self.pos, "}");
            self.advance(1);
        } else {
            self.error(
                "unterminated section: missing closing \"}\"",
                start..start + 8,
            );
        }
        block
    }

    // -----------------------------------------------------------------------
    // Code
    // -----------------------------------------------------------------------

    /// Advance to the `{` opening a statement body. Stops (returning false)
    /// at markup or a transition outside parentheses.
    fn code_header(&mut self) -> bool {
        let mut parens = 0usize;
        while let Some(b) = self.peek(0) {
            match b {
                b'"' | b'\'' => {
                    self.skip_literal(b);
                    continue;
                }
                b'(' => parens += 1,
                b')' => parens = parens.saturating_sub(1),
                b'{' if parens == 0 => return true,
                b'<' | b'@' if parens == 0 => return false,
                _ => {}
            }
            self.advance(1);
        }
        false
    }

    /// Code up to the `}` closing the current body; nested markup, `@:`
    /// lines, comments and helpers become child blocks. Leaves the position
    /// on the closing brace and returns false at end of input.
    fn code_body(&mut self, block: &mut Block, mut code_start: usize) -> bool {
        let mut depth = 0usize;
        let mut last = b'{';
        while let Some(b) = self.peek(0) {
            match b {
                b'"' | b'\'' => {
                    self.skip_literal(b);
                    last = b;
                    continue;
                }
                b'/' if self.peek(1) == Some(b'/') => {
                    self.pos = self.scan_while(self.pos, |c| c != b'\n');
                    continue;
                }
                b'/' if self.peek(1) == Some(b'*') => {
                    let src = self.src;
                    self.pos = match src[self.pos + 2..].find("*/") {
                        Some(rel) => self.pos + 2 + rel + 2,
                        None => src.len(),
                    };
                    continue;
                }
                b'{' => depth += 1,
                b'}' if depth == 0 => {
                    self.flush(block, SpanKind::Code, code_start);
                    return true;
                }
                b'}' => depth -= 1,
                b'<' if matches!(last, b'{' | b'}' | b';')
                    && self.peek(1).is_some_and(|c| c.is_ascii_alphabetic()) =>
                {
                    self.flush(block, SpanKind::Code, code_start);
                    let element = self.markup_element();
                    block.push_block(element);
                    code_start = self.pos;
                    last = b';';
                    continue;
                }
                b'@' => {
                    let nested = match self.peek(1) {
                        Some(b'"') => {
                            self.advance(1);
                            self.skip_verbatim();
                            last = b'"';
                            continue;
                        }
                        Some(b':') => Some(self.nested(block, code_start, Self::markup_line)),
                        Some(b'*') => Some(self.nested(block, code_start, Self::comment)),
                        Some(c) if is_ident_start(c) && self.word_at(self.pos + 1) == "helper" => {
                            Some(self.nested(block, code_start, Self::helper))
                        }
                        _ => None,
                    };
                    if let Some(next_start) = nested {
                        code_start = next_start;
                        last = b';';
                        continue;
                    }
                }
                _ => {}
            }
            if !b.is_ascii_whitespace() {
                last = b;
            }
            self.advance(1);
        }
        self.flush(block, SpanKind::Code, code_start);
        false
    }

    /// Flush pending code, parse a nested block and return where code resumes.
    fn nested(
        &mut self,
        block: &mut Block,
        code_start: usize,
        parse: fn(&mut Self) -> Block,
    ) -> usize {
        self.flush(block, SpanKind::Code, code_start);
        let child = parse(self);
        block.push_block(child);
        self.pos
    }

    fn skip_literal(&mut self, quote: u8) {
        self.advance(1);
        while let Some(c) = self.peek(0) {
            match c {
                b'\\' => self.advance(2),
                b'\n' => return,
                c if c == quote => {
                    self.advance(1);
                    return;
                }
                _ => self.advance(1),
            }
        }
    }

    /// `@"..."` with the position on the opening quote.
    fn skip_verbatim(&mut self) {
        self.advance(1);
        while let Some(c) = self.peek(0) {
            if c == b'"' {
                if self.peek(1) == Some(b'"') {
                    self.advance(2);
                    continue;
                }
                self.advance(1);
                return;
            }
            self.advance(1);
        }
    }

    /// Skip a bracketed run starting on `open`; false if it never closes.
    fn skip_balanced(&mut self, open: u8, close: u8) -> bool {
        let mut depth = 0usize;
        while let Some(b) = self.peek(0) {
            match b {
                b'"' | b'\'' => {
                    self.skip_literal(b);
                    continue;
                }
                b if b == open => depth += 1,
                b if b == close => {
                    depth -= 1;
                    if depth == 0 {
                        self.advance(1);
                        return true;
                    }
                }
                _ => {}
            }
            self.advance(1);
        }
        false
    }
}
