//! Tolerant HTML scanner over the synthetic markup text.

use super::{MarkupDiagnostic, MarkupDocument, MarkupError, MarkupNode, MarkupNodeKind};

/// Deepest element nesting the parser accepts before giving up.
pub const MAX_DEPTH: usize = 512;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

/// Elements that never have an end tag.
pub fn is_void_element(name: &str) -> bool {
    VOID_ELEMENTS
        .iter()
        .any(|void| void.eq_ignore_ascii_case(name))
}

pub(super) fn parse(text: &str) -> Result<MarkupDocument, MarkupError> {
    let mut parser = Parser {
        text,
        bytes: text.as_bytes(),
        pos: 0,
        stack: vec![MarkupNode::new(MarkupNodeKind::Document, 0)],
        errors: Vec::new(),
    };
    parser.run()?;
    Ok(parser.finish())
}

struct Parser<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
    /// Open elements; the document node is always at the bottom.
    stack: Vec<MarkupNode>,
    errors: Vec<MarkupDiagnostic>,
}

impl Parser<'_> {
    fn run(&mut self) -> Result<(), MarkupError> {
        let text = self.text;
        while let Some(rel) = text[self.pos..].find('<') {
            self.pos += rel;
            let rest = &text[self.pos..];
            if rest.starts_with("<!--") {
                self.comment();
            } else if rest.starts_with("</") {
                self.end_tag();
            } else if rest.starts_with("<!") || rest.starts_with("<?") {
                self.pos = match rest.find('>') {
                    Some(end) => self.pos + end + 1,
                    None => text.len(),
                };
            } else if rest[1..].starts_with(|c: char| c.is_ascii_alphabetic()) {
                self.start_tag()?;
            } else {
                self.pos += 1;
            }
        }
        Ok(())
    }

    fn name_at(&self, at: usize) -> &str {
        let end = self.bytes[at..]
            .iter()
            .position(|&c| !(c.is_ascii_alphanumeric() || c == b'-' || c == b':' || c == b'.'))
            .map_or(self.bytes.len(), |rel| at + rel);
        &self.text[at..end]
    }

    /// Position just past the `>` closing the tag at the current position,
    /// skipping quoted attribute values.
    fn tag_end(&self) -> Option<usize> {
        let mut quote = None;
        for (i, &c) in self.bytes[self.pos..].iter().enumerate() {
            match (quote, c) {
                (Some(q), c) if c == q => quote = None,
                (Some(_), _) => {}
                (None, b'"' | b'\'') => quote = Some(c),
                (None, b'>') => return Some(self.pos + i + 1),
                (None, b'<') if i > 0 => return None,
                _ => {}
            }
        }
        None
    }

    fn comment(&mut self) {
        let start = self.pos;
        let end = match self.text[start + 4..].find("-->") {
            Some(rel) => start + 4 + rel + 3,
            None => {
                self.errors.push(MarkupDiagnostic::new(
                    "unterminated comment: missing \"-->\"",
                    start..start + 4,
                ));
                self.text.len()
            }
        };
        let mut node = MarkupNode::new(MarkupNodeKind::Comment, start);
        node.end = end;
        node.closed = true;
        self.attach(node);
        self.pos = end;
    }

    fn start_tag(&mut self) -> Result<(), MarkupError> {
        let start = self.pos;
        let name = self.name_at(start + 1).to_string();
        let Some(end) = self.tag_end() else {
            self.errors.push(MarkupDiagnostic::new(
                format!("unterminated tag <{name}>"),
                start..start + 1 + name.len(),
            ));
            self.pos = start + 1 + name.len();
            return Ok(());
        };
        self.pos = end;

        let self_closing = self.bytes[end - 2] == b'/';
        let mut node = MarkupNode::new(MarkupNodeKind::Element { name: name.clone() }, start);
        node.start_tag_end = end;
        if self_closing || is_void_element(&name) {
            node.end = end;
            node.closed = true;
            self.attach(node);
            return Ok(());
        }

        if RAW_TEXT_ELEMENTS.iter().any(|raw| raw.eq_ignore_ascii_case(&name)) {
            let close = format!("</{name}");
            if let Some(rel) = self.text[end..].find(&close) {
                self.pos = end + rel;
            } else {
                self.pos = self.text.len();
            }
        }

        if self.stack.len() > MAX_DEPTH {
            return Err(MarkupError::NestingTooDeep {
                limit: MAX_DEPTH,
                offset: start,
            });
        }
        self.stack.push(node);
        Ok(())
    }

    fn end_tag(&mut self) {
        let start = self.pos;
        let name = self.name_at(start + 2).to_string();
        let end = self.tag_end().unwrap_or(start + 2 + name.len());
        self.pos = end;

        let open = self
            .stack
            .iter()
            .rposition(|node| node.element_name().is_some_and(|n| n.eq_ignore_ascii_case(&name)));
        let Some(index) = open else {
            self.errors.push(MarkupDiagnostic::new(
                format!("unexpected closing tag </{name}>"),
                start..end,
            ));
            return;
        };

        while self.stack.len() > index + 1 {
            if let Some(unclosed) = self.stack.pop() {
                self.unclosed(&unclosed);
                let mut unclosed = unclosed;
                unclosed.end = start;
                self.attach(unclosed);
            }
        }
        if let Some(mut node) = self.stack.pop() {
            node.end = end;
            node.closed = true;
            self.attach(node);
        }
    }

    fn unclosed(&mut self, node: &MarkupNode) {
        if let Some(name) = node.element_name() {
            self.errors.push(MarkupDiagnostic::new(
                format!("element <{name}> is not closed"),
                node.start..node.start + 1 + name.len(),
            ));
        }
    }

    fn attach(&mut self, node: MarkupNode) {
        if let Some(parent) = self.stack.last_mut() {
            parent.children.push(node);
        }
    }

    fn finish(mut self) -> MarkupDocument {
        let len = self.text.len();
        while self.stack.len() > 1 {
            if let Some(mut node) = self.stack.pop() {
                self.unclosed(&node);
                node.end = len;
                self.attach(node);
            }
        }
        let mut root = self
            .stack
            .pop()
            .unwrap_or_else(|| MarkupNode::new(MarkupNodeKind::Document, 0));
        root.end = len;
        root.closed = true;
        MarkupDocument {
            root,
            errors: self.errors,
        }
    }
}
