//! Byte offset <-> line/column conversion over a template buffer.
//!
//! Every artifact the engine produces is keyed by byte offsets into the
//! template buffer; LSP wants lines and UTF-16 columns.

use std::ops::Range;
use std::sync::Arc;

use tower_lsp::lsp_types::Position;

/// Line start table for one buffer.
#[derive(Debug, Clone)]
pub struct LineIndex {
    /// Byte offset where each line starts.
    line_starts: Vec<usize>,
    source: Arc<str>,
}

impl LineIndex {
    pub fn new(source: impl Into<Arc<str>>) -> Self {
        let source = source.into();
        let mut line_starts = vec![0];
        line_starts.extend(
            source
                .bytes()
                .enumerate()
                .filter(|&(_, b)| b == b'\n')
                .map(|(i, _)| i + 1),
        );
        Self {
            line_starts,
            source,
        }
    }

    pub fn source(&self) -> &Arc<str> {
        &self.source
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// Zero-based line containing `offset`; offsets past the end clamp to the
    /// last line.
    pub fn line_of(&self, offset: usize) -> u32 {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(line) => line.saturating_sub(1),
        };
        line as u32
    }

    /// Byte offset where `line` starts.
    pub fn line_start(&self, line: u32) -> Option<usize> {
        self.line_starts.get(line as usize).copied()
    }

    /// Convert a byte offset to an LSP position (UTF-16 column).
    pub fn offset_to_position(&self, offset: usize) -> Position {
        let offset = offset.min(self.source.len());
        let line = self.line_of(offset);
        let line_start = self.line_starts[line as usize];

        let col: usize = self.source[line_start..]
            .char_indices()
            .take_while(|&(i, _)| line_start + i < offset)
            .map(|(_, c)| c.len_utf16())
            .sum();

        Position::new(line, col as u32)
    }

    /// Convert an LSP position to a byte offset; `None` past the last line.
    pub fn position_to_offset(&self, position: Position) -> Option<usize> {
        let line = position.line as usize;
        let line_start = *self.line_starts.get(line)?;
        let line_end = self
            .line_starts
            .get(line + 1)
            .map(|&end| end.saturating_sub(1))
            .unwrap_or(self.source.len());

        let mut utf16_col = 0u32;
        for (i, c) in self.source[line_start..line_end].char_indices() {
            if utf16_col >= position.character {
                return Some(line_start + i);
            }
            utf16_col += c.len_utf16() as u32;
        }

        Some(line_end)
    }

    pub fn span_to_range(&self, span: &Range<usize>) -> tower_lsp::lsp_types::Range {
        tower_lsp::lsp_types::Range::new(
            self.offset_to_position(span.start),
            self.offset_to_position(span.end),
        )
    }

    /// Convert an LSP range to a byte span.
    pub fn range_to_span(&self, range: tower_lsp::lsp_types::Range) -> Option<Range<usize>> {
        Some(self.position_to_offset(range.start)?..self.position_to_offset(range.end)?)
    }
}
