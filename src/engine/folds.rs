//! Fold regions from the markup tree and the template block tree.

use std::ops::Range;

use tower_lsp::lsp_types::Position;

use crate::document::LineIndex;
use crate::grammar::{Block, BlockKind, Visitor};
use crate::markup::MarkupDocument;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldRegion {
    pub label: String,
    pub start: Position,
    pub end: Position,
    pub span: Range<usize>,
}

impl FoldRegion {
    /// Fold for `span`, or `None` when it starts and ends on the same line.
    pub fn spanning(
        label: impl Into<String>,
        span: Range<usize>,
        line_index: &LineIndex,
    ) -> Option<Self> {
        let start = line_index.offset_to_position(span.start);
        let end = line_index.offset_to_position(span.end);
        (start.line < end.line).then(|| Self {
            label: label.into(),
            start,
            end,
            span,
        })
    }
}

/// Markup folds first, then template block folds.
pub fn extract_folds(
    tree: &Block,
    markup: &MarkupDocument,
    line_index: &LineIndex,
) -> Vec<FoldRegion> {
    let mut folds = markup.folds(line_index);
    let mut collector = BlockFolds {
        line_index,
        depth: 0,
        folds: Vec::new(),
    };
    tree.accept(&mut collector);
    folds.extend(collector.folds);
    folds
}

struct BlockFolds<'a> {
    line_index: &'a LineIndex,
    depth: usize,
    folds: Vec<FoldRegion>,
}

impl Visitor for BlockFolds<'_> {
    fn enter_block(&mut self, block: &Block) -> bool {
        let root = self.depth == 0;
        if !root && !matches!(block.kind, BlockKind::Comment | BlockKind::Markup) {
            let fold = FoldRegion::spanning(block.short_name(), block.range(), self.line_index);
            self.folds.extend(fold);
        }
        // A helper folds as one unit.
        if !root && block.kind == BlockKind::Helper {
            return false;
        }
        self.depth += 1;
        true
    }

    fn leave_block(&mut self, _block: &Block) {
        self.depth -= 1;
    }
}
