//! Folding ranges from projected results.

use tower_lsp::lsp_types::{FoldingRange, FoldingRangeKind};

use crate::engine::ProjectedResult;

/// Fold regions plus multi-line template comments, ordered by start line.
pub fn folding_ranges(result: &ProjectedResult) -> Vec<FoldingRange> {
    let folds = result.folds.iter().map(|fold| FoldingRange {
        start_line: fold.start.line,
        start_character: Some(fold.start.character),
        end_line: fold.end.line,
        end_character: Some(fold.end.character),
        kind: Some(FoldingRangeKind::Region),
        collapsed_text: Some(fold.label.clone()),
    });
    let comments = result
        .comments
        .iter()
        .filter(|comment| comment.start.line < comment.end.line)
        .map(|comment| FoldingRange {
            start_line: comment.start.line,
            start_character: Some(comment.start.character),
            end_line: comment.end.line,
            end_character: Some(comment.end.character),
            kind: Some(FoldingRangeKind::Comment),
            collapsed_text: Some(format!("{} {}", comment.open_tag, comment.close_tag)),
        });

    let mut ranges: Vec<_> = folds.chain(comments).collect();
    ranges.sort_by_key(|range| (range.start_line, std::cmp::Reverse(range.end_line)));
    ranges
}
