//! Incremental reconciliation of a differential edit with the current tree.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::document::DifferentialEdit;
use crate::grammar::{Block, BlockKind, GrammarError, ParseOutcome, TemplateGrammar};

/// Owns the current tree of one document and keeps it in step with edits.
#[derive(Debug)]
pub struct Reconciler {
    grammar: Arc<TemplateGrammar>,
    tree: Option<Block>,
    /// Buffer `tree` describes.
    source: Option<Arc<str>>,
    /// Errors of the last full parse, shifted along with accepted edits.
    errors: Vec<GrammarError>,
    in_flight: Arc<AtomicBool>,
}

impl Reconciler {
    pub fn new(grammar: Arc<TemplateGrammar>, in_flight: Arc<AtomicBool>) -> Self {
        Self {
            grammar,
            tree: None,
            source: None,
            errors: Vec::new(),
            in_flight,
        }
    }

    pub fn grammar(&self) -> &Arc<TemplateGrammar> {
        &self.grammar
    }

    pub fn tree(&self) -> Option<&Block> {
        self.tree.as_ref()
    }

    pub fn source(&self) -> Option<&Arc<str>> {
        self.source.as_ref()
    }

    pub fn errors(&self) -> &[GrammarError] {
        &self.errors
    }

    /// Bring the tree up to date with `edit`.
    ///
    /// A rejected edit waits for a full parse on a blocking worker. There is
    /// no timeout; a parse always runs to completion or faults.
    pub async fn reconcile(&mut self, edit: &DifferentialEdit) -> ParseOutcome {
        if let Some(outcome) = self.try_partial(edit) {
            tracing::debug!(?outcome, offset = edit.old_start, "partial parse");
            return outcome;
        }
        self.full_parse(Arc::clone(&edit.new_buffer)).await;
        ParseOutcome::Rejected
    }

    fn try_partial(&mut self, edit: &DifferentialEdit) -> Option<ParseOutcome> {
        if edit.is_full() {
            return None;
        }
        let narrowed;
        let edit = if edit.is_consistent() {
            edit
        } else {
            narrowed = edit.narrowed();
            &narrowed
        };
        let source = self.source.as_ref()?;
        if !Arc::ptr_eq(source, &edit.old_buffer) && **source != *edit.old_buffer {
            return None;
        }
        let tree = self.tree.as_ref()?;
        let (patched, outcome) = self.grammar.partial_parse(tree, edit)?;

        shift_errors(&mut self.errors, edit);
        self.tree = Some(patched);
        self.source = Some(Arc::clone(&edit.new_buffer));
        Some(outcome)
    }

    async fn full_parse(&mut self, source: Arc<str>) {
        self.in_flight.store(true, Ordering::SeqCst);
        let grammar = Arc::clone(&self.grammar);
        let text = Arc::clone(&source);
        let handle = tokio::task::spawn_blocking(move || grammar.parse(&text));

        match handle.await {
            Ok(results) => {
                tracing::debug!(
                    len = source.len(),
                    errors = results.errors.len(),
                    "full parse"
                );
                self.tree = Some(results.root);
                self.errors = results.errors;
                self.source = Some(source);
            }
            Err(err) => {
                tracing::error!(error = %err, "template parse worker failed");
                if self.tree.is_none() {
                    self.tree = Some(Block::new(BlockKind::Markup, 0));
                }
                // The kept tree no longer matches the buffer; the next edit
                // must parse from scratch.
                self.source = None;
                self.errors = vec![GrammarError::new(
                    format!("template parse failed: {err}"),
                    0..0,
                )];
            }
        }
        self.in_flight.store(false, Ordering::SeqCst);
    }
}

/// Move errors that lie after the edit by its net delta.
fn shift_errors(errors: &mut [GrammarError], edit: &DifferentialEdit) {
    let old_end = edit.old_start + edit.old_length;
    let delta = edit.net_delta();
    let shift = |offset: usize| offset.saturating_add_signed(delta);
    for error in errors.iter_mut() {
        if error.span.start >= old_end {
            error.span = shift(error.span.start)..shift(error.span.end);
        } else if error.span.end >= old_end {
            error.span.end = shift(error.span.end).max(error.span.start);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ChangeCoalescer;
    use crate::settings::GrammarProfile;

    fn reconciler() -> Reconciler {
        let grammar = Arc::new(TemplateGrammar::new(GrammarProfile::default()));
        Reconciler::new(grammar, Arc::new(AtomicBool::new(false)))
    }

    #[tokio::test]
    async fn first_edit_is_a_full_parse() {
        let mut r = reconciler();
        let outcome = r.reconcile(&DifferentialEdit::full(Arc::from("<p>@x</p>"))).await;
        assert_eq!(outcome, ParseOutcome::Rejected);
        assert_eq!(r.tree().map(Block::text).as_deref(), Some("<p>@x</p>"));
        assert!(!r.in_flight.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn markup_typing_is_accepted() {
        let mut r = reconciler();
        let mut coalescer = ChangeCoalescer::new(Arc::from(""));
        r.reconcile(&coalescer.consume(Arc::from("<p>hi</p>"))).await;

        coalescer.on_edit(5, 1, 0);
        let edit = coalescer.consume(Arc::from("<p>hi!</p>"));
        assert_eq!(r.reconcile(&edit).await, ParseOutcome::Accepted);
        assert_eq!(r.tree().map(Block::text).as_deref(), Some("<p>hi!</p>"));
    }

    #[tokio::test]
    async fn opening_a_block_is_rejected_with_diagnostics() {
        let mut r = reconciler();
        let mut coalescer = ChangeCoalescer::new(Arc::from(""));
        r.reconcile(&coalescer.consume(Arc::from("<p>hi</p>"))).await;

        coalescer.on_edit(3, 2, 0);
        let edit = coalescer.consume(Arc::from("<p>@{hi</p>"));
        assert_eq!(r.reconcile(&edit).await, ParseOutcome::Rejected);
        assert!(r
            .errors()
            .iter()
            .any(|e| e.message.starts_with("unterminated block")));
    }

    #[tokio::test]
    async fn typing_over_a_selection_is_accepted() {
        let mut r = reconciler();
        let mut coalescer = ChangeCoalescer::new(Arc::from(""));
        r.reconcile(&coalescer.consume(Arc::from("<p>cat</p>"))).await;

        coalescer.on_edit(3, 1, 1);
        let edit = coalescer.consume(Arc::from("<p>bat</p>"));
        assert!(!edit.is_consistent());
        assert_eq!(r.reconcile(&edit).await, ParseOutcome::Accepted);
        assert_eq!(r.tree().map(Block::text).as_deref(), Some("<p>bat</p>"));
    }

    #[tokio::test]
    async fn stale_tree_forces_full_parse() {
        let mut r = reconciler();
        r.reconcile(&DifferentialEdit::full(Arc::from("<p>a</p>"))).await;
        let edit = DifferentialEdit {
            old_start: 3,
            old_length: 0,
            old_buffer: Arc::from("<b>a</b>"),
            new_start: 3,
            new_length: 1,
            new_buffer: Arc::from("<b>xa</b>"),
        };
        assert_eq!(r.reconcile(&edit).await, ParseOutcome::Rejected);
        assert_eq!(r.tree().map(Block::text).as_deref(), Some("<b>xa</b>"));
    }

    #[test]
    fn errors_after_the_edit_shift() {
        let mut errors = vec![
            GrammarError::new("before", 0..2),
            GrammarError::new("after", 10..12),
            GrammarError::new("across", 2..12),
        ];
        let edit = DifferentialEdit {
            old_start: 5,
            old_length: 0,
            old_buffer: Arc::from(""),
            new_start: 5,
            new_length: 3,
            new_buffer: Arc::from(""),
        };
        shift_errors(&mut errors, &edit);
        assert_eq!(errors[0].span, 0..2);
        assert_eq!(errors[1].span, 13..15);
        assert_eq!(errors[2].span, 2..15);
    }
}
