//! The template grammar: full parse, incremental patching and host-code
//! generation over a span/block tree.
//!
//! This module provides:
//! - `Block`, `Span` and `Visitor` for the parse tree
//! - `TemplateGrammar`, one per grammar profile, shared read-only through
//!   `ProfileCache`
//! - `GeneratedUnit`, the host compilation unit handed to the bridge

mod codegen;
mod parser;
mod partial;
mod tree;

use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;

pub use codegen::{
    CodeFragment, GeneratedMember, GeneratedMethod, GeneratedStatement, GeneratedUnit,
    SourceLocation,
};
pub use parser::{GrammarError, ParseResults};
pub use tree::{Block, BlockKind, Node, Span, SpanKind, Visitor};

use crate::document::{DifferentialEdit, LineIndex};
use crate::settings::GrammarProfile;

/// Result of reconciling an edit with the previous tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseOutcome {
    /// The tree was patched in place and stays valid.
    Accepted,
    /// A full parse was required.
    Rejected,
    /// The edit sits inside a construct whose completion cannot be decided
    /// locally; the tree was patched provisionally.
    AutoCompleteBoundary,
}

/// Grammar bound to one profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateGrammar {
    profile: GrammarProfile,
}

impl TemplateGrammar {
    pub fn new(profile: GrammarProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &GrammarProfile {
        &self.profile
    }

    /// Full parse of `source`.
    pub fn parse(&self, source: &str) -> ParseResults {
        parser::parse(source)
    }

    /// Patch `tree` for `edit`; `None` means a full parse is required.
    pub fn partial_parse(
        &self,
        tree: &Block,
        edit: &DifferentialEdit,
    ) -> Option<(Block, ParseOutcome)> {
        partial::partial_parse(tree, edit)
    }

    /// Host compilation unit for `tree`.
    pub fn generate(&self, tree: &Block, line_index: &LineIndex, path: &Path) -> GeneratedUnit {
        codegen::generate(tree, &self.profile, line_index, path)
    }
}

/// Grammars shared across documents, one per distinct profile.
#[derive(Debug, Default)]
pub struct ProfileCache {
    grammars: DashMap<GrammarProfile, Arc<TemplateGrammar>>,
}

impl ProfileCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The grammar for `profile`, built on first use.
    pub fn get(&self, profile: &GrammarProfile) -> Arc<TemplateGrammar> {
        if let Some(grammar) = self.grammars.get(profile) {
            return Arc::clone(&grammar);
        }
        let grammar = self
            .grammars
            .entry(profile.clone())
            .or_insert_with(|| Arc::new(TemplateGrammar::new(profile.clone())));
        Arc::clone(&grammar)
    }

    /// Drop the grammar for `profile` once no session holds it.
    pub fn release(&self, profile: &GrammarProfile) {
        let released = self
            .grammars
            .remove_if(profile, |_, grammar| Arc::strong_count(grammar) == 1)
            .is_some();
        if released {
            tracing::trace!(kind = ?profile.kind(), "released grammar");
        }
    }

    pub fn len(&self) -> usize {
        self.grammars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grammars.is_empty()
    }
}
