//! Local patching of an existing tree for a single differential edit.
//!
//! The edit is owned by exactly one leaf span; whether the patch may apply is
//! decided from the owner's kind and the kind of block around it. A patch
//! that passes those rules is then checked against a re-scan of the
//! top-level nodes around the edit, and refused if the tree's shape changed
//! so the caller falls back to a full parse.

use crate::document::DifferentialEdit;

use super::parser::{self, is_ident, is_ident_start};
use super::tree::{Block, BlockKind, Node, Span, SpanKind};
use super::ParseOutcome;

const MARKUP_STRUCTURAL: &[char] = &['@', '{', '}', '*'];
const COMMENT_STRUCTURAL: &[char] = &['@', '*'];
const EXPLICIT_STRUCTURAL: &[char] = &['(', ')', '"', '\'', '@'];
const CODE_STRUCTURAL: &[char] = &['{', '}', '(', ')', '"', '\'', '<', '@', '/', '*'];

/// A leaf span together with where it sits in the tree.
struct Leaf<'a> {
    path: Vec<usize>,
    span: &'a Span,
    parent: &'a Block,
}

/// Try to patch `tree` for `edit`. `None` means a full parse is required.
pub(crate) fn partial_parse(tree: &Block, edit: &DifferentialEdit) -> Option<(Block, ParseOutcome)> {
    let removed = edit.old_text()?;
    let inserted = edit.new_text()?;
    let start = edit.old_start;
    let old_end = start + edit.old_length;

    let mut leaves = Vec::new();
    collect_leaves(tree, &mut Vec::new(), &mut leaves);
    let index = leaves
        .iter()
        .position(|leaf| leaf.span.start <= start && old_end <= leaf.span.end())?;
    let owner = &leaves[index];
    if leaves[..index]
        .iter()
        .any(|leaf| scanned_to_end(leaf, &edit.old_buffer))
    {
        return None;
    }
    let previous = index.checked_sub(1).map(|i| leaves[i].span);
    let next = leaves.get(index + 1).map(|leaf| leaf.span);

    let relative = start - owner.span.start;
    let mut content = owner.span.content.clone();
    content.get(relative..relative + removed.len())?;
    content.replace_range(relative..relative + removed.len(), inserted);

    // Text appended after a nested block's last span belongs to whatever follows the block.
    let at_end = relative + removed.len() == owner.span.len();
    let last_in_block = owner.path.len() > 1
        && owner.path.last() == Some(&(owner.parent.children.len() - 1));
    let extends_expression = owner.span.kind == SpanKind::Code
        && owner.parent.kind == BlockKind::Expression
        && is_implicit(owner.parent);
    if at_end && last_in_block && !extends_expression {
        return None;
    }

    let outcome = match owner.span.kind {
        SpanKind::Transition => None,
        SpanKind::Markup => markup_edit(owner, relative, removed, inserted, previous, next),
        SpanKind::Comment => {
            (!touches(removed, inserted, COMMENT_STRUCTURAL)).then_some(ParseOutcome::Accepted)
        }
        SpanKind::Code => code_edit(owner, relative, removed, inserted, &content),
    }?;

    let mut patched = tree.clone();
    let old_span_end = owner.span.end();
    let delta = inserted.len() as isize - removed.len() as isize;
    let span = span_at_mut(&mut patched, &owner.path)?;
    span.content = content;
    patched.shift_from(old_span_end, delta);

    let region = rescan_region(tree, owner.path[0], edit);
    let same_shape = region.nodes.len() == region.resume - region.first
        && patched.children[region.first..region.resume] == region.nodes[..];
    if same_shape {
        Some((patched, outcome))
    } else if outcome == ParseOutcome::AutoCompleteBoundary {
        Some((splice(tree, region, delta), outcome))
    } else {
        None
    }
}

/// Freshly parsed top-level nodes replacing `tree.children[first..resume]`.
struct Region {
    first: usize,
    resume: usize,
    nodes: Vec<Node>,
}

/// Re-parse the top-level nodes around the edit from the new buffer.
///
/// Lookahead of the two nodes before the edited one can reach into it, so
/// the scan starts there; it stops on the first old node boundary past the
/// edit, where both parses are in the same state.
fn rescan_region(tree: &Block, top: usize, edit: &DifferentialEdit) -> Region {
    let first = top.saturating_sub(2);
    let old_end = edit.old_start + edit.old_length;
    let new_end = edit.new_start + edit.new_length;
    let start = tree.children[first].start();
    let (nodes, resume) = parser::rescan(&edit.new_buffer, start, |pos| {
        if pos <= new_end {
            return None;
        }
        let old = pos - new_end + old_end;
        tree.children.binary_search_by_key(&old, |node| node.start()).ok()
    });
    Region {
        first,
        resume: resume.unwrap_or(tree.children.len()),
        nodes,
    }
}

fn splice(tree: &Block, region: Region, delta: isize) -> Block {
    let mut root = Block::new(tree.kind, tree.start);
    root.name = tree.name.clone();
    root.children.extend_from_slice(&tree.children[..region.first]);
    root.children.extend(region.nodes);
    root.children
        .extend(tree.children[region.resume..].iter().cloned().map(|mut node| {
            node.shift(delta);
            node
        }));
    root
}

fn markup_edit(
    owner: &Leaf<'_>,
    relative: usize,
    removed: &str,
    inserted: &str,
    previous: Option<&Span>,
    next: Option<&Span>,
) -> Option<ParseOutcome> {
    if touches(removed, inserted, MARKUP_STRUCTURAL) {
        return None;
    }
    // Text glued onto a preceding expression could extend it.
    if relative == 0 && previous.is_some_and(|span| span.kind != SpanKind::Markup) {
        return None;
    }
    // Identifier text right before a transition turns it into an email-like literal.
    let at_end = relative + removed.len() == owner.span.len();
    let glued = inserted
        .bytes()
        .last()
        .is_some_and(|c| c.is_ascii_alphanumeric());
    if at_end && glued && next.is_some_and(|span| span.kind == SpanKind::Transition) {
        return None;
    }
    Some(ParseOutcome::Accepted)
}

fn code_edit(
    owner: &Leaf<'_>,
    relative: usize,
    removed: &str,
    inserted: &str,
    content: &str,
) -> Option<ParseOutcome> {
    let parent = owner.parent;
    match parent.kind {
        BlockKind::Expression if is_implicit(parent) => {
            implicit_expression_edit(owner.span, relative, removed, inserted, content)
        }
        BlockKind::Expression => {
            (!touches(removed, inserted, EXPLICIT_STRUCTURAL)).then_some(ParseOutcome::Accepted)
        }
        BlockKind::Statement | BlockKind::Functions | BlockKind::Helper => {
            if touches(removed, inserted, CODE_STRUCTURAL) {
                return None;
            }
            // Headers carry the block's keyword or name.
            let header = parent
                .children
                .iter()
                .position(|node| matches!(node, Node::Span(span) if span.kind == SpanKind::Code));
            let is_header = header
                .and_then(|i| parent.children[i].as_span())
                .is_some_and(|span| span.start == owner.span.start);
            if is_header {
                let protected = match parent.kind {
                    BlockKind::Statement => parent.name.as_ref().map_or(0, |kw| kw.len()),
                    _ => owner.span.len(),
                };
                if relative <= protected {
                    return None;
                }
            }
            Some(ParseOutcome::Accepted)
        }
        _ => None,
    }
}

/// An implicit expression cut short by an unbalanced bracket looked ahead to
/// the end of the buffer, so an edit anywhere after it can change where it
/// ends.
fn scanned_to_end(leaf: &Leaf<'_>, buffer: &str) -> bool {
    leaf.span.kind == SpanKind::Code
        && leaf.parent.kind == BlockKind::Expression
        && is_implicit(leaf.parent)
        && matches!(buffer.as_bytes().get(leaf.span.end()), Some(b'(' | b'['))
}

/// `@name.member` as opposed to `@( ... )`.
fn is_implicit(block: &Block) -> bool {
    matches!(
        block.children.first(),
        Some(Node::Span(span)) if span.kind == SpanKind::Transition && span.content == "@"
    )
}

fn implicit_expression_edit(
    span: &Span,
    relative: usize,
    removed: &str,
    inserted: &str,
    content: &str,
) -> Option<ParseOutcome> {
    if removed.is_empty() && inserted == "." && relative == span.len() {
        return Some(ParseOutcome::AutoCompleteBoundary);
    }
    let inserted_ok = inserted.bytes().all(is_ident);
    let removed_ok = removed.bytes().all(|c| is_ident(c) || c == b'.');
    if !inserted_ok || !removed_ok || !is_member_chain(content) {
        return None;
    }
    if content.ends_with('.') {
        return Some(ParseOutcome::AutoCompleteBoundary);
    }
    Some(ParseOutcome::Accepted)
}

/// Dotted identifiers, optionally followed by the bracketed tail the
/// expression already had; a single trailing dot is allowed.
fn is_member_chain(content: &str) -> bool {
    let head = content
        .find(|c| c == '(' || c == '[')
        .map_or(content, |i| &content[..i]);
    let trimmed = head.strip_suffix('.').unwrap_or(head);
    !trimmed.is_empty()
        && trimmed.split('.').all(|segment| {
            segment.bytes().next().is_some_and(is_ident_start) && segment.bytes().all(is_ident)
        })
}

fn touches(removed: &str, inserted: &str, structural: &[char]) -> bool {
    removed.contains(structural) || inserted.contains(structural)
}

fn collect_leaves<'a>(block: &'a Block, path: &mut Vec<usize>, out: &mut Vec<Leaf<'a>>) {
    for (i, child) in block.children.iter().enumerate() {
        path.push(i);
        match child {
            Node::Span(span) => out.push(Leaf {
                path: path.clone(),
                span,
                parent: block,
            }),
            Node::Block(inner) => collect_leaves(inner, path, out),
        }
        path.pop();
    }
}

fn span_at_mut<'a>(block: &'a mut Block, path: &[usize]) -> Option<&'a mut Span> {
    let (&first, rest) = path.split_first()?;
    match block.children.get_mut(first)? {
        Node::Span(span) if rest.is_empty() => Some(span),
        Node::Block(inner) => span_at_mut(inner, rest),
        Node::Span(_) => None,
    }
}
