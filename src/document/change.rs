//! Coalescing of raw edit notifications into one differential edit.
//!
//! Editors report edits one keystroke at a time, but a parse pass only runs
//! when someone asks for a result. Everything in between folds into a single
//! `PendingEdit` against the buffer as it stood before the burst.

use std::ops::Range;
use std::sync::Arc;

/// The coalesced form of a burst of raw edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEdit {
    /// Byte offset of the first edit in the burst.
    pub offset: usize,
    /// Net inserted minus removed bytes; negative for a net deletion.
    pub delta: isize,
    /// Buffer before the first edit.
    pub snapshot: Arc<str>,
}

/// One normalized before/after description of an edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DifferentialEdit {
    pub old_start: usize,
    pub old_length: usize,
    pub old_buffer: Arc<str>,
    pub new_start: usize,
    pub new_length: usize,
    pub new_buffer: Arc<str>,
}

impl DifferentialEdit {
    /// The "whole buffer is new" edit that forces a full parse.
    pub fn full(buffer: Arc<str>) -> Self {
        Self {
            old_start: 0,
            old_length: 0,
            old_buffer: Arc::from(""),
            new_start: 0,
            new_length: buffer.len(),
            new_buffer: buffer,
        }
    }

    pub fn is_full(&self) -> bool {
        self.old_buffer.is_empty() && self.new_start == 0 && self.new_length == self.new_buffer.len()
    }

    pub fn old_range(&self) -> Range<usize> {
        self.old_start..self.old_start + self.old_length
    }

    pub fn new_range(&self) -> Range<usize> {
        self.new_start..self.new_start + self.new_length
    }

    /// Text removed from the old buffer; `None` if the range is out of bounds
    /// or splits a character.
    pub fn old_text(&self) -> Option<&str> {
        self.old_buffer.get(self.old_range())
    }

    /// Text inserted into the new buffer.
    pub fn new_text(&self) -> Option<&str> {
        self.new_buffer.get(self.new_range())
    }

    pub fn net_delta(&self) -> isize {
        self.new_length as isize - self.old_length as isize
    }

    /// Whether the buffers differ only inside the described ranges.
    ///
    /// A burst of non-contiguous edits coalesces into a record whose offset
    /// only covers the first edit; such edits fail this check.
    pub fn is_consistent(&self) -> bool {
        if self.old_start != self.new_start {
            return false;
        }
        let old = self.old_buffer.as_bytes();
        let new = self.new_buffer.as_bytes();
        let old_end = self.old_start + self.old_length;
        let new_end = self.new_start + self.new_length;
        if old_end > old.len() || new_end > new.len() {
            return false;
        }
        if old.len() as isize + self.net_delta() != new.len() as isize {
            return false;
        }
        old[..self.old_start] == new[..self.new_start] && old[old_end..] == new[new_end..]
    }

    /// The smallest edit turning `old_buffer` into `new_buffer`, cut on
    /// character boundaries.
    ///
    /// Coalesced records only carry a net delta, so typing over a selection
    /// (delta 0) or a scattered burst describes the wrong range; this
    /// recovers the range that actually changed.
    pub fn narrowed(&self) -> DifferentialEdit {
        let old = &*self.old_buffer;
        let new = &*self.new_buffer;
        let mut prefix = old
            .bytes()
            .zip(new.bytes())
            .take_while(|(a, b)| a == b)
            .count();
        while !(old.is_char_boundary(prefix) && new.is_char_boundary(prefix)) {
            prefix -= 1;
        }
        let mut suffix = old
            .bytes()
            .rev()
            .zip(new.bytes().rev())
            .take(old.len().min(new.len()) - prefix)
            .take_while(|(a, b)| a == b)
            .count();
        while !(old.is_char_boundary(old.len() - suffix) && new.is_char_boundary(new.len() - suffix))
        {
            suffix -= 1;
        }
        DifferentialEdit {
            old_start: prefix,
            old_length: old.len() - prefix - suffix,
            old_buffer: Arc::clone(&self.old_buffer),
            new_start: prefix,
            new_length: new.len() - prefix - suffix,
            new_buffer: Arc::clone(&self.new_buffer),
        }
    }
}

/// Accumulates raw edits between parse passes.
#[derive(Debug)]
pub struct ChangeCoalescer {
    pending: Option<PendingEdit>,
    /// Buffer as of the last `consume`.
    buffer: Arc<str>,
}

impl ChangeCoalescer {
    pub fn new(buffer: Arc<str>) -> Self {
        Self {
            pending: None,
            buffer,
        }
    }

    /// Record one raw edit. Only the first edit after a clear snapshots.
    pub fn on_edit(&mut self, offset: usize, inserted: usize, removed: usize) {
        let pending = self.pending.get_or_insert_with(|| PendingEdit {
            offset,
            delta: 0,
            snapshot: Arc::clone(&self.buffer),
        });
        pending.delta += inserted as isize;
        pending.delta -= removed as isize;
    }

    /// Turn the pending record plus `current` into a differential edit and
    /// clear the record.
    pub fn consume(&mut self, current: Arc<str>) -> DifferentialEdit {
        self.buffer = Arc::clone(&current);
        let Some(pending) = self.pending.take() else {
            return DifferentialEdit::full(current);
        };

        let magnitude = pending.delta.unsigned_abs();
        if pending.delta < 0 {
            DifferentialEdit {
                old_start: pending.offset,
                old_length: magnitude,
                old_buffer: pending.snapshot,
                new_start: pending.offset,
                new_length: 0,
                new_buffer: current,
            }
        } else {
            DifferentialEdit {
                old_start: pending.offset,
                old_length: 0,
                old_buffer: pending.snapshot,
                new_start: pending.offset,
                new_length: magnitude,
                new_buffer: current,
            }
        }
    }

    pub fn clear(&mut self) {
        self.pending = None;
    }

    /// Forget the pending record and adopt `buffer` as the new baseline.
    pub fn reset(&mut self, buffer: Arc<str>) {
        self.pending = None;
        self.buffer = buffer;
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending(&self) -> Option<&PendingEdit> {
        self.pending.as_ref()
    }

    pub fn buffer(&self) -> &Arc<str> {
        &self.buffer
    }
}
