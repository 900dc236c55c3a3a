//! Document sessions and text utilities.
//!
//! This module provides:
//! - `LineIndex` for byte offset <-> LSP position conversion
//! - `ChangeCoalescer` and `DifferentialEdit` for folding raw edits together
//! - `SourceMap` and `OffsetMapper` between generated code and the template
//! - `DocumentSession` and `SessionManager` for document lifecycle management

mod change;
mod mapping;
mod session;
mod text;

pub use change::{ChangeCoalescer, DifferentialEdit, PendingEdit};
pub use mapping::{OffsetMapper, SourceMap};
pub use session::{DocumentSession, SessionManager, SessionState};
pub use text::LineIndex;
