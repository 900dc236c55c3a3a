//! LSP protocol feature implementations.
//!
//! This module provides implementations for LSP features:
//! - Diagnostics conversion from projected results
//! - Folding ranges from fold regions and template comments

mod diagnostics;
mod folding;

pub use diagnostics::to_diagnostics;
pub use folding::folding_ranges;
