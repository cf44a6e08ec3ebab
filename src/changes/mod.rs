//! Working tree scanning against committed path sets.
//!
//! The detector walks the tree once, honoring ignore rules and tracking
//! patterns, and can store new content while it scans. Moves are annotated
//! on top of additions and deletions.

mod detector;
mod moves;
mod patterns;
mod rename;

pub use detector::{ChangeDetector, DetectOptions};
pub use moves::detect_moves;
pub use patterns::{join_pattern, normalize_rel_path, split_pattern, PatternSet};
pub use rename::{reorder_renames, tokenize, GlobToken, RenamePattern};
