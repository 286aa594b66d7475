//! # Deferred Placement
//!
//! Writes the blocks collected by [`crate::markers::collect_and_strip`] into
//! an already persisted page, under the block whose text carries their marker.
//!
//! ## Modules
//!
//! - **`appender`**: `ChunkAppender`, batched appends with per-chunk retry
//! - **`walker`**: `TreeWalker` breadth-first anchor search and marker discovery
//! - **`orchestrator`**: `Orchestrator`, the sequential locate/append/clean loop and the final sweep
//!
//! ## Key Invariants
//!
//! - Placements run one at a time, in source order
//! - Content without a reachable anchor still lands on the page, at its root
//! - After a completed pass no block on the page carries marker text

pub mod appender;
pub mod orchestrator;
pub mod walker;

pub use appender::{AppendError, ChunkAppender};
pub use orchestrator::{Orchestrator, PlacementReport};
pub use walker::{AnchorLocation, ApiTreeWalker, TreeWalker};
