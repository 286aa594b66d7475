//! # Block Parsing
//!
//! Visits the HTML tree and emits typed [`Block`](crate::model::Block)s.
//!
//! ## Phases
//!
//! 1. **Construction** (`builder`): a recursive visitor over block-level
//!    elements. Inline runs between them are tokenized into paragraphs.
//! 2. **Depth fitting** (`BlockBuilder::defer_overflow`): children that would
//!    exceed the nesting limit are tagged with a marker for later placement.
//!
//! ## Modules
//!
//! - **`builder`**: `BlockBuilder` visitor and depth fitting
//! - **`classify`**: block/inline/skip decisions and container roles (callouts)
//! - **`tables`**: rows, width normalisation, image hoisting
//! - **`code`**: language detection and aliasing
//! - **`media`**: image and embed sources, video detection
//!
//! ## Key Invariants
//!
//! - Parsing never fails; unparseable inline markup degrades to plain text
//! - Every table row has exactly `table_width` cells
//! - `dom_order` increases in document order

pub mod builder;
pub mod classify;
pub mod code;
pub mod media;
pub mod tables;

pub use builder::BlockBuilder;
pub use classify::{CalloutStyle, ContainerRole, container_role};
