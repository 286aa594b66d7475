//! # Block Model
//!
//! The in-memory tree produced by the HTML parser and consumed by the
//! deduplication filter, marker manager and placement engine.
//!
//! ## Modules
//!
//! - **`rich_text`**: `RichTextSpan`, `Annotations`, `Color`
//! - **`payload`**: Serialisation to the destination API's JSON (internal fields dropped)
//! - **`outline`**: Compact indented text rendering used by debug logs and tests
//!
//! ## Key Invariants
//!
//! - `dom_order` is assigned in source order and is unique per parse
//! - `marker` is internal bookkeeping and never leaves the process

pub mod outline;
pub mod payload;
pub mod rich_text;

pub use outline::outline;
pub use rich_text::{Annotations, Color, RichTextSpan, normalize_spans, plain_text, trim_spans};

use crate::markers::MarkerToken;

/// Cells of a table: rows of cells, each cell a list of spans.
pub type TableRows = Vec<Vec<Vec<RichTextSpan>>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableData {
    pub width: usize,
    pub has_column_header: bool,
    pub rows: TableRows,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ImageSource {
    /// Publicly reachable URL.
    External(String),
    /// Opaque reference returned by an image store.
    Uploaded(String),
}

impl ImageSource {
    /// Identity used for document-wide duplicate detection.
    pub fn key(&self) -> String {
        match self {
            ImageSource::External(url) => format!("external:{url}"),
            ImageSource::Uploaded(id) => format!("file:{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockKind {
    Paragraph,
    Heading { level: u8 },
    BulletedItem,
    NumberedItem,
    Quote,
    Callout { icon: String, color: Color },
    Code { language: String },
    Table(TableData),
    Image(ImageSource),
    Divider,
    Toggle,
    Embed { url: String },
}

impl BlockKind {
    /// The destination API's type name for this kind.
    pub fn api_type(&self) -> &'static str {
        match self {
            BlockKind::Paragraph => "paragraph",
            BlockKind::Heading { level: 1 } => "heading_1",
            BlockKind::Heading { level: 2 } => "heading_2",
            BlockKind::Heading { .. } => "heading_3",
            BlockKind::BulletedItem => "bulleted_list_item",
            BlockKind::NumberedItem => "numbered_list_item",
            BlockKind::Quote => "quote",
            BlockKind::Callout { .. } => "callout",
            BlockKind::Code { .. } => "code",
            BlockKind::Table(_) => "table",
            BlockKind::Image(_) => "image",
            BlockKind::Divider => "divider",
            BlockKind::Toggle => "toggle",
            BlockKind::Embed { .. } => "embed",
        }
    }

    pub fn is_list_item(&self) -> bool {
        matches!(self, BlockKind::BulletedItem | BlockKind::NumberedItem)
    }

    /// Kinds the destination API accepts nested block children under.
    pub fn accepts_children(&self) -> bool {
        matches!(
            self,
            BlockKind::Paragraph
                | BlockKind::BulletedItem
                | BlockKind::NumberedItem
                | BlockKind::Quote
                | BlockKind::Callout { .. }
                | BlockKind::Toggle
        )
    }

    /// Levels of nesting this block occupies on its own (tables carry a row level).
    pub fn intrinsic_depth(&self) -> usize {
        match self {
            BlockKind::Table(_) => 2,
            _ => 1,
        }
    }
}

/// A typed content block with inline rich text and nested children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub kind: BlockKind,
    pub spans: Vec<RichTextSpan>,
    pub children: Vec<Block>,
    pub marker: Option<MarkerToken>,
    pub dom_order: usize,
}

impl Block {
    pub fn new(kind: BlockKind, spans: Vec<RichTextSpan>, dom_order: usize) -> Self {
        Self {
            kind,
            spans,
            children: Vec::new(),
            marker: None,
            dom_order,
        }
    }

    pub fn paragraph(spans: Vec<RichTextSpan>, dom_order: usize) -> Self {
        Self::new(BlockKind::Paragraph, spans, dom_order)
    }

    pub fn image(source: ImageSource, caption: Vec<RichTextSpan>, dom_order: usize) -> Self {
        Self::new(BlockKind::Image(source), caption, dom_order)
    }

    pub fn with_children(mut self, children: Vec<Block>) -> Self {
        self.children = children;
        self
    }

    pub fn plain_text(&self) -> String {
        plain_text(&self.spans)
    }

    pub fn text_contains(&self, needle: &str) -> bool {
        self.plain_text().contains(needle)
    }

    /// Number of blocks in this subtree, including `self`.
    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(Block::subtree_len).sum::<usize>()
    }

    /// Walks this subtree depth-first in pre-order.
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a Block)) {
        f(self);
        for child in &self.children {
            child.visit(f);
        }
    }
}

/// Total block count across a forest.
pub fn count_blocks(blocks: &[Block]) -> usize {
    blocks.iter().map(Block::subtree_len).sum()
}
