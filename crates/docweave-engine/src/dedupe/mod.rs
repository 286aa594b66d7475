//! # Deduplication
//!
//! Removes accidental duplicates that scraping tends to produce (a callout
//! rendered twice, the same figure in two wrappers) while keeping text that
//! legitimately repeats.
//!
//! ## Rules
//!
//! - a block whose key matches one of the last `window` emitted keys is dropped
//! - list items and dividers are never dropped
//! - blocks whose text is a common section label are never dropped
//! - an image is dropped if the same source appeared anywhere before
//! - grey informational callouts are always dropped
//!
//! Each `children` list gets its own window; the image set is document-wide.

use std::collections::{HashSet, VecDeque};

use crate::config::PipelineConfig;
use crate::markers::strip_all_marker_text;
use crate::model::{Block, BlockKind, Color, TableData, plain_text};

/// Labels that repeat in procedure-style documents and must survive.
pub const SECTION_LABELS: &[&str] = &[
    "Procedure",
    "About this task",
    "Steps",
    "Requirements",
    "Overview",
    "Submit the form.",
    "Before you begin",
    "Role required:",
    "Prerequisites",
    "Note:",
    "Important:",
    "Warning:",
];

const KEY_TEXT_LIMIT: usize = 200;
const NOISE_ICONS: &[&str] = &["ℹ️", "ℹ"];

/// Filters `blocks` with the window from `config`.
pub fn filter(blocks: Vec<Block>, config: &PipelineConfig) -> Vec<Block> {
    let mut filter = DedupeFilter::new(config.dedupe_window);
    let out = filter.filter(blocks);
    if filter.dropped > 0 {
        log::info!("dedupe removed {} block(s)", filter.dropped);
    }
    out
}

#[derive(Debug)]
pub struct DedupeFilter {
    window: usize,
    seen_images: HashSet<String>,
    pub dropped: usize,
}

impl DedupeFilter {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            seen_images: HashSet::new(),
            dropped: 0,
        }
    }

    pub fn filter(&mut self, blocks: Vec<Block>) -> Vec<Block> {
        let mut recent: VecDeque<String> = VecDeque::with_capacity(self.window + 1);
        let mut out = Vec::with_capacity(blocks.len());

        for mut block in blocks {
            if is_noise_callout(&block) {
                log::debug!("dropping noise callout: {:?}", block.plain_text());
                self.dropped += block.subtree_len();
                continue;
            }

            let key = block_key(&block);
            if let BlockKind::Image(source) = &block.kind {
                if !self.seen_images.insert(source.key()) {
                    log::debug!("dropping repeated image {}", source.key());
                    self.dropped += block.subtree_len();
                    continue;
                }
            } else if !is_exempt(&block) && recent.contains(&key) {
                log::debug!("dropping duplicate {key}");
                self.dropped += block.subtree_len();
                continue;
            }

            let children = std::mem::take(&mut block.children);
            block.children = self.filter(children);

            recent.push_back(key);
            if recent.len() > self.window {
                recent.pop_front();
            }
            out.push(block);
        }
        out
    }
}

fn is_exempt(block: &Block) -> bool {
    if block.kind.is_list_item() || matches!(block.kind, BlockKind::Divider) {
        return true;
    }
    is_section_label(&content_text(block))
}

/// Block text without marker tokens, which are unique per anchor.
fn content_text(block: &Block) -> String {
    plain_text(&strip_all_marker_text(&block.spans))
}

pub fn is_section_label(text: &str) -> bool {
    let trimmed = text.trim();
    SECTION_LABELS.iter().any(|label| *label == trimmed)
}

/// Callouts styled as grey informational boxes are generated clutter.
pub fn is_noise_callout(block: &Block) -> bool {
    matches!(
        &block.kind,
        BlockKind::Callout { icon, color: Color::GrayBackground } if NOISE_ICONS.contains(&icon.as_str())
    )
}

/// Content-derived identity of a block for duplicate detection.
pub fn block_key(block: &Block) -> String {
    let text = truncate(normalize(&content_text(block)), KEY_TEXT_LIMIT);
    match &block.kind {
        BlockKind::Callout { icon, color } => format!("callout:{text}|{icon}|{}", color.as_str()),
        BlockKind::Image(source) => source.key(),
        BlockKind::Table(table) => table_key(table),
        BlockKind::Code { language } => format!("code:{language}:{text}"),
        kind => format!("{}:{text}", kind.api_type()),
    }
}

fn table_key(table: &TableData) -> String {
    let sample: Vec<String> = table
        .rows
        .iter()
        .take(3)
        .map(|row| {
            row.iter()
                .map(|cell| truncate(normalize(&plain_text(cell)), KEY_TEXT_LIMIT))
                .collect::<Vec<_>>()
                .join("|")
        })
        .collect();
    format!("table:{}x{}:{}", table.width, table.rows.len(), sample.join("/"))
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate(text: String, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text,
    }
}
