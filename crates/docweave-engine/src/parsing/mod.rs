pub mod blocks;
pub mod html;
pub mod inline;

use thiserror::Error;

use crate::config::PipelineConfig;
use crate::model::{Block, outline};
use blocks::BlockBuilder;

/// Inline markup the tokenizer could not resolve. The block parser recovers
/// from it by falling back to plain text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unresolved placeholder {0}")]
    UnresolvedPlaceholder(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedDocument {
    pub blocks: Vec<Block>,
    /// An iframe or video pointed at a known video platform.
    pub has_videos: bool,
}

/// Parses an HTML fragment into blocks.
///
/// Never fails: input without recognisable structure yields a single
/// paragraph of its text, and empty input yields no blocks. Children past
/// `config.max_depth` carry a marker and must be collected with
/// [`crate::markers::collect_and_strip`] before the tree is written.
pub fn parse_html(html: &str, config: &PipelineConfig) -> ParsedDocument {
    let nodes = html::parse_fragment(html);
    let mut builder = BlockBuilder::new(config);
    let mut blocks = builder.build(&nodes);
    if blocks.is_empty()
        && let Some(fallback) = builder.plain_text_fallback(&nodes)
    {
        blocks.push(fallback);
    }
    builder.defer_overflow(&mut blocks);

    if config.debug {
        log::debug!("parsed {} top-level block(s):\n{}", blocks.len(), outline(&blocks));
    }
    ParsedDocument {
        blocks,
        has_videos: builder.has_videos(),
    }
}
