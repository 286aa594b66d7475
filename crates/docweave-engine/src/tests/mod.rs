//! Shared fixtures for unit tests.

use crate::convert::ConversionRequest;
use crate::model::{Block, BlockKind, RichTextSpan};

/// A live conversion request titled "Sample" for database `db`.
pub fn request(html: &str) -> ConversionRequest {
    ConversionRequest {
        title: "Sample".into(),
        content_html: html.into(),
        database_id: Some("db".into()),
        ..ConversionRequest::default()
    }
}

pub fn para(text: &str, dom_order: usize) -> Block {
    Block::paragraph(vec![RichTextSpan::plain(text)], dom_order)
}

pub fn bullet(text: &str, children: Vec<Block>) -> Block {
    Block::new(BlockKind::BulletedItem, vec![RichTextSpan::plain(text)], 0).with_children(children)
}
