use serde_json::{Map, Value, json};

use super::{Annotations, Block, BlockKind, Color, ImageSource, RichTextSpan, TableData};

/// Maximum characters the destination API accepts in one text object.
pub const MAX_TEXT_LEN: usize = 2000;

impl Block {
    /// Serialises this block and its children into the destination API's JSON.
    ///
    /// `dom_order` and `marker` are bookkeeping and are never emitted.
    pub fn to_payload(&self) -> Value {
        let api_type = self.kind.api_type();
        let mut body = Map::new();

        match &self.kind {
            BlockKind::Paragraph
            | BlockKind::Heading { .. }
            | BlockKind::BulletedItem
            | BlockKind::NumberedItem
            | BlockKind::Quote
            | BlockKind::Toggle => {
                body.insert("rich_text".into(), rich_text_value(&self.spans));
            }
            BlockKind::Callout { icon, color } => {
                body.insert("rich_text".into(), rich_text_value(&self.spans));
                body.insert("icon".into(), json!({ "type": "emoji", "emoji": icon }));
                body.insert("color".into(), json!(color.as_str()));
            }
            BlockKind::Code { language } => {
                body.insert("rich_text".into(), rich_text_value(&self.spans));
                body.insert("language".into(), json!(language));
            }
            BlockKind::Table(table) => {
                body.insert("table_width".into(), json!(table.width));
                body.insert("has_column_header".into(), json!(table.has_column_header));
                body.insert("has_row_header".into(), json!(false));
                body.insert("children".into(), Value::Array(table_rows_value(table)));
            }
            BlockKind::Image(source) => {
                match source {
                    ImageSource::External(url) => {
                        body.insert("type".into(), json!("external"));
                        body.insert("external".into(), json!({ "url": url }));
                    }
                    ImageSource::Uploaded(id) => {
                        body.insert("type".into(), json!("file_upload"));
                        body.insert("file_upload".into(), json!({ "id": id }));
                    }
                }
                if !self.spans.is_empty() {
                    body.insert("caption".into(), rich_text_value(&self.spans));
                }
            }
            BlockKind::Divider => {}
            BlockKind::Embed { url } => {
                body.insert("url".into(), json!(url));
            }
        }

        if !self.children.is_empty() && self.kind.accepts_children() {
            let children = self.children.iter().map(Block::to_payload).collect();
            body.insert("children".into(), Value::Array(children));
        }

        json!({
            "object": "block",
            "type": api_type,
            api_type: Value::Object(body),
        })
    }
}

fn table_rows_value(table: &TableData) -> Vec<Value> {
    table
        .rows
        .iter()
        .map(|row| {
            let cells: Vec<Value> = row.iter().map(|cell| rich_text_value(cell)).collect();
            json!({
                "object": "block",
                "type": "table_row",
                "table_row": { "cells": cells },
            })
        })
        .collect()
}

/// Serialises spans, splitting any span longer than [`MAX_TEXT_LEN`] characters.
pub fn rich_text_value(spans: &[RichTextSpan]) -> Value {
    let mut items = Vec::with_capacity(spans.len());
    for span in spans {
        for piece in split_chars(&span.content, MAX_TEXT_LEN) {
            items.push(text_object(piece, &span.annotations, span.link.as_deref()));
        }
    }
    Value::Array(items)
}

fn text_object(content: &str, annotations: &Annotations, link: Option<&str>) -> Value {
    let link = match link {
        Some(url) => json!({ "url": url }),
        None => Value::Null,
    };
    json!({
        "type": "text",
        "text": { "content": content, "link": link },
        "annotations": {
            "bold": annotations.bold,
            "italic": annotations.italic,
            "strikethrough": annotations.strikethrough,
            "underline": false,
            "code": annotations.code,
            "color": annotations.color.as_str(),
        },
    })
}

/// Splits `s` into pieces of at most `max` characters, on char boundaries.
///
/// An empty string yields a single empty piece so linked empty spans survive.
fn split_chars(s: &str, max: usize) -> Vec<&str> {
    if s.chars().count() <= max {
        return vec![s];
    }
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut count = 0;
    for (idx, _) in s.char_indices() {
        if count == max {
            pieces.push(&s[start..idx]);
            start = idx;
            count = 0;
        }
        count += 1;
    }
    pieces.push(&s[start..]);
    pieces
}

/// Payload for replacing a block's rich text via update-block.
pub fn rich_text_update(api_type: &str, spans: &[RichTextSpan]) -> Value {
    json!({ api_type: { "rich_text": rich_text_value(spans) } })
}

/// Parses a destination API rich text array back into spans.
pub fn spans_from_value(value: &Value) -> Vec<RichTextSpan> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .map(|item| {
            let content = item
                .pointer("/text/content")
                .or_else(|| item.get("plain_text"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let link = item
                .pointer("/text/link/url")
                .or_else(|| item.get("href"))
                .and_then(Value::as_str)
                .map(str::to_string);
            let flag = |name: &str| {
                item.pointer(&format!("/annotations/{name}"))
                    .and_then(Value::as_bool)
                    .unwrap_or(false)
            };
            let color = item
                .pointer("/annotations/color")
                .and_then(Value::as_str)
                .map(Color::parse)
                .unwrap_or_default();
            RichTextSpan {
                content,
                annotations: Annotations {
                    bold: flag("bold"),
                    italic: flag("italic"),
                    code: flag("code"),
                    strikethrough: flag("strikethrough"),
                    color,
                },
                link,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markers::MarkerToken;
    use pretty_assertions::assert_eq;

    #[test]
    fn paragraph_payload_drops_bookkeeping() {
        let mut block = Block::paragraph(vec![RichTextSpan::bold("Hi")], 42);
        block.marker = Some(MarkerToken::from_raw("abc"));
        let payload = block.to_payload();

        assert_eq!(payload["type"], "paragraph");
        assert_eq!(payload["paragraph"]["rich_text"][0]["text"]["content"], "Hi");
        assert_eq!(payload["paragraph"]["rich_text"][0]["annotations"]["bold"], true);
        let text = payload.to_string();
        assert!(!text.contains("dom_order"));
        assert!(!text.contains("marker"));
    }

    #[test]
    fn long_spans_are_split_at_limit() {
        let long = "x".repeat(MAX_TEXT_LEN * 2 + 5);
        let value = rich_text_value(&[RichTextSpan::bold(long)]);
        let items = value.as_array().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[2]["text"]["content"].as_str().unwrap().len(), 5);
        assert!(items.iter().all(|i| i["annotations"]["bold"] == true));
    }

    #[test]
    fn split_respects_multibyte_boundaries() {
        let s = "é".repeat(5);
        let pieces = split_chars(&s, 2);
        assert_eq!(pieces, vec!["éé", "éé", "é"]);
    }

    #[test]
    fn table_payload_carries_rows_as_children() {
        let table = Block::new(
            BlockKind::Table(TableData {
                width: 2,
                has_column_header: true,
                rows: vec![
                    vec![vec![RichTextSpan::plain("a")], vec![RichTextSpan::plain("b")]],
                    vec![vec![], vec![RichTextSpan::plain("d")]],
                ],
            }),
            vec![],
            0,
        );
        let payload = table.to_payload();
        assert_eq!(payload["table"]["table_width"], 2);
        let rows = payload["table"]["children"].as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["table_row"]["cells"][0], json!([]));
    }

    #[test]
    fn spans_parse_back_from_api_shape() {
        let spans = vec![
            RichTextSpan::plain("see "),
            RichTextSpan::bold("docs").with_link("https://example.com"),
        ];
        let parsed = spans_from_value(&rich_text_value(&spans));
        assert_eq!(parsed, spans);
    }
}
