//! # Deferred Placement Markers
//!
//! Content nested deeper than the destination API accepts in one write is
//! tagged with a [`MarkerToken`]. The block that should receive it carries the
//! literal `(marker:<token>)` text, so it can be found again once persisted.
//!
//! [`collect_and_strip`] pulls the tagged blocks out of the tree into a
//! [`MarkerMap`]; the placement engine turns that map into
//! [`PendingPlacement`]s and resolves them one by one.

use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{Block, RichTextSpan, plain_text};

const MARKER_OPEN: &str = "(marker:";
const MARKER_CLOSE: char = ')';

static MARKER_TEXT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(marker:([A-Za-z0-9_\-]+)\)").expect("valid marker regex"));

/// Opaque, run-unique token linking deferred blocks to their anchor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarkerToken(String);

impl MarkerToken {
    /// Generates a fresh token: `<elementId>__<timestamp>-<random>`.
    ///
    /// The element id is only a debugging aid; characters outside
    /// `[A-Za-z0-9_-]` are dropped from it.
    pub fn generate(element_id: Option<&str>) -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let random = uuid::Uuid::new_v4().simple().to_string();
        let core = format!("{}-{}", to_base36(millis), &random[..12]);

        let prefix: String = element_id
            .unwrap_or_default()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .take(40)
            .collect();
        if prefix.is_empty() {
            Self(core)
        } else {
            Self(format!("{prefix}__{core}"))
        }
    }

    /// Wraps an existing token string, e.g. one found in persisted text.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The literal text embedded in an anchor's rich text.
    pub fn marker_text(&self) -> String {
        format!("{MARKER_OPEN}{}{MARKER_CLOSE}", self.0)
    }
}

impl fmt::Display for MarkerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn to_base36(mut n: u128) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Span that embeds `token` into an anchor's rich text.
pub fn marker_span(token: &MarkerToken) -> RichTextSpan {
    RichTextSpan::plain(format!(" {}", token.marker_text()))
}

/// A block is a self-anchor when it carries `token` and its own text embeds it.
pub fn is_self_anchor(block: &Block, token: &MarkerToken) -> bool {
    block.marker.as_ref() == Some(token) && block.text_contains(&token.marker_text())
}

/// Deferred blocks grouped by marker token.
#[derive(Debug, Default)]
pub struct MarkerMap {
    entries: HashMap<MarkerToken, Vec<Block>>,
}

impl MarkerMap {
    pub fn push(&mut self, token: MarkerToken, block: Block) {
        self.entries.entry(token).or_default().push(block);
    }

    pub fn get(&self, token: &MarkerToken) -> Option<&[Block]> {
        self.entries.get(token).map(Vec::as_slice)
    }

    pub fn groups_mut(&mut self) -> impl Iterator<Item = &mut Vec<Block>> {
        self.entries.values_mut()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of deferred blocks across all entries, descendants included.
    pub fn block_count(&self) -> usize {
        self.entries
            .values()
            .map(|blocks| crate::model::count_blocks(blocks))
            .sum()
    }

    fn sort(&mut self) {
        for blocks in self.entries.values_mut() {
            blocks.sort_by_key(|b| b.dom_order);
        }
    }

    /// Consumes the map into placements ordered by each entry's first `dom_order`.
    pub fn into_placements(self) -> Vec<PendingPlacement> {
        let mut placements: Vec<PendingPlacement> = self
            .entries
            .into_iter()
            .map(|(token, mut blocks)| {
                blocks.sort_by_key(|b| b.dom_order);
                PendingPlacement::new(token, blocks)
            })
            .collect();
        placements.sort_by_key(PendingPlacement::first_order);
        placements
    }
}

/// Outcome of resolving one placement against the persisted tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlacementStatus {
    Pending,
    /// Appended under the anchor found for the marker.
    Placed { anchor_id: String },
    /// No anchor found (or placement under it failed); appended at the page root.
    Degraded,
    /// Nothing could be appended.
    Failed { reason: String },
}

/// Second phase of the write-then-locate-then-append protocol for one marker.
#[derive(Debug, Clone)]
pub struct PendingPlacement {
    pub token: MarkerToken,
    pub blocks: Vec<Block>,
    pub status: PlacementStatus,
}

impl PendingPlacement {
    pub fn new(token: MarkerToken, blocks: Vec<Block>) -> Self {
        Self {
            token,
            blocks,
            status: PlacementStatus::Pending,
        }
    }

    pub fn first_order(&self) -> usize {
        self.blocks.first().map(|b| b.dom_order).unwrap_or(usize::MAX)
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self.status, PlacementStatus::Pending)
    }
}

/// Removes every deferred block from `blocks` into a [`MarkerMap`].
///
/// Self-anchors stay in the tree; only their marked children are collected.
/// Nested markers are collected before the block containing them is removed.
/// Each map entry ends up sorted by `dom_order`.
pub fn collect_and_strip(blocks: &mut Vec<Block>) -> MarkerMap {
    let mut map = MarkerMap::default();
    collect_into(blocks, &mut map);
    map.sort();
    map
}

fn collect_into(blocks: &mut Vec<Block>, map: &mut MarkerMap) {
    let mut kept = Vec::with_capacity(blocks.len());
    for mut block in blocks.drain(..) {
        collect_into(&mut block.children, map);
        match block.marker.clone() {
            Some(token) if !is_self_anchor(&block, &token) => map.push(token, block),
            _ => kept.push(block),
        }
    }
    *blocks = kept;
}

/// Removes `token`'s marker text from `spans`, even across span boundaries.
///
/// Surviving spans keep their annotations. Spans emptied by the cut are
/// dropped unless they carry a link.
pub fn remove_marker_text_from_spans(
    spans: &[RichTextSpan],
    token: &MarkerToken,
) -> Vec<RichTextSpan> {
    let marker_text = token.marker_text();
    let needle = if plain_text(spans).contains(&marker_text) {
        marker_text
    } else {
        token.as_str().to_string()
    };
    let mut current = spans.to_vec();
    while let Some(range) = locate(&current, &needle) {
        current = cut(&current, range);
    }
    current
}

/// Removes every `(marker:...)` occurrence, whatever its token.
pub fn strip_all_marker_text(spans: &[RichTextSpan]) -> Vec<RichTextSpan> {
    find_marker_tokens(&plain_text(spans))
        .iter()
        .fold(spans.to_vec(), |acc, token| {
            remove_marker_text_from_spans(&acc, token)
        })
}

/// Tokens whose marker text appears in `text`.
pub fn find_marker_tokens(text: &str) -> Vec<MarkerToken> {
    MARKER_TEXT_RE
        .captures_iter(text)
        .map(|caps| MarkerToken::from_raw(&caps[1]))
        .collect()
}

pub fn contains_marker_text(text: &str) -> bool {
    MARKER_TEXT_RE.is_match(text)
}

/// Byte range of `needle` in the concatenated text, widened over one leading space.
fn locate(spans: &[RichTextSpan], needle: &str) -> Option<(usize, usize)> {
    if needle.is_empty() {
        return None;
    }
    let full = plain_text(spans);
    let start = full.find(needle)?;
    let end = start + needle.len();
    let start = if full[..start].ends_with(' ') {
        start - 1
    } else {
        start
    };
    Some((start, end))
}

fn cut(spans: &[RichTextSpan], (start, end): (usize, usize)) -> Vec<RichTextSpan> {
    let mut out = Vec::with_capacity(spans.len());
    let mut offset = 0;
    for span in spans {
        let span_start = offset;
        let span_end = offset + span.content.len();
        offset = span_end;

        if span_end <= start || span_start >= end {
            out.push(span.clone());
            continue;
        }

        let keep_head = start.saturating_sub(span_start).min(span.content.len());
        let keep_tail = end.saturating_sub(span_start).min(span.content.len());
        let mut content = String::with_capacity(span.content.len());
        content.push_str(&span.content[..keep_head]);
        content.push_str(&span.content[keep_tail..]);

        if content.trim().is_empty() && span.link.is_none() {
            continue;
        }
        out.push(RichTextSpan {
            content,
            annotations: span.annotations,
            link: span.link.clone(),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BlockKind;
    use pretty_assertions::assert_eq;

    fn item(text: &str, order: usize) -> Block {
        Block::new(BlockKind::BulletedItem, vec![RichTextSpan::plain(text)], order)
    }

    #[test]
    fn generated_tokens_are_unique_and_prefixed() {
        let a = MarkerToken::generate(Some("list item#3"));
        let b = MarkerToken::generate(Some("list item#3"));
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("listitem3__"));
        assert!(!MarkerToken::generate(None).as_str().contains("__"));
    }

    #[test]
    fn generated_tokens_match_marker_pattern() {
        let token = MarkerToken::generate(Some("step"));
        let text = format!("Do this {}", token.marker_text());
        assert_eq!(find_marker_tokens(&text), vec![token]);
    }

    #[test]
    fn base36_encoding() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }

    #[test]
    fn collects_marked_children_but_keeps_self_anchor() {
        let token = MarkerToken::from_raw("t1");
        let mut anchor = item("Level two", 1);
        anchor.spans.push(marker_span(&token));
        anchor.marker = Some(token.clone());
        let mut deep_b = item("deep b", 3);
        deep_b.marker = Some(token.clone());
        let mut deep_a = item("deep a", 2);
        deep_a.marker = Some(token.clone());
        anchor.children = vec![deep_b, deep_a];

        let mut tree = vec![item("Level one", 0).with_children(vec![anchor])];
        let map = collect_and_strip(&mut tree);

        assert_eq!(tree[0].children.len(), 1);
        assert!(tree[0].children[0].children.is_empty());
        let collected = map.get(&token).unwrap();
        let orders: Vec<_> = collected.iter().map(|b| b.dom_order).collect();
        assert_eq!(orders, vec![2, 3]);
    }

    #[test]
    fn nested_markers_are_collected_before_parent() {
        let outer = MarkerToken::from_raw("outer");
        let inner = MarkerToken::from_raw("inner");

        let mut inner_block = item("innermost", 5);
        inner_block.marker = Some(inner.clone());
        let mut inner_anchor = item("inner anchor", 4);
        inner_anchor.spans.push(marker_span(&inner));
        inner_anchor.marker = Some(inner.clone());
        inner_anchor.children = vec![inner_block];

        let mut deferred = item("deferred", 3);
        deferred.marker = Some(outer.clone());
        deferred.children = vec![inner_anchor];

        let mut tree = vec![deferred];
        let map = collect_and_strip(&mut tree);

        assert!(tree.is_empty());
        assert_eq!(map.len(), 2);
        let outer_blocks = map.get(&outer).unwrap();
        // The inner self-anchor travels with its deferred parent, minus its own deferred child.
        assert_eq!(outer_blocks[0].children.len(), 1);
        assert!(outer_blocks[0].children[0].children.is_empty());
        assert_eq!(map.get(&inner).unwrap()[0].plain_text(), "innermost");

        let placements = map.into_placements();
        assert_eq!(placements[0].token, outer);
        assert_eq!(placements[1].token, inner);
    }

    #[test]
    fn removes_marker_straddling_spans() {
        let token = MarkerToken::from_raw("abc");
        let spans = vec![
            RichTextSpan::bold("Click Save (mar"),
            RichTextSpan::plain("ker:abc) now"),
        ];
        let out = remove_marker_text_from_spans(&spans, &token);
        assert_eq!(
            out,
            vec![RichTextSpan::bold("Click Save"), RichTextSpan::plain(" now")]
        );
    }

    #[test]
    fn removal_drops_emptied_spans_but_keeps_links() {
        let token = MarkerToken::from_raw("abc");
        let spans = vec![
            RichTextSpan::plain("Intro"),
            RichTextSpan::plain(" (marker:abc)"),
            RichTextSpan::plain("(marker:abc)").with_link("https://x"),
        ];
        let out = remove_marker_text_from_spans(&spans, &token);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].content, "Intro");
        assert_eq!(out[1].link.as_deref(), Some("https://x"));
        assert_eq!(out[1].content, "");
    }

    #[test]
    fn removal_without_marker_is_identity() {
        let token = MarkerToken::from_raw("zzz");
        let spans = vec![RichTextSpan::plain("nothing here")];
        assert_eq!(remove_marker_text_from_spans(&spans, &token), spans);
    }

    #[test]
    fn strip_all_handles_several_tokens() {
        let spans = vec![RichTextSpan::plain("a (marker:one) b (marker:two)")];
        let out = strip_all_marker_text(&spans);
        assert_eq!(plain_text(&out), "a b");
        assert!(!contains_marker_text(&plain_text(&out)));
    }
}
