use std::collections::HashMap;

use crate::config::PipelineConfig;
use crate::markers::{MarkerToken, marker_span};
use crate::model::{Annotations, Block, BlockKind, ImageSource, RichTextSpan, normalize_spans};
use crate::parsing::html::{Element, HtmlNode, serialize_nodes};
use crate::parsing::inline::pipeline::{decode_entities, strip_tags};
use crate::parsing::inline::tokenize_lossy;

use super::classify::{
    CalloutStyle, ContainerRole, container_role, is_block_level, is_skipped, is_title_element,
};
use super::code::detect_language;
use super::media::{absolute_url, image_src, is_video_url, media_src};

/// Tree visitor turning [`HtmlNode`]s into [`Block`]s.
///
/// `dom_order` values are handed out in pre-order as elements are visited,
/// so sorting any subset of blocks by it restores source order.
pub struct BlockBuilder<'a> {
    config: &'a PipelineConfig,
    next_order: usize,
    has_videos: bool,
    /// Element ids of blocks, used as readable marker prefixes.
    anchor_hints: HashMap<usize, String>,
}

impl<'a> BlockBuilder<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self {
            config,
            next_order: 0,
            has_videos: false,
            anchor_hints: HashMap::new(),
        }
    }

    pub fn has_videos(&self) -> bool {
        self.has_videos
    }

    pub(super) fn order(&mut self) -> usize {
        let order = self.next_order;
        self.next_order += 1;
        order
    }

    pub fn build(&mut self, nodes: &[HtmlNode]) -> Vec<Block> {
        self.blocks(nodes)
    }

    /// Visits a sibling list. Consecutive inline nodes are gathered into one
    /// paragraph; unknown elements count as inline.
    fn blocks(&mut self, nodes: &[HtmlNode]) -> Vec<Block> {
        let mut out = Vec::new();
        let mut run: Vec<&HtmlNode> = Vec::new();
        for node in nodes {
            match node {
                HtmlNode::Element(el) if is_skipped(el) => {}
                HtmlNode::Element(el) if el.name == "img" => {
                    self.flush_run(&mut run, &mut out);
                    self.image(el, Vec::new(), &mut out);
                }
                HtmlNode::Element(el) if is_block_level(el) => {
                    self.flush_run(&mut run, &mut out);
                    self.element(el, &mut out);
                }
                _ => run.push(node),
            }
        }
        self.flush_run(&mut run, &mut out);
        out
    }

    fn flush_run(&mut self, run: &mut Vec<&HtmlNode>, out: &mut Vec<Block>) {
        if run.iter().all(|n| n.is_blank_text()) {
            run.clear();
            return;
        }
        let html: String = run.drain(..).map(HtmlNode::to_html).collect();
        self.text_block(BlockKind::Paragraph, &html, out);
    }

    /// Tokenizes `html` into one block of `kind` plus the images found in it.
    ///
    /// Images ahead of any text come before the block. The rest follow it,
    /// since a block's text cannot be split around an image.
    fn text_block(&mut self, kind: BlockKind, html: &str, out: &mut Vec<Block>) {
        let rich = tokenize_lossy(html);
        let (leading, trailing): (Vec<Block>, Vec<Block>) = rich
            .images
            .into_iter()
            .partition(|image| precedes_text(html, image.dom_order));

        let leading = self.lifted_images(leading);
        out.extend(leading);
        let order = self.order();
        if !rich.spans.is_empty() {
            out.push(Block::new(kind, rich.spans, order));
        }
        let trailing = self.lifted_images(trailing);
        out.extend(trailing);
    }

    /// Gives images lifted out of inline text fresh orders, keeping their
    /// relative source order.
    fn lifted_images(&mut self, mut images: Vec<Block>) -> Vec<Block> {
        images.sort_by_key(|b| b.dom_order);
        let mut out = Vec::with_capacity(images.len());
        for mut image in images {
            if let BlockKind::Image(ImageSource::External(src)) = &image.kind {
                match absolute_url(src) {
                    Some(url) => image.kind = BlockKind::Image(ImageSource::External(url)),
                    None => {
                        log::debug!("skipping image with relative source {src:?}");
                        continue;
                    }
                }
            }
            image.dom_order = self.order();
            out.push(image);
        }
        out
    }

    fn element(&mut self, el: &Element, out: &mut Vec<Block>) {
        match el.name.as_str() {
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let level = el.name[1..].parse::<u8>().unwrap_or(3).min(3);
                self.text_block(BlockKind::Heading { level }, &el.inner_html(), out);
            }
            "p" | "dt" if el.child_elements().any(is_block_level) => {
                let blocks = self.blocks(&el.children);
                out.extend(blocks);
            }
            "p" => self.text_block(BlockKind::Paragraph, &el.inner_html(), out),
            "dt" => {
                let start = out.len();
                self.text_block(BlockKind::Paragraph, &el.inner_html(), out);
                if let Some(term) = out.get_mut(start)
                    && term.kind == BlockKind::Paragraph
                {
                    for span in &mut term.spans {
                        span.annotations.bold = true;
                    }
                    term.spans = normalize_spans(std::mem::take(&mut term.spans));
                }
            }
            "ul" => self.list(el, BlockKind::BulletedItem, out),
            "ol" => self.list(el, BlockKind::NumberedItem, out),
            "li" => {
                let item = self.text_container(BlockKind::BulletedItem, el, &el.children, Vec::new());
                out.push(item);
            }
            "table" => self.table(el, out),
            "blockquote" => {
                let quote = self.text_container(BlockKind::Quote, el, &el.children, Vec::new());
                out.push(quote);
            }
            "pre" => self.code(el, out),
            "figure" => self.figure(el, out),
            "details" => self.details(el, out),
            "hr" => {
                let order = self.order();
                out.push(Block::new(BlockKind::Divider, Vec::new(), order));
            }
            "iframe" | "video" => self.embed(el, out),
            _ => match container_role(el) {
                ContainerRole::Callout(style) => self.callout(el, style, out),
                ContainerRole::Plain => {
                    let blocks = self.blocks(&el.children);
                    out.extend(blocks);
                }
            },
        }
    }

    /// A block whose text is the leading inline content of `children` and
    /// whose children are everything after it.
    ///
    /// When there is no leading text but the first block is a `<p>`, that
    /// paragraph supplies the text instead.
    fn text_container(
        &mut self,
        kind: BlockKind,
        el: &Element,
        children: &[HtmlNode],
        prefix: Vec<RichTextSpan>,
    ) -> Block {
        let order = self.order();
        if let Some(id) = el.attr("id").filter(|id| !id.trim().is_empty()) {
            self.anchor_hints.insert(order, id.to_string());
        }

        let split = children
            .iter()
            .position(|n| matches!(n, HtmlNode::Element(c) if is_block_level(c)))
            .unwrap_or(children.len());
        let (lead, mut rest) = children.split_at(split);

        let mut html = serialize_nodes(lead);
        if lead.iter().all(HtmlNode::is_blank_text)
            && let Some(HtmlNode::Element(p)) = rest.first()
            && p.name == "p"
            && !p.child_elements().any(is_block_level)
        {
            html = p.inner_html();
            rest = &rest[1..];
        }

        let rich = tokenize_lossy(&html);
        let mut spans = prefix;
        if !spans.is_empty() && !rich.spans.is_empty() {
            spans.push(RichTextSpan::plain(" "));
        }
        spans.extend(rich.spans);

        let mut kids = self.lifted_images(rich.images);
        kids.extend(self.blocks(rest));
        Block::new(kind, normalize_spans(spans), order).with_children(kids)
    }

    fn list(&mut self, el: &Element, kind: BlockKind, out: &mut Vec<Block>) {
        let mut items: Vec<Block> = Vec::new();
        for child in &el.children {
            match child {
                HtmlNode::Element(li) if li.name == "li" => {
                    let item = self.text_container(kind.clone(), li, &li.children, Vec::new());
                    items.push(item);
                }
                // A list directly inside a list belongs to the preceding item.
                HtmlNode::Element(nested) if matches!(nested.name.as_str(), "ul" | "ol") => {
                    let mut nested_items = Vec::new();
                    self.element(nested, &mut nested_items);
                    match items.last_mut() {
                        Some(last) => last.children.extend(nested_items),
                        None => items.extend(nested_items),
                    }
                }
                node if node.is_blank_text() => {}
                node => {
                    let blocks = self.blocks(std::slice::from_ref(node));
                    items.extend(blocks);
                }
            }
        }
        out.extend(items);
    }

    fn code(&mut self, pre: &Element, out: &mut Vec<Block>) {
        let order = self.order();
        let language = detect_language(pre);
        let text = pre.text_content();
        let text = text.trim_end_matches(['\n', '\r']);
        if text.trim().is_empty() {
            return;
        }
        out.push(Block::new(
            BlockKind::Code {
                language: language.to_string(),
            },
            vec![RichTextSpan::plain(text)],
            order,
        ));
    }

    fn image(&mut self, img: &Element, caption: Vec<RichTextSpan>, out: &mut Vec<Block>) {
        let order = self.order();
        let Some(src) = image_src(img).and_then(|s| absolute_url(&s)) else {
            log::debug!("skipping image without an absolute source");
            return;
        };
        let caption = if caption.is_empty() {
            img.attr("alt")
                .map(str::trim)
                .filter(|alt| !alt.is_empty())
                .map(|alt| vec![RichTextSpan::plain(alt)])
                .unwrap_or_default()
        } else {
            caption
        };
        out.push(Block::image(ImageSource::External(src), caption, order));
    }

    fn figure(&mut self, figure: &Element, out: &mut Vec<Block>) {
        let Some(img) = figure.find("img") else {
            let blocks = self.blocks(&figure.children);
            out.extend(blocks);
            return;
        };
        let caption = figure
            .find("figcaption")
            .map(|c| tokenize_lossy(&c.inner_html()).spans)
            .unwrap_or_default();
        self.image(img, caption, out);
    }

    fn details(&mut self, details: &Element, out: &mut Vec<Block>) {
        let order = self.order();
        let summary = details.child_elements().find(|c| c.name == "summary");
        let spans = summary
            .map(|s| tokenize_lossy(&s.inner_html()).spans)
            .unwrap_or_default();
        let rest: Vec<HtmlNode> = details
            .children
            .iter()
            .filter(|n| !matches!(n, HtmlNode::Element(c) if c.name == "summary"))
            .cloned()
            .collect();
        let children = self.blocks(&rest);
        out.push(Block::new(BlockKind::Toggle, spans, order).with_children(children));
    }

    fn embed(&mut self, el: &Element, out: &mut Vec<Block>) {
        let order = self.order();
        let src = media_src(el).and_then(|s| absolute_url(&s));
        if el.name == "video" || src.as_deref().is_some_and(is_video_url) {
            self.has_videos = true;
        }
        match src {
            Some(url) => out.push(Block::new(BlockKind::Embed { url }, Vec::new(), order)),
            None => log::debug!("skipping <{}> without a usable source", el.name),
        }
    }

    fn callout(&mut self, el: &Element, style: CalloutStyle, out: &mut Vec<Block>) {
        let mut title = Vec::new();
        let mut children = Vec::with_capacity(el.children.len());
        for node in &el.children {
            match node {
                HtmlNode::Element(t) if title.is_empty() && is_title_element(t) => {
                    let label = t.text_content();
                    let label = label.trim();
                    if !label.is_empty() {
                        title.push(RichTextSpan::annotated(label, Annotations::bold()));
                    }
                }
                other => children.push(other.clone()),
            }
        }
        let kind = BlockKind::Callout {
            icon: style.icon.to_string(),
            color: style.color,
        };
        let callout = self.text_container(kind, el, &children, title);
        out.push(callout);
    }

    /// Single paragraph holding the document's text, for input that produced no blocks.
    pub fn plain_text_fallback(&mut self, nodes: &[HtmlNode]) -> Option<Block> {
        let text: String = nodes
            .iter()
            .map(|n| match n {
                HtmlNode::Text(t) => t.clone(),
                HtmlNode::Element(el) if is_skipped(el) => String::new(),
                HtmlNode::Element(el) => el.text_content(),
            })
            .collect::<Vec<_>>()
            .join(" ");
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if text.is_empty() {
            return None;
        }
        let order = self.order();
        Some(Block::paragraph(vec![RichTextSpan::plain(text)], order))
    }

    /// Moves children that would exceed the nesting limit behind a marker.
    ///
    /// From the first child that does not fit, that child and every later
    /// sibling are tagged with a fresh token and the parent gets the marker
    /// text. Deferred subtrees are checked again as if they started at the
    /// top, since they are written in their own request.
    pub fn defer_overflow(&self, blocks: &mut [Block]) {
        for block in blocks {
            self.fit(block, 1);
        }
    }

    fn fit(&self, block: &mut Block, level: usize) {
        let limit = self.config.depth_limit();
        let overflow = block
            .children
            .iter()
            .position(|child| level + child.kind.intrinsic_depth() > limit);

        let Some(at) = overflow else {
            for child in &mut block.children {
                self.fit(child, level + 1);
            }
            return;
        };

        let hint = self.anchor_hints.get(&block.dom_order).map(String::as_str);
        let token = MarkerToken::generate(hint);
        log::debug!(
            "deferring {} block(s) under {} at level {level} as {token}",
            block.children.len() - at,
            block.kind.api_type(),
        );
        if block.marker.is_none() {
            block.marker = Some(token.clone());
        }
        block.spans.push(marker_span(&token));

        let (kept, deferred) = block.children.split_at_mut(at);
        for child in kept {
            self.fit(child, level + 1);
        }
        for child in deferred {
            child.marker = Some(token.clone());
            self.fit(child, 1);
        }
    }
}

/// Whether nothing but markup and whitespace comes before byte `offset` of `html`.
fn precedes_text(html: &str, offset: usize) -> bool {
    html.get(..offset)
        .is_some_and(|before| strip_tags(&decode_entities(before)).trim().is_empty())
}
