use crate::model::{Block, BlockKind, ImageSource, RichTextSpan, TableData};
use crate::parsing::html::{Element, HtmlNode};
use crate::parsing::inline::tokenize_lossy;

use super::builder::BlockBuilder;
use super::media::{absolute_url, image_src};

/// Stands in for an image inside a table cell.
pub const IMAGE_PLACEHOLDER: &str = "•";

/// `<tr>` elements in document order, looking through `thead`/`tbody`/`tfoot`
/// but not into nested tables.
fn rows<'a>(table: &'a Element) -> Vec<&'a Element> {
    let mut out = Vec::new();
    for child in table.child_elements() {
        match child.name.as_str() {
            "tr" => out.push(child),
            "thead" | "tbody" | "tfoot" => {
                out.extend(child.child_elements().filter(|c| c.name == "tr"))
            }
            _ => {}
        }
    }
    out
}

fn cells(row: &Element) -> Vec<&Element> {
    row.child_elements()
        .filter(|c| c.name == "td" || c.name == "th")
        .collect()
}

/// Width declared through `<colgroup>`/`<col span>`.
fn declared_width(table: &Element) -> Option<usize> {
    let mut cols = Vec::new();
    table.find_all("col", &mut cols);
    let width: usize = cols
        .iter()
        .map(|c| c.attr("span").and_then(|s| s.parse().ok()).unwrap_or(1usize))
        .sum();
    (width > 0).then_some(width)
}

/// Pads with empty cells or truncates so every row has exactly `width` cells.
pub fn normalize_row(mut row: Vec<Vec<RichTextSpan>>, width: usize) -> Vec<Vec<RichTextSpan>> {
    row.resize_with(width, Vec::new);
    row
}

struct Cell {
    spans: Vec<RichTextSpan>,
    images: Vec<String>,
}

fn cell_content(cell: &Element) -> Cell {
    let mut images = Vec::new();
    let mut img_elements = Vec::new();
    cell.find_all("img", &mut img_elements);
    for img in img_elements {
        if let Some(src) = image_src(img).and_then(|s| absolute_url(&s)) {
            images.push(src);
        }
    }

    let rich = tokenize_lossy(&without_images(cell).inner_html());
    let mut spans = rich.spans;
    if !images.is_empty() {
        if !spans.is_empty() {
            spans.push(RichTextSpan::plain(" "));
        }
        spans.push(RichTextSpan::plain(IMAGE_PLACEHOLDER));
    }
    Cell { spans, images }
}

fn without_images(el: &Element) -> Element {
    Element {
        name: el.name.clone(),
        attrs: el.attrs.clone(),
        children: el
            .children
            .iter()
            .filter_map(|child| match child {
                HtmlNode::Element(c) if c.name == "img" => None,
                HtmlNode::Element(c) => Some(HtmlNode::Element(without_images(c))),
                text => Some(text.clone()),
            })
            .collect(),
    }
}

impl BlockBuilder<'_> {
    /// `<table>` to an optional caption paragraph, the table, and the images
    /// hoisted out of its cells.
    pub(super) fn table(&mut self, table: &Element, out: &mut Vec<Block>) {
        if let Some(caption) = table.child_elements().find(|c| c.name == "caption") {
            let order = self.order();
            let rich = tokenize_lossy(&caption.inner_html());
            if !rich.spans.is_empty() {
                out.push(Block::paragraph(rich.spans, order));
            }
        }

        let order = self.order();
        let parsed: Vec<Vec<Cell>> = rows(table)
            .into_iter()
            .map(|row| cells(row).into_iter().map(cell_content).collect())
            .filter(|row: &Vec<Cell>| !row.is_empty())
            .collect();
        let Some(first) = parsed.first() else {
            return;
        };

        let width = declared_width(table).unwrap_or(first.len());
        let first_has_images = first.iter().any(|c| !c.images.is_empty());

        let mut hoisted = Vec::new();
        let rows: Vec<_> = parsed
            .into_iter()
            .map(|row| {
                let spans = row
                    .into_iter()
                    .map(|cell| {
                        hoisted.extend(cell.images);
                        cell.spans
                    })
                    .collect();
                normalize_row(spans, width)
            })
            .collect();

        out.push(Block::new(
            BlockKind::Table(TableData {
                width,
                has_column_header: !first_has_images,
                rows,
            }),
            Vec::new(),
            order,
        ));
        for src in hoisted {
            let order = self.order();
            out.push(Block::image(ImageSource::External(src), Vec::new(), order));
        }
    }
}
