//! # Inline Parsing
//!
//! Turns one HTML fragment into annotated rich-text spans.
//!
//! ## Architecture
//!
//! The fragment is rewritten by a fixed sequence of string stages. Content
//! that later stages would damage is moved into a side table
//! ([`placeholders::Placeholders`]) and put back once it is safe:
//!
//! 1. `<img>` and `<kbd>` extraction (kbd content kept raw)
//! 2. entity decoding
//! 3. `<a>` extraction
//! 4. protection of bracketed prose (`<plugin name>`)
//! 5. `<kbd>` restore as bold or code
//! 6. formatting elements to sentinel pairs (`__BOLD_START__` ...)
//! 7. tag stripping
//! 8. link and protected restore
//! 9. sentinel split into [`RichTextSpan`]s
//!
//! ## Modules
//!
//! - **`pipeline`**: the individual stages
//! - **`placeholders`**: side table and restore helpers
//! - **`sentinels`**: sentinel constants and the annotation state machine

pub mod pipeline;
pub mod placeholders;
pub mod sentinels;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{Block, ImageSource, RichTextSpan, trim_spans};
use crate::parsing::ParseError;
use pipeline::{InlineImage, decode_entities, extract_images, extract_kbd, extract_links};
use placeholders::{Placeholders, contains_placeholder, restore_angles};
use sentinels::{LINE_BREAK, annotate};

static BREAK_PADDING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r" *\n *").expect("break padding regex"));
static BLANK_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("blank run regex"));

/// Tokenizer output: the spans plus images lifted out of the text.
///
/// Each image's `dom_order` is its byte offset in the source fragment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RichText {
    pub spans: Vec<RichTextSpan>,
    pub images: Vec<Block>,
}

impl RichText {
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty() && self.images.is_empty()
    }
}

/// Runs the full inline pipeline over `fragment`.
pub fn tokenize(fragment: &str) -> Result<RichText, ParseError> {
    let mut table = Placeholders::default();

    let (text, images) = extract_images(fragment);
    let text = extract_kbd(&text, &mut table);
    let text = decode_entities(&text);
    let text = extract_links(&text, &mut table);
    let text = pipeline::markup_to_sentinels(&text, &mut table)?;
    let text = pipeline::restore_placeholders(&text, &mut table)?;

    if let Some(name) = contains_placeholder(&text) {
        return Err(ParseError::UnresolvedPlaceholder(name));
    }

    let text = finish_text(&text);
    Ok(RichText {
        spans: trim_spans(annotate(&text, &table.link_urls)),
        images: images.into_iter().map(image_block).collect(),
    })
}

/// Like [`tokenize`] but never fails: on error the fragment's tag-stripped
/// text becomes a single plain span.
pub fn tokenize_lossy(fragment: &str) -> RichText {
    match tokenize(fragment) {
        Ok(rich) => rich,
        Err(err) => {
            log::warn!("inline markup fell back to plain text: {err}");
            let (text, images) = extract_images(fragment);
            let text = restore_angles(&pipeline::strip_tags(&decode_entities(&text)));
            let text = text.trim();
            RichText {
                spans: if text.is_empty() {
                    Vec::new()
                } else {
                    vec![RichTextSpan::plain(text)]
                },
                images: images.into_iter().map(image_block).collect(),
            }
        }
    }
}

fn finish_text(text: &str) -> String {
    let text = restore_angles(text).replace(LINE_BREAK, "\n");
    let text = BREAK_PADDING_RE.replace_all(&text, "\n");
    BLANK_RUN_RE.replace_all(&text, "\n\n").into_owned()
}

fn image_block(image: InlineImage) -> Block {
    let caption = image
        .alt
        .map(|alt| vec![RichTextSpan::plain(alt.trim())])
        .unwrap_or_default();
    Block::image(ImageSource::External(image.src), caption, image.position)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Annotations, Color};
    use pretty_assertions::assert_eq;

    fn spans(fragment: &str) -> Vec<RichTextSpan> {
        tokenize(fragment).unwrap().spans
    }

    #[test]
    fn bold_inside_paragraph() {
        assert_eq!(
            spans("<p>Hello <b>world</b></p>"),
            vec![RichTextSpan::plain("Hello "), RichTextSpan::bold("world")]
        );
    }

    #[test]
    fn link_text_survives_inside_bold() {
        let out = spans("<b>see <a href=\"https://docs.example.com/x\">the docs</a></b> now");
        assert_eq!(
            out,
            vec![
                RichTextSpan::bold("see "),
                RichTextSpan::bold("the docs").with_link("https://docs.example.com/x"),
                RichTextSpan::plain(" now"),
            ]
        );
    }

    #[test]
    fn formatting_inside_link_body() {
        let out = spans("<a href=\"https://x.io\">open <code>cfg</code></a>");
        assert_eq!(out[0], RichTextSpan::plain("open ").with_link("https://x.io"));
        assert_eq!(
            out[1],
            RichTextSpan::annotated("cfg", Annotations::code()).with_link("https://x.io")
        );
    }

    #[test]
    fn relative_links_keep_text_only() {
        assert_eq!(
            spans("go <a href=\"../page.html\">there</a>"),
            vec![RichTextSpan::plain("go there")]
        );
    }

    #[test]
    fn bracketed_prose_is_preserved() {
        assert_eq!(
            spans("Install <plugin name> on <b>host</b>"),
            vec![RichTextSpan::plain("Install <plugin name> on "), RichTextSpan::bold("host")]
        );
    }

    #[test]
    fn escaped_markup_stays_literal() {
        assert_eq!(
            spans("Use &lt;b&gt; for bold &amp; more"),
            vec![RichTextSpan::plain("Use <b> for bold & more")]
        );
    }

    #[test]
    fn kbd_becomes_bold_or_code() {
        let out = spans("Click <kbd>Save</kbd> then run <kbd>sys_user.list</kbd>");
        assert_eq!(out[1], RichTextSpan::bold("Save"));
        assert_eq!(out[3], RichTextSpan::annotated("sys_user.list", Annotations::code()));
    }

    #[test]
    fn kbd_with_angle_brackets_keeps_them() {
        let out = spans("Open <kbd>&lt;instance&gt;.service-now.com</kbd>");
        assert_eq!(
            out[1],
            RichTextSpan::annotated("<instance>.service-now.com", Annotations::code())
        );
    }

    #[test]
    fn ui_control_is_bold_blue() {
        let out = spans("Select <span class=\"ph uicontrol\">Submit</span>.");
        let expected = Annotations {
            bold: true,
            color: Color::Blue,
            ..Annotations::default()
        };
        assert_eq!(out[1], RichTextSpan::annotated("Submit", expected));
    }

    #[test]
    fn line_breaks_become_newlines() {
        let out = spans("one<br>two <br/> three");
        assert_eq!(out, vec![RichTextSpan::plain("one\ntwo\nthree")]);
    }

    #[test]
    fn images_are_lifted_with_positions() {
        let rich = tokenize("before <img src=\"https://cdn/x.png\" alt=\"diagram\"> after").unwrap();
        assert_eq!(rich.spans, vec![RichTextSpan::plain("before after")]);
        assert_eq!(rich.images.len(), 1);
        assert_eq!(rich.images[0].dom_order, 7);
        assert_eq!(
            rich.images[0].kind,
            crate::model::BlockKind::Image(ImageSource::External("https://cdn/x.png".into()))
        );
        assert_eq!(rich.images[0].plain_text(), "diagram");
    }

    #[test]
    fn empty_links_are_dropped() {
        assert_eq!(
            spans("a<a href=\"https://x\"></a>b"),
            vec![RichTextSpan::plain("ab")]
        );
        assert_eq!(
            spans("a<a href=\"https://x\"> </a>b"),
            vec![RichTextSpan::plain("a b")]
        );
        assert_eq!(
            spans("Open<a href=\"https://x\">\n  <b> </b></a>Settings"),
            vec![RichTextSpan::plain("Open Settings")]
        );
    }

    #[test]
    fn stray_placeholder_text_is_an_error() {
        let err = tokenize("literal __PROTECTED_3__ text").unwrap_err();
        assert_eq!(err, ParseError::UnresolvedPlaceholder("__PROTECTED_3__".into()));
        assert_eq!(
            tokenize_lossy("literal __PROTECTED_3__ text").spans,
            vec![RichTextSpan::plain("literal __PROTECTED_3__ text")]
        );
    }
}
