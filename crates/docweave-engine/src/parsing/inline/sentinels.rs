use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{Annotations, Color, RichTextSpan, normalize_spans};

pub const BOLD_START: &str = "__BOLD_START__";
pub const BOLD_END: &str = "__BOLD_END__";
pub const ITALIC_START: &str = "__ITALIC_START__";
pub const ITALIC_END: &str = "__ITALIC_END__";
pub const CODE_START: &str = "__CODE_START__";
pub const CODE_END: &str = "__CODE_END__";
pub const STRIKE_START: &str = "__STRIKE_START__";
pub const STRIKE_END: &str = "__STRIKE_END__";
pub const BLUE_START: &str = "__BLUE_START__";
pub const BLUE_END: &str = "__BLUE_END__";
pub const LINK_END: &str = "__LINK_END__";
pub const LINE_BREAK: &str = "__BR__";

pub fn link_start(index: usize) -> String {
    format!("__LINK_{index}_START__")
}

static SENTINEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"__(BOLD|ITALIC|CODE|STRIKE|BLUE)_(START|END)__|__LINK_(\d+)_START__|__LINK_END__")
        .expect("valid sentinel regex")
});

/// Nesting counters for each annotation; a sentinel pair always nests cleanly.
#[derive(Debug, Default)]
struct AnnotationState {
    bold: u16,
    italic: u16,
    code: u16,
    strike: u16,
    blue: u16,
    link: Option<usize>,
}

impl AnnotationState {
    fn apply(&mut self, name: &str, start: bool) {
        let counter = match name {
            "BOLD" => &mut self.bold,
            "ITALIC" => &mut self.italic,
            "CODE" => &mut self.code,
            "STRIKE" => &mut self.strike,
            "BLUE" => &mut self.blue,
            _ => return,
        };
        *counter = if start {
            counter.saturating_add(1)
        } else {
            counter.saturating_sub(1)
        };
    }

    fn annotations(&self) -> Annotations {
        Annotations {
            bold: self.bold > 0,
            italic: self.italic > 0,
            code: self.code > 0,
            strikethrough: self.strike > 0,
            color: if self.blue > 0 {
                Color::Blue
            } else {
                Color::Default
            },
        }
    }
}

/// Splits sentinel-marked text into annotated spans.
///
/// `links[n]` is the URL for `__LINK_n_START__`; an out-of-range index leaves
/// the text unlinked.
pub fn annotate(text: &str, links: &[String]) -> Vec<RichTextSpan> {
    let mut state = AnnotationState::default();
    let mut spans = Vec::new();
    let mut cursor = 0;

    let mut push = |segment: &str, state: &AnnotationState| {
        if segment.is_empty() {
            return;
        }
        spans.push(RichTextSpan {
            content: segment.to_string(),
            annotations: state.annotations(),
            link: state.link.and_then(|i| links.get(i).cloned()),
        });
    };

    for caps in SENTINEL_RE.captures_iter(text) {
        let whole = caps.get(0).expect("match has group 0");
        push(&text[cursor..whole.start()], &state);
        cursor = whole.end();

        if let (Some(name), Some(edge)) = (caps.get(1), caps.get(2)) {
            state.apply(name.as_str(), edge.as_str() == "START");
        } else if let Some(index) = caps.get(3) {
            state.link = index.as_str().parse().ok();
        } else {
            state.link = None;
        }
    }
    push(&text[cursor..], &state);

    normalize_spans(spans)
}

/// Removes every sentinel, leaving plain text.
pub fn strip_sentinels(text: &str) -> String {
    SENTINEL_RE.replace_all(text, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn plain_text_is_one_span() {
        assert_eq!(annotate("hello", &[]), vec![RichTextSpan::plain("hello")]);
    }

    #[test]
    fn nested_bold_italic() {
        let text = format!("a {BOLD_START}b {ITALIC_START}c{ITALIC_END}{BOLD_END} d");
        let spans = annotate(&text, &[]);
        assert_eq!(spans.len(), 4);
        assert_eq!(spans[1], RichTextSpan::bold("b "));
        assert!(spans[2].annotations.bold && spans[2].annotations.italic);
        assert_eq!(spans[3], RichTextSpan::plain(" d"));
    }

    #[test]
    fn doubled_bold_stays_bold_until_outer_end() {
        let text = format!("{BOLD_START}{BOLD_START}x{BOLD_END}y{BOLD_END}z");
        let spans = annotate(&text, &[]);
        assert_eq!(spans, vec![RichTextSpan::bold("xy"), RichTextSpan::plain("z")]);
    }

    #[test]
    fn links_apply_by_index() {
        let links = vec!["https://a".to_string(), "https://b".to_string()];
        let text = format!("{}one{LINK_END} {}two{LINK_END}", link_start(1), link_start(0));
        let spans = annotate(&text, &links);
        assert_eq!(spans[0].link.as_deref(), Some("https://b"));
        assert_eq!(spans[1].link, None);
        assert_eq!(spans[2].link.as_deref(), Some("https://a"));
    }

    #[test]
    fn blue_sets_color() {
        let text = format!("{BLUE_START}ui{BLUE_END}");
        assert_eq!(annotate(&text, &[])[0].annotations.color, Color::Blue);
    }

    #[test]
    fn adjacent_sentinels_split_cleanly() {
        let text = format!("foo__{BOLD_START}x{BOLD_END}");
        let spans = annotate(&text, &[]);
        assert_eq!(spans, vec![RichTextSpan::plain("foo__"), RichTextSpan::bold("x")]);
    }
}
