//! The ordered rewrite stages behind [`super::tokenize`].
//!
//! Each stage consumes the previous stage's string. Reordering them breaks
//! real documents: entity decoding before `<kbd>` extraction corrupts key
//! names, and bracket protection before link extraction mistakes attribute
//! text for prose.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use super::placeholders::{LinkSlot, Placeholders, Slot, restore_slot, shield_angles};
use super::sentinels::*;
use crate::parsing::ParseError;
use crate::parsing::html::brackets::{BRACKETED_RE, is_html_tag};

/// An `<img>` removed from the text stream, positioned by byte offset in the fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub src: String,
    pub alt: Option<String>,
    pub position: usize,
}

static IMG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<img\b[^>]*>").expect("img regex"));
static KBD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<kbd\b[^>]*>(.*?)</kbd>").expect("kbd regex"));
static LINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<a\b([^>]*)>(.*?)</a>").expect("link regex"));
static ATTR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b([a-z][a-z0-9_:-]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
        .expect("attribute regex")
});
static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<(/?)([A-Za-z][A-Za-z0-9]*)\b([^>]*)>").expect("tag regex"));
static ANY_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<!--.*?-->|</?[A-Za-z][^>]*>").expect("strip regex"));
static ESCAPED_LT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)&(?:lt|#0*60|#x0*3c);").expect("lt regex"));
static ESCAPED_GT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)&(?:gt|#0*62|#x0*3e);").expect("gt regex"));
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));
static TECHNICAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[/\\_={}\[\]()<>$;@#*|]|\w\.\w|^-|^[a-z0-9]+$").expect("technical regex")
});

/// Class names on `<span>` that render as a UI control label.
const UI_CONTROL_CLASSES: &[&str] = &["uicontrol", "menucascade", "wintitle"];
/// Class names on `<span>` that render as inline code.
const CODE_CLASSES: &[&str] = &[
    "codeph", "filepath", "cmdname", "parmname", "apiname", "userinput", "systemoutput",
    "option", "keyword",
];
/// Closing tags of block elements become line breaks inside a fragment.
const BREAKING_TAGS: &[&str] = &[
    "p", "div", "li", "h1", "h2", "h3", "h4", "h5", "h6", "tr", "dt", "dd", "pre",
];

/// Value of attribute `name` inside a tag's attribute text, entity-decoded.
pub(crate) fn attr_value(attrs: &str, name: &str) -> Option<String> {
    ATTR_RE.captures_iter(attrs).find_map(|caps| {
        if !caps[1].eq_ignore_ascii_case(name) {
            return None;
        }
        let raw = caps
            .get(2)
            .or_else(|| caps.get(3))
            .or_else(|| caps.get(4))
            .map(|m| m.as_str())
            .unwrap_or_default();
        Some(html_escape::decode_html_entities(raw).into_owned())
    })
}

/// Stage 1a: pull `<img>` tags out of the stream.
pub fn extract_images(fragment: &str) -> (String, Vec<InlineImage>) {
    let mut images = Vec::new();
    let out = IMG_RE.replace_all(fragment, |caps: &Captures<'_>| {
        let tag = caps.get(0).expect("match has group 0");
        if let Some(src) = attr_value(tag.as_str(), "src").filter(|s| !s.trim().is_empty()) {
            images.push(InlineImage {
                src,
                alt: attr_value(tag.as_str(), "alt").filter(|a| !a.trim().is_empty()),
                position: tag.start(),
            });
        }
        String::new()
    });
    (out.into_owned(), images)
}

/// Stage 1b: replace `<kbd>` elements with placeholders holding their raw content.
pub fn extract_kbd(s: &str, table: &mut Placeholders) -> String {
    KBD_RE
        .replace_all(s, |caps: &Captures<'_>| table.push_kbd(caps[1].to_string()))
        .into_owned()
}

/// Stage 2: decode entities. Escaped angle brackets stay shielded so they
/// can never be mistaken for markup later on.
pub fn decode_entities(s: &str) -> String {
    let s = ESCAPED_LT_RE.replace_all(s, super::placeholders::LT);
    let s = ESCAPED_GT_RE.replace_all(&s, super::placeholders::GT);
    html_escape::decode_html_entities(&s).into_owned()
}

/// Stage 3: replace whole `<a>` elements with placeholders.
pub fn extract_links(s: &str, table: &mut Placeholders) -> String {
    LINK_RE
        .replace_all(s, |caps: &Captures<'_>| {
            table.push_link(LinkSlot {
                href: attr_value(&caps[1], "href"),
                inner: caps[2].to_string(),
            })
        })
        .into_owned()
}

/// Stage 4: protect bracketed prose that is not a real tag.
pub fn protect_brackets(s: &str, table: &mut Placeholders) -> String {
    BRACKETED_RE
        .replace_all(s, |caps: &Captures<'_>| {
            if is_html_tag(&caps[1]) {
                caps[0].to_string()
            } else {
                table.push_protected(caps[0].to_string())
            }
        })
        .into_owned()
}

/// Whether `<kbd>` content reads as a technical token rather than a UI label.
pub fn kbd_is_technical(content: &str) -> bool {
    TECHNICAL_RE.is_match(content)
}

/// Stage 5: restore `<kbd>` placeholders as code or bold sentinels.
pub fn restore_kbd(s: &str, table: &Placeholders) -> Result<String, ParseError> {
    restore_slot(s, Slot::Kbd, |i| {
        let raw = table.kbd.get(i)?;
        let stripped = ANY_TAG_RE.replace_all(raw, "");
        let decoded = html_escape::decode_html_entities(&stripped);
        let content = collapse_whitespace(&decoded);
        let content = content.trim();
        if content.is_empty() {
            return Some(String::new());
        }
        let (open, close) = if kbd_is_technical(content) {
            (CODE_START, CODE_END)
        } else {
            (BOLD_START, BOLD_END)
        };
        Some(format!("{open}{}{close}", shield_angles(content)))
    })
    .map_err(ParseError::UnresolvedPlaceholder)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Bold,
    Italic,
    Code,
    Strike,
    UiControl,
    Plain,
}

impl Format {
    fn for_tag(name: &str, attrs: &str) -> Option<Self> {
        match name {
            "b" | "strong" => Some(Format::Bold),
            "i" | "em" | "cite" | "var" => Some(Format::Italic),
            "code" | "tt" | "samp" => Some(Format::Code),
            "s" | "strike" | "del" => Some(Format::Strike),
            "span" => Some(Self::for_span(attrs)),
            _ => None,
        }
    }

    fn for_span(attrs: &str) -> Self {
        let classes = attr_value(attrs, "class").unwrap_or_default();
        let has = |set: &[&str]| classes.split_whitespace().any(|c| set.contains(&c));
        if has(UI_CONTROL_CLASSES) {
            Format::UiControl
        } else if has(CODE_CLASSES) {
            Format::Code
        } else {
            Format::Plain
        }
    }

    fn open(self) -> &'static str {
        match self {
            Format::Bold => BOLD_START,
            Format::Italic => ITALIC_START,
            Format::Code => CODE_START,
            Format::Strike => STRIKE_START,
            Format::UiControl => "__BOLD_START____BLUE_START__",
            Format::Plain => "",
        }
    }

    fn close(self) -> &'static str {
        match self {
            Format::Bold => BOLD_END,
            Format::Italic => ITALIC_END,
            Format::Code => CODE_END,
            Format::Strike => STRIKE_END,
            Format::UiControl => "__BLUE_END____BOLD_END__",
            Format::Plain => "",
        }
    }
}

/// Stage 6: convert formatting elements into sentinel pairs.
///
/// `<span>` closers are matched to their openers with a small stack because
/// a span's meaning depends on the class of the opening tag.
pub fn convert_formatting(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut spans: Vec<Format> = Vec::new();
    let mut cursor = 0;

    for caps in TAG_RE.captures_iter(s) {
        let whole = caps.get(0).expect("match has group 0");
        out.push_str(&s[cursor..whole.start()]);
        cursor = whole.end();

        let closing = !caps[1].is_empty();
        let name = caps[2].to_ascii_lowercase();
        let attrs = &caps[3];

        if name == "br" {
            out.push_str(LINE_BREAK);
            continue;
        }
        if closing && BREAKING_TAGS.contains(&name.as_str()) {
            out.push_str(LINE_BREAK);
            continue;
        }

        match (closing, name.as_str()) {
            (false, "span") => {
                let format = Format::for_span(attrs);
                spans.push(format);
                out.push_str(format.open());
            }
            (true, "span") => {
                if let Some(format) = spans.pop() {
                    out.push_str(format.close());
                }
            }
            _ => match Format::for_tag(&name, attrs) {
                Some(format) if closing => out.push_str(format.close()),
                Some(format) => out.push_str(format.open()),
                None => out.push_str(whole.as_str()),
            },
        }
    }
    out.push_str(&s[cursor..]);

    // Unclosed spans still need their end sentinels.
    while let Some(format) = spans.pop() {
        out.push_str(format.close());
    }
    out
}

/// Stage 7: remove every remaining tag and collapse whitespace.
pub fn strip_tags(s: &str) -> String {
    collapse_whitespace(&ANY_TAG_RE.replace_all(s, ""))
}

fn collapse_whitespace(s: &str) -> String {
    WHITESPACE_RE.replace_all(s, " ").into_owned()
}

/// Stages 4 through 7, shared by the main stream and link bodies.
pub fn markup_to_sentinels(s: &str, table: &mut Placeholders) -> Result<String, ParseError> {
    let s = protect_brackets(s, table);
    let s = restore_kbd(&s, table)?;
    let s = convert_formatting(&s);
    Ok(strip_tags(&s))
}

/// Whether the destination API will accept `href` as a link target.
pub fn is_linkable(href: &str) -> bool {
    let lower = href.trim().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("mailto:")
}

/// Stage 8: restore link placeholders (their bodies run through stages 4-7)
/// and then protected placeholders, after all tag stripping is done.
pub fn restore_placeholders(s: &str, table: &mut Placeholders) -> Result<String, ParseError> {
    let links = table.links.clone();
    let mut failure = None;

    let s = restore_slot(s, Slot::Link, |i| {
        let link = links.get(i)?;
        let body = match markup_to_sentinels(&link.inner, table) {
            Ok(body) => body,
            Err(err) => {
                failure.get_or_insert(err);
                return Some(String::new());
            }
        };
        let visible = strip_sentinels(&body);
        if visible.trim().is_empty() {
            // A blank link still separates the words around it.
            let gap = if visible.is_empty() { "" } else { " " };
            return Some(gap.to_string());
        }
        match link.href.as_deref().filter(|h| is_linkable(h)) {
            Some(href) => {
                table.link_urls.push(href.trim().to_string());
                let index = table.link_urls.len() - 1;
                Some(format!("{}{body}{LINK_END}", link_start(index)))
            }
            None => Some(body),
        }
    })
    .map_err(ParseError::UnresolvedPlaceholder)?;
    if let Some(err) = failure {
        return Err(err);
    }

    restore_slot(&s, Slot::Protected, |i| table.protected.get(i).map(|p| shield_angles(p)))
        .map_err(ParseError::UnresolvedPlaceholder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsing::inline::placeholders::restore_angles;
    use rstest::rstest;

    #[test]
    fn images_are_removed_with_positions() {
        let (text, images) = extract_images("a <img src=\"x.png\" alt=\"X\"> b <img src='y.png'>");
        assert_eq!(text, "a  b ");
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].position, 2);
        assert_eq!(images[0].alt.as_deref(), Some("X"));
        assert!(images[1].position > images[0].position);
    }

    #[test]
    fn kbd_content_is_kept_raw_until_restored() {
        let mut table = Placeholders::default();
        let s = extract_kbd("Type <kbd>a &amp;&amp; b</kbd>", &mut table);
        assert_eq!(s, "Type __KBD_0__");
        assert_eq!(table.kbd[0], "a &amp;&amp; b");
    }

    #[test]
    fn decode_shields_escaped_angles() {
        let s = decode_entities("&lt;b&gt; &amp; &#60;i&#x3E;");
        assert_eq!(restore_angles(&s), "<b> & <i>");
        assert!(!s.contains('<'));
    }

    #[test]
    fn links_are_extracted_whole() {
        let mut table = Placeholders::default();
        let s = extract_links("see <a class=\"x\" href='https://x/y'>the <b>docs</b></a>", &mut table);
        let s = protect_brackets(&s, &mut table);
        assert_eq!(s, "see __LINKPH_0__");
        assert!(table.protected.is_empty());
        assert_eq!(table.links[0].href.as_deref(), Some("https://x/y"));
        assert_eq!(table.links[0].inner, "the <b>docs</b>");
    }

    #[rstest]
    #[case("Save", false)]
    #[case("Ctrl+S", false)]
    #[case("sys_user.list", true)]
    #[case("https://instance", true)]
    #[case("--verbose", true)]
    #[case("admin", true)]
    fn kbd_heuristic(#[case] content: &str, #[case] technical: bool) {
        assert_eq!(kbd_is_technical(content), technical);
    }

    #[test]
    fn formatting_becomes_sentinels() {
        let s = convert_formatting(
            "<strong>a</strong><em>b</em><span class=\"ph uicontrol\">c</span><span>d</span>",
        );
        assert_eq!(
            s,
            format!(
                "{BOLD_START}a{BOLD_END}{ITALIC_START}b{ITALIC_END}\
                 __BOLD_START____BLUE_START__c__BLUE_END____BOLD_END__d"
            )
        );
    }

    #[test]
    fn block_closers_become_breaks() {
        let s = strip_tags(&convert_formatting("<p>one</p><p>two</p>"));
        assert_eq!(s, format!("one{LINE_BREAK}two{LINE_BREAK}"));
    }

    #[test]
    fn unlinkable_hrefs_keep_text() {
        assert!(is_linkable("https://example.com"));
        assert!(is_linkable("mailto:a@b.c"));
        assert!(!is_linkable("#section"));
        assert!(!is_linkable("../relative.html"));
    }
}
