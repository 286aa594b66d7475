use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;

/// Any `<...>` run without nested angle brackets.
pub(crate) static BRACKETED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<([^<>]*)>").expect("valid bracket regex"));

static TAG_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9]*").expect("valid tag name regex"));

static ATTRIBUTES_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^(?:\s+[A-Za-z_:@][\w:.\-@]*(?:\s*=\s*(?:"[^"]*"|'[^']*'|[^\s"'=<>`]+))?)*\s*$"#,
    )
    .expect("valid attribute regex")
});

const KNOWN_TAGS: &[&str] = &[
    "a", "abbr", "address", "area", "article", "aside", "audio", "b", "bdi", "bdo", "blockquote",
    "body", "br", "button", "canvas", "caption", "cite", "code", "col", "colgroup", "data",
    "dd", "del", "details", "dfn", "dialog", "div", "dl", "dt", "em", "embed", "fieldset",
    "figcaption", "figure", "font", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "head",
    "header", "hr", "html", "i", "iframe", "img", "input", "ins", "kbd", "label", "legend", "li",
    "link", "main", "mark", "meta", "nav", "noscript", "object", "ol", "optgroup", "option",
    "output", "p", "param", "picture", "pre", "q", "s", "samp", "script", "section", "select",
    "small", "source", "span", "strike", "strong", "style", "sub", "summary", "sup", "svg",
    "table", "tbody", "td", "template", "textarea", "tfoot", "th", "thead", "time", "title", "tr",
    "track", "tt", "u", "ul", "var", "video", "wbr",
];

/// Classifies the text between `<` and `>` as a real HTML tag or bracketed prose.
///
/// A tag is a known element name followed by nothing, `/`, or attributes, or
/// any name followed by at least one `name=value` attribute. Everything else
/// (`<plugin name>`, `<instance>`, `< 5`) is prose.
pub fn is_html_tag(inner: &str) -> bool {
    if inner.starts_with('!') || inner.starts_with('?') {
        return true;
    }
    let body = inner.strip_prefix('/').unwrap_or(inner);
    let body = body.strip_suffix('/').unwrap_or(body);

    let Some(name) = TAG_NAME_RE.find(body) else {
        return false;
    };
    let rest = &body[name.end()..];
    if !ATTRIBUTES_RE.is_match(rest) {
        return false;
    }

    let known = KNOWN_TAGS.contains(&name.as_str().to_ascii_lowercase().as_str());
    known || rest.contains('=')
}

/// Escapes bracketed prose so an HTML parser keeps it as literal text.
pub fn protect_literal_brackets(html: &str) -> Cow<'_, str> {
    BRACKETED_RE.replace_all(html, |caps: &regex::Captures<'_>| {
        if is_html_tag(&caps[1]) {
            caps[0].to_string()
        } else {
            format!("&lt;{}&gt;", &caps[1])
        }
    })
}
