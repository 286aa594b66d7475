use serde::{Deserialize, Serialize};

/// Text colors and background colors accepted by the destination API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Color {
    #[default]
    Default,
    Gray,
    Brown,
    Orange,
    Yellow,
    Green,
    Blue,
    Purple,
    Pink,
    Red,
    GrayBackground,
    BrownBackground,
    OrangeBackground,
    YellowBackground,
    GreenBackground,
    BlueBackground,
    PurpleBackground,
    PinkBackground,
    RedBackground,
}

impl Color {
    pub fn as_str(&self) -> &'static str {
        match self {
            Color::Default => "default",
            Color::Gray => "gray",
            Color::Brown => "brown",
            Color::Orange => "orange",
            Color::Yellow => "yellow",
            Color::Green => "green",
            Color::Blue => "blue",
            Color::Purple => "purple",
            Color::Pink => "pink",
            Color::Red => "red",
            Color::GrayBackground => "gray_background",
            Color::BrownBackground => "brown_background",
            Color::OrangeBackground => "orange_background",
            Color::YellowBackground => "yellow_background",
            Color::GreenBackground => "green_background",
            Color::BlueBackground => "blue_background",
            Color::PurpleBackground => "purple_background",
            Color::PinkBackground => "pink_background",
            Color::RedBackground => "red_background",
        }
    }

    /// Parses an API color name, falling back to `Default` for unknown values.
    pub fn parse(name: &str) -> Self {
        serde_json::from_value(serde_json::Value::String(name.to_string())).unwrap_or_default()
    }
}

/// Formatting flags carried by a [`RichTextSpan`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Annotations {
    pub bold: bool,
    pub italic: bool,
    pub code: bool,
    pub strikethrough: bool,
    pub color: Color,
}

impl Annotations {
    pub fn bold() -> Self {
        Self {
            bold: true,
            ..Self::default()
        }
    }

    pub fn code() -> Self {
        Self {
            code: true,
            ..Self::default()
        }
    }

    pub fn is_plain(&self) -> bool {
        *self == Self::default()
    }
}

/// One run of text sharing the same annotations and link.
///
/// Content is never empty unless the span carries a link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RichTextSpan {
    pub content: String,
    pub annotations: Annotations,
    pub link: Option<String>,
}

impl RichTextSpan {
    pub fn plain(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            annotations: Annotations::default(),
            link: None,
        }
    }

    pub fn annotated(content: impl Into<String>, annotations: Annotations) -> Self {
        Self {
            content: content.into(),
            annotations,
            link: None,
        }
    }

    pub fn bold(content: impl Into<String>) -> Self {
        Self::annotated(content, Annotations::bold())
    }

    pub fn with_link(mut self, url: impl Into<String>) -> Self {
        self.link = Some(url.into());
        self
    }

    /// Whether this span can be merged into `other` without losing formatting.
    pub fn same_style(&self, other: &RichTextSpan) -> bool {
        self.annotations == other.annotations && self.link == other.link
    }
}

/// Concatenated plain text of a span list.
pub fn plain_text(spans: &[RichTextSpan]) -> String {
    spans.iter().map(|s| s.content.as_str()).collect()
}

/// Merges adjacent spans of identical style and drops empty, unlinked spans.
pub fn normalize_spans(spans: Vec<RichTextSpan>) -> Vec<RichTextSpan> {
    let mut out: Vec<RichTextSpan> = Vec::with_capacity(spans.len());
    for span in spans {
        if span.content.is_empty() && span.link.is_none() {
            continue;
        }
        if let Some(last) = out.last_mut()
            && last.same_style(&span)
        {
            last.content.push_str(&span.content);
            continue;
        }
        out.push(span);
    }
    out
}

/// Trims leading whitespace of the first span and trailing whitespace of the last.
///
/// Spans left empty by trimming are removed and trimming continues into the next one.
pub fn trim_spans(spans: Vec<RichTextSpan>) -> Vec<RichTextSpan> {
    let mut spans = normalize_spans(spans);
    while let Some(first) = spans.first_mut() {
        first.content = first.content.trim_start().to_string();
        if !first.content.is_empty() || first.link.is_some() {
            break;
        }
        spans.remove(0);
    }
    while let Some(last) = spans.last_mut() {
        last.content = last.content.trim_end().to_string();
        if !last.content.is_empty() || last.link.is_some() {
            break;
        }
        spans.pop();
    }
    spans
}
