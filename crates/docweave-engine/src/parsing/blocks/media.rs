use once_cell::sync::Lazy;
use regex::Regex;

use crate::parsing::html::Element;

static VIDEO_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(youtube\.com|youtube-nocookie\.com|youtu\.be|vimeo\.com|wistia\.(com|net)|loom\.com|vidyard\.com|brightcove\.(com|net)|dailymotion\.com|players\.brightcove)",
    )
    .expect("valid video regex")
});

/// Whether `url` points at a known video platform.
pub fn is_video_url(url: &str) -> bool {
    VIDEO_RE.is_match(url)
}

/// Absolute `http(s)` URL or nothing; protocol-relative URLs get `https:`.
pub fn absolute_url(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if let Some(rest) = raw.strip_prefix("//") {
        return Some(format!("https://{rest}"));
    }
    let lower = raw.to_ascii_lowercase();
    (lower.starts_with("http://") || lower.starts_with("https://")).then(|| raw.to_string())
}

/// Source of an `<img>`, preferring lazy-load attributes over placeholders.
pub fn image_src(img: &Element) -> Option<String> {
    ["data-src", "data-original", "src"]
        .iter()
        .filter_map(|attr| img.attr(attr))
        .map(str::trim)
        .find(|src| !src.is_empty() && !src.starts_with("data:"))
        .map(str::to_string)
}

/// Source of an `<iframe>` or `<video>`, looking into `<source>` children.
pub fn media_src(el: &Element) -> Option<String> {
    el.attr("src")
        .or_else(|| el.attr("data-src"))
        .map(str::to_string)
        .or_else(|| {
            el.child_elements()
                .filter(|c| c.name == "source")
                .find_map(|c| c.attr("src").map(str::to_string))
        })
        .filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("https://www.youtube.com/embed/abc", true)]
    #[case("https://youtu.be/abc", true)]
    #[case("https://player.vimeo.com/video/1", true)]
    #[case("https://fast.wistia.net/embed/iframe/x", true)]
    #[case("https://www.loom.com/embed/x", true)]
    #[case("https://maps.google.com/embed", false)]
    fn video_patterns(#[case] url: &str, #[case] video: bool) {
        assert_eq!(is_video_url(url), video);
    }

    #[test]
    fn absolute_urls() {
        assert_eq!(absolute_url("//cdn.x/y.png").as_deref(), Some("https://cdn.x/y.png"));
        assert_eq!(absolute_url(" https://a/b ").as_deref(), Some("https://a/b"));
        assert_eq!(absolute_url("/relative/y.png"), None);
    }
}
