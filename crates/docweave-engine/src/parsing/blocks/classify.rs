use crate::model::Color;
use crate::parsing::html::Element;

/// Tags that always start a new block.
const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "blockquote", "details", "dd", "div", "dl", "dt", "figure",
    "footer", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "iframe", "li", "main", "nav",
    "ol", "p", "pre", "section", "table", "ul", "video",
];

/// Tags whose content is never document text.
const SKIPPED_TAGS: &[&str] = &[
    "button", "form", "head", "input", "link", "meta", "noscript", "script", "select", "style",
    "svg", "template", "textarea", "title",
];

pub fn is_block_tag(name: &str) -> bool {
    BLOCK_TAGS.contains(&name)
}

pub fn is_skipped(el: &Element) -> bool {
    SKIPPED_TAGS.contains(&el.name.as_str())
}

/// Whether `el` must be visited as block structure rather than folded into a paragraph.
///
/// Inline wrappers that contain block elements (`<span><p>..</p></span>`)
/// are treated as transparent containers.
pub fn is_block_level(el: &Element) -> bool {
    is_block_tag(&el.name) || el.child_elements().any(is_block_level)
}

/// Visual style of a callout container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalloutStyle {
    pub icon: &'static str,
    pub color: Color,
}

/// What a generic container (`div`, `section`, `aside`) stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerRole {
    Callout(CalloutStyle),
    Plain,
}

/// Class words mapped to callout styles, most specific first.
const CALLOUT_ROLES: &[(&str, CalloutStyle)] = &[
    (
        "warning",
        CalloutStyle {
            icon: "⚠️",
            color: Color::RedBackground,
        },
    ),
    (
        "caution",
        CalloutStyle {
            icon: "⚠️",
            color: Color::OrangeBackground,
        },
    ),
    (
        "important",
        CalloutStyle {
            icon: "❗",
            color: Color::YellowBackground,
        },
    ),
    (
        "tip",
        CalloutStyle {
            icon: "💡",
            color: Color::GreenBackground,
        },
    ),
    // Related-link boxes are site chrome; the dedupe filter drops this style.
    (
        "related",
        CalloutStyle {
            icon: "ℹ️",
            color: Color::GrayBackground,
        },
    ),
    (
        "info",
        CalloutStyle {
            icon: "ℹ️",
            color: Color::BlueBackground,
        },
    ),
    (
        "note",
        CalloutStyle {
            icon: "📝",
            color: Color::BlueBackground,
        },
    ),
];

/// Classifies a container by the words of its class names.
///
/// `note note_warning` is a warning, `related-links` is related content and
/// a bare `note` is a note. Containers without a known word are plain.
pub fn container_role(el: &Element) -> ContainerRole {
    let words: Vec<String> = el
        .classes()
        .flat_map(|class| class.split(['_', '-']))
        .filter(|w| !w.is_empty())
        .map(str::to_ascii_lowercase)
        .collect();
    if words.iter().any(|w| w == "title" || w == "body") {
        return ContainerRole::Plain;
    }
    CALLOUT_ROLES
        .iter()
        .find(|(word, _)| words.iter().any(|w| w == word))
        .map(|(_, style)| ContainerRole::Callout(*style))
        .unwrap_or(ContainerRole::Plain)
}

/// A leading label element such as `<span class="note__title">Note:</span>`.
pub fn is_title_element(el: &Element) -> bool {
    el.classes()
        .any(|c| c.eq_ignore_ascii_case("title") || c.to_ascii_lowercase().ends_with("title"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsing::html::{HtmlNode, parse_fragment};
    use rstest::rstest;

    fn element(html: &str) -> Element {
        parse_fragment(html)
            .into_iter()
            .find_map(|n| match n {
                HtmlNode::Element(el) => Some(el),
                HtmlNode::Text(_) => None,
            })
            .unwrap()
    }

    #[rstest]
    #[case("<div class=\"note note note_note\">x</div>", Some("📝"))]
    #[case("<div class=\"note note_warning\">x</div>", Some("⚠️"))]
    #[case("<aside class=\"tip\">x</aside>", Some("💡"))]
    #[case("<div class=\"related-links\">x</div>", Some("ℹ️"))]
    #[case("<section class=\"info\">x</section>", Some("ℹ️"))]
    #[case("<div class=\"section body\">x</div>", None)]
    #[case("<div class=\"note__title\">x</div>", None)]
    #[case("<div class=\"notebook\">x</div>", None)]
    #[case("<div>x</div>", None)]
    fn classifies_containers(#[case] html: &str, #[case] icon: Option<&str>) {
        let role = container_role(&element(html));
        match (role, icon) {
            (ContainerRole::Callout(style), Some(icon)) => assert_eq!(style.icon, icon),
            (ContainerRole::Plain, None) => {}
            (role, icon) => panic!("{html}: got {role:?}, expected {icon:?}"),
        }
    }

    #[test]
    fn inline_wrapper_around_blocks_is_block_level() {
        let el = element("<span><p>inside</p></span>");
        assert!(is_block_level(&el));
        assert!(!is_block_level(&element("<span><b>x</b></span>")));
    }

    #[test]
    fn title_labels() {
        let el = element("<div class=\"note\"><span class=\"note__title\">Note:</span> x</div>");
        let title = el.child_elements().next().unwrap();
        assert!(is_title_element(title));
    }
}
