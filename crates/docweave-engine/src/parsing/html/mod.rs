//! # HTML Tree
//!
//! The input fragment is parsed once with html5ever and converted into a
//! small owned tree ([`HtmlNode`]) that the block parser visits. Bracketed
//! prose such as `<plugin name>` is escaped before parsing so it survives as
//! text instead of becoming a bogus element.

pub mod brackets;

use html5ever::parse_document;
use html5ever::tendril::TendrilSink;
use markup5ever_rcdom::{Handle, NodeData, RcDom};

pub use brackets::{is_html_tag, protect_literal_brackets};

/// Elements serialised without a closing tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HtmlNode {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<HtmlNode>,
}

impl Element {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.attr("class").unwrap_or_default().split_whitespace()
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes().any(|c| c.eq_ignore_ascii_case(class))
    }

    /// Child elements, skipping text.
    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(HtmlNode::as_element)
    }

    /// Concatenated text of all descendants.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            child.collect_text(&mut out);
        }
        out
    }

    /// Serialised HTML of the children.
    pub fn inner_html(&self) -> String {
        serialize_nodes(&self.children)
    }

    /// Depth-first search for the first descendant element named `name`.
    pub fn find(&self, name: &str) -> Option<&Element> {
        for child in self.child_elements() {
            if child.name == name {
                return Some(child);
            }
            if let Some(found) = child.find(name) {
                return Some(found);
            }
        }
        None
    }

    pub fn find_all<'a>(&'a self, name: &str, out: &mut Vec<&'a Element>) {
        for child in self.child_elements() {
            if child.name == name {
                out.push(child);
            }
            child.find_all(name, out);
        }
    }
}

impl HtmlNode {
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            HtmlNode::Element(el) => Some(el),
            HtmlNode::Text(_) => None,
        }
    }

    pub fn is_blank_text(&self) -> bool {
        matches!(self, HtmlNode::Text(t) if t.trim().is_empty())
    }

    fn collect_text(&self, out: &mut String) {
        match self {
            HtmlNode::Text(t) => out.push_str(t),
            HtmlNode::Element(el) => {
                for child in &el.children {
                    child.collect_text(out);
                }
            }
        }
    }

    pub fn to_html(&self) -> String {
        let mut out = String::new();
        self.write_html(&mut out);
        out
    }

    fn write_html(&self, out: &mut String) {
        match self {
            HtmlNode::Text(t) => out.push_str(&html_escape::encode_text(t)),
            HtmlNode::Element(el) => {
                out.push('<');
                out.push_str(&el.name);
                for (k, v) in &el.attrs {
                    out.push(' ');
                    out.push_str(k);
                    out.push_str("=\"");
                    out.push_str(&html_escape::encode_double_quoted_attribute(v));
                    out.push('"');
                }
                out.push('>');
                if VOID_ELEMENTS.contains(&el.name.as_str()) {
                    return;
                }
                for child in &el.children {
                    child.write_html(out);
                }
                out.push_str("</");
                out.push_str(&el.name);
                out.push('>');
            }
        }
    }
}

pub fn serialize_nodes(nodes: &[HtmlNode]) -> String {
    let mut out = String::new();
    for node in nodes {
        node.write_html(&mut out);
    }
    out
}

/// Parses an HTML fragment into the children of its `<body>`.
///
/// html5ever never rejects input; malformed markup is repaired the way a
/// browser would repair it.
pub fn parse_fragment(html: &str) -> Vec<HtmlNode> {
    let protected = protect_literal_brackets(html);
    let dom = parse_document(RcDom::default(), Default::default()).one(protected.as_ref());

    match find_body(&dom.document) {
        Some(body) => body.children.borrow().iter().filter_map(convert).collect(),
        None => Vec::new(),
    }
}

fn find_body(handle: &Handle) -> Option<Handle> {
    if let NodeData::Element { name, .. } = &handle.data
        && &*name.local == "body"
    {
        return Some(handle.clone());
    }
    handle.children.borrow().iter().find_map(find_body)
}

fn convert(handle: &Handle) -> Option<HtmlNode> {
    match &handle.data {
        NodeData::Text { contents } => Some(HtmlNode::Text(contents.borrow().to_string())),
        NodeData::Element { name, attrs, .. } => {
            let attrs = attrs
                .borrow()
                .iter()
                .map(|a| (a.name.local.to_string(), a.value.to_string()))
                .collect();
            let children = handle.children.borrow().iter().filter_map(convert).collect();
            Some(HtmlNode::Element(Element {
                name: name.local.to_ascii_lowercase().to_string(),
                attrs,
                children,
            }))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn first_element(nodes: &[HtmlNode]) -> &Element {
        nodes.iter().find_map(HtmlNode::as_element).unwrap()
    }

    #[test]
    fn parses_fragment_into_body_children() {
        let nodes = parse_fragment("<p class=\"lead intro\">Hello <b>world</b></p>");
        let p = first_element(&nodes);
        assert_eq!(p.name, "p");
        assert!(p.has_class("intro"));
        assert_eq!(p.text_content(), "Hello world");
    }

    #[test]
    fn bracketed_prose_survives_as_text() {
        let nodes = parse_fragment("<p>Open <instance name>/nav</p>");
        assert_eq!(first_element(&nodes).text_content(), "Open <instance name>/nav");
    }

    #[test]
    fn comments_are_dropped() {
        let nodes = parse_fragment("<p>a<!-- hidden -->b</p>");
        assert_eq!(first_element(&nodes).text_content(), "ab");
    }

    #[test]
    fn serialisation_escapes_text_and_attributes() {
        let nodes = parse_fragment("<p><a href=\"x?a=1\" title='say \"hi\"'>1 &lt; 2</a><br></p>");
        assert_eq!(
            first_element(&nodes).inner_html(),
            "<a href=\"x?a=1\" title=\"say &quot;hi&quot;\">1 &lt; 2</a><br>"
        );
    }

    #[test]
    fn find_descends_depth_first() {
        let nodes = parse_fragment("<div><section><figure><img src=\"a.png\"></figure></section></div>");
        let img = first_element(&nodes).find("img").unwrap();
        assert_eq!(img.attr("src"), Some("a.png"));
    }
}
