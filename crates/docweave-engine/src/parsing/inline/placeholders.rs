use once_cell::sync::Lazy;
use regex::Regex;

pub const LT: &str = "__LT__";
pub const GT: &str = "__GT__";

static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"__(KBD|LINKPH|PROTECTED)_(\d+)__").expect("valid placeholder regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Kbd,
    Link,
    Protected,
}

impl Slot {
    fn tag(self) -> &'static str {
        match self {
            Slot::Kbd => "KBD",
            Slot::Link => "LINKPH",
            Slot::Protected => "PROTECTED",
        }
    }
}

/// An extracted `<a>` element awaiting restoration.
#[derive(Debug, Clone)]
pub struct LinkSlot {
    pub href: Option<String>,
    pub inner: String,
}

/// Side table for content pulled out of the text stream between stages.
#[derive(Debug, Default)]
pub struct Placeholders {
    pub kbd: Vec<String>,
    pub links: Vec<LinkSlot>,
    pub protected: Vec<String>,
    /// URLs of restored links, indexed by link sentinel number.
    pub link_urls: Vec<String>,
}

impl Placeholders {
    pub fn push_kbd(&mut self, raw: String) -> String {
        self.kbd.push(raw);
        token(Slot::Kbd, self.kbd.len() - 1)
    }

    pub fn push_protected(&mut self, literal: String) -> String {
        self.protected.push(literal);
        token(Slot::Protected, self.protected.len() - 1)
    }

    pub fn push_link(&mut self, link: LinkSlot) -> String {
        self.links.push(link);
        token(Slot::Link, self.links.len() - 1)
    }
}

pub fn token(slot: Slot, index: usize) -> String {
    format!("__{}_{index}__", slot.tag())
}

/// Replaces every placeholder of `slot` with `restore(index)`.
///
/// Returns the first placeholder whose index `restore` could not resolve.
pub fn restore_slot(
    text: &str,
    slot: Slot,
    mut restore: impl FnMut(usize) -> Option<String>,
) -> Result<String, String> {
    let mut missing = None;
    let out = PLACEHOLDER_RE.replace_all(text, |caps: &regex::Captures<'_>| {
        if &caps[1] != slot.tag() {
            return caps[0].to_string();
        }
        let restored = caps[2].parse().ok().and_then(&mut restore);
        match restored {
            Some(value) => value,
            None => {
                missing.get_or_insert_with(|| caps[0].to_string());
                caps[0].to_string()
            }
        }
    });
    match missing {
        Some(name) => Err(name),
        None => Ok(out.into_owned()),
    }
}

pub fn contains_placeholder(text: &str) -> Option<String> {
    PLACEHOLDER_RE.find(text).map(|m| m.as_str().to_string())
}

/// Turns protected angle brackets back into literal characters.
pub fn restore_angles(text: &str) -> String {
    text.replace(LT, "<").replace(GT, ">")
}

/// Replaces literal angle brackets so later tag stripping cannot touch them.
pub fn shield_angles(text: &str) -> String {
    text.replace('<', LT).replace('>', GT)
}
