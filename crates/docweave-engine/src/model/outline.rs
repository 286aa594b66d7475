use super::{Block, BlockKind, ImageSource};

impl Block {
    /// Renders this subtree as indented lines: `type: text`, two spaces per level.
    ///
    /// Deferred blocks are suffixed with `[deferred]`.
    pub fn outline(&self) -> String {
        let mut out = String::new();
        self.write_outline(0, &mut out);
        out
    }

    fn write_outline(&self, depth: usize, out: &mut String) {
        out.push_str(&"  ".repeat(depth));
        out.push_str(self.kind.api_type());

        let detail = match &self.kind {
            BlockKind::Table(table) => Some(format!("{}x{}", table.width, table.rows.len())),
            BlockKind::Image(ImageSource::External(url)) => Some(url.clone()),
            BlockKind::Image(ImageSource::Uploaded(id)) => Some(format!("file:{id}")),
            BlockKind::Code { language } => Some(language.clone()),
            BlockKind::Embed { url } => Some(url.clone()),
            _ => None,
        };
        if let Some(detail) = detail {
            out.push_str(&format!(" ({detail})"));
        }

        let text = self.plain_text();
        if !text.is_empty() && !matches!(self.kind, BlockKind::Image(_)) {
            out.push_str(": ");
            out.push_str(&text.replace('\n', "\\n"));
        }
        if self.marker.is_some() {
            out.push_str(" [deferred]");
        }
        out.push('\n');

        for child in &self.children {
            child.write_outline(depth + 1, out);
        }
    }
}

/// Outline of a whole forest.
pub fn outline(blocks: &[Block]) -> String {
    blocks.iter().map(Block::outline).collect()
}
