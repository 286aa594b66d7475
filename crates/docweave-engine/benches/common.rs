// Benchmark helper functions - Rust's dead code analysis doesn't understand
// that these are used by benchmark files in the same directory
// See: https://users.rust-lang.org/t/cargo-rustc-benches-awarnings/110111/2
#[allow(dead_code)]
pub fn generate_article_html(sections: usize) -> String {
    let base = "<h2>Section</h2><p>Paragraph with <b>bold</b>, <code>code</code> and a \
        <a href=\"https://example.com/docs\">link</a>.</p>\
        <ul><li>Bullet point<ul><li>Nested item</li></ul></li><li>Another item</li></ul>\
        <pre><code class=\"language-rust\">fn example() {\n    println!(\"Hello\");\n}\n</code></pre>\
        <div class=\"note note_note\"><span class=\"note__title\">Note:</span> Restart the service.</div>";
    base.repeat(sections)
}

#[allow(dead_code)]
pub fn generate_nested_list_html(depth: usize, breadth: usize) -> String {
    if depth == 0 {
        return String::new();
    }
    let mut out = String::from("<ul>");
    for i in 0..breadth {
        out.push_str(&format!("<li>Item {depth}.{i}"));
        out.push_str(&generate_nested_list_html(depth - 1, breadth));
        out.push_str("</li>");
    }
    out.push_str("</ul>");
    out
}

#[allow(dead_code)]
pub fn generate_table_html(rows: usize, cols: usize) -> String {
    let mut out = String::from("<table>");
    for r in 0..rows {
        out.push_str("<tr>");
        for c in 0..cols {
            out.push_str(&format!("<td>r{r}c{c} <i>value</i></td>"));
        }
        out.push_str("</tr>");
    }
    out.push_str("</table>");
    out
}
