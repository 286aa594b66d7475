use crate::parsing::html::Element;

/// Language used when nothing better is known.
pub const DEFAULT_LANGUAGE: &str = "plain text";

/// Languages the destination accepts on code blocks.
const LANGUAGES: &[&str] = &[
    "abap", "arduino", "bash", "basic", "c", "c#", "c++", "clojure", "coffeescript", "css",
    "dart", "diff", "docker", "elixir", "elm", "erlang", "f#", "fortran", "gherkin", "glsl", "go",
    "graphql", "groovy", "haskell", "html", "java", "javascript", "json", "julia", "kotlin",
    "latex", "less", "lisp", "lua", "makefile", "markdown", "markup", "matlab", "mermaid", "nix",
    "objective-c", "ocaml", "pascal", "perl", "php", "plain text", "powershell", "prolog",
    "protobuf", "python", "r", "ruby", "rust", "sass", "scala", "scheme", "scss", "shell", "sql",
    "swift", "typescript", "vb.net", "verilog", "vhdl", "visual basic", "xml", "yaml",
];

const ALIASES: &[(&str, &str)] = &[
    ("js", "javascript"),
    ("jsx", "javascript"),
    ("node", "javascript"),
    ("ts", "typescript"),
    ("tsx", "typescript"),
    ("py", "python"),
    ("python3", "python"),
    ("sh", "shell"),
    ("zsh", "shell"),
    ("console", "shell"),
    ("cs", "c#"),
    ("csharp", "c#"),
    ("cpp", "c++"),
    ("cxx", "c++"),
    ("yml", "yaml"),
    ("ps1", "powershell"),
    ("rb", "ruby"),
    ("rs", "rust"),
    ("md", "markdown"),
    ("dockerfile", "docker"),
    ("golang", "go"),
    ("kt", "kotlin"),
    ("htm", "html"),
    ("xhtml", "html"),
    ("jsonc", "json"),
    ("text", "plain text"),
    ("txt", "plain text"),
    ("plaintext", "plain text"),
    ("none", "plain text"),
];

/// Maps a language name or alias to an accepted language.
pub fn normalize_language(raw: &str) -> &'static str {
    let lower = raw.trim().to_ascii_lowercase();
    if let Some(lang) = LANGUAGES.iter().find(|l| **l == lower) {
        return *lang;
    }
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == lower)
        .map(|(_, lang)| *lang)
        .unwrap_or(DEFAULT_LANGUAGE)
}

/// Language of a `<pre>` block from `language-xxx`/`lang-xxx` classes on it
/// or its `<code>` child.
pub fn detect_language(pre: &Element) -> &'static str {
    let code = pre.child_elements().find(|c| c.name == "code");
    let classes = pre
        .classes()
        .chain(code.into_iter().flat_map(|c| c.classes()));
    let language = pre.attr("data-language").map(str::to_string).or_else(|| {
        classes
            .filter_map(|c| {
                c.strip_prefix("language-")
                    .or_else(|| c.strip_prefix("lang-"))
            })
            .map(str::to_string)
            .next()
    });
    language
        .map(|l| normalize_language(&l))
        .unwrap_or(DEFAULT_LANGUAGE)
}
