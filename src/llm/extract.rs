//! Pull test source out of a free-form completion.

use crate::language::Language;
use regex::Regex;
use std::sync::OnceLock;

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```([\w+#.-]*)[^\n]*\n(.*?)```").unwrap())
}

fn code_start_re(language: Language) -> &'static Regex {
    static JAVA: OnceLock<Regex> = OnceLock::new();
    static PYTHON: OnceLock<Regex> = OnceLock::new();
    match language {
        Language::Java => JAVA.get_or_init(|| {
            Regex::new(r"^(package|import|public|private|final|class|@)").unwrap()
        }),
        Language::Python => PYTHON.get_or_init(|| {
            Regex::new(r"^(import|from|def|async\s+def|class|@)").unwrap()
        }),
    }
}

/// Extract code from an LLM completion.
///
/// A fenced block tagged with the language wins, then the first fenced
/// block of any kind. Without fences, everything from the first line that
/// looks like code is kept.
pub fn extract_code(text: &str, language: Language) -> String {
    let blocks: Vec<(&str, &str)> = fence_re()
        .captures_iter(text)
        .filter_map(|c| Some((c.get(1)?.as_str(), c.get(2)?.as_str())))
        .collect();

    let tagged = blocks.iter().find(|(tag, _)| {
        let tag = tag.to_lowercase();
        tag == language.code_fence() || tag == language.file_extension()
    });
    if let Some((_, body)) = tagged.or_else(|| blocks.first()) {
        return body.trim().to_string();
    }

    let start = code_start_re(language);
    let lines: Vec<&str> = text
        .lines()
        .skip_while(|line| !start.is_match(line.trim_start()))
        .collect();

    if lines.is_empty() {
        text.trim().to_string()
    } else {
        lines.join("\n").trim().to_string()
    }
}
