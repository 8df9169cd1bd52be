//! Extraction of the single fenced code block an author reply must contain.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```([A-Za-z0-9_+#.-]*)[^\S\n]*\r?\n(.*?)```")
        .expect("code fence pattern is valid")
});

/// Why an author reply was rejected. Recoverable: the loop keeps going.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("reply contains no ```{0} ... ``` code block")]
    Missing(String),
    #[error("reply contains {count} ```{language} code blocks, expected exactly one")]
    Multiple { language: String, count: usize },
    #[error("reply contains an empty code block")]
    Empty,
}

/// Return the body of the one code block in `reply`.
///
/// Blocks tagged with `language` win; untagged blocks are considered only
/// when no tagged block exists.
pub fn extract_code_block(reply: &str, language: &str) -> Result<String, ExtractError> {
    let blocks: Vec<(&str, &str)> = FENCE_RE
        .captures_iter(reply)
        .filter_map(|caps| Some((caps.get(1)?.as_str(), caps.get(2)?.as_str())))
        .collect();

    let tagged: Vec<&str> = blocks
        .iter()
        .filter(|(tag, _)| tag.eq_ignore_ascii_case(language))
        .map(|(_, body)| *body)
        .collect();
    let candidates = if tagged.is_empty() {
        blocks
            .iter()
            .filter(|(tag, _)| tag.is_empty())
            .map(|(_, body)| *body)
            .collect()
    } else {
        tagged
    };

    match candidates.as_slice() {
        [] => Err(ExtractError::Missing(language.to_string())),
        [body] if body.trim().is_empty() => Err(ExtractError::Empty),
        [body] => Ok(body.trim().to_string()),
        many => Err(ExtractError::Multiple {
            language: language.to_string(),
            count: many.len(),
        }),
    }
}
