//! Sentinel extraction from worker text.
//!
//! Sentinels are `<promise>TAG</promise>` tags. Text inside fenced code blocks
//! or inline code spans is quoted material, so it is removed before matching.

use regex::Regex;
use std::sync::LazyLock;

static PROMISE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<promise>\s*([A-Za-z0-9_\-]+)\s*</promise>").unwrap());

static FENCED_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)(```|~~~).*?(```|~~~|\z)").unwrap());

static INLINE_CODE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`[^`\n]*`").unwrap());

/// Remove fenced blocks and inline code spans.
pub fn strip_quoted(text: &str) -> String {
    let without_fences = FENCED_REGEX.replace_all(text, " ");
    INLINE_CODE_REGEX
        .replace_all(&without_fences, " ")
        .into_owned()
}

/// All promise tags in `text` outside quoted material, in order of appearance.
pub fn extract_promises(text: &str) -> Vec<String> {
    let cleaned = strip_quoted(text);
    PROMISE_REGEX
        .captures_iter(&cleaned)
        .filter_map(|cap| cap.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}
