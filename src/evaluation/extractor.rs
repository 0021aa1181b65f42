//! Verdict extraction from model responses.
//!
//! The model is asked to wrap its verdict between an opening and a closing
//! tag. Only the first opening tag counts, and only the first closing tag
//! after it. Anything other than a case-insensitive `true`/`false` between
//! them is unextractable.

/// Extracts a boolean verdict from `text`.
///
/// Returns `None` when the text or either tag is empty, when a tag is
/// missing, or when the enclosed value is not `true`/`false`.
pub fn extract_label(text: &str, opening_tag: &str, closing_tag: &str) -> Option<bool> {
    if text.is_empty() || opening_tag.is_empty() || closing_tag.is_empty() {
        return None;
    }

    let value_start = text.find(opening_tag)? + opening_tag.len();
    let value_len = text[value_start..].find(closing_tag)?;
    let value = text[value_start..value_start + value_len].trim().to_lowercase();

    match value.as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}
