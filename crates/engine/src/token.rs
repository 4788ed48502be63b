//! Token estimation and budget truncation.
//!
//! Uses a character-based heuristic: ~4 bytes per token, rounded up. Every
//! budget in the engine (text units, relationship and entity tables,
//! community packing, global map groups) is measured with it.

/// Estimate the token count for a string.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.len().div_ceil(4)
}

/// Keep the longest prefix of `items` whose cumulative token count,
/// measured on `key`, stays within `max_tokens`.
pub fn truncate_by_tokens<T, F, S>(mut items: Vec<T>, max_tokens: usize, key: F) -> Vec<T>
where
    F: Fn(&T) -> S,
    S: AsRef<str>,
{
    let mut used = 0usize;
    let keep = items
        .iter()
        .position(|item| {
            used += estimate_tokens(key(item).as_ref());
            used > max_tokens
        })
        .unwrap_or(items.len());
    items.truncate(keep);
    items
}
