//! Whole-text snippet search and code-point helpers.
//!
//! Matching is a literal byte substring search. For valid UTF-8 on both
//! sides a byte match always starts and ends on character boundaries, so
//! only the context widths need code-point arithmetic.

use memchr::memmem;

/// Opening bracket placed before a highlighted match.
pub const HIGHLIGHT_OPEN: &str = "【";
/// Closing bracket placed after a highlighted match.
pub const HIGHLIGHT_CLOSE: &str = "】";

/// Finds up to `max_snippets` non-overlapping occurrences of `term` in
/// `text` and renders each with `context_len` runes of context per side.
pub fn find_snippets(text: &str, term: &str, context_len: usize, max_snippets: usize) -> Vec<String> {
    if term.is_empty() || text.is_empty() {
        return Vec::new();
    }
    let max_snippets = max_snippets.max(1);
    let finder = memmem::Finder::new(term.as_bytes());

    let mut snippets = Vec::new();
    let mut from = 0;
    while snippets.len() < max_snippets {
        let Some(offset) = finder.find(&text.as_bytes()[from..]) else {
            break;
        };
        let start = from + offset;
        let end = start + term.len();
        snippets.push(render_snippet(text, start, end, context_len));
        from = end;
    }
    snippets
}

/// Case-insensitive variant of [`find_snippets`]. Matching runs on the
/// lowercased text; snippets show `text` as written.
pub fn find_snippets_ignore_case(
    text: &str,
    term: &str,
    context_len: usize,
    max_snippets: usize,
) -> Vec<String> {
    let term = term.to_lowercase();
    if term.is_empty() || text.is_empty() {
        return Vec::new();
    }

    // `origins[i]` is the offset in `text` of the character that produced
    // byte `i` of `lower`.
    let mut lower = String::with_capacity(text.len());
    let mut origins = Vec::with_capacity(text.len() + 1);
    for (offset, ch) in text.char_indices() {
        lower.extend(ch.to_lowercase());
        origins.resize(lower.len(), offset);
    }
    origins.push(text.len());

    let max_snippets = max_snippets.max(1);
    let finder = memmem::Finder::new(term.as_bytes());
    let mut snippets = Vec::new();
    let mut from = 0;
    while snippets.len() < max_snippets {
        let Some(offset) = finder.find(&lower.as_bytes()[from..]) else {
            break;
        };
        let start = from + offset;
        let end = start + term.len();
        let last = origins[end - 1];
        let last_width = text[last..].chars().next().map_or(0, char::len_utf8);
        snippets.push(render_snippet(text, origins[start], last + last_width, context_len));
        from = end;
    }
    snippets
}

/// Renders `text[start..end]` bracketed, with `context_len` runes on each
/// side clamped to the string bounds.
pub fn render_snippet(text: &str, start: usize, end: usize, context_len: usize) -> String {
    let left = move_left_runes(text, start, context_len);
    let right = move_right_runes(text, end, context_len);

    let mut snippet = String::with_capacity(right - left + HIGHLIGHT_OPEN.len() * 2);
    snippet.push_str(&text[left..start]);
    snippet.push_str(HIGHLIGHT_OPEN);
    snippet.push_str(&text[start..end]);
    snippet.push_str(HIGHLIGHT_CLOSE);
    snippet.push_str(&text[end..right]);
    snippet
}

/// Byte index `count` code points to the left of `from` (clamped to 0).
pub fn move_left_runes(text: &str, from: usize, count: usize) -> usize {
    text[..from]
        .char_indices()
        .rev()
        .take(count)
        .last()
        .map(|(index, _)| index)
        .unwrap_or(from)
}

/// Byte index `count` code points to the right of `from` (clamped to the end).
pub fn move_right_runes(text: &str, from: usize, count: usize) -> usize {
    text[from..]
        .char_indices()
        .nth(count)
        .map(|(index, _)| from + index)
        .unwrap_or(text.len())
}

/// The suffix of `text` holding at most `count` code points.
pub fn tail_runes(text: &str, count: usize) -> &str {
    &text[tail_start(text, count)..]
}

/// Byte index where the last `count` code points of `text` begin.
pub fn tail_start(text: &str, count: usize) -> usize {
    if count == 0 {
        return text.len();
    }
    text.char_indices()
        .rev()
        .nth(count - 1)
        .map(|(index, _)| index)
        .unwrap_or(0)
}

/// Returns true if at least `count` code points follow byte index `from`.
pub fn has_enough_right_context(text: &str, from: usize, count: usize) -> bool {
    count == 0 || text[from.min(text.len())..].chars().nth(count - 1).is_some()
}

/// Truncates `text` to at most `max_bytes` bytes without splitting a
/// character. `0` means no limit.
pub fn truncate_utf8(text: &str, max_bytes: usize) -> &str {
    if max_bytes == 0 || text.len() <= max_bytes {
        return text;
    }
    let mut cut = max_bytes;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    &text[..cut]
}

/// In-place variant of [`truncate_utf8`].
pub fn truncate_utf8_in_place(text: &mut String, max_bytes: usize) {
    let keep = truncate_utf8(text, max_bytes).len();
    text.truncate(keep);
}
