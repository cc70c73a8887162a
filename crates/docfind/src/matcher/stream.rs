//! Streaming substring search across chunk boundaries.
//!
//! Only a bounded tail of previously seen text is retained: enough runes for
//! the left context, a term that straddles the next boundary, and a small
//! margin. Memory use is therefore O(context + term) no matter how large the
//! document is.

use crate::cancel::CancellationToken;
use crate::error::{FinderError, Result};
use crate::extract::ChunkedTextSource;

use super::snippet::{has_enough_right_context, render_snippet, tail_start};
use memchr::memmem;

/// Extra runes kept in the tail beyond context and term length.
const TAIL_MARGIN_RUNES: usize = 8;

/// Result of one pull from a source, with cancellation folded in.
enum Pull {
    Chunk(String),
    Exhausted,
}

fn pull(source: &mut dyn ChunkedTextSource, token: &CancellationToken) -> Option<Result<Pull>> {
    loop {
        token.is_cancelled()?;
        match source.next_chunk() {
            Ok(Some(chunk)) if chunk.is_empty() => continue,
            Ok(Some(chunk)) => return Some(Ok(Pull::Chunk(chunk))),
            Ok(None) => return Some(Ok(Pull::Exhausted)),
            Err(FinderError::Cancelled) => return None,
            Err(error) => return Some(Err(error)),
        }
    }
}

/// Finds the first occurrence of `term` in the streamed text.
///
/// Returns `None` if cancelled, `Some(Ok(None))` if the term never occurs.
pub fn find_first(
    source: &mut dyn ChunkedTextSource,
    term: &str,
    context_len: usize,
    token: &CancellationToken,
) -> Option<Result<Option<String>>> {
    find_snippets(source, term, context_len, 1, token)
        .map(|result| result.map(|snippets| snippets.into_iter().next()))
}

/// Finds up to `max_snippets` non-overlapping occurrences of `term` in the
/// streamed text.
///
/// Returns `None` if cancelled. Source errors are returned as `Some(Err)`;
/// running out of text while collecting right context is not an error.
pub fn find_snippets(
    source: &mut dyn ChunkedTextSource,
    term: &str,
    context_len: usize,
    max_snippets: usize,
    token: &CancellationToken,
) -> Option<Result<Vec<String>>> {
    if term.is_empty() {
        return Some(Err(FinderError::InvalidQuery("empty term".into())));
    }
    let max_snippets = max_snippets.max(1);
    let keep_runes = context_len + term.chars().count() + TAIL_MARGIN_RUNES;
    let finder = memmem::Finder::new(term.as_bytes());

    let mut snippets = Vec::new();
    let mut tail = String::new();
    // Byte offset into `tail` before which every match was already reported.
    let mut cursor = 0usize;
    let mut exhausted = false;

    while !exhausted {
        let chunk = match pull(source, token)? {
            Ok(Pull::Chunk(chunk)) => chunk,
            Ok(Pull::Exhausted) => break,
            Err(error) => return Some(Err(error)),
        };

        let mut text = std::mem::take(&mut tail);
        text.push_str(&chunk);

        while snippets.len() < max_snippets {
            let Some(offset) = finder.find(&text.as_bytes()[cursor..]) else {
                break;
            };
            let start = cursor + offset;
            let end = start + term.len();

            while !exhausted && !has_enough_right_context(&text, end, context_len) {
                match pull(source, token)? {
                    Ok(Pull::Chunk(more)) => text.push_str(&more),
                    Ok(Pull::Exhausted) => exhausted = true,
                    Err(error) => return Some(Err(error)),
                }
            }

            snippets.push(render_snippet(&text, start, end, context_len));
            cursor = end;
        }

        if snippets.len() >= max_snippets {
            break;
        }

        let cut = tail_start(&text, keep_runes);
        cursor = cursor.saturating_sub(cut);
        tail = text.split_off(cut);
    }

    Some(Ok(snippets))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::ChunkList;
    use crate::matcher::snippet;

    fn chunks(parts: &[&str]) -> ChunkList {
        ChunkList::new(parts.iter().map(|part| part.to_string()))
    }

    fn first(parts: &[&str], term: &str, context_len: usize) -> Option<String> {
        find_first(&mut chunks(parts), term, context_len, &CancellationToken::noop())
            .expect("not cancelled")
            .expect("no source error")
    }

    #[test]
    fn finds_match_in_single_chunk() {
        let snippet = first(&["hello world"], "world", 2).unwrap();
        assert!(snippet.contains("【world】"));
    }

    #[test]
    fn finds_match_across_boundary() {
        assert_eq!(first(&["你好世", "界和平"], "世界", 1).as_deref(), Some("好【世界】和"));
    }

    #[test]
    fn pulls_more_chunks_for_right_context() {
        assert_eq!(
            first(&["abcwo", "rld", "efg"], "world", 2).as_deref(),
            Some("bc【world】ef")
        );
    }

    #[test]
    fn truncated_right_context_at_end_of_text() {
        assert_eq!(first(&["abc", "world"], "world", 3).as_deref(), Some("abc【world】"));
    }

    #[test]
    fn missing_term_yields_none() {
        assert_eq!(first(&["abc", "def"], "xyz", 3), None);
    }

    #[test]
    fn skips_empty_chunks() {
        assert_eq!(first(&["", "ab", "", "cd"], "bc", 1).as_deref(), Some("a【bc】d"));
    }

    #[test]
    fn cancelled_token_aborts_without_result() {
        let token = CancellationToken::noop();
        token.abort();
        let result = find_snippets(&mut chunks(&["hello"]), "he", 1, 3, &token);
        assert!(result.is_none());
    }

    #[test]
    fn empty_term_is_rejected() {
        let result = find_snippets(&mut chunks(&["hello"]), "", 1, 1, &CancellationToken::noop());
        assert!(matches!(result, Some(Err(FinderError::InvalidQuery(_)))));
    }

    #[test]
    fn does_not_report_a_match_twice_when_it_sits_in_the_tail() {
        let snippets = find_snippets(
            &mut chunks(&["xx needle", " yy", " zz needle end"]),
            "needle",
            2,
            5,
            &CancellationToken::noop(),
        )
        .unwrap()
        .unwrap();
        assert_eq!(snippets, vec!["x 【needle】 y", "z 【needle】 e"]);
    }

    #[test]
    fn every_split_matches_whole_text_search() {
        let text = "alpha 世界 beta world gamma 世界world delta world";
        let char_starts: Vec<usize> = text.char_indices().map(|(i, _)| i).skip(1).collect();
        for term in ["world", "世界", "a 世", "delta"] {
            for context_len in [0, 1, 3, 7] {
                let expected = snippet::find_snippets(text, term, context_len, 4);
                // Two-way splits at every character boundary plus a fine split.
                for &split in &char_starts {
                    let parts = [&text[..split], &text[split..]];
                    let got = find_snippets(&mut chunks(&parts), term, context_len, 4, &CancellationToken::noop())
                        .unwrap()
                        .unwrap();
                    assert_eq!(got, expected, "term={term} ctx={context_len} split={split}");
                }
                let singles: Vec<String> = text.chars().map(String::from).collect();
                let mut source = ChunkList::new(singles);
                let got = find_snippets(&mut source, term, context_len, 4, &CancellationToken::noop())
                    .unwrap()
                    .unwrap();
                assert_eq!(got, expected, "term={term} ctx={context_len} per-char");
            }
        }
    }
}
