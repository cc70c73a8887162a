//! The chunked text source abstraction shared by every format.

use std::collections::VecDeque;

use crate::cancel::CancellationToken;
use crate::error::{FinderError, Result};
use crate::matcher::snippet::truncate_utf8_in_place;

/// Read size used by byte-stream sources.
pub const READ_CHUNK_BYTES: usize = 64 * 1024;

/// A lazily pulled sequence of text fragments for one document.
///
/// `Ok(None)` signals exhaustion. Fragments may be empty; consumers skip them.
pub trait ChunkedTextSource {
    fn next_chunk(&mut self) -> Result<Option<String>>;
}

impl<S: ChunkedTextSource + ?Sized> ChunkedTextSource for Box<S> {
    fn next_chunk(&mut self) -> Result<Option<String>> {
        (**self).next_chunk()
    }
}

/// An in-memory source, one fragment per element.
#[derive(Debug, Default, Clone)]
pub struct ChunkList {
    chunks: VecDeque<String>,
}

impl ChunkList {
    pub fn new<I: IntoIterator<Item = String>>(chunks: I) -> Self {
        Self {
            chunks: chunks.into_iter().collect(),
        }
    }

    /// A source yielding `text` as a single fragment.
    pub fn single(text: String) -> Self {
        Self::new([text])
    }
}

impl ChunkedTextSource for ChunkList {
    fn next_chunk(&mut self) -> Result<Option<String>> {
        Ok(self.chunks.pop_front())
    }
}

/// Incremental UTF-8 decoder that never splits a code point across chunks.
///
/// Trailing bytes of an incomplete sequence are held back and prepended to
/// the next push. Invalid bytes elsewhere are replaced with U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Chunker {
    carry: Vec<u8>,
}

impl Utf8Chunker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the decoder with bytes that were read ahead of time.
    pub fn with_pending(bytes: Vec<u8>) -> Self {
        Self { carry: bytes }
    }

    /// Decodes `bytes` together with any held-back prefix.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.carry.extend_from_slice(bytes);
        let complete = complete_prefix_len(&self.carry);
        let text = String::from_utf8_lossy(&self.carry[..complete]).into_owned();
        self.carry.drain(..complete);
        text
    }

    /// Flushes whatever is held back at end of input.
    pub fn finish(&mut self) -> Option<String> {
        if self.carry.is_empty() {
            return None;
        }
        let text = String::from_utf8_lossy(&self.carry).into_owned();
        self.carry.clear();
        Some(text)
    }
}

/// Length of the prefix of `bytes` that ends on a complete UTF-8 sequence.
fn complete_prefix_len(bytes: &[u8]) -> usize {
    let len = bytes.len();
    // A sequence is at most 4 bytes, so only the last 3 can start an
    // incomplete one.
    for back in 1..=len.min(3) {
        let index = len - back;
        let byte = bytes[index];
        if byte & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let width = match byte {
            b if b & 0b1110_0000 == 0b1100_0000 => 2,
            b if b & 0b1111_0000 == 0b1110_0000 => 3,
            b if b & 0b1111_1000 == 0b1111_0000 => 4,
            _ => 1,
        };
        return if back < width { index } else { len };
    }
    len
}

/// Pulls every fragment of `source`, joining them with `separator`, until
/// `max_bytes` of text are collected. The result never splits a character.
pub fn collect_text(
    source: &mut dyn ChunkedTextSource,
    max_bytes: usize,
    separator: &str,
    token: &CancellationToken,
) -> Result<String> {
    let mut text = String::new();
    loop {
        if token.cancelled() {
            return Err(FinderError::Cancelled);
        }
        let Some(chunk) = source.next_chunk()? else {
            break;
        };
        if chunk.is_empty() {
            continue;
        }
        if !text.is_empty() {
            text.push_str(separator);
        }
        text.push_str(&chunk);
        if max_bytes > 0 && text.len() >= max_bytes {
            break;
        }
    }
    truncate_utf8_in_place(&mut text, max_bytes);
    Ok(text)
}

/// Passes fragments through unchanged while keeping a joined copy of them.
///
/// The copy is dropped once it would exceed `limit` bytes (`None` = no
/// limit). [`whole_text`](Self::whole_text) returns it only if the inner
/// source was read to the end within the limit. Fragments are joined the
/// way [`collect_text`] joins them.
pub struct RecordingSource<S> {
    inner: S,
    separator: &'static str,
    limit: Option<usize>,
    text: String,
    overflowed: bool,
    exhausted: bool,
}

impl<S: ChunkedTextSource> RecordingSource<S> {
    pub fn new(inner: S, separator: &'static str, limit: Option<usize>) -> Self {
        Self {
            inner,
            separator,
            limit,
            text: String::new(),
            overflowed: false,
            exhausted: false,
        }
    }

    fn record(&mut self, chunk: &str) {
        if self.overflowed || chunk.is_empty() {
            return;
        }
        let separator = if self.text.is_empty() { "" } else { self.separator };
        let len = self.text.len() + separator.len() + chunk.len();
        if self.limit.is_some_and(|limit| len > limit) {
            self.overflowed = true;
            self.text = String::new();
            return;
        }
        self.text.push_str(separator);
        self.text.push_str(chunk);
    }

    /// The complete text, if every fragment was seen and kept.
    pub fn whole_text(self) -> Option<String> {
        (self.exhausted && !self.overflowed).then_some(self.text)
    }
}

impl<S: ChunkedTextSource> ChunkedTextSource for RecordingSource<S> {
    fn next_chunk(&mut self) -> Result<Option<String>> {
        match self.inner.next_chunk()? {
            Some(chunk) => {
                self.record(&chunk);
                Ok(Some(chunk))
            }
            None => {
                self.exhausted = true;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunker_holds_back_split_sequences() {
        let bytes = "a世b".as_bytes();
        let mut chunker = Utf8Chunker::new();
        assert_eq!(chunker.push(&bytes[..2]), "a");
        assert_eq!(chunker.push(&bytes[2..3]), "");
        assert_eq!(chunker.push(&bytes[3..]), "世b");
        assert_eq!(chunker.finish(), None);
    }

    #[test]
    fn chunker_flushes_truncated_tail_lossily() {
        let mut chunker = Utf8Chunker::new();
        assert_eq!(chunker.push(&[b'x', 0xE4, 0xB8]), "x");
        assert_eq!(chunker.finish().as_deref(), Some("\u{FFFD}"));
    }

    #[test]
    fn chunker_handles_four_byte_sequences() {
        let bytes = "🌍!".as_bytes();
        let mut chunker = Utf8Chunker::new();
        assert_eq!(chunker.push(&bytes[..3]), "");
        assert_eq!(chunker.push(&bytes[3..]), "🌍!");
    }

    #[test]
    fn collect_joins_and_truncates() {
        let mut source = ChunkList::new(["ab".to_string(), String::new(), "cd".to_string()]);
        let text = collect_text(&mut source, 0, " ", &CancellationToken::noop()).unwrap();
        assert_eq!(text, "ab cd");

        let mut source = ChunkList::new(["你好".to_string(), "世界".to_string()]);
        let text = collect_text(&mut source, 8, "", &CancellationToken::noop()).unwrap();
        assert_eq!(text, "你好");
    }

    #[test]
    fn recording_keeps_text_read_to_the_end() {
        let chunks = || ChunkList::new(["ab".to_string(), String::new(), "cd".to_string()]);
        let mut recorder = RecordingSource::new(chunks(), "\0", None);
        while recorder.next_chunk().unwrap().is_some() {}
        let expected = collect_text(&mut chunks(), 0, "\0", &CancellationToken::noop()).unwrap();
        assert_eq!(recorder.whole_text(), Some(expected));
    }

    #[test]
    fn recording_gives_nothing_for_partial_or_oversized_reads() {
        let mut partial = RecordingSource::new(ChunkList::new(["ab".into(), "cd".into()]), "", None);
        assert_eq!(partial.next_chunk().unwrap().as_deref(), Some("ab"));
        assert_eq!(partial.whole_text(), None);

        let mut oversized = RecordingSource::new(ChunkList::new(["ab".into(), "cd".into()]), "", Some(3));
        assert_eq!(oversized.next_chunk().unwrap().as_deref(), Some("ab"));
        assert_eq!(oversized.next_chunk().unwrap().as_deref(), Some("cd"));
        assert_eq!(oversized.next_chunk().unwrap(), None);
        assert_eq!(oversized.whole_text(), None);
    }

    #[test]
    fn collect_reports_cancellation() {
        let token = CancellationToken::noop();
        token.abort();
        let mut source = ChunkList::single("text".into());
        assert!(matches!(
            collect_text(&mut source, 0, "", &token),
            Err(FinderError::Cancelled)
        ));
    }
}
