//! Plain text files.
//!
//! UTF-8 (with or without BOM) is streamed in fixed-size reads. UTF-16 files
//! are recognised by their BOM and decoded in one pass, bounded by a byte cap.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use encoding_rs::{Encoding, UTF_16BE, UTF_16LE};

use crate::error::Result;

use super::source::{ChunkedTextSource, Utf8Chunker, READ_CHUNK_BYTES};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const UTF16LE_BOM: &[u8] = &[0xFF, 0xFE];
const UTF16BE_BOM: &[u8] = &[0xFE, 0xFF];

enum Mode {
    Utf8(Utf8Chunker),
    /// Whole-buffer decode; `pending` holds bytes read while sniffing the BOM.
    Utf16 {
        encoding: &'static Encoding,
        pending: Vec<u8>,
    },
    Done,
}

/// Chunked reader for a plain text file.
pub struct PlainTextSource {
    file: File,
    mode: Mode,
    whole_decode_cap: u64,
    buf: Vec<u8>,
}

impl PlainTextSource {
    /// Opens `path`, sniffing its byte order mark.
    ///
    /// `whole_decode_cap` bounds how many bytes a UTF-16 file may contribute.
    pub fn open(path: &Path, whole_decode_cap: u64) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut head = [0u8; 3];
        let read = read_up_to(&mut file, &mut head)?;
        let head = &head[..read];

        let mode = if head.starts_with(UTF8_BOM) {
            Mode::Utf8(Utf8Chunker::new())
        } else if head.starts_with(UTF16LE_BOM) {
            Mode::Utf16 {
                encoding: UTF_16LE,
                pending: head[2..].to_vec(),
            }
        } else if head.starts_with(UTF16BE_BOM) {
            Mode::Utf16 {
                encoding: UTF_16BE,
                pending: head[2..].to_vec(),
            }
        } else {
            Mode::Utf8(Utf8Chunker::with_pending(head.to_vec()))
        };

        Ok(Self {
            file,
            mode,
            whole_decode_cap,
            buf: vec![0u8; READ_CHUNK_BYTES],
        })
    }
}

impl ChunkedTextSource for PlainTextSource {
    fn next_chunk(&mut self) -> Result<Option<String>> {
        match &mut self.mode {
            Mode::Done => Ok(None),
            Mode::Utf16 { encoding, pending } => {
                let encoding = *encoding;
                let mut bytes = std::mem::take(pending);
                let remaining = self.whole_decode_cap.saturating_sub(bytes.len() as u64);
                (&mut self.file).take(remaining).read_to_end(&mut bytes)?;
                self.mode = Mode::Done;
                let (text, _) = encoding.decode_without_bom_handling(&bytes);
                Ok(Some(text.into_owned()))
            }
            Mode::Utf8(chunker) => {
                let read = self.file.read(&mut self.buf)?;
                if read == 0 {
                    let rest = chunker.finish();
                    self.mode = Mode::Done;
                    return Ok(rest);
                }
                Ok(Some(chunker.push(&self.buf[..read])))
            }
        }
    }
}

fn read_up_to(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::extract::source::collect_text;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn read_all(bytes: &[u8]) -> String {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        let mut source = PlainTextSource::open(file.path(), 1024 * 1024).unwrap();
        collect_text(&mut source, 0, "", &CancellationToken::noop()).unwrap()
    }

    #[test]
    fn reads_plain_utf8() {
        assert_eq!(read_all("recent invoice 2024 draft".as_bytes()), "recent invoice 2024 draft");
    }

    #[test]
    fn strips_utf8_bom() {
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice("héllo".as_bytes());
        assert_eq!(read_all(&bytes), "héllo");
    }

    #[test]
    fn decodes_utf16_little_endian() {
        let mut bytes = UTF16LE_BOM.to_vec();
        for unit in "報告 report".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        assert_eq!(read_all(&bytes), "報告 report");
    }

    #[test]
    fn decodes_utf16_big_endian() {
        let mut bytes = UTF16BE_BOM.to_vec();
        for unit in "abc".encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        assert_eq!(read_all(&bytes), "abc");
    }

    #[test]
    fn short_and_empty_files() {
        assert_eq!(read_all(b""), "");
        assert_eq!(read_all(b"a"), "a");
    }

    #[test]
    fn multibyte_text_survives_read_boundaries() {
        let text = "é".repeat(READ_CHUNK_BYTES);
        assert_eq!(read_all(text.as_bytes()), text);
    }

    #[test]
    fn utf16_decode_is_capped() {
        let mut bytes = UTF16LE_BOM.to_vec();
        for unit in "abcdefgh".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&bytes).unwrap();
        let mut source = PlainTextSource::open(file.path(), 8).unwrap();
        let text = collect_text(&mut source, 0, "", &CancellationToken::noop()).unwrap();
        assert_eq!(text, "abcd");
    }
}
