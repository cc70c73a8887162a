//! On-disk cache of extracted document text.
//!
//! Entries live under `<root>/<shard>/<hash>.bin`, where `hash` is the
//! 64-bit FNV-1a of the absolute source path and `shard` its first two hex
//! digits. Each entry is a 16-byte header followed by gzip-compressed UTF-8:
//!
//! ```text
//! [mtime nanos: i64 LE][size: u64 LE][gzip(text)]
//! ```
//!
//! An entry is valid only while the source file's mtime and size match the
//! header. Every cache failure is soft: reads fall through to extraction and
//! failed writes are logged and ignored.

use std::fs::{self, File, Metadata};
use std::hash::Hasher;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use fnv::FnvHasher;
use tempfile::NamedTempFile;

use crate::error::{canonicalize_existing_path, FinderError, Result};
use crate::matcher::snippet::{truncate_utf8, truncate_utf8_in_place};

const HEADER_LEN: usize = 16;
const ENTRY_EXTENSION: &str = "bin";
/// A capped entry ends within one character of the cap.
const MAX_CHAR_BYTES: usize = 4;

/// Identity of a source file version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    pub modified_nanos: i64,
    pub size: u64,
}

impl Fingerprint {
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let modified_nanos = metadata
            .modified()
            .map(|time| match time.duration_since(UNIX_EPOCH) {
                Ok(after) => after.as_nanos() as i64,
                Err(before) => -(before.duration().as_nanos() as i64),
            })
            .unwrap_or(0);
        Self {
            modified_nanos,
            size: metadata.len(),
        }
    }

    fn to_header(self) -> [u8; HEADER_LEN] {
        let mut header = [0u8; HEADER_LEN];
        header[..8].copy_from_slice(&self.modified_nanos.to_le_bytes());
        header[8..].copy_from_slice(&self.size.to_le_bytes());
        header
    }

    fn from_header(header: &[u8; HEADER_LEN]) -> Self {
        let mut nanos = [0u8; 8];
        let mut size = [0u8; 8];
        nanos.copy_from_slice(&header[..8]);
        size.copy_from_slice(&header[8..]);
        Self {
            modified_nanos: i64::from_le_bytes(nanos),
            size: u64::from_le_bytes(size),
        }
    }
}

/// The cache state of one source file, taken before it is read.
#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub source: PathBuf,
    pub entry: PathBuf,
    pub fingerprint: Fingerprint,
    /// The cached text, if a valid entry exists.
    pub text: Option<String>,
}

/// Persistent cache keyed by absolute path, validated by [`Fingerprint`].
#[derive(Debug, Clone)]
pub struct ExtractionCache {
    root: PathBuf,
    max_text_bytes: usize,
}

impl ExtractionCache {
    /// Creates a cache rooted at `root`. Stored text is capped at
    /// `max_text_bytes` (0 = unbounded).
    pub fn new(root: impl Into<PathBuf>, max_text_bytes: usize) -> Self {
        Self {
            root: root.into(),
            max_text_bytes,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_text_bytes(&self) -> usize {
        self.max_text_bytes
    }

    /// Location of the entry for an absolute source path.
    pub fn entry_path(&self, source: &Path) -> PathBuf {
        let mut hasher = FnvHasher::default();
        hasher.write(source.to_string_lossy().as_bytes());
        let hash = format!("{:016x}", hasher.finish());
        self.root
            .join(&hash[..2])
            .join(format!("{hash}.{ENTRY_EXTENSION}"))
    }

    /// Largest text that is known to be whole when read back, or `None`
    /// when entries are never capped.
    pub fn whole_text_limit(&self) -> Option<usize> {
        (self.max_text_bytes > 0).then(|| self.max_text_bytes.saturating_sub(MAX_CHAR_BYTES))
    }

    /// Returns true if `text` read from this cache cannot have been capped.
    pub fn is_whole(&self, text: &str) -> bool {
        self.whole_text_limit().map_or(true, |limit| text.len() <= limit)
    }

    /// Fingerprints `path` and reads its entry. Fails only if the source
    /// itself cannot be inspected.
    pub fn lookup(&self, path: &Path) -> Result<CacheLookup> {
        let source = canonicalize_existing_path(path.to_path_buf());
        let metadata = fs::metadata(&source)?;
        if !metadata.is_file() {
            return Err(FinderError::InvalidInput(format!(
                "not a regular file: {}",
                source.display()
            )));
        }
        let fingerprint = Fingerprint::from_metadata(&metadata);
        let entry = self.entry_path(&source);
        let text = self.read_entry(&entry, fingerprint);
        if text.is_some() {
            log::trace!("extraction cache hit path={}", source.display());
        }
        Ok(CacheLookup {
            source,
            entry,
            fingerprint,
            text,
        })
    }

    /// Stores `text` for the file described by `lookup`, capped to the cache
    /// budget. Failures are logged and ignored.
    pub fn store(&self, lookup: &CacheLookup, text: &str) {
        let text = truncate_utf8(text, self.max_text_bytes);
        if let Err(error) = self.write_entry(&lookup.entry, lookup.fingerprint, text) {
            log::debug!(
                "extraction cache write failed entry={} error={}",
                lookup.entry.display(),
                error
            );
        }
    }

    /// Returns the cached text for `path`, or runs `extract` and stores its
    /// output. Extraction errors propagate; cache errors never do.
    pub fn get_or_extract<F>(&self, path: &Path, extract: F) -> Result<String>
    where
        F: FnOnce(&Path) -> Result<String>,
    {
        let lookup = self.lookup(path)?;
        if let Some(text) = lookup.text {
            return Ok(text);
        }
        let mut text = extract(&lookup.source)?;
        truncate_utf8_in_place(&mut text, self.max_text_bytes);
        self.store(&lookup, &text);
        Ok(text)
    }

    /// Reads an entry if it exists and matches `fingerprint`.
    pub fn read_entry(&self, entry: &Path, fingerprint: Fingerprint) -> Option<String> {
        let mut file = match File::open(entry) {
            Ok(file) => file,
            Err(error) if error.kind() == ErrorKind::NotFound => return None,
            Err(error) => {
                log::debug!("extraction cache read failed entry={} error={}", entry.display(), error);
                return None;
            }
        };

        let mut header = [0u8; HEADER_LEN];
        file.read_exact(&mut header).ok()?;
        if Fingerprint::from_header(&header) != fingerprint {
            log::trace!("extraction cache stale entry={}", entry.display());
            return None;
        }

        let mut bytes = Vec::new();
        let limit = match self.max_text_bytes {
            0 => u64::MAX,
            max => max as u64,
        };
        if let Err(error) = GzDecoder::new(file).take(limit).read_to_end(&mut bytes) {
            log::debug!("extraction cache decompress failed entry={} error={}", entry.display(), error);
            return None;
        }

        // A cap may cut a character in half; keep the valid prefix.
        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(error) => {
                let valid = error.utf8_error().valid_up_to();
                let mut bytes = error.into_bytes();
                bytes.truncate(valid);
                String::from_utf8(bytes).ok()?
            }
        };
        Some(text)
    }

    /// Atomically writes an entry: temp file in the shard directory, then rename.
    pub fn write_entry(&self, entry: &Path, fingerprint: Fingerprint, text: &str) -> Result<()> {
        let parent = entry
            .parent()
            .ok_or_else(|| FinderError::InvalidInput(format!("bad cache entry {}", entry.display())))?;
        fs::create_dir_all(parent)?;

        let mut temp = NamedTempFile::new_in(parent)?;
        temp.write_all(&fingerprint.to_header())?;
        {
            let mut encoder = GzEncoder::new(temp.as_file_mut(), Compression::default());
            encoder.write_all(text.as_bytes())?;
            encoder.finish()?;
        }
        temp.persist(entry).map_err(|error| FinderError::Io(error.error))?;
        Ok(())
    }
}
