//! Format extractors.
//!
//! Every supported file type is turned into a [`ChunkedTextSource`]:
//!
//! - `text`: plain text (UTF-8 streamed, UTF-16 decoded whole)
//! - `container`: zip packages of XML parts (docx, xlsx, pptx, vsdx)
//! - `pdf`: in-process PDF parsing, gated by the resource governor
//! - `native`: external OS text filters for PDF and legacy Office formats
//!
//! [`Extractors`] picks the right source for a file and applies the PDF
//! native-first policy.

pub mod container;
pub mod native;
pub mod pdf;
pub mod source;
pub mod text;

use std::path::Path;
use std::sync::Arc;

pub use container::{ContainerFlavor, ContainerXmlSource};
pub use native::{CommandTextFilter, NoTextFilter, TextFilter};
pub use pdf::PdfPageSource;
pub use source::{collect_text, ChunkList, ChunkedTextSource, RecordingSource};
pub use text::PlainTextSource;

use crate::cancel::CancellationToken;
use crate::config::FinderConfig;
use crate::error::{FinderError, Result};
use crate::governor::Governor;
use crate::matcher::{snippet, stream};
use crate::types::extension_of;

/// Extensions the crawl considers, lowercase with the leading dot.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    ".txt", ".md", ".log", ".csv", ".json", ".xml", ".ini", ".yaml", ".yml", ".doc", ".docx",
    ".xls", ".xlsx", ".ppt", ".pptx", ".pdf", ".vsdx",
];

/// Separator between container nodes in collected text. XML text cannot
/// contain NUL, so the nodes can be split apart again.
pub const NODE_SEPARATOR: &str = "\0";

/// How a file's text is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatKind {
    PlainText,
    Container(ContainerFlavor),
    Pdf,
    /// Binary Office formats, readable only through a native filter.
    Legacy,
}

impl FormatKind {
    /// Classifies a lowercase extension (with or without the leading dot).
    pub fn from_extension(extension: &str) -> Option<Self> {
        let bare = extension.trim_start_matches('.');
        match bare {
            "txt" | "md" | "log" | "csv" | "json" | "xml" | "ini" | "yaml" | "yml" => {
                Some(Self::PlainText)
            }
            "pdf" => Some(Self::Pdf),
            "doc" | "xls" | "ppt" => Some(Self::Legacy),
            _ => ContainerFlavor::from_extension(bare).map(Self::Container),
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        Self::from_extension(&extension_of(path))
    }

    /// Container fragments are XML nodes, matched one node at a time.
    pub fn is_node_local(self) -> bool {
        matches!(self, Self::Container(_))
    }

    /// Plain text is read directly; every other format is worth caching.
    pub fn is_cacheable(self) -> bool {
        !matches!(self, Self::PlainText)
    }

    /// How fragments are joined into one text. Streamed formats are joined
    /// without a gap so the text matches exactly like the stream does.
    pub fn fragment_separator(self) -> &'static str {
        if self.is_node_local() {
            NODE_SEPARATOR
        } else {
            ""
        }
    }
}

/// Returns true if files with `extension` are searched at all.
pub fn is_supported_extension(extension: &str) -> bool {
    SUPPORTED_EXTENSIONS.contains(&extension)
}

/// Opens text sources for any supported format.
pub struct Extractors {
    config: FinderConfig,
    governor: Arc<Governor>,
    filter: Arc<dyn TextFilter>,
}

impl std::fmt::Debug for Extractors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extractors")
            .field("filter", &self.filter.name())
            .field("governor", &self.governor)
            .finish()
    }
}

impl Extractors {
    pub fn new(config: FinderConfig, governor: Arc<Governor>) -> Self {
        let filter: Arc<dyn TextFilter> = if config.native_filter {
            Arc::new(CommandTextFilter::standard())
        } else {
            Arc::new(NoTextFilter)
        };
        Self {
            config,
            governor,
            filter,
        }
    }

    /// Replaces the native text filter.
    pub fn with_text_filter(mut self, filter: Arc<dyn TextFilter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn config(&self) -> &FinderConfig {
        &self.config
    }

    pub fn governor(&self) -> &Arc<Governor> {
        &self.governor
    }

    /// Whether the in-process PDF parser may be used.
    pub fn pdf_fallback_enabled(&self) -> bool {
        self.config
            .pdf_fallback
            .fallback_enabled(self.filter.supports(".pdf"))
    }

    /// Opens a text source for `path`.
    ///
    /// `term_hint` lets container sources skip nodes that cannot contain the
    /// term; it must be `None` when the full text is wanted.
    pub fn open(
        &self,
        path: &Path,
        kind: FormatKind,
        token: &CancellationToken,
        term_hint: Option<&str>,
    ) -> Result<Box<dyn ChunkedTextSource>> {
        match kind {
            FormatKind::PlainText => Ok(Box::new(PlainTextSource::open(
                path,
                self.config.text_max_bytes,
            )?)),
            FormatKind::Container(flavor) => Ok(Box::new(ContainerXmlSource::open(
                path,
                flavor,
                self.config.entry_max_bytes,
                term_hint,
            )?)),
            FormatKind::Pdf => self.open_pdf(path, token),
            FormatKind::Legacy => {
                let extension = extension_of(path);
                if self.filter.supports(&extension) {
                    self.filter.open(path)
                } else {
                    Err(FinderError::Unsupported(format!(
                        "no text filter for {extension}"
                    )))
                }
            }
        }
    }

    fn open_pdf(&self, path: &Path, token: &CancellationToken) -> Result<Box<dyn ChunkedTextSource>> {
        let fallback = self.pdf_fallback_enabled();
        if self.filter.supports(".pdf") {
            match self.filter.open(path) {
                Ok(source) => return Ok(source),
                Err(error) if !fallback => return Err(error),
                Err(error) => {
                    log::debug!(
                        "pdf native filter failed path={} error={} action=fallback",
                        path.display(),
                        error
                    );
                }
            }
        } else if !fallback {
            return Err(FinderError::Unsupported(
                "no PDF text filter and fallback disabled".into(),
            ));
        }

        let source = PdfPageSource::open(path, &self.config.pdf, &self.governor, token)?;
        Ok(Box::new(source))
    }

    /// Finds up to `max_snippets` occurrences of `term` in the file.
    ///
    /// Returns `None` if cancelled. Container formats are matched node by
    /// node, so a match never spans two XML text nodes.
    pub fn find_snippets(
        &self,
        path: &Path,
        kind: FormatKind,
        term: &str,
        context_len: usize,
        max_snippets: usize,
        token: &CancellationToken,
    ) -> Option<Result<Vec<String>>> {
        let mut source = match self.open(path, kind, token, Some(term)) {
            Ok(source) => source,
            Err(FinderError::Cancelled) => return None,
            Err(error) => return Some(Err(error)),
        };
        search_source(&mut source, kind, term, context_len, max_snippets, token)
    }

    /// Extracts the whole text of `path`, capped at `max_bytes` (0 = no cap).
    ///
    /// Fragments are joined with [`FormatKind::fragment_separator`].
    pub fn extract_text(
        &self,
        path: &Path,
        kind: FormatKind,
        max_bytes: usize,
        token: &CancellationToken,
    ) -> Result<String> {
        let mut source = self.open(path, kind, token, None)?;
        collect_text(&mut source, max_bytes, kind.fragment_separator(), token)
    }
}

/// Finds up to `max_snippets` occurrences of `term` in an open source.
///
/// Returns `None` if cancelled.
pub fn search_source(
    source: &mut dyn ChunkedTextSource,
    kind: FormatKind,
    term: &str,
    context_len: usize,
    max_snippets: usize,
    token: &CancellationToken,
) -> Option<Result<Vec<String>>> {
    if !kind.is_node_local() {
        return stream::find_snippets(source, term, context_len, max_snippets, token);
    }

    let max_snippets = max_snippets.max(1);
    let mut found = Vec::new();
    while found.len() < max_snippets {
        token.is_cancelled()?;
        let node = match source.next_chunk() {
            Ok(Some(node)) => node,
            Ok(None) => break,
            Err(FinderError::Cancelled) => return None,
            Err(error) => return Some(Err(error)),
        };
        let remaining = max_snippets - found.len();
        found.extend(snippet::find_snippets(&node, term, context_len, remaining));
    }
    Some(Ok(found))
}

/// Searches text collected by [`Extractors::extract_text`] with the same
/// results [`search_source`] gives on the live document.
pub fn search_text(
    text: &str,
    kind: FormatKind,
    term: &str,
    context_len: usize,
    max_snippets: usize,
) -> Result<Vec<String>> {
    if term.is_empty() {
        return Err(FinderError::InvalidQuery("empty term".into()));
    }
    let max_snippets = max_snippets.max(1);
    if !kind.is_node_local() {
        return Ok(snippet::find_snippets(text, term, context_len, max_snippets));
    }
    let mut found = Vec::new();
    for node in text.split(NODE_SEPARATOR) {
        if found.len() >= max_snippets {
            break;
        }
        let remaining = max_snippets - found.len();
        found.extend(snippet::find_snippets(node, term, context_len, remaining));
    }
    Ok(found)
}
