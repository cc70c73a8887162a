//! Core query, result and event types.
//!
//! These are the in-process types. The session protocol converts them to
//! line-delimited JSON records for out-of-process consumers.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{FinderError, Result};

/// Maximum number of conjunctive terms in one query.
pub const MAX_TERMS: usize = 3;

/// Absolute ceiling on snippets carried by one result.
pub const MAX_TOTAL_SNIPPETS: usize = 12;

/// A conjunctive query: every term must match by file name or content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    terms: Vec<String>,
    pub context_len: usize,
    pub max_snippets: usize,
    pub generation: u64,
}

impl Query {
    /// Builds a query from raw terms.
    ///
    /// Terms are trimmed and empty ones dropped. A query left with no terms
    /// is valid and means "go idle"; more than [`MAX_TERMS`] terms is an
    /// error.
    pub fn new<I, S>(terms: I, context_len: usize, max_snippets: usize, generation: u64) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let terms: Vec<String> = terms
            .into_iter()
            .map(|term| term.as_ref().trim().to_string())
            .filter(|term| !term.is_empty())
            .collect();
        if terms.len() > MAX_TERMS {
            return Err(FinderError::InvalidQuery(format!(
                "at most {MAX_TERMS} terms are supported, got {}",
                terms.len()
            )));
        }
        Ok(Self {
            terms,
            context_len,
            max_snippets: max_snippets.max(1),
            generation,
        })
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Overall snippet budget for one result.
    pub fn total_snippet_cap(&self) -> usize {
        (self.max_snippets * self.terms.len().max(1)).min(MAX_TOTAL_SNIPPETS)
    }
}

/// Where a snippet was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnippetSource {
    Name,
    Content,
}

/// A bounded excerpt around one match, with the match bracketed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snippet {
    pub source: SnippetSource,
    pub text: String,
}

impl Snippet {
    pub fn name(text: String) -> Self {
        Self {
            source: SnippetSource::Name,
            text,
        }
    }

    pub fn content(text: String) -> Self {
        Self {
            source: SnippetSource::Content,
            text,
        }
    }
}

impl fmt::Display for Snippet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.source {
            SnippetSource::Name => write!(f, "filename: {}", self.text),
            SnippetSource::Content => f.write_str(&self.text),
        }
    }
}

/// A file discovered by the crawl.
#[derive(Debug, Clone)]
pub struct CandidateFile {
    pub path: PathBuf,
    /// Lowercased extension including the leading dot, e.g. `.docx`.
    pub extension: String,
}

impl CandidateFile {
    pub fn new(path: PathBuf) -> Self {
        let extension = extension_of(&path);
        Self { path, extension }
    }

    /// The final path component, lossily converted.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// A file that matched every term of a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub path: PathBuf,
    pub extension: String,
    pub size: u64,
    /// Modification time in unix seconds.
    pub modified: i64,
    pub snippets: Vec<Snippet>,
    pub generation: u64,
}

/// Counters reported when a run finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchStats {
    pub files_scanned: u64,
    pub matches: u64,
}

/// Events produced by a query session, tagged with their generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchEvent {
    Result(MatchResult),
    Status { generation: u64, message: String },
    Done { generation: u64 },
}

impl SearchEvent {
    pub fn generation(&self) -> u64 {
        match self {
            Self::Result(result) => result.generation,
            Self::Status { generation, .. } | Self::Done { generation } => *generation,
        }
    }
}

/// Lifecycle of a query session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Searching,
    Completed,
    Cancelled,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Searching => "searching",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Lowercased extension of `path` including the leading dot, or "".
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_ascii_lowercase()))
        .unwrap_or_default()
}
