//! Per-file matching.
//!
//! A file matches only if every term is found, either in its name or in its
//! content. Terms are tried in order and evaluation stops at the first term
//! that is missing. File size and mtime are read only for files that match.
//!
//! With a cache, a document read to the end during a search is stored, and
//! later searches of the unchanged file run on the stored text. Documents
//! whose stored text may have been capped are streamed as usual, so the
//! cache never changes what matches.

use std::fs;
use std::path::Path;
use std::time::{Instant, UNIX_EPOCH};

use crate::cache::{CacheLookup, ExtractionCache};
use crate::cancel::CancellationToken;
use crate::error::{FinderError, Result};
use crate::extract::{self, FormatKind, RecordingSource};
use crate::matcher::snippet;
use crate::types::{CandidateFile, MatchResult, Query, Snippet};

use super::SearchContext;

/// Matches that take longer than this are logged.
pub const SLOW_HIT: std::time::Duration = std::time::Duration::from_millis(800);
/// Misses that take longer than this are logged.
pub const SLOW_MISS: std::time::Duration = std::time::Duration::from_millis(1200);

/// Evaluates `query` against one candidate.
///
/// Returns `None` if cancelled, `Some(None)` if the file does not match or
/// cannot be read.
pub fn evaluate(
    candidate: &CandidateFile,
    query: &Query,
    context: &SearchContext,
    token: &CancellationToken,
) -> Option<Option<MatchResult>> {
    let Some(kind) = FormatKind::from_extension(&candidate.extension) else {
        return Some(None);
    };
    let started = Instant::now();
    let name = candidate.file_name();
    let name_lower = name.to_lowercase();
    let cap = query.total_snippet_cap();

    let mut snippets: Vec<Snippet> = Vec::new();
    let mut document = CachedDocument::Unread;

    for term in query.terms() {
        token.is_cancelled()?;

        if let Some(found) = name_snippets(&name, &name_lower, term, query) {
            push_capped(&mut snippets, found.into_iter().map(Snippet::name), cap);
            continue;
        }

        let found = match &context.cache {
            Some(cache) if kind.is_cacheable() => {
                cached_snippets(cache, &mut document, candidate, kind, term, query, context, token)?
            }
            _ => context.extractors.find_snippets(
                &candidate.path,
                kind,
                term,
                query.context_len,
                query.max_snippets,
                token,
            )?,
        };

        match found {
            Ok(found) if !found.is_empty() => {
                push_capped(&mut snippets, found.into_iter().map(Snippet::content), cap);
            }
            Ok(_) => {
                log_slow_miss(&candidate.path, started);
                return Some(None);
            }
            Err(error) if error.is_cancelled() => return None,
            Err(error) => {
                log::debug!(
                    "content unreadable path={} error={}",
                    candidate.path.display(),
                    error
                );
                log_slow_miss(&candidate.path, started);
                return Some(None);
            }
        }
    }

    if snippets.is_empty() {
        return Some(None);
    }

    let (size, modified) = stat(&candidate.path);
    let elapsed = started.elapsed();
    if elapsed >= SLOW_HIT {
        log::debug!(
            "slow match path={} elapsed_ms={} snippets={}",
            candidate.path.display(),
            elapsed.as_millis(),
            snippets.len()
        );
    }

    Some(Some(MatchResult {
        path: candidate.path.clone(),
        extension: candidate.extension.clone(),
        size,
        modified,
        snippets,
        generation: query.generation,
    }))
}

/// Snippets for `term` in the file name: exact case first, then lowercase.
fn name_snippets(name: &str, name_lower: &str, term: &str, query: &Query) -> Option<Vec<String>> {
    if name.contains(term) {
        return Some(snippet::find_snippets(
            name,
            term,
            query.context_len,
            query.max_snippets,
        ));
    }
    if name_lower.contains(&term.to_lowercase()) {
        return Some(snippet::find_snippets_ignore_case(
            name,
            term,
            query.context_len,
            query.max_snippets,
        ));
    }
    None
}

/// What the cache knows about the document being evaluated.
enum CachedDocument {
    Unread,
    /// No usable entry yet; the next read records the text.
    Missing(CacheLookup),
    Whole(String),
    /// Not cacheable this time; search the file directly.
    Direct,
}

/// Content snippets through the extraction cache. Gives the same snippets
/// as streaming the file.
#[allow(clippy::too_many_arguments)]
fn cached_snippets(
    cache: &ExtractionCache,
    document: &mut CachedDocument,
    candidate: &CandidateFile,
    kind: FormatKind,
    term: &str,
    query: &Query,
    context: &SearchContext,
    token: &CancellationToken,
) -> Option<Result<Vec<String>>> {
    if let CachedDocument::Unread = document {
        *document = match cache.lookup(&candidate.path) {
            Ok(CacheLookup {
                text: Some(text), ..
            }) if cache.is_whole(&text) => CachedDocument::Whole(text),
            Ok(lookup) => CachedDocument::Missing(lookup),
            Err(_) => CachedDocument::Direct,
        };
    }
    token.is_cancelled()?;

    match std::mem::replace(document, CachedDocument::Direct) {
        CachedDocument::Whole(text) => {
            let found = extract::search_text(&text, kind, term, query.context_len, query.max_snippets);
            *document = CachedDocument::Whole(text);
            Some(found)
        }
        CachedDocument::Missing(lookup) => {
            // Read without a term hint so skipped container nodes still
            // reach the recording.
            let source = match context.extractors.open(&candidate.path, kind, token, None) {
                Ok(source) => source,
                Err(FinderError::Cancelled) => return None,
                Err(error) => return Some(Err(error)),
            };
            let mut recorder =
                RecordingSource::new(source, kind.fragment_separator(), cache.whole_text_limit());
            let found = extract::search_source(
                &mut recorder,
                kind,
                term,
                query.context_len,
                query.max_snippets,
                token,
            )?;
            if let Some(text) = recorder.whole_text() {
                cache.store(&lookup, &text);
                *document = CachedDocument::Whole(text);
            }
            Some(found)
        }
        CachedDocument::Unread | CachedDocument::Direct => context.extractors.find_snippets(
            &candidate.path,
            kind,
            term,
            query.context_len,
            query.max_snippets,
            token,
        ),
    }
}

fn push_capped(snippets: &mut Vec<Snippet>, found: impl Iterator<Item = Snippet>, cap: usize) {
    let room = cap.saturating_sub(snippets.len());
    snippets.extend(found.take(room));
}

fn log_slow_miss(path: &Path, started: Instant) {
    let elapsed = started.elapsed();
    if elapsed >= SLOW_MISS {
        log::debug!(
            "slow miss path={} elapsed_ms={}",
            path.display(),
            elapsed.as_millis()
        );
    }
}

/// Size in bytes and mtime in unix seconds; zeros if the file vanished.
fn stat(path: &Path) -> (u64, i64) {
    match fs::metadata(path) {
        Ok(metadata) => {
            let modified = metadata
                .modified()
                .ok()
                .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
                .map(|duration| duration.as_secs() as i64)
                .unwrap_or(0);
            (metadata.len(), modified)
        }
        Err(_) => (0, 0),
    }
}
