//! In-process PDF text extraction, used when no native filter handles PDF.
//!
//! Parsing is expensive, so every document holds a governor permit for as
//! long as it is being read, and is refused outright above the size or page
//! limits. Pages are yielded in document order; pages that fail to extract
//! yield nothing instead of failing the whole document.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use lopdf::Document;
use rayon::prelude::*;
use rayon::ThreadPool;

use crate::cancel::CancellationToken;
use crate::config::PdfLimits;
use crate::error::{FinderError, Result};
use crate::governor::{Governor, Permit};

use super::source::ChunkedTextSource;

/// Page-at-a-time text source backed by a parsed document.
pub struct PdfPageSource {
    path: PathBuf,
    document: Document,
    pages: Vec<u32>,
    next_page: usize,
    pool: Option<ThreadPool>,
    batch_size: usize,
    ready: VecDeque<String>,
    token: CancellationToken,
    _permit: Permit,
}

impl PdfPageSource {
    pub fn open(
        path: &Path,
        limits: &PdfLimits,
        governor: &Governor,
        token: &CancellationToken,
    ) -> Result<Self> {
        let size = std::fs::metadata(path)?.len();
        if size > limits.max_file_bytes {
            return Err(FinderError::FileTooLarge(path.to_path_buf()));
        }

        let permit = governor.acquire_parse_permit(token)?;
        if token.cancelled() {
            return Err(FinderError::Cancelled);
        }

        let document = Document::load(path)?;
        let pages: Vec<u32> = document.get_pages().keys().copied().collect();
        if pages.len() > limits.max_pages {
            return Err(FinderError::TooManyPages {
                path: path.to_path_buf(),
                pages: pages.len(),
                limit: limits.max_pages,
            });
        }

        let pool = if limits.page_workers > 1 {
            rayon::ThreadPoolBuilder::new()
                .num_threads(limits.page_workers)
                .thread_name(|index| format!("docfind-pdf-{index}"))
                .build()
                .map_err(|error| log::warn!("pdf page pool unavailable: {error}"))
                .ok()
        } else {
            None
        };

        log::debug!(
            "pdf fallback opened path={} pages={} page_workers={}",
            path.display(),
            pages.len(),
            limits.page_workers
        );

        Ok(Self {
            path: path.to_path_buf(),
            document,
            pages,
            next_page: 0,
            pool,
            batch_size: limits.page_workers.max(1) * 2,
            ready: VecDeque::new(),
            token: token.clone(),
            _permit: permit,
        })
    }

    fn extract_batch(&mut self) {
        let end = (self.next_page + self.batch_size).min(self.pages.len());
        let batch = &self.pages[self.next_page..end];
        let document = &self.document;
        let path = &self.path;
        let texts: Vec<String> = match &self.pool {
            Some(pool) => pool.install(|| {
                batch
                    .par_iter()
                    .map(|&page| page_text(document, path, page))
                    .collect()
            }),
            None => batch.iter().map(|&page| page_text(document, path, page)).collect(),
        };
        self.next_page = end;
        self.ready.extend(texts);
    }
}

impl ChunkedTextSource for PdfPageSource {
    fn next_chunk(&mut self) -> Result<Option<String>> {
        if let Some(text) = self.ready.pop_front() {
            return Ok(Some(text));
        }
        if self.next_page >= self.pages.len() {
            return Ok(None);
        }
        if self.token.cancelled() {
            return Err(FinderError::Cancelled);
        }
        self.extract_batch();
        Ok(self.ready.pop_front())
    }
}

fn page_text(document: &Document, path: &Path, page: u32) -> String {
    document.extract_text(&[page]).unwrap_or_else(|error| {
        log::debug!("pdf page skipped path={} page={} error={}", path.display(), page, error);
        String::new()
    })
}
