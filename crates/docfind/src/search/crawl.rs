//! Directory crawl feeding the match workers.
//!
//! The walk is a plain recursive traversal: no ignore files, no hidden-file
//! filtering, symlinks not followed. Unreadable directories are skipped.
//! Candidates go into a bounded queue, so a slow matcher stage throttles
//! the crawl instead of buffering the whole tree.

use std::path::Path;
use std::time::Duration;

use crossbeam_channel::{SendTimeoutError, Sender};
use ignore::WalkBuilder;

use crate::cancel::CancellationToken;
use crate::extract::is_supported_extension;
use crate::types::CandidateFile;

/// How long a blocked enqueue waits before re-checking cancellation.
const ENQUEUE_SLICE: Duration = Duration::from_millis(50);

/// Walks `root` and sends every supported file to `queue`.
///
/// Returns the number of candidates enqueued, or `None` if cancelled.
/// A disconnected queue ends the crawl early without being an error.
pub fn crawl(root: &Path, queue: &Sender<CandidateFile>, token: &CancellationToken) -> Option<usize> {
    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .build();

    let mut enqueued = 0usize;
    for (visited, entry) in walker.enumerate() {
        token.is_cancelled_sparse(visited)?;
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                log::debug!("crawl entry skipped root={} error={}", root.display(), error);
                continue;
            }
        };
        if !entry.file_type().is_some_and(|file_type| file_type.is_file()) {
            continue;
        }

        let candidate = CandidateFile::new(entry.into_path());
        if !is_supported_extension(&candidate.extension) {
            continue;
        }
        if !enqueue(queue, candidate, token)? {
            break;
        }
        enqueued += 1;
    }

    log::debug!("crawl finished root={} candidates={}", root.display(), enqueued);
    Some(enqueued)
}

/// Blocks until `candidate` is queued. Returns `Some(false)` if the queue is
/// gone and `None` if cancelled while waiting.
fn enqueue(
    queue: &Sender<CandidateFile>,
    mut candidate: CandidateFile,
    token: &CancellationToken,
) -> Option<bool> {
    loop {
        token.is_cancelled()?;
        match queue.send_timeout(candidate, ENQUEUE_SLICE) {
            Ok(()) => return Some(true),
            Err(SendTimeoutError::Timeout(returned)) => candidate = returned,
            Err(SendTimeoutError::Disconnected(_)) => return Some(false),
        }
    }
}
