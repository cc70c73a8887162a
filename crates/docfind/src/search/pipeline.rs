//! One search run: a crawler thread feeding a pool of match workers.
//!
//! ```text
//! crawl ──(bounded queue)──▶ worker × N ──(bounded queue)──▶ caller
//! ```
//!
//! Results are handed to the caller on its own thread, in completion order.
//! Once the token is cancelled nothing more is handed over.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Instant;

use crossbeam_channel::bounded;

use crate::cancel::CancellationToken;
use crate::types::{CandidateFile, MatchResult, Query, SearchStats};

use super::crawl::crawl;
use super::worker::evaluate;
use super::SearchContext;

/// Candidates buffered per worker between the crawl and the matchers.
const QUEUE_DEPTH_PER_WORKER: usize = 4;

/// Runs `query` over the tree at `root`, calling `on_result` for each match.
///
/// Returns `None` if the run was cancelled, otherwise the run's counters.
pub fn run_search<F>(
    root: &Path,
    query: &Query,
    context: &SearchContext,
    token: &CancellationToken,
    mut on_result: F,
) -> Option<SearchStats>
where
    F: FnMut(MatchResult),
{
    let workers = context.workers.max(1);
    let started = Instant::now();
    let scanned = AtomicU64::new(0);
    let mut matches = 0u64;

    let (jobs_tx, jobs_rx) = bounded::<CandidateFile>(workers * QUEUE_DEPTH_PER_WORKER);
    let (results_tx, results_rx) = bounded::<MatchResult>(workers * 2);

    thread::scope(|scope| {
        scope.spawn(move || {
            crawl(root, &jobs_tx, token);
        });

        for _ in 0..workers {
            let jobs_rx = jobs_rx.clone();
            let results_tx = results_tx.clone();
            let scanned = &scanned;
            scope.spawn(move || {
                for candidate in jobs_rx.iter() {
                    if token.cancelled() {
                        break;
                    }
                    scanned.fetch_add(1, Ordering::Relaxed);
                    match evaluate(&candidate, query, context, token) {
                        None => break,
                        Some(Some(result)) => {
                            if results_tx.send(result).is_err() {
                                break;
                            }
                        }
                        Some(None) => {}
                    }
                }
            });
        }
        drop(jobs_rx);
        drop(results_tx);

        for result in results_rx.iter() {
            if token.cancelled() {
                continue;
            }
            matches += 1;
            on_result(result);
        }
    });

    token.is_cancelled()?;
    let stats = SearchStats {
        files_scanned: scanned.load(Ordering::Relaxed),
        matches,
    };
    log::debug!(
        "search run finished root={} generation={} scanned={} matches={} elapsed_ms={}",
        root.display(),
        query.generation,
        stats.files_scanned,
        stats.matches,
        started.elapsed().as_millis()
    );
    Some(stats)
}
