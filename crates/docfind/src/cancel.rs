//! Cancellation tokens for search generations.
//!
//! Every query submitted to a session gets a generation id. A token remembers
//! the generation it was created for and reports cancellation as soon as the
//! session moves to a newer generation, or when it is aborted explicitly (by
//! the caller or the memory watchdog).
//!
//! ## Sparse Checking
//!
//! For tight loops, `is_cancelled_sparse()` only checks every 1,024
//! iterations to keep atomic reads off the hot path.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// How often tight loops should check whether execution was cancelled.
/// Using a power of 2 allows efficient modulo via bitwise AND.
pub const CANCEL_CHECK_INTERVAL: usize = 0x400; // 1,024

/// Tracks the active generation of a query session.
///
/// Tokens created for older generations report as cancelled once a newer
/// generation is activated.
#[derive(Debug, Default, Clone)]
pub struct GenerationTracker {
    active: Arc<AtomicU64>,
}

impl GenerationTracker {
    /// Creates a tracker whose active generation is 0.
    pub fn new() -> Self {
        Self {
            active: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Marks a caller-provided generation as active if it is newer than the
    /// currently active one.
    ///
    /// Returns the resulting active generation after the update attempt.
    pub fn activate(&self, generation: u64) -> u64 {
        let mut current = self.active.load(Ordering::SeqCst);
        loop {
            if generation <= current {
                return current;
            }
            match self.active.compare_exchange(
                current,
                generation,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return generation,
                Err(observed) => current = observed,
            }
        }
    }

    /// Returns the active generation without changing it.
    pub fn current(&self) -> u64 {
        self.active.load(Ordering::SeqCst)
    }

    /// Returns true if `generation` is the active one.
    pub fn is_current(&self, generation: u64) -> bool {
        self.current() == generation
    }

    /// Creates a cancellation token bound to `generation`.
    pub fn token_for(&self, generation: u64) -> CancellationToken {
        CancellationToken {
            active: self.active.clone(),
            generation,
            aborted: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// A cancellation token for terminating long-running operations.
///
/// Clones share the abort flag, so aborting any clone cancels them all.
#[derive(Clone, Debug)]
pub struct CancellationToken {
    active: Arc<AtomicU64>,
    generation: u64,
    aborted: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a token that is only cancelled by an explicit `abort()`.
    ///
    /// Useful for tests and one-shot extraction.
    pub fn noop() -> Self {
        Self {
            active: Arc::new(AtomicU64::new(0)),
            generation: 0,
            aborted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The generation this token was created for.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Checks if this token is still active.
    ///
    /// Returns `Some(())` if still active, `None` if cancelled.
    /// This enables use with the `?` operator for early returns.
    #[inline]
    pub fn is_cancelled(&self) -> Option<()> {
        if self.aborted.load(Ordering::Relaxed)
            || self.generation != self.active.load(Ordering::Relaxed)
        {
            None
        } else {
            Some(())
        }
    }

    /// Convenience boolean form of [`is_cancelled`](Self::is_cancelled).
    #[inline]
    pub fn cancelled(&self) -> bool {
        self.is_cancelled().is_none()
    }

    /// Sparse cancellation check, only reads the atomics every
    /// `CANCEL_CHECK_INTERVAL` iterations.
    #[inline]
    pub fn is_cancelled_sparse(&self, counter: usize) -> Option<()> {
        if counter & (CANCEL_CHECK_INTERVAL - 1) == 0 {
            self.is_cancelled()
        } else {
            Some(())
        }
    }

    /// Cancels this token and all of its clones without touching the
    /// session generation.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    /// Returns true if the token was aborted (as opposed to superseded by a
    /// newer generation).
    pub fn was_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Returns true if a newer generation has been activated.
    pub fn is_superseded(&self) -> bool {
        self.generation != self.active.load(Ordering::SeqCst)
    }
}

impl Default for CancellationToken {
    /// Default creates a noop token.
    fn default() -> Self {
        Self::noop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_token_is_active_until_aborted() {
        let token = CancellationToken::noop();
        assert!(token.is_cancelled().is_some());
        token.abort();
        assert!(token.is_cancelled().is_none());
        assert!(token.was_aborted());
    }

    #[test]
    fn newer_generation_cancels_older_tokens() {
        let tracker = GenerationTracker::new();
        let g1 = tracker.activate(1);
        let token = tracker.token_for(g1);
        assert!(token.is_cancelled().is_some());

        let g2 = tracker.activate(2);
        assert!(g2 > g1);
        assert!(token.is_cancelled().is_none());
        assert!(token.is_superseded());
        assert!(!token.was_aborted());
        assert!(tracker.token_for(g2).is_cancelled().is_some());
    }

    #[test]
    fn activate_ignores_stale_generations() {
        let tracker = GenerationTracker::new();
        assert_eq!(tracker.activate(5), 5);
        assert_eq!(tracker.activate(3), 5);
        assert_eq!(tracker.activate(5), 5);
        assert_eq!(tracker.activate(9), 9);
        assert!(tracker.is_current(9));
    }

    #[test]
    fn abort_is_shared_between_clones() {
        let tracker = GenerationTracker::new();
        let token = tracker.token_for(tracker.activate(1));
        let clone = token.clone();
        clone.abort();
        assert!(token.cancelled());
    }

    #[test]
    fn sparse_check_skips_non_interval_counters() {
        let token = CancellationToken::noop();
        token.abort();
        assert!(token.is_cancelled_sparse(1).is_some());
        assert!(token.is_cancelled_sparse(0).is_none());
        assert!(token.is_cancelled_sparse(CANCEL_CHECK_INTERVAL).is_none());
    }
}
