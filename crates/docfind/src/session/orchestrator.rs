//! Multi-root searches: one session per root, merged into one stream.
//!
//! Every query is fanned out to all sessions under a single generation. The
//! merged stream drops duplicate paths and collapses the per-root `Done`
//! events into one, emitted once every root has finished.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};

use crate::cancel::GenerationTracker;
use crate::error::{FinderError, Result};
use crate::governor::Governor;
use crate::search::SearchContext;
use crate::types::{MatchResult, Query, SearchEvent};

use super::query_session::QuerySession;

/// Fans queries out to several roots.
pub struct Orchestrator {
    sessions: Vec<QuerySession>,
    tracker: GenerationTracker,
    receiver: Receiver<SearchEvent>,
    seen: HashSet<PathBuf>,
    pending_roots: usize,
}

impl Orchestrator {
    pub fn new(roots: Vec<PathBuf>, context: Arc<SearchContext>, governor: Arc<Governor>) -> Result<Self> {
        if roots.is_empty() {
            return Err(FinderError::InvalidInput("at least one root is required".into()));
        }
        let (sender, receiver) = unbounded();
        let tracker = GenerationTracker::new();
        let sessions = roots
            .into_iter()
            .map(|root| {
                QuerySession::with_sender(
                    root,
                    context.clone(),
                    governor.clone(),
                    GenerationTracker::new(),
                    sender.clone(),
                )
            })
            .collect();
        Ok(Self {
            sessions,
            tracker,
            receiver,
            seen: HashSet::new(),
            pending_roots: 0,
        })
    }

    pub fn roots(&self) -> impl Iterator<Item = &std::path::Path> {
        self.sessions.iter().map(|session| session.root())
    }

    pub fn current_generation(&self) -> u64 {
        self.tracker.current()
    }

    /// Submits a query to every root under a fresh generation.
    pub fn submit<I, S>(&mut self, terms: I, context_len: usize, max_snippets: usize) -> Result<u64>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let generation = self.tracker.current() + 1;
        let query = Query::new(terms, context_len, max_snippets, generation)?;
        self.tracker.activate(generation);
        self.seen.clear();
        self.pending_roots = if query.is_empty() { 0 } else { self.sessions.len() };
        for session in &self.sessions {
            session.submit(query.clone())?;
        }
        Ok(generation)
    }

    /// Aborts the current query on every root.
    pub fn cancel(&self) {
        for session in &self.sessions {
            session.cancel();
        }
    }

    /// Returns true once every root has reported `Done` for the current query.
    pub fn is_finished(&self) -> bool {
        self.pending_roots == 0
    }

    /// Next merged event, waiting at most `timeout`.
    pub fn recv_timeout(&mut self, timeout: Duration) -> std::result::Result<SearchEvent, RecvTimeoutError> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            let event = self.receiver.recv_timeout(remaining)?;
            if let Some(event) = self.merge(event) {
                return Ok(event);
            }
        }
    }

    /// Next merged event. `None` if every session is gone.
    pub fn recv(&mut self) -> Option<SearchEvent> {
        loop {
            let event = self.receiver.recv().ok()?;
            if let Some(event) = self.merge(event) {
                return Some(event);
            }
        }
    }

    fn merge(&mut self, event: SearchEvent) -> Option<SearchEvent> {
        if event.generation() != self.tracker.current() {
            return None;
        }
        match event {
            SearchEvent::Result(result) => {
                if self.seen.insert(result.path.clone()) {
                    Some(SearchEvent::Result(result))
                } else {
                    None
                }
            }
            SearchEvent::Done { generation } => {
                self.pending_roots = self.pending_roots.saturating_sub(1);
                (self.pending_roots == 0).then_some(SearchEvent::Done { generation })
            }
            status => Some(status),
        }
    }

    /// Runs one query to completion and returns its results, sorted by path
    /// when `sort` is set.
    pub fn run_to_completion<I, S>(
        &mut self,
        terms: I,
        context_len: usize,
        max_snippets: usize,
        sort: bool,
    ) -> Result<Vec<MatchResult>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.submit(terms, context_len, max_snippets)?;
        let mut results = Vec::new();
        while !self.is_finished() {
            match self.recv() {
                Some(SearchEvent::Result(result)) => results.push(result),
                Some(_) => {}
                None => break,
            }
        }
        if sort {
            results.sort_by(|a, b| a.path.cmp(&b.path));
        }
        Ok(results)
    }
}
