//! A single-root query session.
//!
//! The session owns the current generation. Submitting a query with a newer
//! generation supersedes the running one; the superseded run's token reports
//! cancellation and [`SessionEvents`] drops anything it still produces.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;

use crate::cancel::{CancellationToken, GenerationTracker};
use crate::error::{FinderError, Result};
use crate::governor::Governor;
use crate::search::{run_search, SearchContext};
use crate::types::{Query, SearchEvent, SessionState};

pub const STATUS_IDLE: &str = "idle";
pub const STATUS_CANCELLED: &str = "cancelled";

#[derive(Debug, Default)]
struct SessionShared {
    state: Mutex<SessionState>,
    current: Mutex<Option<CancellationToken>>,
}

/// Runs queries against one root and publishes tagged events.
pub struct QuerySession {
    root: PathBuf,
    context: Arc<SearchContext>,
    governor: Arc<Governor>,
    tracker: GenerationTracker,
    shared: Arc<SessionShared>,
    events: Sender<SearchEvent>,
    last_run: Mutex<Option<JoinHandle<()>>>,
}

impl QuerySession {
    /// Creates a session with its own event stream.
    pub fn new(
        root: impl Into<PathBuf>,
        context: Arc<SearchContext>,
        governor: Arc<Governor>,
    ) -> (Self, SessionEvents) {
        let (sender, receiver) = unbounded();
        let tracker = GenerationTracker::new();
        let session = Self::with_sender(root, context, governor, tracker.clone(), sender);
        (session, SessionEvents::new(receiver, tracker))
    }

    /// Creates a session publishing into an existing channel, gated by
    /// `tracker`.
    pub fn with_sender(
        root: impl Into<PathBuf>,
        context: Arc<SearchContext>,
        governor: Arc<Governor>,
        tracker: GenerationTracker,
        events: Sender<SearchEvent>,
    ) -> Self {
        Self {
            root: root.into(),
            context,
            governor,
            tracker,
            shared: Arc::new(SessionShared::default()),
            events,
            last_run: Mutex::new(None),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.lock()
    }

    pub fn current_generation(&self) -> u64 {
        self.tracker.current()
    }

    /// Submits `query`. Queries whose generation is not newer than the
    /// current one are ignored and reported as stale.
    ///
    /// An empty query cancels the running search and leaves the session idle.
    pub fn submit(&self, query: Query) -> Result<()> {
        let generation = query.generation;
        if generation <= self.tracker.current() || self.tracker.activate(generation) != generation {
            return Err(FinderError::InvalidQuery(format!(
                "stale generation {generation}, current is {}",
                self.tracker.current()
            )));
        }

        let token = self.tracker.token_for(generation);
        *self.shared.current.lock() = Some(token.clone());

        if query.is_empty() {
            *self.shared.state.lock() = SessionState::Idle;
            let _ = self.events.send(SearchEvent::Status {
                generation,
                message: STATUS_IDLE.to_string(),
            });
            return Ok(());
        }

        *self.shared.state.lock() = SessionState::Searching;
        log::debug!(
            "query submitted root={} generation={} terms={:?}",
            self.root.display(),
            generation,
            query.terms()
        );

        let run = SearchRun {
            root: self.root.clone(),
            context: self.context.clone(),
            governor: self.governor.clone(),
            tracker: self.tracker.clone(),
            shared: self.shared.clone(),
            events: self.events.clone(),
        };
        let handle = thread::Builder::new()
            .name(format!("docfind-query-{generation}"))
            .spawn(move || run.execute(query, token))
            .map_err(FinderError::Io)?;
        *self.last_run.lock() = Some(handle);
        Ok(())
    }

    /// Builds and submits a query with the next generation number.
    pub fn submit_terms<I, S>(&self, terms: I, context_len: usize, max_snippets: usize) -> Result<u64>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let generation = self.tracker.current() + 1;
        self.submit(Query::new(terms, context_len, max_snippets, generation)?)?;
        Ok(generation)
    }

    /// Blocks until the most recently submitted run has finished.
    pub fn wait(&self) {
        let handle = self.last_run.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    /// Aborts the running query, if any.
    pub fn cancel(&self) {
        if let Some(token) = self.shared.current.lock().as_ref() {
            token.abort();
        }
    }
}

impl Drop for QuerySession {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// The state a background run needs, detached from the session handle.
struct SearchRun {
    root: PathBuf,
    context: Arc<SearchContext>,
    governor: Arc<Governor>,
    tracker: GenerationTracker,
    shared: Arc<SessionShared>,
    events: Sender<SearchEvent>,
}

impl SearchRun {
    fn execute(self, query: Query, token: CancellationToken) {
        let generation = query.generation;
        let started = Instant::now();
        let _watchdog = self.governor.watch(&token);

        let events = &self.events;
        let stats = run_search(&self.root, &query, &self.context, &token, |result| {
            if !token.cancelled() {
                let _ = events.send(SearchEvent::Result(result));
            }
        });

        match stats {
            Some(stats) => {
                let message = format!(
                    "completed: {} files scanned, {} matches in {} ms",
                    stats.files_scanned,
                    stats.matches,
                    started.elapsed().as_millis()
                );
                if self.finish(generation, SessionState::Completed) {
                    log::info!("query {} root={} generation={}", message, self.root.display(), generation);
                    let _ = self.events.send(SearchEvent::Status { generation, message });
                    let _ = self.events.send(SearchEvent::Done { generation });
                }
            }
            None if token.was_aborted() && !token.is_superseded() => {
                if self.finish(generation, SessionState::Cancelled) {
                    log::info!("query cancelled root={} generation={}", self.root.display(), generation);
                    let _ = self.events.send(SearchEvent::Status {
                        generation,
                        message: STATUS_CANCELLED.to_string(),
                    });
                    let _ = self.events.send(SearchEvent::Done { generation });
                }
            }
            None => {
                log::debug!("query superseded root={} generation={}", self.root.display(), generation);
            }
        }
    }

    /// Moves the session to `state` if `generation` is still current.
    fn finish(&self, generation: u64, state: SessionState) -> bool {
        let mut current = self.shared.state.lock();
        if !self.tracker.is_current(generation) {
            return false;
        }
        *current = state;
        true
    }
}

/// Receiving side of a session's events. Events from superseded
/// generations are dropped on receipt.
pub struct SessionEvents {
    receiver: Receiver<SearchEvent>,
    tracker: GenerationTracker,
}

impl SessionEvents {
    pub fn new(receiver: Receiver<SearchEvent>, tracker: GenerationTracker) -> Self {
        Self { receiver, tracker }
    }

    fn is_live(&self, event: &SearchEvent) -> bool {
        event.generation() == self.tracker.current()
    }

    /// Blocks for the next live event. `None` once every sender is gone.
    pub fn recv(&self) -> Option<SearchEvent> {
        loop {
            let event = self.receiver.recv().ok()?;
            if self.is_live(&event) {
                return Some(event);
            }
        }
    }

    /// Waits up to `timeout` for the next live event.
    pub fn recv_timeout(&self, timeout: Duration) -> std::result::Result<SearchEvent, RecvTimeoutError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let event = self.receiver.recv_timeout(remaining)?;
            if self.is_live(&event) {
                return Ok(event);
            }
        }
    }

    pub fn try_recv(&self) -> std::result::Result<SearchEvent, TryRecvError> {
        loop {
            let event = self.receiver.try_recv()?;
            if self.is_live(&event) {
                return Ok(event);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = SearchEvent> + '_ {
        std::iter::from_fn(move || self.recv())
    }
}
