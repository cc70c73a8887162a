//! The crawl and match pipeline.
//!
//! This module provides:
//! - `crawl`: the recursive walk producing candidate files
//! - `worker`: per-file conjunctive matching
//! - `pipeline`: one run wiring a crawler to N workers

pub mod crawl;
pub mod pipeline;
pub mod worker;

use std::sync::Arc;

pub use crawl::crawl;
pub use pipeline::run_search;
pub use worker::evaluate;

use crate::cache::ExtractionCache;
use crate::config::FinderConfig;
use crate::extract::Extractors;
use crate::governor::Governor;

/// Everything a search run needs besides the query.
#[derive(Debug, Clone)]
pub struct SearchContext {
    pub extractors: Arc<Extractors>,
    pub cache: Option<Arc<ExtractionCache>>,
    pub workers: usize,
}

impl SearchContext {
    pub fn new(config: FinderConfig, governor: Arc<Governor>) -> Self {
        let workers = config.workers.max(1);
        Self {
            extractors: Arc::new(Extractors::new(config, governor)),
            cache: None,
            workers,
        }
    }

    /// Routes content reads through `cache`.
    pub fn with_cache(mut self, cache: ExtractionCache) -> Self {
        self.cache = Some(Arc::new(cache));
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn config(&self) -> &FinderConfig {
        self.extractors.config()
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        use crate::governor::memory::tests::FixedProbe;

        let mut config = FinderConfig::default();
        config.native_filter = false;
        config.memory_ceiling = None;
        config.workers = 2;
        let governor = Arc::new(Governor::with_probe(&config, Arc::new(FixedProbe::new(0))));
        Self::new(config, governor)
    }
}
