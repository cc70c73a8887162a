//! Local content search over directory trees.
//!
//! This crate provides the search core:
//! - Streaming substring matching with bounded context across chunks
//! - Text extraction for plain text, Office XML containers, PDF and legacy formats
//! - A persistent, fingerprint-validated extraction cache
//! - A resource governor bounding memory and expensive parses
//! - Generation-tagged query sessions that supersede in-flight searches

pub mod cache;
pub mod cancel;
pub mod config;
pub mod error;
pub mod extract;
pub mod governor;
pub mod matcher;
pub mod search;
pub mod session;
pub mod types;

// Re-export main types
pub use cache::ExtractionCache;
pub use cancel::{CancellationToken, GenerationTracker};
pub use config::{FallbackOverride, FinderConfig, PdfLimits};
pub use error::{FinderError, Result};
pub use extract::{ChunkedTextSource, Extractors, FormatKind, TextFilter};
pub use governor::{Governor, MemoryProbe};
pub use search::{run_search, SearchContext};
pub use session::{Orchestrator, QueryDefaults, QuerySession, SessionEvents};
pub use types::{MatchResult, Query, SearchEvent, SearchStats, SessionState, Snippet, SnippetSource};
