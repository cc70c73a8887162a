//! Substring matching with bounded context.
//!
//! - `snippet`: whole-text search, snippet rendering, code-point helpers
//! - `stream`: the same search over a lazily pulled chunk sequence

pub mod snippet;
pub mod stream;

pub use snippet::{find_snippets, truncate_utf8, HIGHLIGHT_CLOSE, HIGHLIGHT_OPEN};
pub use stream::{find_first as stream_find_first, find_snippets as stream_find_snippets};
