//! Query sessions and their consumers.
//!
//! - `query_session`: one root, generation-tagged submission and events
//! - `orchestrator`: several roots merged into one deduplicated stream
//! - `protocol`: the line-delimited JSON surface of a single session

pub mod orchestrator;
pub mod protocol;
pub mod query_session;

pub use orchestrator::Orchestrator;
pub use protocol::{parse_command, serve, Command, EventRecord, QueryDefaults, SetQuery};
pub use query_session::{QuerySession, SessionEvents, STATUS_CANCELLED, STATUS_IDLE};
