//! Line-delimited JSON protocol for a per-root session process.
//!
//! Commands arrive one per line:
//!
//! ```text
//! {"cmd":"setQuery","terms":["invoice","2024"],"generationId":3,"contextLen":30,"maxSnippets":3}
//! {"cmd":"cancel"}
//! {"cmd":"shutdown"}
//! ```
//!
//! `query`/`query2`/`query3` are accepted in place of `terms`, and `queryId`
//! in place of `generationId`. Events are written one per line:
//!
//! ```text
//! {"type":"result","generationId":3,"path":"...","extension":".txt","size":25,"modTime":1700000000,"snippets":["..."]}
//! {"type":"status","generationId":3,"message":"completed: ..."}
//! {"type":"done","generationId":3}
//! ```
//!
//! Lines that do not parse are dropped and leave the session untouched.

use std::io::{BufRead, Write};
use std::thread;

use serde::{Deserialize, Serialize};

use crate::config::FinderConfig;
use crate::error::{FinderError, Result};
use crate::types::{Query, SearchEvent};

use super::query_session::{QuerySession, SessionEvents};

/// An inbound command.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "cmd", rename_all = "camelCase")]
pub enum Command {
    SetQuery(SetQuery),
    Cancel,
    Shutdown,
}

/// Payload of a `setQuery` command.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetQuery {
    #[serde(default)]
    pub terms: Vec<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub query2: Option<String>,
    #[serde(default)]
    pub query3: Option<String>,
    #[serde(alias = "queryId")]
    pub generation_id: u64,
    #[serde(default)]
    pub context_len: Option<usize>,
    #[serde(default)]
    pub max_snippets: Option<usize>,
}

/// Defaults applied when a command omits its snippet settings.
#[derive(Debug, Clone, Copy)]
pub struct QueryDefaults {
    pub context_len: usize,
    pub max_snippets: usize,
}

impl From<&FinderConfig> for QueryDefaults {
    fn from(config: &FinderConfig) -> Self {
        Self {
            context_len: config.context_len,
            max_snippets: config.max_snippets,
        }
    }
}

impl SetQuery {
    /// All terms, `terms` first, then the numbered fields.
    pub fn all_terms(&self) -> Vec<String> {
        self.terms
            .iter()
            .cloned()
            .chain(
                [&self.query, &self.query2, &self.query3]
                    .into_iter()
                    .flatten()
                    .cloned(),
            )
            .collect()
    }

    pub fn into_query(self, defaults: QueryDefaults) -> Result<Query> {
        Query::new(
            self.all_terms(),
            self.context_len.unwrap_or(defaults.context_len),
            self.max_snippets.unwrap_or(defaults.max_snippets),
            self.generation_id,
        )
    }
}

/// An outbound event record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EventRecord {
    #[serde(rename_all = "camelCase")]
    Result {
        generation_id: u64,
        path: String,
        extension: String,
        size: u64,
        mod_time: i64,
        snippets: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    Status { generation_id: u64, message: String },
    #[serde(rename_all = "camelCase")]
    Done { generation_id: u64 },
}

impl From<&SearchEvent> for EventRecord {
    fn from(event: &SearchEvent) -> Self {
        match event {
            SearchEvent::Result(result) => Self::Result {
                generation_id: result.generation,
                path: result.path.to_string_lossy().into_owned(),
                extension: result.extension.clone(),
                size: result.size,
                mod_time: result.modified,
                snippets: result.snippets.iter().map(ToString::to_string).collect(),
            },
            SearchEvent::Status {
                generation,
                message,
            } => Self::Status {
                generation_id: *generation,
                message: message.clone(),
            },
            SearchEvent::Done { generation } => Self::Done {
                generation_id: *generation,
            },
        }
    }
}

/// Parses one command line. Blank and malformed lines yield `None`.
pub fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(command) => Some(command),
        Err(error) => {
            log::debug!("protocol line dropped error={}", error);
            None
        }
    }
}

/// Encodes one event as a single JSON line (without the newline).
pub fn encode_event(event: &SearchEvent) -> Result<String> {
    serde_json::to_string(&EventRecord::from(event))
        .map_err(|error| FinderError::InvalidInput(error.to_string()))
}

/// Drives `session` from `input` until EOF or `shutdown`, writing events to
/// `output`.
///
/// At EOF the last query runs to completion; `shutdown` cancels it. Either
/// way this returns only after every remaining event has been written.
pub fn serve<R, W>(
    input: R,
    output: W,
    session: QuerySession,
    events: SessionEvents,
    defaults: QueryDefaults,
) -> Result<()>
where
    R: BufRead,
    W: Write + Send + 'static,
{
    let writer = thread::Builder::new()
        .name("docfind-events".into())
        .spawn(move || write_events(events, output))
        .map_err(FinderError::Io)?;

    let mut shutdown = false;
    for line in input.lines() {
        let line = line?;
        match parse_command(&line) {
            Some(Command::SetQuery(command)) => {
                let generation = command.generation_id;
                match command.into_query(defaults).and_then(|query| session.submit(query)) {
                    Ok(()) => {}
                    Err(error) => {
                        log::debug!("query dropped generation={} error={}", generation, error);
                    }
                }
            }
            Some(Command::Cancel) => session.cancel(),
            Some(Command::Shutdown) => {
                shutdown = true;
                break;
            }
            None => {}
        }
    }

    if shutdown {
        session.cancel();
    } else {
        session.wait();
    }
    // Dropping the session releases its sender; the writer drains whatever
    // is still queued and then stops.
    drop(session);
    writer
        .join()
        .map_err(|_| FinderError::InvalidInput("event writer panicked".into()))?
}

fn write_events<W: Write>(events: SessionEvents, mut output: W) -> Result<()> {
    for event in events.iter() {
        let line = encode_event(&event)?;
        writeln!(output, "{line}")?;
        output.flush()?;
    }
    Ok(())
}
