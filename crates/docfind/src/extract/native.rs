//! OS text filters: external converters that turn a document into UTF-8 text.
//!
//! Each converter is looked up on `PATH` the first time its extension is
//! asked about; the result is remembered for the life of the process. The
//! converter's stdout is streamed as chunks, and the child is killed if the
//! consumer stops reading early.

use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::OnceLock;

use crate::error::{FinderError, Result};

use super::source::{ChunkedTextSource, Utf8Chunker, READ_CHUNK_BYTES};

/// A native text filter for some set of extensions.
pub trait TextFilter: Send + Sync {
    fn name(&self) -> &str;

    /// Returns true if this filter can convert files with `extension`
    /// (lowercase, with the leading dot).
    fn supports(&self, extension: &str) -> bool;

    fn open(&self, path: &Path) -> Result<Box<dyn ChunkedTextSource>>;
}

/// Filter that supports nothing; used when native filters are disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTextFilter;

impl TextFilter for NoTextFilter {
    fn name(&self) -> &str {
        "none"
    }

    fn supports(&self, _extension: &str) -> bool {
        false
    }

    fn open(&self, path: &Path) -> Result<Box<dyn ChunkedTextSource>> {
        Err(FinderError::Unsupported(format!(
            "no text filter for {}",
            path.display()
        )))
    }
}

/// Placeholder in argument lists replaced by the document path.
const PATH_ARG: &str = "{path}";

#[derive(Debug)]
struct FilterTool {
    extension: &'static str,
    program: &'static str,
    args: &'static [&'static str],
    resolved: OnceLock<Option<PathBuf>>,
}

impl FilterTool {
    const fn new(extension: &'static str, program: &'static str, args: &'static [&'static str]) -> Self {
        Self {
            extension,
            program,
            args,
            resolved: OnceLock::new(),
        }
    }

    fn executable(&self) -> Option<&PathBuf> {
        self.resolved
            .get_or_init(|| match which::which(self.program) {
                Ok(path) => {
                    log::info!("text filter available ext={} tool={}", self.extension, path.display());
                    Some(path)
                }
                Err(_) => {
                    log::info!("text filter missing ext={} tool={}", self.extension, self.program);
                    None
                }
            })
            .as_ref()
    }

    fn arguments(&self, path: &Path) -> Vec<OsString> {
        self.args
            .iter()
            .map(|arg| {
                if *arg == PATH_ARG {
                    path.as_os_str().to_os_string()
                } else {
                    OsString::from(*arg)
                }
            })
            .collect()
    }
}

/// Text filter that shells out to well-known converters.
#[derive(Debug)]
pub struct CommandTextFilter {
    tools: Vec<FilterTool>,
}

impl CommandTextFilter {
    /// The standard converter set: poppler's `pdftotext` for PDF, and the
    /// catdoc family for legacy Office formats.
    pub fn standard() -> Self {
        Self {
            tools: vec![
                FilterTool::new(".pdf", "pdftotext", &["-q", "-enc", "UTF-8", PATH_ARG, "-"]),
                FilterTool::new(".doc", "antiword", &[PATH_ARG]),
                FilterTool::new(".xls", "xls2csv", &[PATH_ARG]),
                FilterTool::new(".ppt", "catppt", &[PATH_ARG]),
            ],
        }
    }

    fn tool_for(&self, extension: &str) -> Option<&FilterTool> {
        self.tools.iter().find(|tool| tool.extension == extension)
    }
}

impl TextFilter for CommandTextFilter {
    fn name(&self) -> &str {
        "command"
    }

    fn supports(&self, extension: &str) -> bool {
        self.tool_for(extension)
            .is_some_and(|tool| tool.executable().is_some())
    }

    fn open(&self, path: &Path) -> Result<Box<dyn ChunkedTextSource>> {
        let extension = crate::types::extension_of(path);
        let tool = self
            .tool_for(&extension)
            .ok_or_else(|| FinderError::Unsupported(extension.clone()))?;
        let program = tool
            .executable()
            .ok_or_else(|| FinderError::TextFilter(format!("{} not installed", tool.program)))?;

        let mut command = Command::new(program);
        command.args(tool.arguments(path));
        let source = ChildTextSource::spawn(command, tool.program)?;
        Ok(Box::new(source))
    }
}

/// Streams a child process's stdout as text chunks.
pub struct ChildTextSource {
    label: &'static str,
    child: Child,
    stdout: Option<ChildStdout>,
    chunker: Utf8Chunker,
    buf: Vec<u8>,
    primed: Option<String>,
    produced: bool,
}

impl ChildTextSource {
    /// Spawns `command` and reads its first chunk, so that a converter that
    /// fails immediately is reported here rather than mid-search.
    pub fn spawn(mut command: Command, label: &'static str) -> Result<Self> {
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|error| FinderError::TextFilter(format!("{label}: {error}")))?;
        let stdout = child.stdout.take();
        let mut source = Self {
            label,
            child,
            stdout,
            chunker: Utf8Chunker::new(),
            buf: vec![0u8; READ_CHUNK_BYTES],
            primed: None,
            produced: false,
        };
        source.primed = source.read_chunk()?;
        Ok(source)
    }

    fn read_chunk(&mut self) -> Result<Option<String>> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(None);
        };
        let read = stdout.read(&mut self.buf)?;
        if read > 0 {
            self.produced = true;
            return Ok(Some(self.chunker.push(&self.buf[..read])));
        }

        self.stdout = None;
        let status = self.child.wait()?;
        if !status.success() && !self.produced {
            return Err(FinderError::TextFilter(format!("{} exited with {}", self.label, status)));
        }
        Ok(self.chunker.finish())
    }
}

impl ChunkedTextSource for ChildTextSource {
    fn next_chunk(&mut self) -> Result<Option<String>> {
        if let Some(chunk) = self.primed.take() {
            return Ok(Some(chunk));
        }
        self.read_chunk()
    }
}

impl Drop for ChildTextSource {
    fn drop(&mut self) {
        if self.stdout.take().is_some() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
