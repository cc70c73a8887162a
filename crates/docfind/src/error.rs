use std::fs;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum FinderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("File too large: {0}")]
    FileTooLarge(PathBuf),

    #[error("Too many pages in {path}: {pages} > {limit}")]
    TooManyPages {
        path: PathBuf,
        pages: usize,
        limit: usize,
    },

    #[error("Memory usage too high, expensive parse refused")]
    MemoryPressure,

    #[error("Unsupported format: {0}")]
    Unsupported(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("PDF error: {0}")]
    Pdf(String),

    #[error("Text filter error: {0}")]
    TextFilter(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl FinderError {
    /// Returns true when the error only signals cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<zip::result::ZipError> for FinderError {
    fn from(error: zip::result::ZipError) -> Self {
        Self::Archive(error.to_string())
    }
}

impl From<lopdf::Error> for FinderError {
    fn from(error: lopdf::Error) -> Self {
        Self::Pdf(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FinderError>;

/// Resolves `path` to its canonical form, or returns it unchanged if that fails.
pub fn canonicalize_existing_path(path: PathBuf) -> PathBuf {
    fs::canonicalize(&path).unwrap_or(path)
}
