//! Environment-driven configuration.
//!
//! All knobs are read once, when a [`FinderConfig`] is built. Values that are
//! missing or fail to parse fall back to their defaults; callers never see a
//! configuration error.

use std::thread::available_parallelism;
use std::time::Duration;

const MIB: u64 = 1024 * 1024;

/// Upper bound accepted for any megabyte-valued knob (16 GiB).
const MAX_MEGABYTES: u64 = 16 * 1024;

pub const ENV_WORKERS: &str = "DOCFIND_WORKERS";
pub const ENV_PDF_MAX_FILE_BYTES: &str = "DOCFIND_PDF_MAX_FILE_BYTES";
pub const ENV_PDF_MAX_PAGES: &str = "DOCFIND_PDF_MAX_PAGES";
pub const ENV_PDF_PAGE_WORKERS: &str = "DOCFIND_PDF_PAGE_WORKERS";
pub const ENV_PDF_CONCURRENT_LIMIT: &str = "DOCFIND_PDF_CONCURRENT_LIMIT";
pub const ENV_PDF_MEMORY_LIMIT_MB: &str = "DOCFIND_PDF_MEMORY_LIMIT_MB";
pub const ENV_MAX_ALLOC_MB: &str = "DOCFIND_MAX_ALLOC_MB";
pub const ENV_PDF_FALLBACK: &str = "DOCFIND_PDF_FALLBACK";
pub const ENV_NATIVE_FILTER: &str = "DOCFIND_NATIVE_FILTER";
pub const ENV_CACHE_MAX_TEXT_BYTES: &str = "DOCFIND_CACHE_MAX_TEXT_BYTES";

/// Explicit override for the pure-parser PDF fallback.
///
/// `Auto` enables the fallback only when no native PDF text filter is
/// available; `On` and `Off` ignore the probe entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallbackOverride {
    #[default]
    Auto,
    On,
    Off,
}

impl FallbackOverride {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Some(Self::Auto),
            "1" | "true" | "yes" | "y" | "on" => Some(Self::On),
            "0" | "false" | "no" | "n" | "off" => Some(Self::Off),
            _ => None,
        }
    }

    /// Resolves the override against the native-filter probe result.
    pub fn fallback_enabled(self, native_pdf_available: bool) -> bool {
        match self {
            Self::On => true,
            Self::Off => false,
            Self::Auto => !native_pdf_available,
        }
    }
}

/// Limits applied to the in-process PDF parser.
#[derive(Debug, Clone)]
pub struct PdfLimits {
    pub max_file_bytes: u64,
    pub max_pages: usize,
    pub page_workers: usize,
    pub concurrent_limit: usize,
    /// Memory level above which acquiring a parse permit backs off.
    pub memory_limit_bytes: u64,
}

impl Default for PdfLimits {
    fn default() -> Self {
        Self {
            max_file_bytes: 20 * MIB,
            max_pages: 100,
            page_workers: 1,
            concurrent_limit: 2,
            memory_limit_bytes: 2048 * MIB,
        }
    }
}

/// Process-wide search configuration.
#[derive(Debug, Clone)]
pub struct FinderConfig {
    /// Matcher worker threads per search run.
    pub workers: usize,
    /// Runes of context on each side of a snippet match.
    pub context_len: usize,
    /// Snippets collected per matched term.
    pub max_snippets: usize,
    pub pdf: PdfLimits,
    pub pdf_fallback: FallbackOverride,
    /// Whether the OS text filter may be probed and used at all.
    pub native_filter: bool,
    /// Watchdog ceiling; `None` disables the watchdog.
    pub memory_ceiling: Option<u64>,
    pub watchdog_interval: Duration,
    /// Upper bound for decoded text held in memory (UTF-16 files, cache text).
    pub cache_max_text_bytes: u64,
    /// Read cap for whole-buffer decodes of plain text files.
    pub text_max_bytes: u64,
    /// Per-entry decompressed size cap for container formats.
    pub entry_max_bytes: u64,
}

impl Default for FinderConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            context_len: 30,
            max_snippets: 3,
            pdf: PdfLimits::default(),
            pdf_fallback: FallbackOverride::Auto,
            native_filter: true,
            memory_ceiling: Some(default_memory_ceiling()),
            watchdog_interval: Duration::from_secs(2),
            cache_max_text_bytes: 2 * MIB,
            text_max_bytes: 20 * MIB,
            entry_max_bytes: 20 * MIB,
        }
    }
}

impl FinderConfig {
    /// Reads the configuration from process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(workers) = get(ENV_WORKERS).and_then(|v| parse_positive(&v)) {
            config.workers = workers as usize;
        }
        if let Some(bytes) = get(ENV_PDF_MAX_FILE_BYTES).and_then(|v| parse_positive(&v)) {
            config.pdf.max_file_bytes = bytes;
        }
        if let Some(pages) = get(ENV_PDF_MAX_PAGES).and_then(|v| parse_positive(&v)) {
            config.pdf.max_pages = pages as usize;
        }
        if let Some(workers) = get(ENV_PDF_PAGE_WORKERS).and_then(|v| parse_positive(&v)) {
            config.pdf.page_workers = workers as usize;
        }
        if let Some(limit) = get(ENV_PDF_CONCURRENT_LIMIT).and_then(|v| parse_positive(&v)) {
            config.pdf.concurrent_limit = limit.min(10) as usize;
        }
        if let Some(mb) = get(ENV_PDF_MEMORY_LIMIT_MB).and_then(|v| parse_positive(&v)) {
            config.pdf.memory_limit_bytes = mb.min(MAX_MEGABYTES) * MIB;
        }
        if let Some(mb) = get(ENV_MAX_ALLOC_MB).and_then(|v| v.parse::<u64>().ok()) {
            config.memory_ceiling = match mb {
                0 => None,
                mb => Some(mb.min(MAX_MEGABYTES) * MIB),
            };
        }
        if let Some(mode) = get(ENV_PDF_FALLBACK).and_then(|v| FallbackOverride::parse(&v)) {
            config.pdf_fallback = mode;
        }
        if let Some(flag) = get(ENV_NATIVE_FILTER).and_then(|v| parse_flag(&v)) {
            config.native_filter = flag;
        }
        if let Some(bytes) = get(ENV_CACHE_MAX_TEXT_BYTES).and_then(|v| parse_positive(&v)) {
            config.cache_max_text_bytes = bytes;
        }

        config
    }

    /// Overrides the worker count when `workers` is non-zero.
    pub fn with_workers(mut self, workers: usize) -> Self {
        if workers > 0 {
            self.workers = workers;
        }
        self
    }
}

/// Default worker count: one per core, at most two on 32-bit targets.
pub fn default_workers() -> usize {
    let cores = available_parallelism().map(|n| n.get()).unwrap_or(4);
    if cfg!(target_pointer_width = "32") {
        cores.min(2)
    } else {
        cores
    }
}

/// Default watchdog ceiling, lower on 32-bit address spaces.
pub fn default_memory_ceiling() -> u64 {
    if cfg!(target_pointer_width = "32") {
        1200 * MIB
    } else {
        4096 * MIB
    }
}

fn parse_positive(value: &str) -> Option<u64> {
    value.parse::<u64>().ok().filter(|n| *n > 0)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}
