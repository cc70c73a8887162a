//! Resource governor: memory watchdog and expensive-parse limiter.
//!
//! One `Governor` is shared by every session in the process. It owns the
//! permit pool that bounds concurrent pure-parser PDF work, and it spawns a
//! memory watchdog per active query.

pub mod memory;
pub mod permits;

use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

pub use memory::{MemoryProbe, MemoryWatchdog, ProcessMemoryProbe};
pub use permits::{Permit, PermitPool};

use crate::cancel::CancellationToken;
use crate::config::FinderConfig;
use crate::error::{FinderError, Result};

/// Grace period before a permit request is refused under memory pressure.
const PRESSURE_GRACE: Duration = Duration::from_millis(100);

/// Process-wide resource limits.
pub struct Governor {
    permits: PermitPool,
    probe: Arc<dyn MemoryProbe>,
    memory_ceiling: Option<u64>,
    parse_memory_limit: u64,
    watchdog_interval: Duration,
}

impl std::fmt::Debug for Governor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Governor")
            .field("permits", &self.permits)
            .field("memory_ceiling", &self.memory_ceiling)
            .field("parse_memory_limit", &self.parse_memory_limit)
            .field("watchdog_interval", &self.watchdog_interval)
            .finish()
    }
}

impl Governor {
    pub fn new(config: &FinderConfig) -> Self {
        Self::with_probe(config, Arc::new(ProcessMemoryProbe::new()))
    }

    pub fn with_probe(config: &FinderConfig, probe: Arc<dyn MemoryProbe>) -> Self {
        Self {
            permits: PermitPool::new(config.pdf.concurrent_limit),
            probe,
            memory_ceiling: config.memory_ceiling,
            parse_memory_limit: config.pdf.memory_limit_bytes,
            watchdog_interval: config.watchdog_interval,
        }
    }

    /// The process-wide governor, configured from the environment on first use.
    pub fn shared() -> Arc<Governor> {
        static SHARED: OnceLock<Arc<Governor>> = OnceLock::new();
        SHARED
            .get_or_init(|| Arc::new(Governor::new(&FinderConfig::from_env())))
            .clone()
    }

    pub fn permits(&self) -> &PermitPool {
        &self.permits
    }

    /// Starts the memory watchdog for one query, unless it is disabled.
    pub fn watch(&self, token: &CancellationToken) -> Option<MemoryWatchdog> {
        let ceiling = self.memory_ceiling?;
        Some(MemoryWatchdog::spawn(
            self.probe.clone(),
            ceiling,
            self.watchdog_interval,
            token.clone(),
        ))
    }

    /// Returns true if process memory is above the expensive-parse threshold.
    pub fn memory_elevated(&self) -> bool {
        self.parse_memory_limit > 0
            && self
                .probe
                .used_bytes()
                .is_some_and(|used| used > self.parse_memory_limit)
    }

    /// Acquires a permit for an expensive parse.
    ///
    /// Backs off briefly if memory is elevated and refuses with
    /// [`FinderError::MemoryPressure`] if it stays elevated.
    pub fn acquire_parse_permit(&self, token: &CancellationToken) -> Result<Permit> {
        if self.memory_elevated() {
            let started = Instant::now();
            while started.elapsed() < PRESSURE_GRACE {
                if token.cancelled() {
                    return Err(FinderError::Cancelled);
                }
                thread::sleep(Duration::from_millis(10));
            }
            if self.memory_elevated() {
                return Err(FinderError::MemoryPressure);
            }
        }
        self.permits.acquire(token).ok_or(FinderError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::memory::tests::FixedProbe;
    use super::*;
    use std::sync::atomic::Ordering;

    fn config(limit: u64, ceiling: Option<u64>) -> FinderConfig {
        let mut config = FinderConfig::default();
        config.pdf.memory_limit_bytes = limit;
        config.pdf.concurrent_limit = 1;
        config.memory_ceiling = ceiling;
        config.watchdog_interval = Duration::from_millis(10);
        config
    }

    #[test]
    fn permit_granted_when_memory_is_low() {
        let governor = Governor::with_probe(&config(1_000, None), Arc::new(FixedProbe::new(10)));
        let permit = governor.acquire_parse_permit(&CancellationToken::noop()).unwrap();
        assert_eq!(governor.permits().in_use(), 1);
        drop(permit);
        assert_eq!(governor.permits().in_use(), 0);
    }

    #[test]
    fn permit_refused_under_sustained_pressure() {
        let governor = Governor::with_probe(&config(1_000, None), Arc::new(FixedProbe::new(5_000)));
        let result = governor.acquire_parse_permit(&CancellationToken::noop());
        assert!(matches!(result, Err(FinderError::MemoryPressure)));
    }

    #[test]
    fn permit_granted_when_pressure_clears() {
        let probe = Arc::new(FixedProbe::new(5_000));
        let governor = Governor::with_probe(&config(1_000, None), probe.clone());
        let relief = {
            let probe = probe.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                probe.used.store(10, Ordering::SeqCst);
            })
        };
        let result = governor.acquire_parse_permit(&CancellationToken::noop());
        relief.join().unwrap();
        assert!(result.is_ok());
    }

    #[test]
    fn watchdog_disabled_without_ceiling() {
        let governor = Governor::with_probe(&config(0, None), Arc::new(FixedProbe::new(10)));
        assert!(governor.watch(&CancellationToken::noop()).is_none());
    }
}
