//! Process memory sampling and the per-query watchdog.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use crate::cancel::CancellationToken;

/// Source of process memory readings.
pub trait MemoryProbe: Send + Sync {
    /// Current memory in use by the process, in bytes.
    fn used_bytes(&self) -> Option<u64>;

    /// Gives reclaimable memory back before a hard cutoff. Default: no-op.
    fn reclaim(&self) {}
}

/// Reads the resident set size of the current process via `sysinfo`.
pub struct ProcessMemoryProbe {
    pid: Option<Pid>,
    system: Mutex<System>,
}

impl ProcessMemoryProbe {
    pub fn new() -> Self {
        let pid = sysinfo::get_current_pid()
            .map_err(|error| log::warn!("memory probe disabled: {error}"))
            .ok();
        Self {
            pid,
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for ProcessMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProcessMemoryProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessMemoryProbe")
            .field("pid", &self.pid)
            .finish()
    }
}

impl MemoryProbe for ProcessMemoryProbe {
    fn used_bytes(&self) -> Option<u64> {
        let pid = self.pid?;
        let mut system = self.system.lock();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );
        system.process(pid).map(|process| process.memory())
    }
}

/// Background sampler that aborts a query once memory exceeds a ceiling.
///
/// The sampler thread stops when the watchdog is dropped, when the token is
/// cancelled, or after it trips.
pub struct MemoryWatchdog {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MemoryWatchdog {
    pub fn spawn(
        probe: Arc<dyn MemoryProbe>,
        ceiling: u64,
        interval: Duration,
        token: CancellationToken,
    ) -> Self {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("docfind-watchdog".into())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    _ => return,
                }
                if token.cancelled() {
                    return;
                }
                let Some(used) = probe.used_bytes() else {
                    continue;
                };
                if used > ceiling {
                    log::warn!(
                        "memory hard limit generation={} used_mib={:.2} limit_mib={:.2} action=cancel",
                        token.generation(),
                        used as f64 / 1024.0 / 1024.0,
                        ceiling as f64 / 1024.0 / 1024.0,
                    );
                    probe.reclaim();
                    token.abort();
                    return;
                }
            })
            .map_err(|error| log::warn!("memory watchdog not started: {error}"))
            .ok();

        Self {
            stop: Some(stop_tx),
            handle,
        }
    }
}

impl Drop for MemoryWatchdog {
    fn drop(&mut self) {
        // Disconnecting the channel wakes the sampler immediately.
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
