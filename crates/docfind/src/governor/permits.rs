//! Counting permit pool for expensive parses.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::cancel::CancellationToken;

/// How long a waiter sleeps before re-checking its cancellation token.
const WAIT_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug)]
struct PoolState {
    available: Mutex<usize>,
    freed: Condvar,
    capacity: usize,
}

/// A fixed-size pool of permits, safe for concurrent acquire and release.
#[derive(Debug, Clone)]
pub struct PermitPool {
    state: Arc<PoolState>,
}

impl PermitPool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Arc::new(PoolState {
                available: Mutex::new(capacity),
                freed: Condvar::new(),
                capacity,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.state.capacity
    }

    /// Permits currently held.
    pub fn in_use(&self) -> usize {
        self.state.capacity - *self.state.available.lock()
    }

    /// Blocks until a permit is free. Returns `None` if the token is
    /// cancelled while waiting.
    pub fn acquire(&self, token: &CancellationToken) -> Option<Permit> {
        let mut available = self.state.available.lock();
        loop {
            token.is_cancelled()?;
            if *available > 0 {
                *available -= 1;
                return Some(Permit {
                    state: self.state.clone(),
                });
            }
            self.state.freed.wait_for(&mut available, WAIT_SLICE);
        }
    }

    /// Takes a permit only if one is free right now.
    pub fn try_acquire(&self) -> Option<Permit> {
        let mut available = self.state.available.lock();
        if *available == 0 {
            return None;
        }
        *available -= 1;
        Some(Permit {
            state: self.state.clone(),
        })
    }
}

/// A held permit; released on drop.
#[derive(Debug)]
pub struct Permit {
    state: Arc<PoolState>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        *self.state.available.lock() += 1;
        self.state.freed.notify_one();
    }
}
