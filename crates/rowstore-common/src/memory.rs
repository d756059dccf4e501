//! Memory availability oracle consulted before every buffer grow.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use sysinfo::System;

/// Answers whether the process may allocate more memory.
pub trait MemoryOracle: Send + Sync + fmt::Debug {
    /// Bytes currently available to the process.
    fn available(&self) -> u64;

    /// Returns true if an allocation of `bytes` should be attempted.
    fn request(&self, bytes: u64) -> bool {
        self.available() >= bytes
    }
}

/// Oracle backed by the operating system's memory statistics.
///
/// Statistics are re-read at most once per refresh interval; in between,
/// the last reading is reduced by the bytes granted since then.
pub struct SystemMemory {
    inner: Mutex<SystemInner>,
    refresh_interval: Duration,
}

struct SystemInner {
    sys: System,
    last_refresh: Instant,
    available: u64,
}

impl SystemMemory {
    /// Creates an oracle that refreshes every 100 ms.
    pub fn new() -> Self {
        Self::with_refresh_interval(Duration::from_millis(100))
    }

    pub fn with_refresh_interval(refresh_interval: Duration) -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        let available = sys.available_memory();
        Self {
            inner: Mutex::new(SystemInner {
                sys,
                last_refresh: Instant::now(),
                available,
            }),
            refresh_interval,
        }
    }
}

impl Default for SystemMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SystemMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemMemory")
            .field("available", &self.inner.lock().available)
            .field("refresh_interval", &self.refresh_interval)
            .finish()
    }
}

impl MemoryOracle for SystemMemory {
    fn available(&self) -> u64 {
        let mut inner = self.inner.lock();
        if inner.last_refresh.elapsed() >= self.refresh_interval {
            inner.sys.refresh_memory();
            inner.available = inner.sys.available_memory();
            inner.last_refresh = Instant::now();
        }
        inner.available
    }

    fn request(&self, bytes: u64) -> bool {
        let available = self.available();
        if available < bytes {
            return false;
        }
        let mut inner = self.inner.lock();
        inner.available = inner.available.saturating_sub(bytes);
        true
    }
}

/// Oracle with an explicit budget, for tests and embedders that manage
/// memory themselves. Grants do not consume the budget.
#[derive(Debug)]
pub struct FixedMemory {
    available: AtomicU64,
}

impl FixedMemory {
    pub fn new(available: u64) -> Self {
        Self {
            available: AtomicU64::new(available),
        }
    }

    /// An oracle that never refuses.
    pub fn unlimited() -> Self {
        Self::new(u64::MAX)
    }

    pub fn set_available(&self, available: u64) {
        self.available.store(available, Ordering::Relaxed);
    }
}

impl MemoryOracle for FixedMemory {
    fn available(&self) -> u64 {
        self.available.load(Ordering::Relaxed)
    }
}

/// Returns the process-wide system memory oracle.
pub fn system() -> Arc<dyn MemoryOracle> {
    static SYSTEM: OnceLock<Arc<SystemMemory>> = OnceLock::new();
    SYSTEM.get_or_init(|| Arc::new(SystemMemory::new())).clone()
}
