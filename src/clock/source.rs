//! Wall-clock sources.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

/// Supplies wall-clock milliseconds since the Unix epoch.
pub trait ClockSource: Send + Sync {
    /// Current time in milliseconds.
    fn now_ms(&self) -> u64;
}

/// System clock with an optional correction offset (e.g. measured NTP skew).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock {
    offset_ms: i64,
}

impl SystemClock {
    /// Uncorrected system time.
    pub fn new() -> Self {
        Self::default()
    }

    /// System time shifted by `offset_ms`.
    pub fn with_offset(offset_ms: i64) -> Self {
        Self { offset_ms }
    }
}

impl ClockSource for SystemClock {
    fn now_ms(&self) -> u64 {
        let raw = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        raw.saturating_add_signed(self.offset_ms)
    }
}

/// Manually advanced clock for deterministic tests.
///
/// Clones share the same time, so a test can keep one handle while the
/// runtime owns another.
#[derive(Debug, Clone, Default)]
pub struct MockClock {
    now: Arc<AtomicU64>,
}

impl MockClock {
    /// Clock starting at `start_ms`.
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    /// Jumps to an absolute time, forward or backward.
    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    /// Moves time forward.
    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    /// Moves time backward, saturating at zero.
    pub fn rewind(&self, ms: u64) {
        let _ = self
            .now
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |t| Some(t.saturating_sub(ms)));
    }
}

impl ClockSource for MockClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

impl<C: ClockSource + ?Sized> ClockSource for Arc<C> {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
}
