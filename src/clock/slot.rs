//! Slot boundary tracking on top of a [`ClockSource`].

use tracing::{debug, warn};

use crate::{
    error::ConfigError,
    types::{CycleNumber, ModeDescriptor, SlotInfo},
};

use super::source::ClockSource;

/// Result of one clock poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockTick {
    /// A new slot began. Emitted once per boundary.
    SlotStart {
        /// The slot now current.
        slot: SlotInfo,
        /// The slot that just ended, if one was observed.
        previous: Option<SlotInfo>,
    },
    /// Time moved backward beyond tolerance and the slot was recomputed.
    Anomaly {
        /// Signed size of the jump in milliseconds (negative = backward).
        jump_ms: i64,
        /// Slot after resynchronization.
        resynced: SlotInfo,
    },
}

/// Derives slots from a clock and detects boundary crossings.
pub struct SlotClock<C: ClockSource> {
    clock: C,
    mode: ModeDescriptor,
    drift_tolerance_ms: u64,
    current: Option<SlotInfo>,
    last_now: Option<u64>,
    highest_announced: Option<CycleNumber>,
}

impl<C: ClockSource> SlotClock<C> {
    /// Creates a clock for `mode`. Nothing is announced until the first poll.
    pub fn new(clock: C, mode: ModeDescriptor, drift_tolerance_ms: u64) -> Result<Self, ConfigError> {
        validate_mode(&mode)?;
        Ok(Self {
            clock,
            mode,
            drift_tolerance_ms,
            current: None,
            last_now: None,
            highest_announced: None,
        })
    }

    /// Slot containing `now_ms` under `mode`. See [`slot_at`].
    pub fn current_slot(mode: &ModeDescriptor, now_ms: u64) -> SlotInfo {
        slot_at(mode, now_ms)
    }

    /// Mode this clock slices time with.
    pub fn mode(&self) -> &ModeDescriptor {
        &self.mode
    }

    /// Current wall-clock time from the underlying source.
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Last slot observed by [`SlotClock::poll`].
    pub fn slot(&self) -> Option<SlotInfo> {
        self.current
    }

    /// Samples the clock and reports a boundary crossing or anomaly.
    pub fn poll(&mut self) -> Option<ClockTick> {
        let now = self.clock.now_ms();
        let prev_now = self.last_now.replace(now);

        if let Some(prev_now) = prev_now {
            if now < prev_now {
                let back = prev_now - now;
                if back <= self.drift_tolerance_ms {
                    // Jitter inside tolerance: keep the later reading.
                    self.last_now = Some(prev_now);
                    return None;
                }
                let resynced = slot_at(&self.mode, now);
                warn!(
                    jump_ms = -(back as i64),
                    resynced_slot = resynced.slot_id,
                    "clock jumped backward; resynchronizing slot"
                );
                self.current = Some(resynced);
                return Some(ClockTick::Anomaly {
                    jump_ms: -(back as i64),
                    resynced,
                });
            }
        }

        let slot = slot_at(&self.mode, now);
        let previous = self.current;
        if previous.is_some_and(|p| p.slot_id == slot.slot_id) {
            return None;
        }
        self.current = Some(slot);

        if self
            .highest_announced
            .is_some_and(|high| slot.cycle_number <= high)
        {
            debug!(
                slot_id = slot.slot_id,
                "suppressing slot start already announced before resync"
            );
            return None;
        }

        if let Some(p) = previous {
            let skipped = slot.cycle_number.saturating_sub(p.cycle_number + 1);
            if skipped > 0 {
                warn!(skipped, slot_id = slot.slot_id, "clock skipped whole slots");
            }
        }
        self.highest_announced = Some(slot.cycle_number);
        Some(ClockTick::SlotStart { slot, previous })
    }
}

/// Slot containing `now_ms`: `cycle_number = now_ms / slot_ms`, with the
/// start aligned to an exact multiple of `slot_ms` since the epoch.
pub fn slot_at(mode: &ModeDescriptor, now_ms: u64) -> SlotInfo {
    let cycle_number = now_ms / mode.slot_ms;
    let start_ms = cycle_number * mode.slot_ms;
    SlotInfo {
        slot_id: cycle_number,
        start_ms,
        end_ms: start_ms + mode.slot_ms,
        cycle_number,
        is_even: cycle_number % 2 == 0,
    }
}

/// Checks that a mode describes a usable slot layout.
pub fn validate_mode(mode: &ModeDescriptor) -> Result<(), ConfigError> {
    if mode.slot_ms == 0 {
        return Err(ConfigError::Invalid {
            field: "mode.slot_ms",
            reason: "must be positive".to_string(),
        });
    }
    let ascending = mode.sub_window_offsets_ms.windows(2).all(|w| w[0] < w[1]);
    let inside = mode.sub_window_offsets_ms.iter().all(|&o| o < mode.slot_ms);
    if !ascending || !inside {
        return Err(ConfigError::Invalid {
            field: "mode.sub_window_offsets_ms",
            reason: "offsets must be ascending and inside the slot".to_string(),
        });
    }
    if mode.name.is_empty() {
        return Err(ConfigError::Invalid {
            field: "mode.name",
            reason: "must not be empty".to_string(),
        });
    }
    Ok(())
}
