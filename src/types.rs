//! Shared primitive IDs, mode descriptors, and slot value types.

use serde::{Deserialize, Serialize};

/// Operator identifier.
pub type OperatorId = u32;
/// Slot identifier; equal to the slot's cycle number.
pub type SlotId = u64;
/// Cycle number counted from the Unix epoch.
pub type CycleNumber = u64;
/// Encoder request identifier used to detect duplicate deliveries.
pub type RequestId = u64;

/// How successive slots are assigned to transmit turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CycleType {
    /// Alternating even/odd slots.
    EvenOdd,
    /// Every slot is the same cycle.
    Continuous,
}

/// Slot timing of a digital mode. Immutable per mode selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeDescriptor {
    /// Display name, e.g. `FT8`.
    pub name: String,
    /// Slot length in milliseconds.
    pub slot_ms: u64,
    /// Cycle parity scheme.
    pub cycle_type: CycleType,
    /// Partial-decode checkpoints relative to slot start, ascending.
    pub sub_window_offsets_ms: Vec<u64>,
}

impl ModeDescriptor {
    /// FT8: 15 s slots, even/odd.
    pub fn ft8() -> Self {
        Self {
            name: "FT8".to_string(),
            slot_ms: 15_000,
            cycle_type: CycleType::EvenOdd,
            sub_window_offsets_ms: vec![11_800, 12_800, 13_800],
        }
    }

    /// FT4: 7.5 s slots, even/odd.
    pub fn ft4() -> Self {
        Self {
            name: "FT4".to_string(),
            slot_ms: 7_500,
            cycle_type: CycleType::EvenOdd,
            sub_window_offsets_ms: vec![5_300, 6_300],
        }
    }

    /// Index used for `transmit_cycles` membership.
    ///
    /// Under [`CycleType::EvenOdd`] this is `0` for even and `1` for odd
    /// cycles. Under [`CycleType::Continuous`] every cycle has index `0`.
    pub fn cycle_index(&self, cycle_number: CycleNumber) -> u64 {
        match self.cycle_type {
            CycleType::EvenOdd => cycle_number % 2,
            CycleType::Continuous => 0,
        }
    }
}

/// Boundaries of one slot. Superseded, never mutated, by the next slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotInfo {
    /// Slot identifier.
    pub slot_id: SlotId,
    /// Epoch-aligned start in milliseconds.
    pub start_ms: u64,
    /// Exclusive end in milliseconds.
    pub end_ms: u64,
    /// Cycle number since epoch.
    pub cycle_number: CycleNumber,
    /// Parity; only meaningful under [`CycleType::EvenOdd`].
    pub is_even: bool,
}

impl SlotInfo {
    /// Slot length in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        self.end_ms - self.start_ms
    }

    /// Milliseconds elapsed since slot start, saturating at both ends.
    pub fn elapsed_at(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.start_ms).min(self.duration_ms())
    }

    /// True when `now_ms` falls inside this slot.
    pub fn contains(&self, now_ms: u64) -> bool {
        now_ms >= self.start_ms && now_ms < self.end_ms
    }
}

/// Partial-decode checkpoint fired inside a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubWindowEvent {
    /// Slot the window belongs to.
    pub slot: SlotInfo,
    /// Position in `sub_window_offsets_ms`.
    pub window_index: usize,
    /// Offset from slot start.
    pub offset_ms: u64,
}

/// Frame produced by the external decoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedFrame {
    /// Decoded message text.
    pub message: String,
    /// Signal-to-noise ratio in dB.
    pub snr: i32,
    /// Time offset in seconds.
    pub dt_seconds: f32,
    /// Audio frequency in Hz.
    pub freq_hz: f32,
    /// Decode timestamp in milliseconds since epoch.
    pub timestamp_ms: u64,
}
