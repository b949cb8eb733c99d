//! Per-operator station configuration.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::types::{ModeDescriptor, SlotInfo};

/// Station identity, target, and transmit-cycle assignment of one operator.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OperatorContext {
    /// Own callsign.
    pub my_call: String,
    /// Own four-character grid.
    pub my_grid: String,
    /// Station to work, if any.
    pub target_call: Option<String>,
    /// Target's grid, if known.
    pub target_grid: Option<String>,
    /// Audio offset frequency in Hz.
    pub frequency_hz: u32,
    /// Cycle indices (see [`ModeDescriptor::cycle_index`]) this operator may transmit in.
    pub transmit_cycles: BTreeSet<u64>,
}

impl OperatorContext {
    /// Context transmitting on the given cycle indices.
    pub fn new(my_call: &str, my_grid: &str, frequency_hz: u32, transmit_cycles: &[u64]) -> Self {
        Self {
            my_call: my_call.to_ascii_uppercase(),
            my_grid: my_grid.to_ascii_uppercase(),
            target_call: None,
            target_grid: None,
            frequency_hz,
            transmit_cycles: transmit_cycles.iter().copied().collect(),
        }
    }

    /// True when this operator's cycle set contains `slot`'s cycle index.
    pub fn may_transmit_in(&self, mode: &ModeDescriptor, slot: &SlotInfo) -> bool {
        self.transmit_cycles
            .contains(&mode.cycle_index(slot.cycle_number))
    }
}
