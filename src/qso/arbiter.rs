//! Transmit-cycle collision detection and arbitration.
//!
//! Operators sharing one radio may transmit in the same cycle as long as
//! their audio frequencies are far enough apart for the composite to carry
//! both signals. Two operators claiming the same cycle index at overlapping
//! frequencies would double-book the channel.

use hashbrown::HashSet;
use tracing::warn;

use crate::{
    error::ConfigError,
    types::{ModeDescriptor, OperatorId, SlotInfo},
};

use super::context::OperatorContext;

/// One operator's claim on the current cycle.
#[derive(Debug, Clone, Copy)]
pub struct CycleClaim<'a> {
    /// Claiming operator.
    pub operator_id: OperatorId,
    /// Its configuration.
    pub context: &'a OperatorContext,
    /// A contact is under way (phase other than idle or calling CQ).
    pub in_progress: bool,
}

/// A collision resolved for one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collision {
    /// Contested cycle index.
    pub cycle_index: u64,
    /// Operator that keeps the cycle.
    pub granted: OperatorId,
    /// Operator confined to receive for this cycle.
    pub denied: OperatorId,
}

/// Which operators may transmit in a cycle.
#[derive(Debug, Clone, Default)]
pub struct Grant {
    allowed: HashSet<OperatorId>,
    /// Collisions found while granting.
    pub collisions: Vec<Collision>,
}

impl Grant {
    /// True when `operator_id` may enter a transmitting phase.
    pub fn may_transmit(&self, operator_id: OperatorId) -> bool {
        self.allowed.contains(&operator_id)
    }
}

/// Shared cycle index of two contexts whose frequencies overlap, if any.
pub fn collision_between(
    a: &OperatorContext,
    b: &OperatorContext,
    min_separation_hz: u32,
) -> Option<u64> {
    if a.frequency_hz.abs_diff(b.frequency_hz) >= min_separation_hz {
        return None;
    }
    a.transmit_cycles
        .intersection(&b.transmit_cycles)
        .next()
        .copied()
}

/// Rejects any pair of operators that would collide.
pub fn validate_operators<'a>(
    operators: impl IntoIterator<Item = (OperatorId, &'a OperatorContext)>,
    min_separation_hz: u32,
) -> Result<(), ConfigError> {
    let all: Vec<(OperatorId, &OperatorContext)> = operators.into_iter().collect();
    for (i, (first, a)) in all.iter().enumerate() {
        for (second, b) in &all[i + 1..] {
            if let Some(cycle_index) = collision_between(a, b, min_separation_hz) {
                return Err(ConfigError::CycleCollision {
                    cycle_index,
                    first: *first,
                    second: *second,
                });
            }
        }
    }
    Ok(())
}

/// Decides who may transmit in `slot`.
///
/// Operators with a contact in progress are served first, then lower ids.
/// A claimant overlapping an already granted operator is denied.
pub fn arbitrate(
    mode: &ModeDescriptor,
    slot: &SlotInfo,
    claims: &[CycleClaim<'_>],
    min_separation_hz: u32,
) -> Grant {
    let cycle_index = mode.cycle_index(slot.cycle_number);
    let mut candidates: Vec<&CycleClaim<'_>> = claims
        .iter()
        .filter(|c| c.context.may_transmit_in(mode, slot))
        .collect();
    candidates.sort_by_key(|c| (!c.in_progress, c.operator_id));

    let mut grant = Grant::default();
    let mut granted: Vec<&CycleClaim<'_>> = Vec::new();
    for claim in candidates {
        let blocker = granted.iter().find(|g| {
            g.context.frequency_hz.abs_diff(claim.context.frequency_hz) < min_separation_hz
        });
        match blocker {
            Some(winner) => {
                warn!(
                    cycle_index,
                    granted = winner.operator_id,
                    denied = claim.operator_id,
                    "transmit cycle collision"
                );
                grant.collisions.push(Collision {
                    cycle_index,
                    granted: winner.operator_id,
                    denied: claim.operator_id,
                });
            }
            None => {
                grant.allowed.insert(claim.operator_id);
                granted.push(claim);
            }
        }
    }
    grant
}
