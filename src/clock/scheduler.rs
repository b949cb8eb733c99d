//! Sub-window and transmit-deadline scheduling within one slot.

use tracing::{debug, warn};

use crate::types::{SlotId, SlotInfo, SubWindowEvent};

/// Event released by [`SlotScheduler::fire_due`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduledEvent {
    /// Partial-decode checkpoint.
    SubWindow(SubWindowEvent),
    /// Sub-windows that fired too late and were dropped.
    Overrun {
        /// Slot the windows belonged to.
        slot_id: SlotId,
        /// Dropped window indices.
        skipped: Vec<usize>,
        /// How late the most recent skipped window was.
        late_ms: u64,
    },
    /// Last moment to hand a composite to the radio. Never skipped.
    TransmitDeadline(SlotInfo),
}

/// Time a mix started now may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixBudget {
    /// Before the deadline; the full-quality mix may run until it.
    UntilDeadline {
        /// Milliseconds left before the deadline.
        budget_ms: u64,
    },
    /// At or past the deadline; only a best-effort mix, bounded by the slot end.
    BestEffort {
        /// Milliseconds left in the slot.
        budget_ms: u64,
    },
}

impl MixBudget {
    /// Milliseconds available either way.
    pub fn budget_ms(&self) -> u64 {
        match self {
            MixBudget::UntilDeadline { budget_ms } | MixBudget::BestEffort { budget_ms } => *budget_ms,
        }
    }
}

/// Plans checkpoints for the current slot.
///
/// Late sub-windows are dropped instead of queued so a stalled process
/// cannot attribute decode work to the wrong slot.
#[derive(Debug, Clone)]
pub struct SlotScheduler {
    offsets_ms: Vec<u64>,
    tx_deadline_lead_ms: u64,
    overrun_tolerance_ms: u64,
    slot: Option<SlotInfo>,
    next_window: usize,
    deadline_fired: bool,
    overruns: u64,
}

impl SlotScheduler {
    /// Creates an idle scheduler.
    pub fn new(offsets_ms: Vec<u64>, tx_deadline_lead_ms: u64, overrun_tolerance_ms: u64) -> Self {
        Self {
            offsets_ms,
            tx_deadline_lead_ms,
            overrun_tolerance_ms,
            slot: None,
            next_window: 0,
            deadline_fired: true,
            overruns: 0,
        }
    }

    /// Plans events for `slot`.
    ///
    /// An unfired deadline of the previous slot is returned first so it is
    /// never lost across a boundary.
    pub fn arm(&mut self, slot: SlotInfo) -> Vec<ScheduledEvent> {
        let mut flushed = Vec::new();
        if let Some(prev) = self.slot {
            if !self.deadline_fired {
                warn!(slot_id = prev.slot_id, "transmit deadline fired at slot boundary");
                flushed.push(ScheduledEvent::TransmitDeadline(prev));
            }
        }
        self.slot = Some(slot);
        self.next_window = 0;
        self.deadline_fired = false;
        flushed
    }

    /// Slot currently armed.
    pub fn slot(&self) -> Option<SlotInfo> {
        self.slot
    }

    /// Absolute time of the transmit deadline for the armed slot.
    pub fn deadline_at(&self) -> Option<u64> {
        self.slot.map(|s| self.deadline_for(&s))
    }

    /// Budget for a mix started at `now_ms` in the armed slot.
    pub fn mix_budget(&self, now_ms: u64) -> MixBudget {
        match self.slot {
            Some(slot) if self.deadline_for(&slot) > now_ms => MixBudget::UntilDeadline {
                budget_ms: self.deadline_for(&slot) - now_ms,
            },
            Some(slot) => MixBudget::BestEffort {
                budget_ms: slot.end_ms.saturating_sub(now_ms),
            },
            None => MixBudget::BestEffort { budget_ms: 0 },
        }
    }

    /// Absolute time of the next pending event, if any.
    pub fn next_due_at(&self) -> Option<u64> {
        let slot = self.slot?;
        let window = self
            .offsets_ms
            .get(self.next_window)
            .map(|o| slot.start_ms + o);
        let deadline = (!self.deadline_fired).then(|| self.deadline_for(&slot));
        match (window, deadline) {
            (Some(w), Some(d)) => Some(w.min(d)),
            (w, d) => w.or(d),
        }
    }

    /// Total sub-windows dropped for lateness.
    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    /// Releases every event due at `now_ms`, in time order.
    pub fn fire_due(&mut self, now_ms: u64) -> Vec<ScheduledEvent> {
        let Some(slot) = self.slot else {
            return Vec::new();
        };
        let deadline = self.deadline_for(&slot);
        let mut out = Vec::new();
        let mut skipped = Vec::new();
        let mut late_ms = 0;
        let mut deadline_pending = !self.deadline_fired && now_ms >= deadline;

        while let Some(&offset) = self.offsets_ms.get(self.next_window) {
            let at = slot.start_ms + offset;
            if now_ms < at {
                break;
            }
            if deadline_pending && deadline <= at {
                out.push(ScheduledEvent::TransmitDeadline(slot));
                self.deadline_fired = true;
                deadline_pending = false;
            }
            let late = now_ms - at;
            if late > self.overrun_tolerance_ms {
                skipped.push(self.next_window);
                late_ms = late;
            } else {
                out.push(ScheduledEvent::SubWindow(SubWindowEvent {
                    slot,
                    window_index: self.next_window,
                    offset_ms: offset,
                }));
            }
            self.next_window += 1;
        }

        if !skipped.is_empty() {
            self.overruns += skipped.len() as u64;
            warn!(
                slot_id = slot.slot_id,
                skipped = skipped.len(),
                late_ms,
                "scheduler overrun; skipping missed sub-windows"
            );
            // Report the drop ahead of anything fired after it.
            out.insert(
                0,
                ScheduledEvent::Overrun {
                    slot_id: slot.slot_id,
                    skipped,
                    late_ms,
                },
            );
        }

        if deadline_pending {
            debug!(slot_id = slot.slot_id, late_ms = now_ms - deadline, "transmit deadline");
            out.push(ScheduledEvent::TransmitDeadline(slot));
            self.deadline_fired = true;
        }
        out
    }

    fn deadline_for(&self, slot: &SlotInfo) -> u64 {
        slot.end_ms.saturating_sub(self.tx_deadline_lead_ms).max(slot.start_ms)
    }
}
