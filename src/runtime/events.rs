//! Runtime event stream payloads.

use std::sync::Arc;

use crate::{
    audio::buffer::MixedAudio,
    error::MixError,
    qso::{arbiter::Collision, machine::QsoEvent},
    types::{DecodedFrame, SlotId, SlotInfo, SubWindowEvent},
};

/// Events emitted from the single-writer runtime loop.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreEvent {
    /// A new slot began.
    SlotStart {
        /// The slot now current.
        slot: SlotInfo,
        /// The slot that just ended.
        previous: Option<SlotInfo>,
        /// Last composite produced during the previous slot.
        previous_mix: Option<Arc<MixedAudio>>,
        /// Frames decoded during the previous slot.
        previous_decodes: Arc<[DecodedFrame]>,
    },
    /// Partial-decode checkpoint.
    SubWindow(SubWindowEvent),
    /// Last moment to key the radio with a composite.
    TransmitDeadline {
        /// Slot whose deadline fired.
        slot: SlotInfo,
    },
    /// The clock jumped backward and was resynchronized.
    ClockAnomaly {
        /// Signed jump in milliseconds.
        jump_ms: i64,
        /// Slot after resync.
        resynced: SlotInfo,
    },
    /// Sub-windows were skipped because the loop fell behind.
    SchedulerOverrun {
        /// Affected slot.
        slot_id: SlotId,
        /// Skipped window indices.
        skipped: Vec<usize>,
        /// Lateness of the last skipped window.
        late_ms: u64,
    },
    /// QSO automation event.
    Qso(QsoEvent),
    /// Two operators claimed the same cycle at overlapping frequencies.
    CycleCollision(Collision),
    /// A composite is ready for playback.
    MixedAudioReady {
        /// Slot the audio belongs to.
        slot_start_ms: u64,
        /// The composite.
        audio: Arc<MixedAudio>,
    },
    /// A mix pass found nothing to play.
    MixUnderrun {
        /// Slot the pass belonged to.
        slot_start_ms: u64,
    },
    /// Mixing was requested after its target playback time.
    MixOverrun {
        /// Slot the pass belonged to.
        slot_start_ms: u64,
    },
    /// A mix pass failed; the audio cache was cleared.
    MixFailed {
        /// Slot the pass belonged to.
        slot_start_ms: u64,
        /// Cause.
        error: MixError,
    },
}
