//! Per-operator and composite audio buffers.

use std::sync::Arc;

use crate::types::{OperatorId, RequestId};

/// Encoded audio of one operator for one slot.
///
/// Samples are shared so the mixer can hand a snapshot of its cache to a
/// worker thread without copying.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorSlotAudio {
    /// Owning operator.
    pub operator_id: OperatorId,
    /// Mono PCM samples in `[-1.0, 1.0]`.
    pub audio_data: Arc<[f32]>,
    /// Native sample rate in Hz.
    pub sample_rate: u32,
    /// Length in seconds.
    pub duration_sec: f64,
    /// When the encoder finished, in epoch milliseconds.
    pub encoded_at_ms: u64,
    /// Start of the slot the audio was encoded for.
    pub slot_start_ms: u64,
    /// Encoder request id used to drop duplicate deliveries.
    pub request_id: Option<RequestId>,
}

impl OperatorSlotAudio {
    /// Builds an entry, deriving `duration_sec` from the sample count.
    pub fn new(
        operator_id: OperatorId,
        audio_data: impl Into<Arc<[f32]>>,
        sample_rate: u32,
        slot_start_ms: u64,
        encoded_at_ms: u64,
    ) -> Self {
        let audio_data = audio_data.into();
        let duration_sec = duration_of(audio_data.len(), sample_rate);
        Self {
            operator_id,
            audio_data,
            sample_rate,
            duration_sec,
            encoded_at_ms,
            slot_start_ms,
            request_id: None,
        }
    }

    /// Tags the entry with an encoder request id.
    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }
}

/// Composite produced by one successful mix. Immutable.
#[derive(Debug, Clone, PartialEq)]
pub struct MixedAudio {
    /// Mixed mono PCM samples.
    pub audio_data: Vec<f32>,
    /// Highest rate among the inputs.
    pub sample_rate: u32,
    /// Length in seconds.
    pub duration_sec: f64,
    /// Contributing operators in cache order.
    pub operator_ids: Vec<OperatorId>,
}

impl MixedAudio {
    /// Largest absolute sample value.
    pub fn peak(&self) -> f32 {
        peak_of(&self.audio_data)
    }
}

/// Seconds covered by `samples` at `sample_rate`.
pub fn duration_of(samples: usize, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }
    samples as f64 / f64::from(sample_rate)
}

/// Largest absolute value in `samples`.
pub fn peak_of(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |peak, s| peak.max(s.abs()))
}
