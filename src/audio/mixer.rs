//! Per-slot, per-operator audio cache and composite mixer.
//!
//! One [`AudioMixer`] serves all operators of a radio. Its cache only holds
//! entries for a single slot: an entry tagged with a different slot start
//! purges everything first. A single debounce deadline coalesces updates
//! that arrive close together; arming it again replaces the previous one.

use hashbrown::HashMap;
use tracing::{debug, info, warn};

use crate::{
    config::MixerConfig,
    error::MixError,
    types::OperatorId,
};

use super::{
    buffer::{MixedAudio, OperatorSlotAudio, duration_of, peak_of},
    resample::{ResampleQuality, resample},
};

/// Lifecycle of the mixer within a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixerState {
    /// No audio cached.
    Empty,
    /// Audio cached, no mix armed.
    Accumulating,
    /// Debounce deadline armed.
    Scheduled,
    /// A composite was produced for the cached audio.
    Mixed,
}

/// How [`AudioMixer::add_operator_audio`] treated an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioAccepted {
    /// New operator for this slot.
    Inserted,
    /// Re-encode replaced the operator's previous entry.
    Replaced,
    /// Same request id as the cached entry; nothing changed.
    Duplicate,
    /// The cache belonged to another slot and was purged before inserting.
    PurgedStale,
}

/// Result of a mix pass that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum MixOutcome {
    /// A composite is ready to play.
    Mixed(MixedAudio),
    /// Nothing left to play (empty cache, or everything trimmed away).
    NoAudio,
}

impl MixOutcome {
    /// The composite, if any.
    pub fn mixed(&self) -> Option<&MixedAudio> {
        match self {
            MixOutcome::Mixed(m) => Some(m),
            MixOutcome::NoAudio => None,
        }
    }
}

/// What [`AudioMixer::schedule_mixing`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleOutcome {
    /// A mix will run at `fire_at_ms`.
    Armed {
        /// Absolute fire time.
        fire_at_ms: u64,
    },
    /// The target playback time had already passed. Nothing is armed; the
    /// caller mixes right away.
    Overdue {
        /// How far past the target `now` was.
        late_ms: u64,
    },
    /// The cache is empty; nothing was armed.
    NothingCached,
}

/// Running counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MixStats {
    /// Successful mix passes.
    pub mixes: u64,
    /// Passes that found nothing to play.
    pub underruns: u64,
    /// Schedules whose target playback time had passed.
    pub overruns: u64,
    /// Streams converted with the linear fallback.
    pub resample_fallbacks: u64,
    /// Peak of the most recent composite before normalization.
    pub last_pre_normalization_peak: f32,
}

/// Output of [`MixJob::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct MixReport {
    /// Composite or no-audio.
    pub outcome: MixOutcome,
    /// Streams that needed the linear fallback.
    pub fallbacks: usize,
    /// Peak of the summed signal before normalization.
    pub pre_normalization_peak: f32,
}

/// Immutable snapshot of the cache, runnable on any thread.
#[derive(Debug, Clone)]
pub struct MixJob {
    entries: Vec<OperatorSlotAudio>,
    elapsed_ms: u64,
    quality: ResampleQuality,
    normalize_peak: f32,
    slot_start_ms: u64,
}

impl MixJob {
    /// Trim offset this job applies.
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    /// Slot the snapshot was taken for.
    pub fn slot_start_ms(&self) -> u64 {
        self.slot_start_ms
    }

    /// Resampler this job uses.
    pub fn quality(&self) -> ResampleQuality {
        self.quality
    }

    /// Copy of this job using a different resampler.
    pub fn with_quality(&self, quality: ResampleQuality) -> Self {
        Self {
            quality,
            ..self.clone()
        }
    }

    /// Resamples, trims, sums, and normalizes the snapshot.
    pub fn run(&self) -> Result<MixReport, MixError> {
        let Some(target_rate) = self.entries.iter().map(|e| e.sample_rate).max() else {
            return Ok(MixReport {
                outcome: MixOutcome::NoAudio,
                fallbacks: 0,
                pre_normalization_peak: 0.0,
            });
        };

        let trim = (self.elapsed_ms as u128 * u128::from(target_rate) / 1000) as usize;
        let mut fallbacks = 0;
        let mut streams: Vec<(OperatorId, Vec<f32>)> = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let converted = resample(&entry.audio_data, entry.sample_rate, target_rate, self.quality);
            if converted.fell_back {
                fallbacks += 1;
            }
            let mut samples = converted.samples;
            if samples.len() <= trim {
                debug!(operator_id = entry.operator_id, trim, "stream fully consumed by trim");
                continue;
            }
            samples.drain(..trim);
            streams.push((entry.operator_id, samples));
        }

        if streams.is_empty() {
            return Ok(MixReport {
                outcome: MixOutcome::NoAudio,
                fallbacks,
                pre_normalization_peak: 0.0,
            });
        }

        let operator_ids: Vec<OperatorId> = streams.iter().map(|(id, _)| *id).collect();
        let (audio_data, pre_peak) = if streams.len() == 1 {
            let (_, solo) = streams.pop().unwrap_or_default();
            let peak = peak_of(&solo);
            (solo, peak)
        } else {
            let len = streams.iter().map(|(_, s)| s.len()).max().unwrap_or(0);
            let mut sum = vec![0.0f32; len];
            for (_, stream) in &streams {
                for (acc, s) in sum.iter_mut().zip(stream) {
                    *acc += *s;
                }
            }
            let peak = peak_of(&sum);
            if peak > 1.0 {
                let scale = self.normalize_peak / peak;
                for s in &mut sum {
                    *s *= scale;
                }
            }
            (sum, peak)
        };

        if !pre_peak.is_finite() || audio_data.iter().any(|s| !s.is_finite()) {
            return Err(MixError::NonFinite {
                slot_start_ms: self.slot_start_ms,
            });
        }

        let duration_sec = duration_of(audio_data.len(), target_rate);
        Ok(MixReport {
            outcome: MixOutcome::Mixed(MixedAudio {
                audio_data,
                sample_rate: target_rate,
                duration_sec,
                operator_ids,
            }),
            fallbacks,
            pre_normalization_peak: pre_peak,
        })
    }
}

/// Slot audio cache and mixer.
pub struct AudioMixer {
    config: MixerConfig,
    entries: HashMap<OperatorId, OperatorSlotAudio>,
    order: Vec<OperatorId>,
    current_slot_start: Option<u64>,
    pending_fire_at: Option<u64>,
    cumulative_elapsed_ms: u64,
    playback_started_at_ms: Option<u64>,
    state: MixerState,
    stats: MixStats,
}

impl AudioMixer {
    /// Empty mixer.
    pub fn new(config: MixerConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            order: Vec::new(),
            current_slot_start: None,
            pending_fire_at: None,
            cumulative_elapsed_ms: 0,
            playback_started_at_ms: None,
            state: MixerState::Empty,
            stats: MixStats::default(),
        }
    }

    /// Lifecycle state.
    pub fn state(&self) -> MixerState {
        self.state
    }

    /// Counters.
    pub fn stats(&self) -> MixStats {
        self.stats
    }

    /// Slot start the cache belongs to.
    pub fn current_slot_start(&self) -> Option<u64> {
        self.current_slot_start
    }

    /// Cached operator count.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Cached operators in arrival order.
    pub fn operator_ids(&self) -> &[OperatorId] {
        &self.order
    }

    /// Cached entry of one operator.
    pub fn entry(&self, operator_id: OperatorId) -> Option<&OperatorSlotAudio> {
        self.entries.get(&operator_id)
    }

    /// Running trim offset of the current playback.
    pub fn cumulative_elapsed_ms(&self) -> u64 {
        self.cumulative_elapsed_ms
    }

    /// Fire time of the armed mix.
    pub fn pending_fire_at(&self) -> Option<u64> {
        self.pending_fire_at
    }

    /// When the current composite began playing.
    pub fn playback_started_at(&self) -> Option<u64> {
        self.playback_started_at_ms
    }

    /// Records that a composite started playing at `now_ms`.
    pub fn mark_playback_started(&mut self, now_ms: u64) {
        self.playback_started_at_ms = Some(now_ms);
    }

    /// Inserts or replaces an operator's audio for its slot.
    pub fn add_operator_audio(&mut self, audio: OperatorSlotAudio) -> Result<AudioAccepted, MixError> {
        if audio.sample_rate == 0 {
            return Err(MixError::ZeroSampleRate(audio.operator_id));
        }

        let mut purged = false;
        if self
            .current_slot_start
            .is_some_and(|start| start != audio.slot_start_ms)
        {
            info!(
                stale_slot_start = ?self.current_slot_start,
                slot_start_ms = audio.slot_start_ms,
                "purging audio cache for new slot"
            );
            self.clear_slot_cache();
            purged = true;
        }
        self.current_slot_start = Some(audio.slot_start_ms);

        let operator_id = audio.operator_id;
        if let Some(existing) = self.entries.get(&operator_id) {
            if existing.request_id.is_some() && existing.request_id == audio.request_id {
                debug!(operator_id, request_id = ?audio.request_id, "duplicate encode ignored");
                return Ok(AudioAccepted::Duplicate);
            }
        } else if self.order.len() >= self.config.max_operators {
            return Err(MixError::CacheFull(self.config.max_operators));
        }

        let replaced = self.entries.insert(operator_id, audio).is_some();
        if !replaced {
            self.order.push(operator_id);
        }
        if matches!(self.state, MixerState::Empty | MixerState::Mixed) {
            self.state = MixerState::Accumulating;
        }

        Ok(match (purged, replaced) {
            (true, _) => AudioAccepted::PurgedStale,
            (false, true) => AudioAccepted::Replaced,
            (false, false) => AudioAccepted::Inserted,
        })
    }

    /// Arms the debounce deadline, replacing any pending one.
    ///
    /// With a far `target_playback_ms` the mix fires `playback_lead_ms`
    /// before it so slower operators can still contribute. A target already
    /// in the past counts an overrun and leaves the mix to the caller.
    pub fn schedule_mixing(&mut self, now_ms: u64, target_playback_ms: Option<u64>) -> ScheduleOutcome {
        self.cancel_pending();
        if self.is_empty() {
            debug!("nothing cached; mix not armed");
            return ScheduleOutcome::NothingCached;
        }
        let window_at = now_ms + self.config.mixing_window_ms;
        let fire_at_ms = match target_playback_ms {
            Some(target) if target <= now_ms => {
                self.stats.overruns += 1;
                let late_ms = now_ms - target;
                warn!(late_ms, "playback target already passed; mixing now");
                return ScheduleOutcome::Overdue { late_ms };
            }
            Some(target) => {
                let lead_at = target.saturating_sub(self.config.playback_lead_ms);
                if lead_at > window_at {
                    lead_at
                } else {
                    window_at.min(target)
                }
            }
            None => window_at,
        };
        self.pending_fire_at = Some(fire_at_ms);
        self.state = MixerState::Scheduled;
        debug!(fire_at_ms, "mix armed");
        ScheduleOutcome::Armed { fire_at_ms }
    }

    /// Cancels the armed mix, if any.
    pub fn cancel_pending(&mut self) -> bool {
        let had = self.pending_fire_at.take().is_some();
        if had && self.state == MixerState::Scheduled {
            self.state = if self.is_empty() {
                MixerState::Empty
            } else {
                MixerState::Accumulating
            };
        }
        had
    }

    /// Disarms and returns true when the armed mix is due at `now_ms`.
    pub fn take_due(&mut self, now_ms: u64) -> bool {
        match self.pending_fire_at {
            Some(at) if now_ms >= at => {
                self.pending_fire_at = None;
                true
            }
            _ => false,
        }
    }

    /// Runs the armed mix if it is due.
    pub fn fire_due(&mut self, now_ms: u64) -> Result<Option<MixOutcome>, MixError> {
        if !self.take_due(now_ms) {
            return Ok(None);
        }
        self.mix_all_operator_audios(self.cumulative_elapsed_ms).map(Some)
    }

    /// Disarms the pending mix and returns its job, regardless of fire time.
    ///
    /// Used at the transmit deadline with whatever audio is cached.
    pub fn take_pending_job(&mut self, quality: ResampleQuality) -> Option<MixJob> {
        self.pending_fire_at.take()?;
        Some(self.snapshot(self.cumulative_elapsed_ms, quality))
    }

    /// Snapshot of the cache for mixing elsewhere.
    pub fn snapshot(&self, elapsed_ms: u64, quality: ResampleQuality) -> MixJob {
        MixJob {
            entries: self
                .order
                .iter()
                .filter_map(|id| self.entries.get(id).cloned())
                .collect(),
            elapsed_ms,
            quality,
            normalize_peak: self.config.normalize_peak,
            slot_start_ms: self.current_slot_start.unwrap_or(0),
        }
    }

    /// Folds a finished job back into the mixer state.
    ///
    /// A failure clears the cache so the next slot starts clean.
    pub fn complete(&mut self, result: Result<MixReport, MixError>) -> Result<MixOutcome, MixError> {
        let report = match result {
            Ok(report) => report,
            Err(err) => {
                warn!(error = %err, "mix failed; clearing slot cache");
                self.clear_slot_cache();
                return Err(err);
            }
        };

        self.stats.resample_fallbacks += report.fallbacks as u64;
        match &report.outcome {
            MixOutcome::Mixed(mixed) => {
                self.stats.mixes += 1;
                self.stats.last_pre_normalization_peak = report.pre_normalization_peak;
                self.state = MixerState::Mixed;
                debug!(
                    operators = mixed.operator_ids.len(),
                    sample_rate = mixed.sample_rate,
                    duration_sec = mixed.duration_sec,
                    "mix complete"
                );
            }
            MixOutcome::NoAudio => {
                self.stats.underruns += 1;
                self.state = if self.is_empty() {
                    MixerState::Empty
                } else {
                    MixerState::Accumulating
                };
                debug!("mix produced no audio");
            }
        }
        Ok(report.outcome)
    }

    /// Mixes the cache, trimming `elapsed_ms` from the front of every stream.
    pub fn mix_all_operator_audios(&mut self, elapsed_ms: u64) -> Result<MixOutcome, MixError> {
        let result = self.snapshot(elapsed_ms, ResampleQuality::Fft).run();
        self.complete(result)
    }

    /// Adds `new_elapsed_ms` to the running offset and returns the job that
    /// re-mixes from that offset. Cancels any armed mix.
    pub fn prepare_remix(&mut self, new_elapsed_ms: u64, quality: ResampleQuality) -> MixJob {
        self.cancel_pending();
        self.cumulative_elapsed_ms += new_elapsed_ms;
        self.snapshot(self.cumulative_elapsed_ms, quality)
    }

    /// Re-mixes after a mid-playback update so the new composite continues
    /// where the playing one is. Offsets accumulate across calls.
    pub fn remix_after_update(&mut self, new_elapsed_ms: u64) -> Result<MixOutcome, MixError> {
        let job = self.prepare_remix(new_elapsed_ms, ResampleQuality::Fft);
        let result = job.run();
        self.complete(result)
    }

    /// Drops one operator's entry. Returns false when it had none.
    ///
    /// An armed mix stays armed for the remaining operators. After a
    /// composite was produced the state stays `Mixed` so the caller can
    /// re-mix without the operator.
    pub fn remove_operator_audio(&mut self, operator_id: OperatorId) -> bool {
        if self.entries.remove(&operator_id).is_none() {
            return false;
        }
        self.order.retain(|id| *id != operator_id);
        debug!(operator_id, remaining = self.order.len(), "operator audio removed");
        if self.is_empty() && self.state != MixerState::Mixed {
            self.pending_fire_at = None;
            self.state = MixerState::Empty;
        }
        true
    }

    /// Purges all entries, offsets, playback tracking, and the armed mix.
    pub fn clear_slot_cache(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.current_slot_start = None;
        self.pending_fire_at = None;
        self.cumulative_elapsed_ms = 0;
        self.playback_started_at_ms = None;
        self.state = MixerState::Empty;
    }
}
