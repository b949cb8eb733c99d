//! Runtime, mixer, and automation configuration.
//!
//! Every section deserializes with defaults for missing fields, so a partial
//! JSON document such as `{"mixer": {"mixing_window_ms": 80}}` is valid.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Clock, scheduler, and runtime loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Clock poll period.
    pub poll_interval_ms: u64,
    /// Backward time jump tolerated before a resync.
    pub drift_tolerance_ms: u64,
    /// How late a sub-window may fire before it is skipped.
    pub overrun_tolerance_ms: u64,
    /// Transmit deadline lead before slot end.
    pub tx_deadline_lead_ms: u64,
    /// Reject operators whose transmit cycles collide instead of arbitrating.
    pub reject_cycle_collisions: bool,
    /// Minimum audio frequency spacing between operators sharing a cycle.
    pub min_frequency_separation_hz: u32,
    /// Broadcast event channel capacity.
    pub event_capacity: usize,
    /// Command channel capacity.
    pub command_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 20,
            drift_tolerance_ms: 500,
            overrun_tolerance_ms: 100,
            tx_deadline_lead_ms: 250,
            reject_cycle_collisions: true,
            min_frequency_separation_hz: 50,
            event_capacity: 1024,
            command_capacity: 256,
        }
    }
}

/// Audio mixer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    /// Debounce window coalescing near-simultaneous audio updates.
    pub mixing_window_ms: u64,
    /// How far ahead of a target playback time an armed mix fires.
    pub playback_lead_ms: u64,
    /// Peak level the composite is scaled to when it would clip.
    pub normalize_peak: f32,
    /// Upper bound on cached operators.
    pub max_operators: usize,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            mixing_window_ms: 100,
            playback_lead_ms: 50,
            normalize_peak: 0.95,
            max_operators: 16,
        }
    }
}

/// QSO automation behavior shared by all operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    /// Cycle boundaries to wait for an expected reply.
    pub max_cycles_without_reply: u32,
    /// Resume calling CQ after a timeout instead of going idle.
    pub auto_resume_cq_after_fail: bool,
    /// Resume calling CQ after a logged contact instead of going idle.
    pub auto_resume_cq_after_success: bool,
    /// Answer a CQ from the configured target station while idle.
    pub auto_reply_to_target_cq: bool,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            max_cycles_without_reply: 6,
            auto_resume_cq_after_fail: false,
            auto_resume_cq_after_success: true,
            auto_reply_to_target_cq: true,
        }
    }
}

/// Complete configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Runtime loop section.
    pub runtime: RuntimeConfig,
    /// Mixer section.
    pub mixer: MixerConfig,
    /// Automation section.
    pub automation: AutomationConfig,
}

impl CoreConfig {
    /// Parses and validates a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads, parses, and validates a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Serializes to pretty JSON.
    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Rejects values the runtime cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runtime.poll_interval_ms == 0 {
            return Err(invalid("runtime.poll_interval_ms", "must be positive"));
        }
        if self.runtime.event_capacity == 0 || self.runtime.command_capacity == 0 {
            return Err(invalid("runtime.event_capacity", "channel capacities must be positive"));
        }
        if self.mixer.mixing_window_ms == 0 {
            return Err(invalid("mixer.mixing_window_ms", "must be positive"));
        }
        if self.mixer.max_operators == 0 {
            return Err(invalid("mixer.max_operators", "must be positive"));
        }
        if !(self.mixer.normalize_peak > 0.0 && self.mixer.normalize_peak <= 1.0) {
            return Err(invalid("mixer.normalize_peak", "must be in (0, 1]"));
        }
        if self.automation.max_cycles_without_reply == 0 {
            return Err(invalid("automation.max_cycles_without_reply", "must be positive"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}
