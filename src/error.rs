//! Error types for each layer of the crate.

use thiserror::Error;

use crate::types::OperatorId;

/// Failure of the quality resampler. Always recovered by the linear fallback.
#[derive(Debug, Error)]
pub enum ResampleError {
    /// The resampler could not be built for the requested rates.
    #[error("resampler construction failed: {0}")]
    Construction(#[from] rubato::ResamplerConstructionError),
    /// Processing a block failed.
    #[error("resampling failed: {0}")]
    Process(#[from] rubato::ResampleError),
    /// Rates of zero cannot be converted.
    #[error("invalid sample rate {from} -> {to}")]
    InvalidRate {
        /// Source rate.
        from: u32,
        /// Target rate.
        to: u32,
    },
}

/// Mixer failures. [`MixError::NonFinite`], [`MixError::Expired`] and
/// [`MixError::Internal`] are fatal for a slot and leave the cache cleared.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MixError {
    /// Audio with a zero sample rate was offered.
    #[error("operator {0} audio has a zero sample rate")]
    ZeroSampleRate(OperatorId),
    /// The cache already holds `max_operators` entries.
    #[error("audio cache full ({0} operators)")]
    CacheFull(usize),
    /// Mixing produced NaN or infinite samples.
    #[error("non-finite sample in mix for slot starting at {slot_start_ms}")]
    NonFinite {
        /// Slot start the mix belonged to.
        slot_start_ms: u64,
    },
    /// The slot ended before a best-effort mix finished.
    #[error("mix for slot starting at {slot_start_ms} did not finish before the slot ended")]
    Expired {
        /// Slot start the mix belonged to.
        slot_start_ms: u64,
    },
    /// The mixing worker failed.
    #[error("mix worker failed: {0}")]
    Internal(String),
}

/// Invalid configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value is outside its allowed range.
    #[error("invalid config value `{field}`: {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
    /// Two operators transmit on the same cycle at overlapping frequencies.
    #[error("operators {first} and {second} collide on transmit cycle {cycle_index}")]
    CycleCollision {
        /// Cycle index both operators claim.
        cycle_index: u64,
        /// Operator already configured.
        first: OperatorId,
        /// Conflicting operator.
        second: OperatorId,
    },
    /// Config file could not be read.
    #[error("config io: {0}")]
    Io(#[from] std::io::Error),
    /// Config JSON could not be parsed.
    #[error("config json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors returned by the runtime handle.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Rejected configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Fatal mix failure for a slot.
    #[error(transparent)]
    Mix(#[from] MixError),
    /// No operator with this id is registered.
    #[error("unknown operator {0}")]
    UnknownOperator(OperatorId),
    /// The operator id is already registered.
    #[error("operator {0} already registered")]
    DuplicateOperator(OperatorId),
    /// The runtime has not observed a slot yet.
    #[error("no slot observed yet")]
    NoSlot,
    /// Audio was encoded for a slot that already ended.
    #[error("audio for slot starting at {0} ms is no longer current")]
    StaleSlot(u64),
    /// The runtime task has stopped.
    #[error("runtime channel closed")]
    ChannelClosed,
}
