//! Per-operator audio caching, resampling, and mixing.

/// Operator and composite audio buffers.
pub mod buffer;
/// Slot audio cache and composite mixer.
pub mod mixer;
/// Sample-rate conversion with linear fallback.
pub mod resample;
