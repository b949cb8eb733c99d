//! Time sources, slot derivation, and in-slot scheduling.

/// Sub-window and transmit-deadline scheduling.
pub mod scheduler;
/// Slot boundaries and anomaly detection.
pub mod slot;
/// System and mock clocks.
pub mod source;
