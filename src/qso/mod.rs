//! QSO automation: message model, operator context, and state machines.

/// Transmit-cycle collision detection and arbitration.
pub mod arbiter;
/// Per-operator station configuration.
pub mod context;
/// Automaton driving one operator's contacts.
pub mod machine;
/// Standard exchange message parsing and formatting.
pub mod message;
/// Phases and per-operator state.
pub mod state;
