//! Slot timing, QSO automation, and multi-operator audio mixing for
//! time-slotted digital modes such as FT8 and FT4.
//!
//! # Examples
//!
//! Deriving slots and driving one operator's state machine:
//! ```
//! use ftcycle::{
//!     clock::slot::slot_at,
//!     config::AutomationConfig,
//!     qso::{context::OperatorContext, machine::{QsoCommand, QsoStateMachine}, state::QsoPhase},
//!     types::ModeDescriptor,
//! };
//!
//! let mode = ModeDescriptor::ft8();
//! let slot = slot_at(&mode, 30_000);
//! assert_eq!(slot.start_ms, 30_000);
//! assert!(slot.is_even);
//!
//! let ctx = OperatorContext::new("K1ABC", "FN42", 1_500, &[0]);
//! let mut machine = QsoStateMachine::new(1, ctx, AutomationConfig::default());
//! machine.command(QsoCommand::CallCq);
//! let outcome = machine.on_cycle_start(&slot, true);
//! assert_eq!(machine.phase(), QsoPhase::CallingCQ);
//! assert_eq!(outcome.transmission.map(|t| t.message), Some("CQ K1ABC FN42".to_string()));
//! ```
//!
//! Running the full runtime against the system clock:
//! ```no_run
//! use ftcycle::{
//!     clock::source::SystemClock,
//!     config::CoreConfig,
//!     qso::{context::OperatorContext, machine::QsoCommand},
//!     runtime::handle::spawn_slot_runtime,
//!     types::ModeDescriptor,
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let handle = spawn_slot_runtime(SystemClock::new(), ModeDescriptor::ft8(), CoreConfig::default())
//!     .expect("valid config");
//! let mut events = handle.subscribe();
//! handle
//!     .add_operator(1, OperatorContext::new("K1ABC", "FN42", 1_500, &[0]))
//!     .await
//!     .expect("add operator");
//! handle.command(1, QsoCommand::CallCq).await.expect("call cq");
//! let _first = events.recv().await.expect("event");
//! handle.shutdown().await.expect("shutdown");
//! # }
//! ```
#![warn(missing_docs)]

/// Per-operator audio cache, resampling, and composite mixing.
pub mod audio;
/// Clock sources, slot derivation, and sub-window scheduling.
pub mod clock;
/// JSON-backed runtime configuration.
pub mod config;
/// Error types for every layer.
pub mod error;
/// QSO messages, state machines, and cycle arbitration.
pub mod qso;
/// Single-writer runtime handle and events.
pub mod runtime;
/// Shared primitive types.
pub mod types;
