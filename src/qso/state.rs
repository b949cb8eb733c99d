//! QSO phases and the per-operator state record.

use serde::{Deserialize, Serialize};

use crate::types::{OperatorId, SlotId};

/// Automation phase of one operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QsoPhase {
    /// Nothing to do.
    Idle,
    /// Transmitting CQ.
    CallingCQ,
    /// Listening for a reply to our CQ or call.
    AwaitingReply,
    /// Transmitting our grid to the target.
    Replying,
    /// Transmitting a signal report (caller) or roger-report (replier).
    Exchanging,
    /// Listening for the report confirmation.
    AwaitingConfirm,
    /// Transmitting RR73/73; the contact is logged when this phase ends.
    LoggingQSO,
    /// Automation suspended; only queued messages are sent.
    Manual,
}

impl QsoPhase {
    /// Phases that put audio on the air when their cycle comes.
    pub fn is_transmitting(self) -> bool {
        matches!(
            self,
            QsoPhase::CallingCQ | QsoPhase::Replying | QsoPhase::Exchanging | QsoPhase::LoggingQSO
        )
    }

    /// A contact is under way; used to arbitrate transmit-cycle collisions.
    pub fn is_in_progress(self) -> bool {
        !matches!(self, QsoPhase::Idle | QsoPhase::CallingCQ)
    }
}

/// Which side of the exchange we are on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QsoRole {
    /// We called CQ.
    Caller,
    /// We answered a CQ or initiated a call.
    Replier,
}

/// State owned by one [`super::machine::QsoStateMachine`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QsoState {
    /// Owning operator.
    pub operator_id: OperatorId,
    /// Current phase.
    pub phase: QsoPhase,
    /// Our side of the exchange.
    pub role: QsoRole,
    /// Station being worked.
    pub target_call: Option<String>,
    /// Their grid, when received.
    pub target_grid: Option<String>,
    /// Most recent message we transmitted.
    pub last_tx_message: Option<String>,
    /// Cycle boundaries spent without the expected reply.
    pub cycles_without_reply: u32,
    /// Slot of the last frame that advanced the exchange.
    pub last_rx_at_slot: Option<SlotId>,
    /// Report we sent, in dB.
    pub report_sent: Option<i32>,
    /// Report we received, in dB.
    pub report_received: Option<i32>,
}

impl QsoState {
    /// Fresh idle state.
    pub fn new(operator_id: OperatorId) -> Self {
        Self {
            operator_id,
            phase: QsoPhase::Idle,
            role: QsoRole::Caller,
            target_call: None,
            target_grid: None,
            last_tx_message: None,
            cycles_without_reply: 0,
            last_rx_at_slot: None,
            report_sent: None,
            report_received: None,
        }
    }

    /// Drops everything about the current contact.
    pub fn reset_contact(&mut self) {
        self.target_call = None;
        self.target_grid = None;
        self.cycles_without_reply = 0;
        self.report_sent = None;
        self.report_received = None;
    }
}
