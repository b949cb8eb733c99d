//! Per-operator QSO automation.
//!
//! Decoded frames are queued and applied only at the next cycle boundary,
//! so a contact never changes phase in the middle of a decode pass. The
//! machine enters a transmitting phase only on a cycle it was granted; on
//! other cycles the next transmitting phase stays staged.
//!
//! Waiting for a reply is measured in cycle boundaries, granted or not,
//! once the slot after our own transmission has passed. Replies to a
//! transmission can only be decoded at the end of that next slot.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    config::AutomationConfig,
    types::{CycleNumber, DecodedFrame, OperatorId, SlotId, SlotInfo},
};

use super::{
    context::OperatorContext,
    message::FtMessage,
    state::{QsoPhase, QsoRole, QsoState},
};

const INBOX_LIMIT: usize = 64;
const DEFAULT_REPORT: i32 = -10;

/// Explicit operator commands. Applied immediately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QsoCommand {
    /// Start calling CQ on the next granted cycle.
    CallCq,
    /// Call a specific station on the next granted cycle.
    CallStation {
        /// Station to call.
        call: String,
        /// Its grid, if known.
        grid: Option<String>,
    },
    /// Drop the current contact and go idle.
    Abort,
    /// Enter or leave manual mode.
    SetManual(bool),
    /// Queue a free-form message for the next granted cycle (manual mode).
    QueueMessage(String),
}

/// A message to put on the air this cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transmission {
    /// Transmitting operator.
    pub operator_id: OperatorId,
    /// Message text for the encoder.
    pub message: String,
    /// Audio frequency in Hz.
    pub frequency_hz: u32,
    /// Start of the slot the message belongs to.
    pub slot_start_ms: u64,
}

/// A finished contact, ready for the logbook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedQso {
    /// Operator that made the contact.
    pub operator_id: OperatorId,
    /// Our callsign.
    pub my_call: String,
    /// Their callsign.
    pub their_call: String,
    /// Their grid, when received.
    pub their_grid: Option<String>,
    /// Report we sent.
    pub report_sent: Option<i32>,
    /// Report we received.
    pub report_received: Option<i32>,
    /// Audio frequency in Hz.
    pub frequency_hz: u32,
    /// Slot start of our final transmission.
    pub slot_start_ms: u64,
}

/// Observable automation events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QsoEvent {
    /// Phase changed.
    PhaseChanged {
        /// Operator.
        operator_id: OperatorId,
        /// Previous phase.
        from: QsoPhase,
        /// New phase.
        to: QsoPhase,
        /// Slot during which the change happened.
        slot_id: Option<SlotId>,
    },
    /// A message was handed to the encoder.
    Transmitted(Transmission),
    /// The expected reply did not arrive in time.
    Timeout {
        /// Operator.
        operator_id: OperatorId,
        /// Phase that timed out.
        phase: QsoPhase,
        /// Cycle boundaries spent waiting.
        cycles: u32,
    },
    /// A contact was completed.
    Completed(CompletedQso),
}

/// Result of one cycle boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleOutcome {
    /// Message to encode for this slot.
    pub transmission: Option<Transmission>,
    /// Events produced at this boundary, in order.
    pub events: Vec<QsoEvent>,
}

/// QSO automaton for one operator.
pub struct QsoStateMachine {
    state: QsoState,
    context: OperatorContext,
    config: AutomationConfig,
    inbox: VecDeque<DecodedFrame>,
    staged: Option<QsoPhase>,
    manual_queue: VecDeque<String>,
    transmitted_last: bool,
    on_air: bool,
    last_tx_slot_start: u64,
    last_tx_cycle: Option<CycleNumber>,
    slot: Option<SlotInfo>,
}

impl QsoStateMachine {
    /// Idle machine for `operator_id`.
    pub fn new(operator_id: OperatorId, context: OperatorContext, config: AutomationConfig) -> Self {
        Self {
            state: QsoState::new(operator_id),
            context,
            config,
            inbox: VecDeque::new(),
            staged: None,
            manual_queue: VecDeque::new(),
            transmitted_last: false,
            on_air: false,
            last_tx_slot_start: 0,
            last_tx_cycle: None,
            slot: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> &QsoState {
        &self.state
    }

    /// Current phase.
    pub fn phase(&self) -> QsoPhase {
        self.state.phase
    }

    /// Operator configuration.
    pub fn context(&self) -> &OperatorContext {
        &self.context
    }

    /// Transmitting phase waiting for the next granted cycle.
    pub fn staged(&self) -> Option<QsoPhase> {
        self.staged
    }

    /// True when this operator put a message on the air in the current cycle.
    pub fn is_transmitting(&self) -> bool {
        self.on_air
    }

    /// Replaces the operator configuration.
    pub fn update_context(&mut self, context: OperatorContext) {
        self.context = context;
    }

    /// Queues a decoded frame for the next cycle boundary.
    ///
    /// Frames neither addressed to us nor a CQ from our target are dropped.
    pub fn on_decoded(&mut self, frame: DecodedFrame) {
        let msg = FtMessage::parse(&frame.message);
        let relevant = msg.is_addressed_to(&self.context.my_call)
            || matches!(
                (&msg, self.context.target_call.as_deref()),
                (FtMessage::Cq { from, .. }, Some(target)) if from.eq_ignore_ascii_case(target)
            );
        if !relevant {
            return;
        }
        if self.inbox.len() == INBOX_LIMIT {
            self.inbox.pop_front();
        }
        self.inbox.push_back(frame);
    }

    /// Applies an explicit command and returns the resulting events.
    pub fn command(&mut self, cmd: QsoCommand) -> Vec<QsoEvent> {
        let mut events = Vec::new();
        match cmd {
            QsoCommand::CallCq => {
                self.state.reset_contact();
                self.state.role = QsoRole::Caller;
                self.staged = Some(QsoPhase::CallingCQ);
                if self.state.phase != QsoPhase::CallingCQ {
                    self.set_phase(QsoPhase::Idle, &mut events);
                }
            }
            QsoCommand::CallStation { call, grid } => {
                self.state.reset_contact();
                self.state.role = QsoRole::Replier;
                self.state.target_call = Some(call.to_ascii_uppercase());
                self.state.target_grid = grid;
                self.staged = Some(QsoPhase::Replying);
                self.set_phase(QsoPhase::Idle, &mut events);
            }
            QsoCommand::Abort => {
                self.state.reset_contact();
                self.staged = None;
                self.inbox.clear();
                self.manual_queue.clear();
                self.transmitted_last = false;
                self.on_air = false;
                self.set_phase(QsoPhase::Idle, &mut events);
            }
            QsoCommand::SetManual(true) => {
                self.staged = None;
                self.set_phase(QsoPhase::Manual, &mut events);
            }
            QsoCommand::SetManual(false) => {
                self.manual_queue.clear();
                if self.state.phase == QsoPhase::Manual {
                    self.set_phase(QsoPhase::Idle, &mut events);
                }
            }
            QsoCommand::QueueMessage(text) => {
                if self.state.phase == QsoPhase::Manual {
                    self.manual_queue.push_back(text.trim().to_ascii_uppercase());
                } else {
                    warn!(
                        operator_id = self.state.operator_id,
                        "queued message ignored outside manual mode"
                    );
                }
            }
        }
        events
    }

    /// Advances the automaton at a cycle boundary.
    ///
    /// `may_transmit` is the arbitrated membership of `slot` in this
    /// operator's transmit cycles.
    pub fn on_cycle_start(&mut self, slot: &SlotInfo, may_transmit: bool) -> CycleOutcome {
        self.slot = Some(*slot);
        self.on_air = false;
        let mut events = Vec::new();

        if std::mem::take(&mut self.transmitted_last) {
            self.finish_transmit_phase(&mut events);
        }

        let progressed = self.apply_inbox(slot);

        let awaiting = matches!(
            self.state.phase,
            QsoPhase::AwaitingReply | QsoPhase::AwaitingConfirm
        );
        let reply_due = self
            .last_tx_cycle
            .is_none_or(|cycle| slot.cycle_number > cycle + 1);
        if awaiting && reply_due && !progressed && self.staged.is_none() {
            self.state.cycles_without_reply += 1;
            if self.state.cycles_without_reply >= self.config.max_cycles_without_reply {
                self.time_out(&mut events);
            } else if may_transmit {
                self.staged = Some(self.resend_phase());
            }
        }

        if !may_transmit {
            return CycleOutcome {
                transmission: None,
                events,
            };
        }

        if let Some(next) = self.staged.take() {
            self.set_phase(next, &mut events);
        }

        let message = match self.state.phase {
            QsoPhase::Manual => self.manual_queue.pop_front(),
            phase if phase.is_transmitting() => self.compose(),
            _ => None,
        };

        let transmission = message.map(|message| {
            let tx = Transmission {
                operator_id: self.state.operator_id,
                message,
                frequency_hz: self.context.frequency_hz,
                slot_start_ms: slot.start_ms,
            };
            debug!(
                operator_id = tx.operator_id,
                slot_id = slot.slot_id,
                message = %tx.message,
                "transmit"
            );
            self.state.last_tx_message = Some(tx.message.clone());
            self.last_tx_slot_start = slot.start_ms;
            self.last_tx_cycle = Some(slot.cycle_number);
            self.transmitted_last = self.state.phase.is_transmitting();
            self.on_air = true;
            events.push(QsoEvent::Transmitted(tx.clone()));
            tx
        });

        CycleOutcome {
            transmission,
            events,
        }
    }

    fn finish_transmit_phase(&mut self, events: &mut Vec<QsoEvent>) {
        match self.state.phase {
            QsoPhase::CallingCQ | QsoPhase::Replying => {
                self.set_phase(QsoPhase::AwaitingReply, events)
            }
            QsoPhase::Exchanging => self.set_phase(QsoPhase::AwaitingConfirm, events),
            QsoPhase::LoggingQSO => {
                if let Some(done) = self.completed() {
                    info!(
                        operator_id = done.operator_id,
                        their_call = %done.their_call,
                        "contact complete"
                    );
                    events.push(QsoEvent::Completed(done));
                }
                self.state.reset_contact();
                if self.config.auto_resume_cq_after_success {
                    self.state.role = QsoRole::Caller;
                    self.staged = Some(QsoPhase::CallingCQ);
                }
                self.set_phase(QsoPhase::Idle, events);
            }
            _ => {}
        }
    }

    fn time_out(&mut self, events: &mut Vec<QsoEvent>) {
        let phase = self.state.phase;
        let cycles = self.state.cycles_without_reply;
        warn!(
            operator_id = self.state.operator_id,
            ?phase,
            cycles,
            "no reply; abandoning attempt"
        );
        events.push(QsoEvent::Timeout {
            operator_id: self.state.operator_id,
            phase,
            cycles,
        });
        self.state.reset_contact();
        if self.config.auto_resume_cq_after_fail {
            self.state.role = QsoRole::Caller;
            self.staged = Some(QsoPhase::CallingCQ);
        } else {
            self.staged = None;
            self.set_phase(QsoPhase::Idle, events);
        }
    }

    fn resend_phase(&self) -> QsoPhase {
        match (self.state.phase, self.state.role) {
            (QsoPhase::AwaitingConfirm, _) => QsoPhase::Exchanging,
            (_, QsoRole::Caller) => QsoPhase::CallingCQ,
            (_, QsoRole::Replier) => QsoPhase::Replying,
        }
    }

    fn apply_inbox(&mut self, slot: &SlotInfo) -> bool {
        let mut progressed = false;
        while let Some(frame) = self.inbox.pop_front() {
            if self.apply_frame(&frame) {
                progressed = true;
                self.state.cycles_without_reply = 0;
                self.state.last_rx_at_slot = Some(slot.slot_id);
            }
        }
        progressed
    }

    fn apply_frame(&mut self, frame: &DecodedFrame) -> bool {
        let msg = FtMessage::parse(&frame.message);
        let phase = self.state.phase;
        let role = self.state.role;

        if let FtMessage::Cq { from, grid, .. } = &msg {
            let idle = phase == QsoPhase::Idle && self.staged.is_none();
            if idle && self.config.auto_reply_to_target_cq {
                self.state.reset_contact();
                self.state.role = QsoRole::Replier;
                self.state.target_call = Some(from.clone());
                self.state.target_grid = grid.clone().or_else(|| self.context.target_grid.clone());
                self.staged = Some(QsoPhase::Replying);
                return true;
            }
            return false;
        }

        if !msg.is_addressed_to(&self.context.my_call) || phase == QsoPhase::Manual {
            return false;
        }
        let Some(from) = msg.from().map(str::to_string) else {
            return false;
        };

        let from_target = self
            .state
            .target_call
            .as_deref()
            .is_some_and(|t| t.eq_ignore_ascii_case(&from));
        let open_for_reply = role == QsoRole::Caller
            && self.state.target_call.is_none()
            && matches!(phase, QsoPhase::CallingCQ | QsoPhase::AwaitingReply);

        if open_for_reply {
            match msg {
                FtMessage::Grid { grid, .. } => {
                    self.state.target_grid = Some(grid);
                }
                FtMessage::Report { snr, .. } => {
                    self.state.report_received = Some(snr);
                }
                _ => return false,
            }
            self.state.target_call = Some(from);
            self.state.report_sent = Some(frame.snr);
            self.staged = Some(QsoPhase::Exchanging);
            return true;
        }

        if !from_target {
            debug!(
                operator_id = self.state.operator_id,
                from = %from,
                "ignoring message from station outside current contact"
            );
            return false;
        }

        let next = match (role, phase, msg) {
            (QsoRole::Caller, QsoPhase::AwaitingConfirm | QsoPhase::Exchanging, FtMessage::RogerReport { snr, .. }) => {
                self.state.report_received = Some(snr);
                QsoPhase::LoggingQSO
            }
            (
                QsoRole::Caller,
                QsoPhase::AwaitingConfirm | QsoPhase::Exchanging,
                FtMessage::Roger { .. } | FtMessage::SeventyThree { .. },
            ) => QsoPhase::LoggingQSO,
            (QsoRole::Caller, QsoPhase::AwaitingConfirm, FtMessage::Grid { .. }) => QsoPhase::Exchanging,
            (
                QsoRole::Replier,
                QsoPhase::AwaitingReply | QsoPhase::Replying,
                FtMessage::Report { snr, .. } | FtMessage::RogerReport { snr, .. },
            ) => {
                self.state.report_received = Some(snr);
                self.state.report_sent = Some(frame.snr);
                QsoPhase::Exchanging
            }
            (
                QsoRole::Replier,
                QsoPhase::AwaitingConfirm | QsoPhase::Exchanging,
                FtMessage::Roger { .. } | FtMessage::SeventyThree { .. },
            ) => QsoPhase::LoggingQSO,
            (QsoRole::Replier, QsoPhase::AwaitingConfirm, FtMessage::Report { snr, .. }) => {
                self.state.report_received = Some(snr);
                QsoPhase::Exchanging
            }
            _ => return false,
        };
        debug!(
            operator_id = self.state.operator_id,
            ?next,
            "reply advances contact"
        );
        self.staged = Some(next);
        true
    }

    fn compose(&self) -> Option<String> {
        let me = self.context.my_call.clone();
        let msg = match self.state.phase {
            QsoPhase::CallingCQ => FtMessage::Cq {
                modifier: None,
                from: me,
                grid: (!self.context.my_grid.is_empty()).then(|| self.context.my_grid.clone()),
            },
            QsoPhase::Replying => FtMessage::Grid {
                to: self.state.target_call.clone()?,
                from: me,
                grid: self.context.my_grid.clone(),
            },
            QsoPhase::Exchanging => {
                let to = self.state.target_call.clone()?;
                let snr = self.state.report_sent.unwrap_or(DEFAULT_REPORT);
                match self.state.role {
                    QsoRole::Caller => FtMessage::Report { to, from: me, snr },
                    QsoRole::Replier => FtMessage::RogerReport { to, from: me, snr },
                }
            }
            QsoPhase::LoggingQSO => {
                let to = self.state.target_call.clone()?;
                match self.state.role {
                    QsoRole::Caller => FtMessage::Roger {
                        to,
                        from: me,
                        with_73: true,
                    },
                    QsoRole::Replier => FtMessage::SeventyThree { to, from: me },
                }
            }
            _ => return None,
        };
        Some(msg.to_string())
    }

    fn completed(&self) -> Option<CompletedQso> {
        Some(CompletedQso {
            operator_id: self.state.operator_id,
            my_call: self.context.my_call.clone(),
            their_call: self.state.target_call.clone()?,
            their_grid: self.state.target_grid.clone(),
            report_sent: self.state.report_sent,
            report_received: self.state.report_received,
            frequency_hz: self.context.frequency_hz,
            slot_start_ms: self.last_tx_slot_start,
        })
    }

    fn set_phase(&mut self, to: QsoPhase, events: &mut Vec<QsoEvent>) {
        let from = self.state.phase;
        if from == to {
            return;
        }
        self.state.phase = to;
        debug!(operator_id = self.state.operator_id, ?from, ?to, "phase change");
        events.push(QsoEvent::PhaseChanged {
            operator_id: self.state.operator_id,
            from,
            to,
            slot_id: self.slot.map(|s| s.slot_id),
        });
    }
}
