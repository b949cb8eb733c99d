use std::sync::Arc;

use hashbrown::HashMap;
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    time::{Duration, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    audio::{
        buffer::{MixedAudio, OperatorSlotAudio},
        mixer::{AudioAccepted, AudioMixer, MixJob, MixOutcome, MixReport, MixStats, MixerState, ScheduleOutcome},
        resample::ResampleQuality,
    },
    clock::{
        scheduler::{MixBudget, ScheduledEvent, SlotScheduler},
        slot::{ClockTick, SlotClock},
        source::ClockSource,
    },
    config::CoreConfig,
    error::{ConfigError, MixError, RuntimeError},
    qso::{
        arbiter::{CycleClaim, arbitrate, validate_operators},
        context::OperatorContext,
        machine::{QsoCommand, QsoStateMachine},
        state::QsoState,
    },
    types::{DecodedFrame, ModeDescriptor, OperatorId, SlotInfo},
};

use super::events::CoreEvent;

/// Cloneable handle to a running slot runtime.
pub struct SlotRuntimeHandle {
    cmd_tx: mpsc::Sender<Command>,
    events_tx: broadcast::Sender<CoreEvent>,
}

impl Clone for SlotRuntimeHandle {
    fn clone(&self) -> Self {
        Self {
            cmd_tx: self.cmd_tx.clone(),
            events_tx: self.events_tx.clone(),
        }
    }
}

enum Command {
    AddOperator {
        id: OperatorId,
        context: OperatorContext,
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
    RemoveOperator {
        id: OperatorId,
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
    UpdateContext {
        id: OperatorId,
        context: OperatorContext,
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
    Qso {
        id: OperatorId,
        cmd: QsoCommand,
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
    Decoded {
        frame: DecodedFrame,
        resp: oneshot::Sender<()>,
    },
    AddAudio {
        audio: OperatorSlotAudio,
        target_playback_ms: Option<u64>,
        resp: oneshot::Sender<Result<AudioAccepted, RuntimeError>>,
    },
    ScheduleMixing {
        target_playback_ms: Option<u64>,
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
    ClearAudio {
        resp: oneshot::Sender<()>,
    },
    QsoState {
        id: OperatorId,
        resp: oneshot::Sender<Option<QsoState>>,
    },
    CurrentSlot {
        resp: oneshot::Sender<Option<SlotInfo>>,
    },
    MixerStats {
        resp: oneshot::Sender<(MixerState, MixStats)>,
    },
    Poll {
        resp: oneshot::Sender<()>,
    },
    Shutdown {
        resp: oneshot::Sender<()>,
    },
}

/// Starts the runtime task that owns the clock, scheduler, mixer, and
/// every operator's state machine.
pub fn spawn_slot_runtime<C: ClockSource + 'static>(
    clock: C,
    mode: ModeDescriptor,
    config: CoreConfig,
) -> Result<SlotRuntimeHandle, ConfigError> {
    config.validate()?;
    if config.runtime.tx_deadline_lead_ms >= mode.slot_ms {
        return Err(ConfigError::Invalid {
            field: "runtime.tx_deadline_lead_ms",
            reason: "must be shorter than the slot".to_string(),
        });
    }
    let slot_clock = SlotClock::new(clock, mode.clone(), config.runtime.drift_tolerance_ms)?;
    let scheduler = SlotScheduler::new(
        mode.sub_window_offsets_ms.clone(),
        config.runtime.tx_deadline_lead_ms,
        config.runtime.overrun_tolerance_ms,
    );

    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(config.runtime.command_capacity);
    let (events_tx, _) = broadcast::channel::<CoreEvent>(config.runtime.event_capacity);
    let poll_every = Duration::from_millis(config.runtime.poll_interval_ms);

    let mut runtime = Runtime {
        clock: slot_clock,
        scheduler,
        mixer: AudioMixer::new(config.mixer.clone()),
        operators: HashMap::new(),
        mode,
        config,
        events_tx: events_tx.clone(),
        last_mix: None,
        slot_decodes: Vec::new(),
    };

    tokio::spawn(async move {
        let mut poll = tokio::time::interval(poll_every);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break; };
                    if runtime.handle_command(cmd).await {
                        break;
                    }
                }
                _ = poll.tick() => {
                    runtime.on_tick().await;
                }
            }
        }
        debug!("slot runtime stopped");
    });

    Ok(SlotRuntimeHandle { cmd_tx, events_tx })
}

impl SlotRuntimeHandle {
    /// Subscribes to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.events_tx.subscribe()
    }

    /// Registers an operator. Rejects transmit-cycle collisions when
    /// `reject_cycle_collisions` is set.
    pub async fn add_operator(&self, id: OperatorId, context: OperatorContext) -> Result<(), RuntimeError> {
        self.request(|resp| Command::AddOperator { id, context, resp }).await?
    }

    /// Removes an operator, its state, and its cached audio.
    pub async fn remove_operator(&self, id: OperatorId) -> Result<(), RuntimeError> {
        self.request(|resp| Command::RemoveOperator { id, resp }).await?
    }

    /// Replaces an operator's configuration.
    pub async fn update_context(&self, id: OperatorId, context: OperatorContext) -> Result<(), RuntimeError> {
        self.request(|resp| Command::UpdateContext { id, context, resp })
            .await?
    }

    /// Sends an explicit command to one operator's state machine.
    pub async fn command(&self, id: OperatorId, cmd: QsoCommand) -> Result<(), RuntimeError> {
        self.request(|resp| Command::Qso { id, cmd, resp }).await?
    }

    /// Routes a decoded frame to every operator.
    pub async fn decoded(&self, frame: DecodedFrame) -> Result<(), RuntimeError> {
        self.request(|resp| Command::Decoded { frame, resp }).await
    }

    /// Caches an operator's encoded audio and arms (or re-runs) the mix.
    pub async fn add_audio(
        &self,
        audio: OperatorSlotAudio,
        target_playback_ms: Option<u64>,
    ) -> Result<AudioAccepted, RuntimeError> {
        self.request(|resp| Command::AddAudio {
            audio,
            target_playback_ms,
            resp,
        })
        .await?
    }

    /// Re-arms the mixing deadline. Does nothing while no audio is cached.
    pub async fn schedule_mixing(&self, target_playback_ms: Option<u64>) -> Result<(), RuntimeError> {
        self.request(|resp| Command::ScheduleMixing {
            target_playback_ms,
            resp,
        })
        .await?
    }

    /// Purges the audio cache.
    pub async fn clear_audio(&self) -> Result<(), RuntimeError> {
        self.request(|resp| Command::ClearAudio { resp }).await
    }

    /// Snapshot of one operator's QSO state.
    pub async fn qso_state(&self, id: OperatorId) -> Result<Option<QsoState>, RuntimeError> {
        self.request(|resp| Command::QsoState { id, resp }).await
    }

    /// Slot last observed by the runtime.
    pub async fn current_slot(&self) -> Result<Option<SlotInfo>, RuntimeError> {
        self.request(|resp| Command::CurrentSlot { resp }).await
    }

    /// Mixer lifecycle state and counters.
    pub async fn mixer_stats(&self) -> Result<(MixerState, MixStats), RuntimeError> {
        self.request(|resp| Command::MixerStats { resp }).await
    }

    /// Runs one clock poll immediately instead of waiting for the interval.
    pub async fn poll_now(&self) -> Result<(), RuntimeError> {
        self.request(|resp| Command::Poll { resp }).await
    }

    /// Stops the runtime task.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.request(|resp| Command::Shutdown { resp }).await
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }
}

struct Runtime<C: ClockSource> {
    clock: SlotClock<C>,
    scheduler: SlotScheduler,
    mixer: AudioMixer,
    operators: HashMap<OperatorId, QsoStateMachine>,
    mode: ModeDescriptor,
    config: CoreConfig,
    events_tx: broadcast::Sender<CoreEvent>,
    last_mix: Option<Arc<MixedAudio>>,
    slot_decodes: Vec<DecodedFrame>,
}

impl<C: ClockSource> Runtime<C> {
    fn publish(&self, event: CoreEvent) {
        let _ = self.events_tx.send(event);
    }

    async fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::AddOperator { id, context, resp } => {
                let _ = resp.send(self.add_operator(id, context));
            }
            Command::RemoveOperator { id, resp } => {
                let res = self.remove_operator(id).await;
                let _ = resp.send(res);
            }
            Command::UpdateContext { id, context, resp } => {
                let _ = resp.send(self.update_context(id, context));
            }
            Command::Qso { id, cmd, resp } => {
                let res = match self.operators.get_mut(&id) {
                    Some(machine) => {
                        for event in machine.command(cmd) {
                            let _ = self.events_tx.send(CoreEvent::Qso(event));
                        }
                        Ok(())
                    }
                    None => Err(RuntimeError::UnknownOperator(id)),
                };
                let _ = resp.send(res);
            }
            Command::Decoded { frame, resp } => {
                for machine in self.operators.values_mut() {
                    machine.on_decoded(frame.clone());
                }
                self.slot_decodes.push(frame);
                let _ = resp.send(());
            }
            Command::AddAudio {
                audio,
                target_playback_ms,
                resp,
            } => {
                let res = self.add_audio(audio, target_playback_ms).await;
                let _ = resp.send(res);
            }
            Command::ScheduleMixing {
                target_playback_ms,
                resp,
            } => {
                let now = self.clock.now_ms();
                let res = self.schedule_mixing(now, target_playback_ms).await;
                let _ = resp.send(res);
            }
            Command::ClearAudio { resp } => {
                self.mixer.clear_slot_cache();
                let _ = resp.send(());
            }
            Command::QsoState { id, resp } => {
                let _ = resp.send(self.operators.get(&id).map(|m| m.state().clone()));
            }
            Command::CurrentSlot { resp } => {
                let _ = resp.send(self.clock.slot());
            }
            Command::MixerStats { resp } => {
                let _ = resp.send((self.mixer.state(), self.mixer.stats()));
            }
            Command::Poll { resp } => {
                self.on_tick().await;
                let _ = resp.send(());
            }
            Command::Shutdown { resp } => {
                self.mixer.clear_slot_cache();
                let _ = resp.send(());
                return true;
            }
        }

        false
    }

    fn add_operator(&mut self, id: OperatorId, context: OperatorContext) -> Result<(), RuntimeError> {
        if self.operators.contains_key(&id) {
            return Err(RuntimeError::DuplicateOperator(id));
        }
        self.check_collisions(id, &context)?;
        info!(operator_id = id, call = %context.my_call, "operator added");
        let machine = QsoStateMachine::new(id, context, self.config.automation.clone());
        self.operators.insert(id, machine);
        Ok(())
    }

    /// Drops the operator and its cached audio. A composite already
    /// playing is re-mixed without it.
    async fn remove_operator(&mut self, id: OperatorId) -> Result<(), RuntimeError> {
        if self.operators.remove(&id).is_none() {
            return Err(RuntimeError::UnknownOperator(id));
        }
        info!(operator_id = id, "operator removed");
        let was_mixed = self.mixer.state() == MixerState::Mixed;
        if self.mixer.remove_operator_audio(id) && was_mixed {
            let now = self.clock.now_ms();
            self.remix(now).await;
        }
        Ok(())
    }

    fn update_context(&mut self, id: OperatorId, context: OperatorContext) -> Result<(), RuntimeError> {
        if !self.operators.contains_key(&id) {
            return Err(RuntimeError::UnknownOperator(id));
        }
        self.check_collisions(id, &context)?;
        if let Some(machine) = self.operators.get_mut(&id) {
            machine.update_context(context);
        }
        Ok(())
    }

    fn check_collisions(&self, id: OperatorId, context: &OperatorContext) -> Result<(), ConfigError> {
        if !self.config.runtime.reject_cycle_collisions {
            return Ok(());
        }
        let mut ids: Vec<OperatorId> = self.operators.keys().copied().filter(|k| *k != id).collect();
        ids.sort_unstable();
        let others = ids
            .iter()
            .filter_map(|k| self.operators.get(k).map(|m| (*k, m.context())));
        validate_operators(
            others.chain(std::iter::once((id, context))),
            self.config.runtime.min_frequency_separation_hz,
        )
    }

    async fn on_tick(&mut self) {
        match self.clock.poll() {
            Some(ClockTick::SlotStart { slot, previous }) => {
                let now = self.clock.now_ms();
                self.on_slot_start(slot, previous, now);
            }
            Some(ClockTick::Anomaly { jump_ms, resynced }) => {
                self.publish(CoreEvent::ClockAnomaly { jump_ms, resynced });
            }
            None => {}
        }

        let now = self.clock.now_ms();
        for event in self.scheduler.fire_due(now) {
            if let ScheduledEvent::TransmitDeadline(slot) = &event {
                if let Some(job) = self.mixer.take_pending_job(ResampleQuality::Linear) {
                    warn!(slot_id = slot.slot_id, "transmit deadline forced pending mix");
                    let _ = self.mix_and_publish(job, now).await;
                }
            }
            self.on_scheduled(event);
        }

        if self.mixer.take_due(now) {
            let job = self
                .mixer
                .snapshot(self.mixer.cumulative_elapsed_ms(), ResampleQuality::Fft);
            let _ = self.mix_and_publish(job, now).await;
        }
    }

    fn on_slot_start(&mut self, slot: SlotInfo, previous: Option<SlotInfo>, now: u64) {
        for event in self.scheduler.arm(slot) {
            if let ScheduledEvent::TransmitDeadline(prev) = &event {
                if self.mixer.cancel_pending() {
                    warn!(slot_id = prev.slot_id, "slot ended before its pending mix ran; dropped");
                }
            }
            self.on_scheduled(event);
        }

        info!(slot_id = slot.slot_id, is_even = slot.is_even, "slot start");
        let previous_decodes: Arc<[DecodedFrame]> = std::mem::take(&mut self.slot_decodes).into();
        let previous_mix = self.last_mix.take();
        self.publish(CoreEvent::SlotStart {
            slot,
            previous,
            previous_mix,
            previous_decodes,
        });
        self.mixer.clear_slot_cache();
        self.run_cycle(&slot);
        debug!(slot_id = slot.slot_id, lag_ms = now.saturating_sub(slot.start_ms), "cycle evaluated");
    }

    fn run_cycle(&mut self, slot: &SlotInfo) {
        let mut ids: Vec<OperatorId> = self.operators.keys().copied().collect();
        ids.sort_unstable();

        let grant = {
            let claims: Vec<CycleClaim<'_>> = ids
                .iter()
                .filter_map(|id| {
                    self.operators.get(id).map(|m| CycleClaim {
                        operator_id: *id,
                        context: m.context(),
                        in_progress: m.phase().is_in_progress(),
                    })
                })
                .collect();
            arbitrate(
                &self.mode,
                slot,
                &claims,
                self.config.runtime.min_frequency_separation_hz,
            )
        };
        for collision in &grant.collisions {
            self.publish(CoreEvent::CycleCollision(collision.clone()));
        }

        for id in ids {
            let Some(machine) = self.operators.get_mut(&id) else {
                continue;
            };
            let outcome = machine.on_cycle_start(slot, grant.may_transmit(id));
            for event in outcome.events {
                let _ = self.events_tx.send(CoreEvent::Qso(event));
            }
        }
    }

    fn on_scheduled(&mut self, event: ScheduledEvent) {
        match event {
            ScheduledEvent::SubWindow(window) => self.publish(CoreEvent::SubWindow(window)),
            ScheduledEvent::Overrun {
                slot_id,
                skipped,
                late_ms,
            } => self.publish(CoreEvent::SchedulerOverrun {
                slot_id,
                skipped,
                late_ms,
            }),
            ScheduledEvent::TransmitDeadline(slot) => self.publish(CoreEvent::TransmitDeadline { slot }),
        }
    }

    async fn add_audio(
        &mut self,
        audio: OperatorSlotAudio,
        target_playback_ms: Option<u64>,
    ) -> Result<AudioAccepted, RuntimeError> {
        let slot = self.clock.slot().ok_or(RuntimeError::NoSlot)?;
        if audio.slot_start_ms < slot.start_ms {
            warn!(
                operator_id = audio.operator_id,
                slot_start_ms = audio.slot_start_ms,
                "dropping audio encoded for an ended slot"
            );
            return Err(RuntimeError::StaleSlot(audio.slot_start_ms));
        }

        let now = self.clock.now_ms();
        let was_mixed = self.mixer.state() == MixerState::Mixed;
        let accepted = self.mixer.add_operator_audio(audio)?;
        match accepted {
            AudioAccepted::Duplicate => {}
            AudioAccepted::Inserted | AudioAccepted::Replaced if was_mixed => self.remix(now).await,
            _ => self.schedule_mixing(now, target_playback_ms).await?,
        }
        Ok(accepted)
    }

    /// Re-mixes from where the playing composite is.
    async fn remix(&mut self, now: u64) {
        let played = self
            .mixer
            .playback_started_at()
            .map(|at| now.saturating_sub(at))
            .unwrap_or(0);
        let job = self.mixer.prepare_remix(played, ResampleQuality::Fft);
        let _ = self.mix_and_publish(job, now).await;
    }

    async fn schedule_mixing(&mut self, now: u64, target_playback_ms: Option<u64>) -> Result<(), RuntimeError> {
        match self.mixer.schedule_mixing(now, target_playback_ms) {
            ScheduleOutcome::Armed { .. } | ScheduleOutcome::NothingCached => Ok(()),
            ScheduleOutcome::Overdue { .. } => {
                self.publish(CoreEvent::MixOverrun {
                    slot_start_ms: self.current_slot_start(),
                });
                let job = self
                    .mixer
                    .snapshot(self.mixer.cumulative_elapsed_ms(), ResampleQuality::Fft);
                self.mix_and_publish(job, now).await?;
                Ok(())
            }
        }
    }

    async fn mix_and_publish(&mut self, job: MixJob, now: u64) -> Result<(), MixError> {
        let result = self.run_job(job, now).await;
        let outcome = self.mixer.complete(result);
        let failed = outcome.as_ref().err().cloned();
        self.publish_mix(outcome, now);
        failed.map_or(Ok(()), Err)
    }

    /// Runs `job` on the blocking pool within the slot's mix budget.
    ///
    /// Before the transmit deadline a job that overruns it is replaced by a
    /// linear-interpolation pass over the same snapshot. At or past the
    /// deadline only the linear pass runs, and it must finish before the
    /// slot ends.
    async fn run_job(&self, job: MixJob, now: u64) -> Result<MixReport, MixError> {
        let budget = self.scheduler.mix_budget(now);
        let job = match budget {
            MixBudget::UntilDeadline { .. } => job,
            MixBudget::BestEffort { budget_ms } => {
                debug!(budget_ms, "past transmit deadline; linear mix only");
                job.with_quality(ResampleQuality::Linear)
            }
        };
        let slot_start_ms = job.slot_start_ms();
        let fallback = job.with_quality(ResampleQuality::Linear);
        let worker = tokio::task::spawn_blocking(move || job.run());

        match tokio::time::timeout(Duration::from_millis(budget.budget_ms()), worker).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(MixError::Internal(format!("join error: {join}"))),
            Err(_) => match budget {
                MixBudget::UntilDeadline { budget_ms } => {
                    warn!(budget_ms, "mix missed transmit deadline; using best-effort pass");
                    fallback.run()
                }
                MixBudget::BestEffort { budget_ms } => {
                    warn!(budget_ms, slot_start_ms, "best-effort mix ran past slot end");
                    Err(MixError::Expired { slot_start_ms })
                }
            },
        }
    }

    fn publish_mix(&mut self, outcome: Result<MixOutcome, MixError>, now: u64) {
        let slot_start_ms = self.current_slot_start();
        match outcome {
            Ok(MixOutcome::Mixed(mixed)) => {
                let audio = Arc::new(mixed);
                self.last_mix = Some(Arc::clone(&audio));
                self.mixer.mark_playback_started(now);
                self.publish(CoreEvent::MixedAudioReady {
                    slot_start_ms,
                    audio,
                });
            }
            Ok(MixOutcome::NoAudio) => {
                self.last_mix = None;
                self.publish(CoreEvent::MixUnderrun { slot_start_ms });
            }
            Err(error) => {
                self.last_mix = None;
                self.publish(CoreEvent::MixFailed {
                    slot_start_ms,
                    error,
                });
            }
        }
    }

    fn current_slot_start(&self) -> u64 {
        self.mixer
            .current_slot_start()
            .or_else(|| self.clock.slot().map(|s| s.start_ms))
            .unwrap_or(0)
    }
}
