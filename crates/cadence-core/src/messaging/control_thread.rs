//! The control loop
//!
//! One dedicated thread that owns the control ends of both SPSC queues, the
//! callback pool, the garbage collector and the request registry. Each
//! iteration:
//!
//! 1. waits up to `wake_interval` for client traffic (or a wake)
//! 2. executes every queued client envelope
//! 3. drains the audio → control queue into [`ControlState`] and client events
//! 4. frees deferred drops and reports queue overflows

use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, RecvTimeoutError};

use crate::engine::{EngineAtomics, EngineState, GarbageCollector};

use super::audio::{
    AudioToControl, AudioToControlReceiver, ControlToAudio, ControlToAudioSender, QueueDirection,
};
use super::callbacks::{CallbackPool, PoolStats, SlotIndex};
use super::client::events::{
    self, CycleReportPayload, ParameterPayload, ProtocolErrorPayload, SelectionPayload,
    VoiceStatePayload,
};
use super::control_state::{ControlState, VoiceMirror};
use super::controller::ControllerShared;
use super::envelope::{self, MessageId};
use super::error::{MessagingError, MessagingResult};
use super::registry::{ControlToClient, MessageRegistry};
use super::spsc::DropCounter;
use super::stats::StatsCounters;
use super::thread_check::ThreadRole;

/// Envelopes handled per wake before the audio queue gets a turn
const MAX_ENVELOPES_PER_WAKE: usize = 64;

/// Items on the client → control channel
#[derive(Debug)]
pub(crate) enum Inbound {
    Envelope(String),
    /// Run a loop iteration now instead of at the next timeout
    Wake,
}

/// Rate-limited overflow warnings for both SPSC queues
struct DropReporter {
    to_control: DropCounter,
    to_audio: DropCounter,
    interval: Duration,
    last_report: Instant,
    reported_to_control: u64,
    reported_to_audio: u64,
}

impl DropReporter {
    fn new(to_control: DropCounter, to_audio: DropCounter, interval: Duration) -> Self {
        Self {
            to_control,
            to_audio,
            interval,
            last_report: Instant::now(),
            reported_to_control: 0,
            reported_to_audio: 0,
        }
    }

    /// Warn about drops since the last report, at most once per interval
    fn poll(&mut self, force: bool) {
        let now = Instant::now();
        if !force && now.duration_since(self.last_report) < self.interval {
            return;
        }
        self.last_report = now;

        let to_control = self.to_control.get();
        let to_audio = self.to_audio.get();
        if to_control > self.reported_to_control {
            log::warn!(
                "{} queue full: dropped {} messages ({} total)",
                QueueDirection::AudioToControl,
                to_control - self.reported_to_control,
                to_control
            );
        }
        if to_audio > self.reported_to_audio {
            log::warn!(
                "{} queue full: rejected {} messages ({} total)",
                QueueDirection::ControlToAudio,
                to_audio - self.reported_to_audio,
                to_audio
            );
        }
        self.reported_to_control = to_control;
        self.reported_to_audio = to_audio;
    }
}

/// Handle given to request handlers on the control thread
///
/// The only way to reach the audio thread from control code: fixed
/// messages through [`send_to_audio`](Self::send_to_audio) and closures
/// through [`schedule_audio_callback`](Self::schedule_audio_callback).
pub struct ControlContext<'a> {
    to_audio: &'a mut ControlToAudioSender,
    pool: &'a mut CallbackPool,
    state: &'a mut ControlState,
    gc: &'a GarbageCollector,
    drops: &'a DropReporter,
    shared: &'a ControllerShared,
}

impl<'a> ControlContext<'a> {
    /// Queue a fixed message for the next audio cycle
    pub fn send_to_audio(&mut self, message: ControlToAudio) -> MessagingResult<()> {
        if self.to_audio.try_enqueue(message) {
            Ok(())
        } else {
            Err(MessagingError::QueueFull(QueueDirection::ControlToAudio))
        }
    }

    /// Run `work` once on the audio thread, in order with other queued
    /// control messages
    ///
    /// The closure gets exclusive access to the engine state. It is dropped
    /// later on this thread, so it may own heap data.
    pub fn schedule_audio_callback<F>(&mut self, work: F) -> MessagingResult<SlotIndex>
    where
        F: FnMut(&mut EngineState) + Send + 'static,
    {
        let slot = self.pool.schedule(Box::new(work), self.to_audio)?;
        self.shared.counters.publish_pool(self.pool.stats());
        StatsCounters::bump(&self.shared.counters.callbacks_scheduled);
        Ok(slot)
    }

    /// Encode an event and hand it to the registered client
    ///
    /// Returns `Ok(false)` when no client is registered; the event is
    /// discarded, not buffered.
    pub fn send_to_client<M: ControlToClient>(
        &mut self,
        payload: &M::Payload,
    ) -> MessagingResult<bool> {
        if !self.shared.has_client() {
            StatsCounters::bump(&self.shared.counters.events_discarded);
            return Ok(false);
        }
        let text = envelope::encode(M::ID, M::NAME, payload)?;
        let delivered = self.shared.deliver(&text);
        let counter = if delivered {
            &self.shared.counters.events_delivered
        } else {
            &self.shared.counters.events_discarded
        };
        StatsCounters::bump(counter);
        Ok(delivered)
    }

    /// Event delivery from the drain path, where a failure has no caller
    fn notify<M: ControlToClient>(&mut self, payload: &M::Payload) {
        if let Err(e) = self.send_to_client::<M>(payload) {
            log::error!("Failed to deliver {}: {}", M::NAME, e);
        }
    }

    pub fn state(&self) -> &ControlState {
        self.state
    }

    pub fn state_mut(&mut self) -> &mut ControlState {
        self.state
    }

    /// Lock-free engine mirror written by the audio thread
    pub fn engine(&self) -> &'a EngineAtomics {
        let shared: &'a ControllerShared = self.shared;
        &shared.atomics
    }

    /// Handle for allocating data a callback will move into the engine
    pub fn gc_handle(&self) -> basedrop::Handle {
        self.gc.handle()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn client_connections(&self) -> usize {
        self.shared.connected_clients()
    }

    pub fn dropped_to_control(&self) -> u64 {
        self.drops.to_control.get()
    }

    pub fn dropped_to_audio(&self) -> u64 {
        self.drops.to_audio.get()
    }
}

/// Everything the control thread owns
pub(crate) struct ControlSide {
    from_audio: AudioToControlReceiver,
    to_audio: ControlToAudioSender,
    inbound: Receiver<Inbound>,
    pool: CallbackPool,
    gc: GarbageCollector,
    registry: MessageRegistry,
    state: ControlState,
    drops: DropReporter,
    wake_interval: Duration,
}

impl ControlSide {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        from_audio: AudioToControlReceiver,
        to_audio: ControlToAudioSender,
        to_control_drops: DropCounter,
        inbound: Receiver<Inbound>,
        pool: CallbackPool,
        gc: GarbageCollector,
        registry: MessageRegistry,
        wake_interval: Duration,
        drop_report_interval: Duration,
    ) -> Self {
        let drops = DropReporter::new(
            to_control_drops,
            to_audio.drop_counter(),
            drop_report_interval,
        );
        Self {
            from_audio,
            to_audio,
            inbound,
            pool,
            gc,
            registry,
            state: ControlState::new(),
            drops,
            wake_interval,
        }
    }

    pub(crate) fn state(&self) -> &ControlState {
        &self.state
    }

    pub(crate) fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Run until the controller's running flag is cleared
    pub(crate) fn run(mut self, shared: &ControllerShared) -> Self {
        shared.roles.bind_current(ThreadRole::Control);
        shared.mark_running();
        log::info!("Control thread started");

        while shared.is_running() {
            match self.inbound.recv_timeout(self.wake_interval) {
                Ok(Inbound::Envelope(text)) => {
                    self.handle_envelope(&text, shared);
                    self.drain_inbound(shared);
                }
                Ok(Inbound::Wake) => self.drain_inbound(shared),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    log::warn!("Client channel disconnected, control thread exiting");
                    break;
                }
            }
            self.service(shared);
        }

        // Collect callback returns from the last audio cycles
        self.service(shared);
        self.drops.poll(true);

        let leftover = self.inbound.len();
        if leftover > 0 {
            log::debug!("Discarding {} unprocessed client messages", leftover);
        }
        shared.roles.clear(ThreadRole::Control);
        log::info!("Control thread stopped");
        self
    }

    fn context<'a>(
        &'a mut self,
        shared: &'a ControllerShared,
    ) -> (ControlContext<'a>, &'a mut AudioToControlReceiver, &'a MessageRegistry) {
        let Self {
            from_audio,
            to_audio,
            pool,
            gc,
            registry,
            state,
            drops,
            ..
        } = self;
        let ctx = ControlContext {
            to_audio,
            pool,
            state,
            gc,
            drops,
            shared,
        };
        (ctx, from_audio, registry)
    }

    fn drain_inbound(&mut self, shared: &ControllerShared) {
        for _ in 0..MAX_ENVELOPES_PER_WAKE {
            match self.inbound.try_recv() {
                Ok(Inbound::Envelope(text)) => self.handle_envelope(&text, shared),
                Ok(Inbound::Wake) => {}
                Err(_) => break,
            }
        }
    }

    /// Execute one client envelope; failures go back to the client
    fn handle_envelope(&mut self, text: &str, shared: &ControllerShared) {
        StatsCounters::bump(&shared.counters.envelopes_handled);
        let (mut ctx, _, registry) = self.context(shared);

        let mut id: Option<MessageId> = None;
        let result = envelope::decode(text).and_then(|envelope| {
            id = Some(envelope.id);
            registry.execute(envelope, &mut ctx)
        });

        if let Err(e) = result {
            StatsCounters::bump(&shared.counters.protocol_errors);
            match id.and_then(|id| registry.request_name(id)) {
                Some(name) => log::warn!("Rejected {} request: {}", name, e),
                None => log::warn!("Rejected client message: {}", e),
            }
            ctx.notify::<events::ProtocolError>(&ProtocolErrorPayload::from_error(id, &e));
        }
    }

    /// Per-iteration housekeeping after client work
    fn service(&mut self, shared: &ControllerShared) {
        self.drain_audio(shared);
        self.gc.collect();
        self.drops.poll(false);

        shared.counters.publish_pool(self.pool.stats());
        shared
            .counters
            .publish_drops(self.drops.to_control.get(), self.drops.to_audio.get());
    }

    /// Apply everything the audio thread queued before this call
    fn drain_audio(&mut self, shared: &ControllerShared) {
        let (mut ctx, from_audio, _) = self.context(shared);
        let pending = from_audio.len();
        let mut cycles: Option<CycleReportPayload> = None;

        for _ in 0..pending {
            let Some(message) = from_audio.try_dequeue() else {
                break;
            };
            match message {
                AudioToControl::VoiceStarted {
                    voice,
                    note,
                    velocity,
                    frequency_hz,
                } => {
                    ctx.state.voice_started(
                        voice,
                        VoiceMirror {
                            note,
                            velocity,
                            frequency_hz,
                        },
                    );
                    ctx.notify::<events::VoiceStateChanged>(&VoiceStatePayload {
                        voice,
                        note,
                        active: true,
                        velocity,
                        frequency_hz,
                    });
                }
                AudioToControl::VoiceStopped { voice, note } => {
                    if !ctx.state.voice_stopped(voice, note) {
                        continue;
                    }
                    ctx.notify::<events::VoiceStateChanged>(&VoiceStatePayload {
                        voice,
                        note,
                        active: false,
                        velocity: 0.0,
                        frequency_hz: 0.0,
                    });
                    if ctx.state.selected() == Some(voice) {
                        ctx.notify::<events::SingleSelection>(&SelectionPayload {
                            voice: Some(voice),
                            note: None,
                        });
                    }
                }
                AudioToControl::ParameterChanged { param, value } => {
                    ctx.state.set_parameter(param, value);
                    ctx.notify::<events::ParameterChanged>(&ParameterPayload { param, value });
                }
                AudioToControl::CallbackReturned { slot } => {
                    ctx.pool.release(slot);
                }
                AudioToControl::CycleReport {
                    cycles: count,
                    frames,
                    active_voices,
                } => {
                    let report = cycles.get_or_insert_with(CycleReportPayload::default);
                    report.cycles += count as u32;
                    report.frames += frames as u64;
                    report.active_voices = active_voices;
                }
            }
        }

        if let Some(report) = cycles {
            ctx.notify::<events::CycleReport>(&report);
        }
        shared
            .counters
            .audio_messages_drained
            .fetch_add(pending as u64, std::sync::atomic::Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::spsc;

    #[test]
    fn test_drop_reporter_rate_limited() {
        let (mut tx, _rx) = spsc::channel::<u8>(1);
        assert!(tx.try_enqueue(1));
        assert!(!tx.try_enqueue(2));

        let mut reporter = DropReporter::new(
            tx.drop_counter(),
            DropCounter::default(),
            Duration::from_secs(60),
        );
        reporter.poll(false);
        assert_eq!(reporter.reported_to_control, 0);

        reporter.poll(true);
        assert_eq!(reporter.reported_to_control, 1);
        assert_eq!(reporter.reported_to_audio, 0);
    }
}
