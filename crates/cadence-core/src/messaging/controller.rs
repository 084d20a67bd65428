//! Message controller - lifecycle, client registration and the inbound channel
//!
//! ```text
//! Constructed ──start()──► Started ──(thread up)──► Running ──stop()──► Stopped
//! ```
//!
//! A controller is single-use: once stopped it cannot be started again.
//! `stop()` on a stopped controller is a no-op. Dropping a running
//! controller is a usage error; it is logged and the thread is stopped.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam::channel::Sender;

use crate::config::MessagingConfig;
use crate::engine::{EngineAtomics, GarbageCollector};

use super::audio::{AudioToControl, ControlToAudio};
use super::callbacks::CallbackPool;
use super::client::encode_request;
use super::control_state::ControlState;
use super::control_thread::{ControlSide, Inbound};
use super::endpoint::AudioEndpoint;
use super::error::{LifecycleError, MessagingError, MessagingResult};
use super::registry::{ClientToControl, MessageRegistry};
use super::spsc;
use super::stats::{ControllerStats, StatsCounters};
use super::thread_check::{ThreadRole, ThreadRoles};

/// Outbound delivery callback, invoked on the control thread
pub type ClientCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Controller lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Built, control thread not spawned
    Constructed,
    /// Control thread spawned but not yet in its loop
    Started,
    Running,
    Stopped,
}

impl ControllerState {
    fn as_u8(self) -> u8 {
        match self {
            Self::Constructed => 0,
            Self::Started => 1,
            Self::Running => 2,
            Self::Stopped => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Constructed,
            1 => Self::Started,
            2 => Self::Running,
            _ => Self::Stopped,
        }
    }
}

struct ClientRegistration {
    name: String,
    callback: ClientCallback,
}

/// State shared between the controller handle and the control thread
pub(crate) struct ControllerShared {
    running: AtomicBool,
    lifecycle: AtomicU8,
    inbound: Sender<Inbound>,
    client: Mutex<Option<ClientRegistration>>,
    connections: Arc<AtomicUsize>,
    pub(crate) roles: Arc<ThreadRoles>,
    pub(crate) atomics: Arc<EngineAtomics>,
    pub(crate) counters: StatsCounters,
}

impl ControllerShared {
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn state(&self) -> ControllerState {
        ControllerState::from_u8(self.lifecycle.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ControllerState) {
        self.lifecycle.store(state.as_u8(), Ordering::Release);
    }

    /// Started → Running, once the loop is entered
    pub(crate) fn mark_running(&self) {
        let _ = self.lifecycle.compare_exchange(
            ControllerState::Started.as_u8(),
            ControllerState::Running.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub(crate) fn connected_clients(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    pub(crate) fn has_client(&self) -> bool {
        self.client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Invoke the client callback without holding the registration lock
    ///
    /// Returns `false` if no client is registered.
    pub(crate) fn deliver(&self, text: &str) -> bool {
        let callback = self
            .client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|client| Arc::clone(&client.callback));

        match callback {
            Some(callback) => {
                callback(text);
                true
            }
            None => false,
        }
    }
}

/// Wakes the control loop from any non-real-time thread
#[derive(Clone)]
pub struct Waker {
    inbound: Sender<Inbound>,
}

impl Waker {
    /// Run a control loop iteration as soon as possible
    ///
    /// May allocate; never call from the audio thread.
    pub fn wake(&self) {
        let _ = self.inbound.send(Inbound::Wake);
    }
}

/// Owner of every channel between the audio thread, the control thread and
/// the client
pub struct MessageController {
    shared: Arc<ControllerShared>,
    config: MessagingConfig,
    /// Control side waiting for `start()`
    pending: Option<ControlSide>,
    handle: Option<JoinHandle<ControlSide>>,
    /// Control side handed back by the stopped thread
    retired: Option<ControlSide>,
}

impl MessageController {
    /// Build a controller with the built-in message catalogue
    ///
    /// Returns the controller and the audio endpoint to move into the
    /// [`Engine`](crate::engine::Engine).
    pub fn new(config: MessagingConfig) -> MessagingResult<(Self, AudioEndpoint)> {
        Self::with_registry(config, MessageRegistry::with_builtin())
    }

    /// Build a controller with a custom message catalogue
    pub fn with_registry(
        config: MessagingConfig,
        registry: MessageRegistry,
    ) -> MessagingResult<(Self, AudioEndpoint)> {
        config.validate()?;

        let (to_control, from_audio) =
            spsc::channel::<AudioToControl>(config.audio_to_control_capacity);
        let (to_audio, from_control) =
            spsc::channel::<ControlToAudio>(config.control_to_audio_capacity);
        let (pool, runner) = CallbackPool::new(config.initial_callback_slots);
        let (inbound_tx, inbound_rx) = crossbeam::channel::unbounded();
        let gc = GarbageCollector::new();

        let roles = Arc::new(ThreadRoles::new());
        let connections = Arc::new(AtomicUsize::new(0));
        let atomics = Arc::new(EngineAtomics::new());

        let shared = Arc::new(ControllerShared {
            running: AtomicBool::new(false),
            lifecycle: AtomicU8::new(ControllerState::Constructed.as_u8()),
            inbound: inbound_tx,
            client: Mutex::new(None),
            connections: Arc::clone(&connections),
            roles: Arc::clone(&roles),
            atomics: Arc::clone(&atomics),
            counters: StatsCounters::default(),
        });
        shared.counters.publish_pool(pool.stats());

        let to_control_drops = to_control.drop_counter();
        let endpoint = AudioEndpoint {
            to_control,
            from_control,
            runner,
            roles,
            connections,
            atomics,
            gc: gc.handle(),
        };
        let control = ControlSide::new(
            from_audio,
            to_audio,
            to_control_drops,
            inbound_rx,
            pool,
            gc,
            registry,
            config.wake_interval(),
            config.drop_report_interval(),
        );

        log::debug!(
            "Message controller created (queues {}/{}, {} callback slots)",
            config.audio_to_control_capacity,
            config.control_to_audio_capacity,
            control.pool_stats().allocated
        );

        Ok((
            Self {
                shared,
                config,
                pending: Some(control),
                handle: None,
                retired: None,
            },
            endpoint,
        ))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Spawn the control thread
    ///
    /// Must not be called from the audio or control thread.
    ///
    /// Misuse (a second `start()`, a restart after `stop()`, or a call from
    /// a restricted thread) is logged and returned as
    /// [`LifecycleError`] in every build profile. It does not assert, so a
    /// host can recover without aborting.
    pub fn start(&mut self) -> MessagingResult<()> {
        for role in [ThreadRole::Audio, ThreadRole::Control] {
            if self.shared.roles.is_current(role) {
                log::error!("start() called from the {} thread", role);
                return Err(LifecycleError::StartFromRestrictedThread(role).into());
            }
        }
        match self.state() {
            ControllerState::Constructed => {}
            ControllerState::Started | ControllerState::Running => {
                return Err(LifecycleError::AlreadyRunning.into());
            }
            ControllerState::Stopped => return Err(LifecycleError::NotRestartable.into()),
        }
        let Some(control) = self.pending.take() else {
            return Err(LifecycleError::NotRestartable.into());
        };

        self.shared.running.store(true, Ordering::Release);
        self.shared.set_state(ControllerState::Started);

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(self.config.control_thread_name.clone())
            .spawn(move || control.run(&shared));

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                log::info!("Message controller started");
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                self.shared.set_state(ControllerState::Stopped);
                log::error!("Failed to spawn control thread: {}", e);
                Err(MessagingError::Spawn(e))
            }
        }
    }

    /// Stop and join the control thread
    ///
    /// A no-op if the thread is not running. Calling this from the control
    /// thread (e.g. inside a client callback) would join itself and is
    /// refused with [`LifecycleError::StopFromControlThread`]. As with
    /// [`start`](Self::start), the refusal is an error value, not a debug
    /// assertion.
    pub fn stop(&mut self) -> MessagingResult<()> {
        if self.shared.roles.is_current(ThreadRole::Control) {
            log::error!("stop() called from the control thread");
            return Err(LifecycleError::StopFromControlThread.into());
        }
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        self.shared.running.store(false, Ordering::Release);
        let _ = self.shared.inbound.send(Inbound::Wake);

        match handle.join() {
            Ok(control) => self.retired = Some(control),
            Err(_) => log::error!("Control thread panicked"),
        }
        self.shared.set_state(ControllerState::Stopped);
        log::info!("Message controller stopped");
        Ok(())
    }

    pub fn state(&self) -> ControllerState {
        self.shared.state()
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Client API
    // ─────────────────────────────────────────────────────────────────────────

    /// Register the client that receives outbound events
    ///
    /// Replaces any existing registration and increments the connection
    /// count. `callback` runs on the control thread for every event; it
    /// should hand the text off quickly rather than block. A panic in
    /// `callback` ends the control thread, which `stop()` then reports.
    pub fn register_client<F>(&self, name: impl Into<String>, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let name = name.into();
        let previous = self
            .shared
            .client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(ClientRegistration {
                name: name.clone(),
                callback: Arc::new(callback),
            });
        let count = self.shared.connections.fetch_add(1, Ordering::Relaxed) + 1;

        match previous {
            Some(old) => log::info!(
                "Client '{}' replaced '{}' ({} connections)",
                name,
                old.name,
                count
            ),
            None => log::info!("Client '{}' registered ({} connections)", name, count),
        }
    }

    /// Drop the client registration and decrement the connection count
    ///
    /// Events produced afterwards are discarded, not buffered.
    pub fn unregister_client(&self) {
        let previous = self
            .shared
            .client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let _ = self
            .shared
            .connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));

        if let Some(old) = previous {
            log::info!("Client '{}' unregistered", old.name);
        }
    }

    pub fn connected_clients(&self) -> usize {
        self.shared.connected_clients()
    }

    /// Queue envelope text for the control thread
    ///
    /// Messages sent before `start()` are handled once the thread runs.
    /// Sending allocates, so the audio thread is refused.
    pub fn send_raw_from_client(&self, text: impl Into<String>) -> MessagingResult<()> {
        if self.shared.roles.is_current(ThreadRole::Audio) {
            log::error!("send_raw_from_client() called from the audio thread");
            return Err(MessagingError::ThreadDiscipline {
                operation: "send_raw_from_client",
                forbidden: ThreadRole::Audio,
            });
        }
        if self.state() == ControllerState::Stopped {
            return Err(MessagingError::ChannelClosed);
        }
        self.shared
            .inbound
            .send(Inbound::Envelope(text.into()))
            .map_err(|_| MessagingError::ChannelClosed)
    }

    /// Encode and queue a typed request
    pub fn send_to_control<M: ClientToControl>(&self, payload: &M::Payload) -> MessagingResult<()> {
        let text = encode_request::<M>(payload)?;
        self.send_raw_from_client(text)
    }

    pub fn waker(&self) -> Waker {
        Waker {
            inbound: self.shared.inbound.clone(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inspection
    // ─────────────────────────────────────────────────────────────────────────

    pub fn config(&self) -> &MessagingConfig {
        &self.config
    }

    pub fn stats(&self) -> ControllerStats {
        self.shared.counters.snapshot()
    }

    /// Lock-free engine mirror
    pub fn engine_atomics(&self) -> Arc<EngineAtomics> {
        Arc::clone(&self.shared.atomics)
    }

    /// Control-side derived state, available while the thread is not running
    pub fn control_state(&self) -> Option<&ControlState> {
        self.pending
            .as_ref()
            .or(self.retired.as_ref())
            .map(ControlSide::state)
    }
}

impl Drop for MessageController {
    fn drop(&mut self) {
        if self.handle.is_some() {
            log::error!("MessageController dropped while running; stopping control thread");
            if let Err(e) = self.stop() {
                log::error!("Failed to stop control thread: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, EngineState};
    use crate::messaging::client::events::{
        CycleReportPayload, ParameterPayload, PongPayload, ProtocolErrorKind, ProtocolErrorPayload,
        SelectionPayload, VoiceStatePayload,
    };
    use crate::messaging::client::ids::s2c;
    use crate::messaging::client::requests::{
        LoadParameterSnapshot, NoteOn, NoteOnPayload, ParameterSnapshotPayload, Ping, PingPayload,
        SelectVoice, SelectVoicePayload, SetTuning, TuningPayload,
    };
    use crate::messaging::client::ClientHandler;
    use crate::messaging::control_thread::ControlContext;
    use crate::messaging::envelope::{self, Envelope, MessageId};
    use crate::types::{ParamId, VoiceId};
    use crossbeam::channel::{Receiver, RecvTimeoutError};
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::AtomicBool;
    use std::time::{Duration, Instant};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn fast_config() -> MessagingConfig {
        MessagingConfig {
            wake_interval_ms: 5,
            ..Default::default()
        }
    }

    /// Register a client that forwards every envelope into a channel
    fn capture_client(controller: &MessageController, name: &str) -> Receiver<Envelope> {
        let (tx, rx) = crossbeam::channel::unbounded();
        controller.register_client(name, move |text: &str| {
            if let Ok(envelope) = envelope::decode(text) {
                let _ = tx.send(envelope);
            }
        });
        rx
    }

    /// Collect events until one with `id` arrives
    fn collect_until(rx: &Receiver<Envelope>, id: MessageId) -> Vec<Envelope> {
        let deadline = Instant::now() + TIMEOUT;
        let mut seen = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(envelope) => {
                    let done = envelope.id == id;
                    seen.push(envelope);
                    if done {
                        return seen;
                    }
                }
                Err(RecvTimeoutError::Timeout) => panic!("timed out waiting for event {}", id),
                Err(RecvTimeoutError::Disconnected) => panic!("client channel closed"),
            }
        }
    }

    fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + TIMEOUT;
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for {}", what);
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Run `Engine::process` on its own thread until `stop` is set
    fn spawn_audio(mut engine: Engine, stop: Arc<AtomicBool>) -> JoinHandle<Engine> {
        thread::spawn(move || {
            let mut buffer = [0.0f32; 64];
            while !stop.load(Ordering::Relaxed) {
                engine.process(&mut buffer);
                thread::sleep(Duration::from_millis(1));
            }
            engine
        })
    }

    fn ping(controller: &MessageController, token: u64) {
        controller
            .send_to_control::<Ping>(&PingPayload { token })
            .unwrap();
    }

    // Request with id 42 that reports what it decoded and where it ran

    #[derive(Debug, Serialize, Deserialize)]
    struct NotePayload {
        note: u8,
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct NoteSeenPayload {
        note: u8,
        on_control_thread: bool,
    }

    struct EchoNote;
    struct NoteSeen;

    const NOTE_SEEN: MessageId = 4242;

    impl ClientToControl for EchoNote {
        const ID: MessageId = 42;
        const NAME: &'static str = "EchoNote";
        type Payload = NotePayload;

        fn execute(payload: NotePayload, ctx: &mut ControlContext<'_>) -> MessagingResult<()> {
            let on_control_thread = thread::current().name() == Some("cadence-control");
            ctx.send_to_client::<NoteSeen>(&NoteSeenPayload {
                note: payload.note,
                on_control_thread,
            })?;
            Ok(())
        }
    }

    impl crate::messaging::ControlToClient for NoteSeen {
        const ID: MessageId = NOTE_SEEN;
        const NAME: &'static str = "NoteSeen";
        type Payload = NoteSeenPayload;

        fn deliver(_: NoteSeenPayload, _: &mut dyn ClientHandler) {}
    }

    // Request that schedules `count` callbacks, each advancing parameter 1
    // only if every earlier callback already ran

    #[derive(Debug, Serialize, Deserialize)]
    struct CountPayload {
        count: usize,
    }

    struct ScheduleCounted;

    const COUNTER: ParamId = ParamId(1);

    impl ClientToControl for ScheduleCounted {
        const ID: MessageId = 4300;
        const NAME: &'static str = "ScheduleCounted";
        type Payload = CountPayload;

        fn execute(payload: CountPayload, ctx: &mut ControlContext<'_>) -> MessagingResult<()> {
            for k in 0..payload.count {
                ctx.schedule_audio_callback(move |state: &mut EngineState| {
                    if state.parameter(COUNTER) as usize == k {
                        state.set_parameter(COUNTER, (k + 1) as f32);
                    } else {
                        state.set_parameter(COUNTER, -1.0);
                    }
                })?;
            }
            Ok(())
        }
    }

    fn extended_registry() -> MessageRegistry {
        let mut registry = MessageRegistry::with_builtin();
        registry
            .register_request::<EchoNote>()
            .unwrap()
            .register_request::<ScheduleCounted>()
            .unwrap()
            .register_event::<NoteSeen>()
            .unwrap();
        registry
    }

    #[test]
    fn test_registered_handler_runs_once_on_control_thread() {
        init_logging();
        let (mut controller, _endpoint) =
            MessageController::with_registry(fast_config(), extended_registry()).unwrap();
        let events = capture_client(&controller, "ui1");
        controller.start().unwrap();

        controller
            .send_raw_from_client(r#"{"id":42,"payload":{"note":60}}"#)
            .unwrap();
        ping(&controller, 1);

        let seen = collect_until(&events, s2c::PONG);
        let echoes: Vec<_> = seen.iter().filter(|e| e.id == NOTE_SEEN).collect();
        assert_eq!(echoes.len(), 1);

        let payload: NoteSeenPayload = serde_json::from_value(echoes[0].payload.clone()).unwrap();
        assert_eq!(payload.note, 60);
        assert!(payload.on_control_thread);

        controller.stop().unwrap();
    }

    #[test]
    fn test_unknown_identifier_reported_once_and_channel_stays_open() {
        init_logging();
        let (mut controller, _endpoint) = MessageController::new(fast_config()).unwrap();
        let events = capture_client(&controller, "ui1");
        controller.start().unwrap();

        controller
            .send_raw_from_client(r#"{"id":31337,"payload":{}}"#)
            .unwrap();
        ping(&controller, 9);

        let seen = collect_until(&events, s2c::PONG);
        let errors: Vec<ProtocolErrorPayload> = seen
            .iter()
            .filter(|e| e.id == s2c::PROTOCOL_ERROR)
            .map(|e| serde_json::from_value(e.payload.clone()).unwrap())
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ProtocolErrorKind::UnknownIdentifier);
        assert_eq!(errors[0].id, Some(31337));

        let pong: PongPayload =
            serde_json::from_value(seen.last().unwrap().payload.clone()).unwrap();
        assert_eq!(pong.token, 9);

        controller.stop().unwrap();
        let stats = controller.stats();
        assert_eq!(stats.protocol_errors, 1);
        assert_eq!(stats.envelopes_handled, 2);
    }

    #[test]
    fn test_malformed_and_invalid_payloads_reported() {
        init_logging();
        let (mut controller, _endpoint) = MessageController::new(fast_config()).unwrap();
        let events = capture_client(&controller, "ui1");
        controller.start().unwrap();

        controller.send_raw_from_client("{not json").unwrap();
        controller
            .send_raw_from_client(r#"{"id":10,"payload":{"note":"C4"}}"#)
            .unwrap();
        controller
            .send_raw_from_client(r#"{"id":10,"payload":{"note":200}}"#)
            .unwrap();
        ping(&controller, 2);

        let kinds: Vec<(ProtocolErrorKind, Option<MessageId>)> = collect_until(&events, s2c::PONG)
            .into_iter()
            .filter(|e| e.id == s2c::PROTOCOL_ERROR)
            .map(|e| serde_json::from_value::<ProtocolErrorPayload>(e.payload).unwrap())
            .map(|p| (p.kind, p.id))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (ProtocolErrorKind::MalformedEnvelope, None),
                (ProtocolErrorKind::InvalidPayload, Some(10)),
                (ProtocolErrorKind::InvalidPayload, Some(10)),
            ]
        );

        controller.stop().unwrap();
    }

    #[test]
    fn test_stop_twice_is_noop_and_restart_refused() {
        init_logging();
        let (mut controller, _endpoint) = MessageController::new(fast_config()).unwrap();
        assert_eq!(controller.state(), ControllerState::Constructed);

        controller.start().unwrap();
        assert!(matches!(
            controller.start(),
            Err(MessagingError::Lifecycle(LifecycleError::AlreadyRunning))
        ));
        wait_for("running state", || controller.state() == ControllerState::Running);

        controller.stop().unwrap();
        assert_eq!(controller.state(), ControllerState::Stopped);
        controller.stop().unwrap();
        assert_eq!(controller.state(), ControllerState::Stopped);

        assert!(matches!(
            controller.start(),
            Err(MessagingError::Lifecycle(LifecycleError::NotRestartable))
        ));
        assert!(matches!(
            controller.send_raw_from_client("{}"),
            Err(MessagingError::ChannelClosed)
        ));
    }

    #[test]
    fn test_start_refused_on_audio_thread() {
        let (mut controller, endpoint) = MessageController::new(fast_config()).unwrap();
        let mut engine = Engine::new(endpoint);
        let mut buffer = [0.0f32; 16];
        engine.process(&mut buffer);

        let result = controller.start();
        assert!(matches!(
            result,
            Err(MessagingError::Lifecycle(
                LifecycleError::StartFromRestrictedThread(ThreadRole::Audio)
            ))
        ));
        assert_eq!(controller.state(), ControllerState::Constructed);
    }

    #[test]
    fn test_client_send_refused_on_audio_thread() {
        let (controller, endpoint) = MessageController::new(fast_config()).unwrap();
        let mut engine = Engine::new(endpoint);
        let mut buffer = [0.0f32; 16];
        engine.process(&mut buffer);

        let result = controller.send_raw_from_client(r#"{"id":1}"#);
        assert!(matches!(
            result,
            Err(MessagingError::ThreadDiscipline {
                operation: "send_raw_from_client",
                forbidden: ThreadRole::Audio,
            })
        ));
        assert!(result.unwrap_err().is_contract_violation());

        engine.release_audio_thread();
        controller.send_raw_from_client(r#"{"id":1}"#).unwrap();
    }

    #[test]
    fn test_stop_from_control_thread_refused() {
        init_logging();
        let (mut controller, _endpoint) = MessageController::new(fast_config()).unwrap();
        controller.start().unwrap();

        let controller = Arc::new(Mutex::new(controller));
        let (tx, rx) = crossbeam::channel::unbounded();
        let inner = Arc::clone(&controller);
        controller.lock().unwrap().register_client("ui1", move |_text: &str| {
            let result = inner.lock().unwrap().stop();
            let _ = tx.send(result.err().map(|e| e.to_string()));
        });

        ping(&controller.lock().unwrap(), 3);
        let outcome = rx.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(outcome.as_deref(), Some("stop() called from the control thread"));

        let mut guard = controller.lock().unwrap();
        assert!(guard.is_running());
        guard.unregister_client();
        guard.stop().unwrap();
        assert_eq!(guard.state(), ControllerState::Stopped);
    }

    #[test]
    fn test_unregistered_client_events_are_discarded() {
        init_logging();
        let (mut controller, endpoint) = MessageController::new(fast_config()).unwrap();
        let mut engine = Engine::new(endpoint);
        let events = capture_client(&controller, "ui1");
        controller.start().unwrap();

        controller.unregister_client();
        assert_eq!(controller.connected_clients(), 0);

        // Stands in for the audio thread; nothing else processes
        engine.note_on(69, 0.8);
        controller.waker().wake();

        wait_for("drain", || controller.stats().audio_messages_drained >= 1);
        controller.stop().unwrap();

        assert!(events.try_recv().is_err());
        assert!(controller.stats().events_discarded >= 1);
        assert_eq!(controller.stats().events_delivered, 0);

        // Drained into control-side state even without a client
        let state = controller.control_state().unwrap();
        assert_eq!(state.voice(VoiceId(0)).map(|v| v.note), Some(69));
    }

    #[test]
    fn test_scheduled_callbacks_run_in_order_and_slots_return() {
        init_logging();
        let (mut controller, endpoint) =
            MessageController::with_registry(fast_config(), extended_registry()).unwrap();
        let free_before = controller.stats().callback_slots.free;

        let stop = Arc::new(AtomicBool::new(false));
        let audio = spawn_audio(Engine::new(endpoint), Arc::clone(&stop));
        controller.start().unwrap();

        const K: usize = 10;
        controller
            .send_raw_from_client(format!(r#"{{"id":4300,"payload":{{"count":{}}}}}"#, K))
            .unwrap();

        wait_for("callbacks to return", || {
            let stats = controller.stats();
            stats.callbacks_scheduled == K as u64 && stats.callback_slots.free == free_before
        });

        controller.stop().unwrap();
        stop.store(true, Ordering::Relaxed);
        let engine = audio.join().unwrap();

        assert_eq!(engine.state().parameter(COUNTER), K as f32);
        assert_eq!(controller.stats().callback_slots.in_flight(), 0);
    }

    #[test]
    fn test_end_to_end_note_flow() {
        init_logging();
        let (mut controller, endpoint) = MessageController::new(fast_config()).unwrap();
        let events = capture_client(&controller, "ui1");

        let stop = Arc::new(AtomicBool::new(false));
        let audio = spawn_audio(Engine::new(endpoint), Arc::clone(&stop));
        controller.start().unwrap();

        controller
            .send_raw_from_client(r#"{"id":10,"payload":{"note":69,"velocity":0.5}}"#)
            .unwrap();
        let seen = collect_until(&events, s2c::VOICE_STATE_CHANGED);
        let started = seen.last().unwrap();
        assert_eq!(started.payload["note"], 69);
        assert_eq!(started.payload["active"], true);

        controller
            .send_raw_from_client(r#"{"id":20,"payload":{"param":0,"value":0.5}}"#)
            .unwrap();
        let seen = collect_until(&events, s2c::PARAMETER_CHANGED);
        assert_eq!(seen.last().unwrap().payload["value"], 0.5);

        controller
            .send_raw_from_client(r#"{"id":2}"#)
            .unwrap();
        let seen = collect_until(&events, s2c::ENGINE_STATUS);
        let status = &seen.last().unwrap().payload;
        assert_eq!(status["client_connections"], 1);
        assert!(status["processed_cycles"].as_u64().unwrap() > 0);

        controller.stop().unwrap();
        stop.store(true, Ordering::Relaxed);
        audio.join().unwrap();

        let state = controller.control_state().unwrap();
        assert_eq!(state.parameter(ParamId::MASTER_GAIN), 0.5);
        assert_eq!(state.voice(VoiceId(0)).map(|v| v.note), Some(69));
    }

    #[test]
    fn test_backlogged_telemetry_keeps_voice_events() {
        init_logging();
        let config = MessagingConfig {
            wake_interval_ms: 200,
            ..Default::default()
        };
        let (mut controller, endpoint) = MessageController::new(config).unwrap();
        let events = capture_client(&controller, "ui1");

        // A slow control loop: 150 cycles of 64 frames before it ever drains
        let audio = thread::spawn(move || {
            let mut engine = Engine::new(endpoint);
            let mut buffer = [0.0f32; 64];
            for _ in 0..150 {
                engine.process(&mut buffer);
            }
            engine.note_on(60, 0.8);
            engine
        });
        let engine = audio.join().unwrap();
        assert_eq!(engine.state().active_voices(), 1);

        controller.start().unwrap();
        controller.waker().wake();
        let seen = collect_until(&events, s2c::CYCLE_REPORT);
        controller.stop().unwrap();

        let report: CycleReportPayload =
            serde_json::from_value(seen.last().unwrap().payload.clone()).unwrap();
        assert_eq!(report.cycles, 96);
        assert_eq!(report.frames, 96 * 64);
        assert_eq!(controller.stats().dropped_to_control, 0);

        let state = controller.control_state().unwrap();
        assert_eq!(state.voice(VoiceId(0)).map(|v| v.note), Some(60));
    }

    #[test]
    fn test_set_tuning_applies_to_later_notes() {
        init_logging();
        let (mut controller, endpoint) = MessageController::new(fast_config()).unwrap();
        let events = capture_client(&controller, "ui1");

        let stop = Arc::new(AtomicBool::new(false));
        let audio = spawn_audio(Engine::new(endpoint), Arc::clone(&stop));
        controller.start().unwrap();

        let mut cents = vec![0.0f32; 70];
        cents[69] = 100.0;
        controller
            .send_to_control::<SetTuning>(&TuningPayload { cents })
            .unwrap();
        controller
            .send_to_control::<NoteOn>(&NoteOnPayload {
                note: 69,
                velocity: 1.0,
            })
            .unwrap();

        let seen = collect_until(&events, s2c::VOICE_STATE_CHANGED);
        let started: VoiceStatePayload =
            serde_json::from_value(seen.last().unwrap().payload.clone()).unwrap();
        assert!(started.active);
        assert!((started.frequency_hz - 466.16).abs() < 0.01);

        wait_for("tuning slot to return", || {
            controller.stats().callback_slots.in_flight() == 0
        });
        controller.stop().unwrap();
        stop.store(true, Ordering::Relaxed);
        let engine = audio.join().unwrap();

        assert_eq!(engine.state().tuning().cents(69), 100.0);
        let mirror = controller.control_state().unwrap().voice(VoiceId(0)).unwrap();
        assert_eq!(mirror.frequency_hz, started.frequency_hz);
    }

    #[test]
    fn test_parameter_snapshot_lands_in_engine_and_slot_returns() {
        init_logging();
        let (mut controller, endpoint) = MessageController::new(fast_config()).unwrap();
        let events = capture_client(&controller, "ui1");
        let free_before = controller.stats().callback_slots.free;

        let stop = Arc::new(AtomicBool::new(false));
        let audio = spawn_audio(Engine::new(endpoint), Arc::clone(&stop));
        controller.start().unwrap();

        controller
            .send_to_control::<LoadParameterSnapshot>(&ParameterSnapshotPayload {
                values: vec![0.5, 0.7, 0.1],
            })
            .unwrap();
        ping(&controller, 4);

        let changed: Vec<ParameterPayload> = collect_until(&events, s2c::PONG)
            .into_iter()
            .filter(|e| e.id == s2c::PARAMETER_CHANGED)
            .map(|e| serde_json::from_value(e.payload).unwrap())
            .collect();
        assert_eq!(changed.len(), 3);
        assert_eq!(changed[1].param, ParamId(1));
        assert_eq!(changed[1].value, 0.7);

        wait_for("snapshot slot to return", || {
            let stats = controller.stats();
            stats.callbacks_scheduled == 1 && stats.callback_slots.free == free_before
        });
        controller.stop().unwrap();
        stop.store(true, Ordering::Relaxed);
        let engine = audio.join().unwrap();

        let state = controller.control_state().unwrap();
        for (index, value) in [0.5, 0.7, 0.1].into_iter().enumerate() {
            let param = ParamId(index as u16);
            assert_eq!(engine.state().parameter(param), value);
            assert_eq!(state.parameter(param), value);
        }
    }

    #[test]
    fn test_selected_voice_release_reports_selection() {
        init_logging();
        let (mut controller, endpoint) = MessageController::new(fast_config()).unwrap();
        let events = capture_client(&controller, "ui1");

        let stop = Arc::new(AtomicBool::new(false));
        let audio = spawn_audio(Engine::new(endpoint), Arc::clone(&stop));
        controller.start().unwrap();

        controller
            .send_raw_from_client(r#"{"id":10,"payload":{"note":64}}"#)
            .unwrap();
        collect_until(&events, s2c::VOICE_STATE_CHANGED);

        controller
            .send_to_control::<SelectVoice>(&SelectVoicePayload {
                voice: Some(VoiceId(0)),
            })
            .unwrap();
        let seen = collect_until(&events, s2c::SINGLE_SELECTION);
        let selected: SelectionPayload =
            serde_json::from_value(seen.last().unwrap().payload.clone()).unwrap();
        assert_eq!(selected.voice, Some(VoiceId(0)));
        assert_eq!(selected.note, Some(64));

        controller
            .send_raw_from_client(r#"{"id":11,"payload":{"note":64}}"#)
            .unwrap();
        let seen = collect_until(&events, s2c::SINGLE_SELECTION);
        let stopped = &seen[seen.len() - 2];
        assert_eq!(stopped.id, s2c::VOICE_STATE_CHANGED);
        assert_eq!(stopped.payload["active"], false);

        let released: SelectionPayload =
            serde_json::from_value(seen.last().unwrap().payload.clone()).unwrap();
        assert_eq!(released.voice, Some(VoiceId(0)));
        assert_eq!(released.note, None);

        controller.stop().unwrap();
        stop.store(true, Ordering::Relaxed);
        audio.join().unwrap();
        assert_eq!(controller.control_state().unwrap().selected(), Some(VoiceId(0)));
    }

    #[test]
    fn test_panicking_client_callback_ends_control_thread() {
        init_logging();
        let (mut controller, _endpoint) = MessageController::new(fast_config()).unwrap();
        let (tx, rx) = crossbeam::channel::unbounded();
        controller.register_client("ui1", move |_text: &str| {
            let _ = tx.send(());
            panic!("client bug");
        });
        controller.start().unwrap();

        ping(&controller, 5);
        rx.recv_timeout(TIMEOUT).unwrap();
        controller.stop().unwrap();

        assert_eq!(controller.state(), ControllerState::Stopped);
        assert!(!controller.is_running());
        assert!(controller.control_state().is_none());
        // The registration is still readable after the panic
        controller.unregister_client();
        assert_eq!(controller.connected_clients(), 0);
    }

    #[test]
    fn test_drop_while_running_stops_thread() {
        init_logging();
        let (mut controller, _endpoint) = MessageController::new(fast_config()).unwrap();
        controller.start().unwrap();
        let waker = controller.waker();
        drop(controller);
        // Control thread joined; waking a stopped loop is harmless
        waker.wake();
    }
}
