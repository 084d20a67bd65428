//! Audio-thread end of the messaging layer

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use basedrop::Handle;

use crate::engine::EngineAtomics;

use super::audio::{AudioToControl, AudioToControlSender, ControlToAudioReceiver};
use super::callbacks::CallbackRunner;
use super::thread_check::{ThreadRole, ThreadRoles};

/// Everything the audio thread needs to talk to the control thread
///
/// Returned once by [`MessageController::new`](super::MessageController::new)
/// and moved into the [`Engine`](crate::engine::Engine). Holding the only
/// audio→control producer and control→audio consumer is what keeps those
/// queues single-producer/single-consumer.
pub struct AudioEndpoint {
    pub(crate) to_control: AudioToControlSender,
    pub(crate) from_control: ControlToAudioReceiver,
    pub(crate) runner: CallbackRunner,
    pub(crate) roles: Arc<ThreadRoles>,
    pub(crate) connections: Arc<AtomicUsize>,
    pub(crate) atomics: Arc<EngineAtomics>,
    pub(crate) gc: Handle,
}

impl AudioEndpoint {
    /// Send a fixed message to the control thread (audio thread only)
    ///
    /// Never blocks. Returns `false` when the queue is full; the drop is
    /// counted and reported later by the control thread.
    #[inline]
    pub fn send_to_control(&mut self, message: AudioToControl) -> bool {
        debug_assert!(
            !self.roles.is_bound(ThreadRole::Audio) || self.roles.is_current(ThreadRole::Audio),
            "send_to_control called off the audio thread"
        );
        self.to_control.try_enqueue(message)
    }

    /// Whether the audio→control queue can take optional traffic
    ///
    /// A quarter of the queue stays reserved for state-bearing messages.
    #[inline]
    pub(crate) fn has_telemetry_room(&self) -> bool {
        let reserve = (self.to_control.capacity() / 4).max(1);
        self.to_control.free_slots() > reserve
    }

    /// Whether a client is currently registered
    #[inline]
    pub fn client_connected(&self) -> bool {
        self.connections.load(Ordering::Relaxed) > 0
    }

    /// Handle for allocating data the engine may later drop
    pub fn gc_handle(&self) -> Handle {
        self.gc.clone()
    }

    /// Bind the calling thread as the audio thread, or confirm it already is
    ///
    /// Returns `false` if a different thread holds the audio role.
    #[inline]
    pub(crate) fn enter_cycle(&self) -> bool {
        self.roles.claim_or_check(ThreadRole::Audio)
    }

    /// Give up the audio role, e.g. when the host moves processing to a
    /// new thread after a device change
    pub fn release_audio_thread(&self) {
        self.roles.clear(ThreadRole::Audio);
    }
}
