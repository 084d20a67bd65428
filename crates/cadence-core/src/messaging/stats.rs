//! Controller counters
//!
//! Updated by the control thread with relaxed atomics, read from any thread
//! through [`MessageController::stats`](super::MessageController::stats).

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

use super::callbacks::PoolStats;

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub(crate) envelopes_handled: AtomicU64,
    pub(crate) protocol_errors: AtomicU64,
    pub(crate) audio_messages_drained: AtomicU64,
    pub(crate) events_delivered: AtomicU64,
    pub(crate) events_discarded: AtomicU64,
    pub(crate) callbacks_scheduled: AtomicU64,
    pub(crate) dropped_to_control: AtomicU64,
    pub(crate) dropped_to_audio: AtomicU64,
    pub(crate) pool_allocated: AtomicUsize,
    pub(crate) pool_free: AtomicUsize,
}

impl StatsCounters {
    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn publish_pool(&self, pool: PoolStats) {
        self.pool_allocated.store(pool.allocated, Ordering::Relaxed);
        self.pool_free.store(pool.free, Ordering::Relaxed);
    }

    pub(crate) fn publish_drops(&self, to_control: u64, to_audio: u64) {
        self.dropped_to_control.store(to_control, Ordering::Relaxed);
        self.dropped_to_audio.store(to_audio, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ControllerStats {
        ControllerStats {
            envelopes_handled: self.envelopes_handled.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            audio_messages_drained: self.audio_messages_drained.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            events_discarded: self.events_discarded.load(Ordering::Relaxed),
            callbacks_scheduled: self.callbacks_scheduled.load(Ordering::Relaxed),
            dropped_to_control: self.dropped_to_control.load(Ordering::Relaxed),
            dropped_to_audio: self.dropped_to_audio.load(Ordering::Relaxed),
            callback_slots: PoolStats {
                allocated: self.pool_allocated.load(Ordering::Relaxed),
                free: self.pool_free.load(Ordering::Relaxed),
            },
        }
    }
}

/// Point-in-time view of the controller's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ControllerStats {
    /// Client envelopes taken off the inbound queue
    pub envelopes_handled: u64,
    /// Envelopes answered with a `ProtocolError`
    pub protocol_errors: u64,
    /// Fixed messages drained from the audio thread
    pub audio_messages_drained: u64,
    /// Events handed to the client callback
    pub events_delivered: u64,
    /// Events dropped because no client was registered
    pub events_discarded: u64,
    pub callbacks_scheduled: u64,
    pub dropped_to_control: u64,
    pub dropped_to_audio: u64,
    /// Callback pool occupancy as of the last control loop iteration
    pub callback_slots: PoolStats,
}
