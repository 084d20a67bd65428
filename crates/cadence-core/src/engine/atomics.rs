//! Lock-free engine state mirror
//!
//! Written by the audio thread at the end of every cycle with relaxed
//! stores; read by the control thread for status replies. Values may be
//! one cycle stale, which is fine for display.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct EngineAtomics {
    /// Completed `Engine::process` calls
    pub processed_cycles: AtomicU64,
    /// Samples rendered since the engine was created
    pub sample_position: AtomicU64,
    /// Voices sounding at the end of the last cycle
    pub active_voices: AtomicU32,
}

impl EngineAtomics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn processed_cycles(&self) -> u64 {
        self.processed_cycles.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn sample_position(&self) -> u64 {
        self.sample_position.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn active_voices(&self) -> u32 {
        self.active_voices.load(Ordering::Relaxed)
    }

    /// Publish the end-of-cycle snapshot (audio thread)
    #[inline]
    pub(crate) fn publish(&self, sample_position: u64, active_voices: u32) {
        self.sample_position.store(sample_position, Ordering::Relaxed);
        self.active_voices.store(active_voices, Ordering::Relaxed);
        self.processed_cycles.fetch_add(1, Ordering::Relaxed);
    }
}
