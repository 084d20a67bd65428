//! Common types for Cadence
//!
//! Fixed engine dimensions and the small identifiers that travel inside
//! fixed audio messages. Everything here is `Copy` and heap-free.

use serde::{Deserialize, Serialize};

/// Default sample rate used by the headless host
pub const SAMPLE_RATE: u32 = 48000;

/// Maximum number of simultaneously sounding voices
pub const MAX_VOICES: usize = 32;

/// Number of engine parameters addressable by [`ParamId`]
pub const NUM_PARAMS: usize = 64;

/// Number of MIDI note numbers (0-127)
pub const NUM_NOTES: usize = 128;

/// MIDI note number
pub type NoteNumber = u8;

/// Index of a voice slot in the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoiceId(pub u16);

impl VoiceId {
    /// Create a voice id, rejecting indices past [`MAX_VOICES`]
    pub fn new(index: usize) -> Option<Self> {
        (index < MAX_VOICES).then_some(Self(index as u16))
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of an engine parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamId(pub u16);

impl ParamId {
    /// Master output gain, linear
    pub const MASTER_GAIN: ParamId = ParamId(0);

    /// Create a parameter id, rejecting indices past [`NUM_PARAMS`]
    pub fn new(index: usize) -> Option<Self> {
        (index < NUM_PARAMS).then_some(Self(index as u16))
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Whether this id addresses an existing parameter
    pub fn is_valid(self) -> bool {
        self.index() < NUM_PARAMS
    }
}
