//! Fixed audio ↔ control message set
//!
//! The only payloads allowed on the real-time path. Both enums are `Copy`
//! (so they cannot own heap data) and their size is bounded at compile
//! time, which keeps the SPSC queue element size fixed and predictable.
//!
//! Decoding is a closed `match` on each side: the engine matches
//! [`ControlToAudio`] once per cycle before rendering, and the control
//! thread matches [`AudioToControl`] whenever it wakes.

use crate::types::{NoteNumber, ParamId, VoiceId};

use super::callbacks::SlotIndex;
use super::spsc::{SpscReceiver, SpscSender};

/// Upper bound on either fixed message, in bytes
pub const MAX_FIXED_MESSAGE_SIZE: usize = 16;

/// Messages the audio thread sends to the control thread
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AudioToControl {
    /// A voice started sounding
    VoiceStarted {
        voice: VoiceId,
        note: NoteNumber,
        velocity: f32,
        /// Frequency after the active tuning table was applied
        frequency_hz: f32,
    },
    /// A voice was released (note off, all-notes-off or stolen)
    VoiceStopped { voice: VoiceId, note: NoteNumber },
    /// The engine applied a parameter value
    ParameterChanged { param: ParamId, value: f32 },
    /// A scheduled callback ran; the slot can be recycled
    CallbackReturned { slot: SlotIndex },
    /// Telemetry, only emitted while a client is connected
    ///
    /// Covers every cycle since the previous report. The engine holds
    /// reports back while the queue is short on space.
    CycleReport {
        cycles: u16,
        frames: u32,
        active_voices: u16,
    },
}

/// Messages the control thread sends to the audio thread
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlToAudio {
    /// Run the callback stored in this pool slot, exactly once
    RunCallback { slot: SlotIndex },
    NoteOn { note: NoteNumber, velocity: f32 },
    NoteOff { note: NoteNumber },
    AllNotesOff,
    SetParameter { param: ParamId, value: f32 },
}

const _: () = assert!(std::mem::size_of::<AudioToControl>() <= MAX_FIXED_MESSAGE_SIZE);
const _: () = assert!(std::mem::size_of::<ControlToAudio>() <= MAX_FIXED_MESSAGE_SIZE);

/// Which way a fixed message travels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueDirection {
    AudioToControl,
    ControlToAudio,
}

impl std::fmt::Display for QueueDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AudioToControl => write!(f, "audio→control"),
            Self::ControlToAudio => write!(f, "control→audio"),
        }
    }
}

/// Audio-side producer of [`AudioToControl`]
pub type AudioToControlSender = SpscSender<AudioToControl>;
/// Control-side consumer of [`AudioToControl`]
pub type AudioToControlReceiver = SpscReceiver<AudioToControl>;
/// Control-side producer of [`ControlToAudio`]
pub type ControlToAudioSender = SpscSender<ControlToAudio>;
/// Audio-side consumer of [`ControlToAudio`]
pub type ControlToAudioReceiver = SpscReceiver<ControlToAudio>;
