//! Control-side mirror of engine state
//!
//! Rebuilt from the audio → control event stream, so the control thread
//! can answer client queries without reading audio-owned memory.

use crate::engine::DEFAULT_MASTER_GAIN;
use crate::types::{NoteNumber, ParamId, VoiceId, MAX_VOICES, NUM_PARAMS};

/// Last known state of one sounding voice
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceMirror {
    pub note: NoteNumber,
    pub velocity: f32,
    pub frequency_hz: f32,
}

/// Derived state owned by the control thread
#[derive(Debug, Clone)]
pub struct ControlState {
    voices: [Option<VoiceMirror>; MAX_VOICES],
    parameters: [f32; NUM_PARAMS],
    selected: Option<VoiceId>,
}

impl ControlState {
    pub fn new() -> Self {
        let mut parameters = [0.0; NUM_PARAMS];
        parameters[ParamId::MASTER_GAIN.index()] = DEFAULT_MASTER_GAIN;
        Self {
            voices: [None; MAX_VOICES],
            parameters,
            selected: None,
        }
    }

    pub fn voice(&self, voice: VoiceId) -> Option<VoiceMirror> {
        self.voices.get(voice.index()).copied().flatten()
    }

    pub fn active_voices(&self) -> usize {
        self.voices.iter().flatten().count()
    }

    pub fn parameter(&self, param: ParamId) -> f32 {
        self.parameters.get(param.index()).copied().unwrap_or(0.0)
    }

    pub fn selected(&self) -> Option<VoiceId> {
        self.selected
    }

    pub(crate) fn select(&mut self, voice: Option<VoiceId>) {
        self.selected = voice;
    }

    pub(crate) fn set_parameter(&mut self, param: ParamId, value: f32) {
        if let Some(slot) = self.parameters.get_mut(param.index()) {
            *slot = value;
        }
    }

    pub(crate) fn voice_started(&mut self, voice: VoiceId, mirror: VoiceMirror) {
        if let Some(slot) = self.voices.get_mut(voice.index()) {
            *slot = Some(mirror);
        }
    }

    /// Forget a voice if it is still playing `note`
    ///
    /// Returns whether the mirror changed. A stop for a note the voice no
    /// longer plays (it was stolen and restarted) is ignored.
    pub(crate) fn voice_stopped(&mut self, voice: VoiceId, note: NoteNumber) -> bool {
        match self.voices.get_mut(voice.index()) {
            Some(slot) if slot.is_some_and(|v| v.note == note) => {
                *slot = None;
                true
            }
            _ => false,
        }
    }
}

impl Default for ControlState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mirror(note: NoteNumber) -> VoiceMirror {
        VoiceMirror {
            note,
            velocity: 1.0,
            frequency_hz: 440.0,
        }
    }

    #[test]
    fn test_voice_lifecycle() {
        let mut state = ControlState::new();
        state.voice_started(VoiceId(4), mirror(69));
        assert_eq!(state.active_voices(), 1);
        assert_eq!(state.voice(VoiceId(4)).map(|v| v.note), Some(69));

        // Stale stop for a different note
        assert!(!state.voice_stopped(VoiceId(4), 60));
        assert!(state.voice_stopped(VoiceId(4), 69));
        assert_eq!(state.voice(VoiceId(4)), None);
    }

    #[test]
    fn test_out_of_range_ids_ignored() {
        let mut state = ControlState::new();
        state.voice_started(VoiceId(MAX_VOICES as u16), mirror(1));
        state.set_parameter(ParamId(NUM_PARAMS as u16), 1.0);

        assert_eq!(state.active_voices(), 0);
        assert_eq!(state.parameter(ParamId::MASTER_GAIN), DEFAULT_MASTER_GAIN);
    }
}
