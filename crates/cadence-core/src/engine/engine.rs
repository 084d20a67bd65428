//! Main engine - owns renderable state and the audio end of the messaging layer

use std::f32::consts::TAU;
use std::sync::Arc;

use basedrop::{Handle, Shared};

use crate::messaging::{AudioEndpoint, AudioToControl, ControlToAudio};
use crate::types::{NoteNumber, ParamId, VoiceId, MAX_VOICES, NUM_PARAMS, SAMPLE_RATE};

use super::{EngineAtomics, TuningTable};

/// Default master gain, leaves headroom for a handful of voices
pub const DEFAULT_MASTER_GAIN: f32 = 0.25;

#[derive(Debug, Clone, Copy, Default)]
struct Voice {
    active: bool,
    note: NoteNumber,
    velocity: f32,
    frequency_hz: f32,
    phase: f32,
    started_at: u64,
}

/// Public view of one sounding voice
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceInfo {
    pub voice: VoiceId,
    pub note: NoteNumber,
    pub velocity: f32,
    pub frequency_hz: f32,
}

/// Renderable engine state
///
/// Only ever mutated on the audio thread: by [`Engine`] while it drains the
/// control queue, or by a scheduled callback that receives `&mut EngineState`.
pub struct EngineState {
    voices: [Voice; MAX_VOICES],
    parameters: [f32; NUM_PARAMS],
    tuning: Shared<TuningTable>,
    sample_rate: f32,
    sample_position: u64,
}

impl EngineState {
    /// Create state with 12-TET tuning; `gc` owns the tuning allocation
    pub fn new(gc: &Handle) -> Self {
        let mut parameters = [0.0; NUM_PARAMS];
        parameters[ParamId::MASTER_GAIN.index()] = DEFAULT_MASTER_GAIN;

        Self {
            voices: [Voice::default(); MAX_VOICES],
            parameters,
            tuning: Shared::new(gc, TuningTable::equal_temperament()),
            sample_rate: SAMPLE_RATE as f32,
            sample_position: 0,
        }
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate.max(1) as f32;
        self
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn sample_position(&self) -> u64 {
        self.sample_position
    }

    /// Current value of a parameter (0.0 for unknown ids)
    pub fn parameter(&self, param: ParamId) -> f32 {
        self.parameters.get(param.index()).copied().unwrap_or(0.0)
    }

    /// Set a parameter. Returns `false` for unknown ids or non-finite values.
    pub fn set_parameter(&mut self, param: ParamId, value: f32) -> bool {
        match self.parameters.get_mut(param.index()) {
            Some(slot) if value.is_finite() => {
                *slot = value;
                true
            }
            _ => false,
        }
    }

    /// Copy a block of parameter values starting at id 0
    ///
    /// Extra values are ignored; non-finite values leave the parameter as is.
    pub fn load_parameters(&mut self, values: &[f32]) {
        for (slot, &value) in self.parameters.iter_mut().zip(values) {
            if value.is_finite() {
                *slot = value;
            }
        }
    }

    pub fn tuning(&self) -> &TuningTable {
        &self.tuning
    }

    /// Install a new tuning table, returning the previous one
    ///
    /// Dropping the returned value on the audio thread is allocation-free:
    /// its memory is released by the collector on the control thread.
    pub fn replace_tuning(&mut self, table: Shared<TuningTable>) -> Shared<TuningTable> {
        std::mem::replace(&mut self.tuning, table)
    }

    /// Details of a sounding voice
    pub fn voice(&self, voice: VoiceId) -> Option<VoiceInfo> {
        self.voices
            .get(voice.index())
            .filter(|v| v.active)
            .map(|v| VoiceInfo {
                voice,
                note: v.note,
                velocity: v.velocity,
                frequency_hz: v.frequency_hz,
            })
    }

    pub fn active_voices(&self) -> usize {
        self.voices.iter().filter(|v| v.active).count()
    }

    /// Start a voice for `note`, stealing the oldest one if all are busy
    ///
    /// Returns the started voice and, when stealing, the note that was cut.
    fn start_voice(
        &mut self,
        note: NoteNumber,
        velocity: f32,
    ) -> (VoiceInfo, Option<NoteNumber>) {
        let index = self
            .voices
            .iter()
            .position(|v| !v.active)
            .or_else(|| {
                self.voices
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, v)| v.started_at)
                    .map(|(i, _)| i)
            })
            .unwrap_or(0);

        let stolen = self.voices[index].active.then_some(self.voices[index].note);
        let frequency_hz = self.tuning.frequency(note);
        self.voices[index] = Voice {
            active: true,
            note,
            velocity,
            frequency_hz,
            phase: 0.0,
            started_at: self.sample_position,
        };

        let info = VoiceInfo {
            voice: VoiceId(index as u16),
            note,
            velocity,
            frequency_hz,
        };
        (info, stolen)
    }

    /// Release every voice playing `note` (or all voices for `None`)
    fn stop_voices(
        &mut self,
        note: Option<NoteNumber>,
        mut on_stop: impl FnMut(VoiceId, NoteNumber),
    ) {
        for (index, voice) in self.voices.iter_mut().enumerate() {
            if voice.active && note.is_none_or(|n| n == voice.note) {
                voice.active = false;
                on_stop(VoiceId(index as u16), voice.note);
            }
        }
    }

    /// Sum of sines, one per active voice
    fn render(&mut self, output: &mut [f32]) {
        output.fill(0.0);
        let gain = self.parameters[ParamId::MASTER_GAIN.index()];

        for voice in self.voices.iter_mut().filter(|v| v.active) {
            let step = voice.frequency_hz / self.sample_rate;
            let amplitude = voice.velocity * gain;
            for sample in output.iter_mut() {
                *sample += (voice.phase * TAU).sin() * amplitude;
                voice.phase = (voice.phase + step).fract();
            }
        }
        self.sample_position += output.len() as u64;
    }
}

/// The audio engine
///
/// Lives on the audio thread. [`Engine::process`] is the thread-checked
/// entry point called once per audio cycle.
pub struct Engine {
    audio: AudioEndpoint,
    state: EngineState,
    telemetry: PendingTelemetry,
}

/// Cycles rendered since the last `CycleReport` went out
#[derive(Debug, Default, Clone, Copy)]
struct PendingTelemetry {
    cycles: u16,
    frames: u32,
}

impl Engine {
    /// Create an engine around the audio end of a message controller
    pub fn new(audio: AudioEndpoint) -> Self {
        let state = EngineState::new(&audio.gc);
        Self {
            audio,
            state,
            telemetry: PendingTelemetry::default(),
        }
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.state = self.state.with_sample_rate(sample_rate);
        self
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    /// Lock-free mirror shared with the control thread
    pub fn atomics(&self) -> Arc<EngineAtomics> {
        Arc::clone(&self.audio.atomics)
    }

    /// Whether a client is registered on the control side
    pub fn client_connected(&self) -> bool {
        self.audio.client_connected()
    }

    /// Run one audio cycle
    ///
    /// Applies every control message queued before this call, then renders
    /// `output`. Messages queued while this runs wait for the next cycle.
    pub fn process(&mut self, output: &mut [f32]) {
        let on_audio_thread = self.audio.enter_cycle();
        debug_assert!(
            on_audio_thread,
            "Engine::process called from a second audio thread"
        );
        if !on_audio_thread {
            output.fill(0.0);
            return;
        }

        self.drain_control_messages();
        self.state.render(output);

        let active = self.state.active_voices() as u16;
        self.audio
            .atomics
            .publish(self.state.sample_position, active as u32);

        if self.audio.client_connected() {
            self.report_cycle(output.len(), active);
        } else {
            self.telemetry = PendingTelemetry::default();
        }
    }

    /// Fold this cycle into the pending report and send it if there is room
    fn report_cycle(&mut self, frames: usize, active_voices: u16) {
        let pending = &mut self.telemetry;
        pending.cycles = pending.cycles.saturating_add(1);
        pending.frames = pending.frames.saturating_add(frames as u32);

        if !self.audio.has_telemetry_room() {
            return;
        }
        let report = AudioToControl::CycleReport {
            cycles: pending.cycles,
            frames: pending.frames,
            active_voices,
        };
        if self.audio.send_to_control(report) {
            self.telemetry = PendingTelemetry::default();
        }
    }

    /// Let a different thread call [`process`](Self::process) from now on
    pub fn release_audio_thread(&self) {
        self.audio.release_audio_thread();
    }

    /// Start a note (audio thread, e.g. host MIDI input)
    pub fn note_on(&mut self, note: NoteNumber, velocity: f32) {
        let (started, stolen) = self.state.start_voice(note, velocity.clamp(0.0, 1.0));
        if let Some(stolen_note) = stolen {
            self.audio.send_to_control(AudioToControl::VoiceStopped {
                voice: started.voice,
                note: stolen_note,
            });
        }
        self.audio.send_to_control(AudioToControl::VoiceStarted {
            voice: started.voice,
            note,
            velocity: started.velocity,
            frequency_hz: started.frequency_hz,
        });
    }

    /// Release a note (audio thread)
    pub fn note_off(&mut self, note: NoteNumber) {
        let audio = &mut self.audio;
        self.state.stop_voices(Some(note), |voice, note| {
            audio.send_to_control(AudioToControl::VoiceStopped { voice, note });
        });
    }

    /// Release every voice (audio thread)
    pub fn all_notes_off(&mut self) {
        let audio = &mut self.audio;
        self.state.stop_voices(None, |voice, note| {
            audio.send_to_control(AudioToControl::VoiceStopped { voice, note });
        });
    }

    fn drain_control_messages(&mut self) {
        let pending = self.audio.from_control.len();
        for _ in 0..pending {
            let Some(message) = self.audio.from_control.try_dequeue() else {
                break;
            };
            match message {
                ControlToAudio::RunCallback { slot } => {
                    if self.audio.runner.run(slot, &mut self.state)
                        && !self.audio.send_to_control(AudioToControl::CallbackReturned { slot })
                    {
                        self.audio.runner.mark_orphaned(slot);
                    }
                }
                ControlToAudio::NoteOn { note, velocity } => self.note_on(note, velocity),
                ControlToAudio::NoteOff { note } => self.note_off(note),
                ControlToAudio::AllNotesOff => self.all_notes_off(),
                ControlToAudio::SetParameter { param, value } => {
                    if self.state.set_parameter(param, value) {
                        self.audio
                            .send_to_control(AudioToControl::ParameterChanged { param, value });
                    }
                }
            }
        }
    }
}
