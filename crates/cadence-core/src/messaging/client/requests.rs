//! Client → control requests
//!
//! Handlers run on the control thread. They validate their payload, update
//! control-side state and forward mutations to the audio thread as fixed
//! messages or scheduled callbacks. They never touch engine state directly.

use basedrop::Shared;
use serde::{Deserialize, Serialize};

use crate::engine::{EngineState, TuningTable};
use crate::messaging::audio::ControlToAudio;
use crate::messaging::control_thread::ControlContext;
use crate::messaging::registry::ClientToControl;
use crate::messaging::{MessageId, MessagingError, MessagingResult};
use crate::types::{NoteNumber, ParamId, VoiceId, MAX_VOICES, NUM_NOTES, NUM_PARAMS};

use super::events::{self, EngineStatusPayload, ParameterPayload, PongPayload, SelectionPayload};
use super::ids::c2s;

fn invalid(name: &'static str, reason: String) -> MessagingError {
    MessagingError::InvalidPayload { name, reason }
}

fn check_note(name: &'static str, note: NoteNumber) -> MessagingResult<()> {
    if (note as usize) < NUM_NOTES {
        Ok(())
    } else {
        Err(invalid(name, format!("note {} is out of range", note)))
    }
}

fn check_finite(name: &'static str, values: &[f32]) -> MessagingResult<()> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(index) => Err(invalid(name, format!("value at index {} is not finite", index))),
        None => Ok(()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingPayload {
    #[serde(default)]
    pub token: u64,
}

/// Round-trip check; answered with `Pong`
pub struct Ping;

impl ClientToControl for Ping {
    const ID: MessageId = c2s::PING;
    const NAME: &'static str = "Ping";
    type Payload = PingPayload;

    fn execute(payload: PingPayload, ctx: &mut ControlContext<'_>) -> MessagingResult<()> {
        ctx.send_to_client::<events::Pong>(&PongPayload { token: payload.token })?;
        Ok(())
    }
}

/// Answered with `EngineStatus`
pub struct RequestEngineStatus;

impl ClientToControl for RequestEngineStatus {
    const ID: MessageId = c2s::REQUEST_ENGINE_STATUS;
    const NAME: &'static str = "RequestEngineStatus";
    type Payload = ();

    fn execute(_: (), ctx: &mut ControlContext<'_>) -> MessagingResult<()> {
        let engine = ctx.engine();
        let status = EngineStatusPayload {
            processed_cycles: engine.processed_cycles(),
            sample_position: engine.sample_position(),
            active_voices: engine.active_voices(),
            client_connections: ctx.client_connections(),
            callback_slots: ctx.pool_stats(),
            dropped_to_control: ctx.dropped_to_control(),
            dropped_to_audio: ctx.dropped_to_audio(),
        };
        ctx.send_to_client::<events::EngineStatus>(&status)?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Notes
// ─────────────────────────────────────────────────────────────────────────────

fn default_velocity() -> f32 {
    1.0
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoteOnPayload {
    pub note: NoteNumber,
    /// 0.0 - 1.0, defaults to full velocity
    #[serde(default = "default_velocity")]
    pub velocity: f32,
}

pub struct NoteOn;

impl ClientToControl for NoteOn {
    const ID: MessageId = c2s::NOTE_ON;
    const NAME: &'static str = "NoteOn";
    type Payload = NoteOnPayload;

    fn execute(payload: NoteOnPayload, ctx: &mut ControlContext<'_>) -> MessagingResult<()> {
        check_note(Self::NAME, payload.note)?;
        if !(0.0..=1.0).contains(&payload.velocity) {
            return Err(invalid(
                Self::NAME,
                format!("velocity {} is outside 0.0-1.0", payload.velocity),
            ));
        }
        ctx.send_to_audio(ControlToAudio::NoteOn {
            note: payload.note,
            velocity: payload.velocity,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteOffPayload {
    pub note: NoteNumber,
}

pub struct NoteOff;

impl ClientToControl for NoteOff {
    const ID: MessageId = c2s::NOTE_OFF;
    const NAME: &'static str = "NoteOff";
    type Payload = NoteOffPayload;

    fn execute(payload: NoteOffPayload, ctx: &mut ControlContext<'_>) -> MessagingResult<()> {
        check_note(Self::NAME, payload.note)?;
        ctx.send_to_audio(ControlToAudio::NoteOff { note: payload.note })
    }
}

pub struct AllNotesOff;

impl ClientToControl for AllNotesOff {
    const ID: MessageId = c2s::ALL_NOTES_OFF;
    const NAME: &'static str = "AllNotesOff";
    type Payload = ();

    fn execute(_: (), ctx: &mut ControlContext<'_>) -> MessagingResult<()> {
        ctx.send_to_audio(ControlToAudio::AllNotesOff)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Parameters
// ─────────────────────────────────────────────────────────────────────────────

/// Set one parameter; the engine echoes `ParameterChanged` once applied
pub struct SetParameter;

impl ClientToControl for SetParameter {
    const ID: MessageId = c2s::SET_PARAMETER;
    const NAME: &'static str = "SetParameter";
    type Payload = ParameterPayload;

    fn execute(payload: ParameterPayload, ctx: &mut ControlContext<'_>) -> MessagingResult<()> {
        if !payload.param.is_valid() {
            return Err(invalid(Self::NAME, format!("unknown parameter {}", payload.param.0)));
        }
        check_finite(Self::NAME, &[payload.value])?;
        ctx.send_to_audio(ControlToAudio::SetParameter {
            param: payload.param,
            value: payload.value,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSnapshotPayload {
    /// Values for parameters 0..values.len()
    pub values: Vec<f32>,
}

/// Replace a block of parameters in one audio cycle
///
/// The values travel to the audio thread inside a scheduled callback, so the
/// whole block lands atomically with respect to rendering.
pub struct LoadParameterSnapshot;

impl ClientToControl for LoadParameterSnapshot {
    const ID: MessageId = c2s::LOAD_PARAMETER_SNAPSHOT;
    const NAME: &'static str = "LoadParameterSnapshot";
    type Payload = ParameterSnapshotPayload;

    fn execute(
        payload: ParameterSnapshotPayload,
        ctx: &mut ControlContext<'_>,
    ) -> MessagingResult<()> {
        let values = payload.values;
        if values.len() > NUM_PARAMS {
            return Err(invalid(
                Self::NAME,
                format!("{} values for {} parameters", values.len(), NUM_PARAMS),
            ));
        }
        check_finite(Self::NAME, &values)?;

        let mirrored = values.clone();
        ctx.schedule_audio_callback(move |state: &mut EngineState| {
            state.load_parameters(&values)
        })?;

        for (index, value) in mirrored.into_iter().enumerate() {
            let param = ParamId(index as u16);
            ctx.state_mut().set_parameter(param, value);
            ctx.send_to_client::<events::ParameterChanged>(&ParameterPayload { param, value })?;
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tuning
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TuningPayload {
    /// Cent offsets from 12-TET, starting at note 0
    pub cents: Vec<f32>,
}

/// Swap the engine's tuning table
///
/// Affects voices started after the swap. The replaced table is freed on
/// the control thread by the garbage collector.
pub struct SetTuning;

impl ClientToControl for SetTuning {
    const ID: MessageId = c2s::SET_TUNING;
    const NAME: &'static str = "SetTuning";
    type Payload = TuningPayload;

    fn execute(payload: TuningPayload, ctx: &mut ControlContext<'_>) -> MessagingResult<()> {
        if payload.cents.len() > NUM_NOTES {
            return Err(invalid(
                Self::NAME,
                format!("{} offsets for {} notes", payload.cents.len(), NUM_NOTES),
            ));
        }
        check_finite(Self::NAME, &payload.cents)?;

        let table = TuningTable::from_cents(&payload.cents);
        let mut table = Some(Shared::new(&ctx.gc_handle(), table));
        ctx.schedule_audio_callback(move |state: &mut EngineState| {
            if let Some(table) = table.take() {
                drop(state.replace_tuning(table));
            }
        })?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Selection
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectVoicePayload {
    /// `None` clears the selection
    #[serde(default)]
    pub voice: Option<VoiceId>,
}

/// Select a voice for inspection; answered with `SingleSelection`
pub struct SelectVoice;

impl ClientToControl for SelectVoice {
    const ID: MessageId = c2s::SELECT_VOICE;
    const NAME: &'static str = "SelectVoice";
    type Payload = SelectVoicePayload;

    fn execute(payload: SelectVoicePayload, ctx: &mut ControlContext<'_>) -> MessagingResult<()> {
        if let Some(voice) = payload.voice {
            if voice.index() >= MAX_VOICES {
                return Err(invalid(Self::NAME, format!("voice {} does not exist", voice.0)));
            }
        }

        ctx.state_mut().select(payload.voice);
        let selection = SelectionPayload {
            voice: payload.voice,
            note: payload
                .voice
                .and_then(|voice| ctx.state().voice(voice))
                .map(|mirror| mirror.note),
        };
        ctx.send_to_client::<events::SingleSelection>(&selection)?;
        Ok(())
    }
}
