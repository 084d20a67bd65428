//! Control → client events

use serde::{Deserialize, Serialize};

use crate::messaging::callbacks::PoolStats;
use crate::messaging::registry::ControlToClient;
use crate::messaging::{MessageId, MessagingError};
use crate::types::{NoteNumber, ParamId, VoiceId};

use super::ids::s2c;
use super::ClientHandler;

// ─────────────────────────────────────────────────────────────────────────────
// Payloads
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PongPayload {
    /// Echo of the token sent with the ping
    pub token: u64,
}

/// Snapshot of engine and messaging health
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStatusPayload {
    pub processed_cycles: u64,
    pub sample_position: u64,
    pub active_voices: u32,
    pub client_connections: usize,
    pub callback_slots: PoolStats,
    /// Messages lost to a full audio → control queue since start
    pub dropped_to_control: u64,
    /// Messages lost to a full control → audio queue since start
    pub dropped_to_audio: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoiceStatePayload {
    pub voice: VoiceId,
    pub note: NoteNumber,
    pub active: bool,
    /// Zero for stopped voices
    pub velocity: f32,
    pub frequency_hz: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterPayload {
    pub param: ParamId,
    pub value: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionPayload {
    pub voice: Option<VoiceId>,
    /// Note of the selected voice, if it is sounding
    pub note: Option<NoteNumber>,
}

/// Cycle telemetry, coalesced per control loop iteration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReportPayload {
    /// Audio cycles covered by this report
    pub cycles: u32,
    /// Frames rendered across those cycles
    pub frames: u64,
    /// Active voices at the last covered cycle
    pub active_voices: u16,
}

/// Why a request was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolErrorKind {
    UnknownIdentifier,
    MalformedEnvelope,
    InvalidPayload,
    QueueFull,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolErrorPayload {
    pub kind: ProtocolErrorKind,
    /// Identifier of the offending request, when it could be read
    pub id: Option<MessageId>,
    pub message: String,
}

impl ProtocolErrorPayload {
    pub fn from_error(id: Option<MessageId>, error: &MessagingError) -> Self {
        let kind = match error {
            MessagingError::UnknownIdentifier(_) => ProtocolErrorKind::UnknownIdentifier,
            MessagingError::MalformedEnvelope(_) => ProtocolErrorKind::MalformedEnvelope,
            MessagingError::Deserialization { .. } | MessagingError::InvalidPayload { .. } => {
                ProtocolErrorKind::InvalidPayload
            }
            MessagingError::QueueFull(_) => ProtocolErrorKind::QueueFull,
            _ => ProtocolErrorKind::Internal,
        };
        Self {
            kind,
            id,
            message: error.to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Event types
// ─────────────────────────────────────────────────────────────────────────────

/// Reply to `Ping`
pub struct Pong;

impl ControlToClient for Pong {
    const ID: MessageId = s2c::PONG;
    const NAME: &'static str = "Pong";
    type Payload = PongPayload;

    fn deliver(payload: PongPayload, handler: &mut dyn ClientHandler) {
        handler.on_pong(payload);
    }
}

/// Reply to `RequestEngineStatus`
pub struct EngineStatus;

impl ControlToClient for EngineStatus {
    const ID: MessageId = s2c::ENGINE_STATUS;
    const NAME: &'static str = "EngineStatus";
    type Payload = EngineStatusPayload;

    fn deliver(payload: EngineStatusPayload, handler: &mut dyn ClientHandler) {
        handler.on_engine_status(payload);
    }
}

/// A voice started or stopped
pub struct VoiceStateChanged;

impl ControlToClient for VoiceStateChanged {
    const ID: MessageId = s2c::VOICE_STATE_CHANGED;
    const NAME: &'static str = "VoiceStateChanged";
    type Payload = VoiceStatePayload;

    fn deliver(payload: VoiceStatePayload, handler: &mut dyn ClientHandler) {
        handler.on_voice_state_changed(payload);
    }
}

/// The engine applied a parameter value
pub struct ParameterChanged;

impl ControlToClient for ParameterChanged {
    const ID: MessageId = s2c::PARAMETER_CHANGED;
    const NAME: &'static str = "ParameterChanged";
    type Payload = ParameterPayload;

    fn deliver(payload: ParameterPayload, handler: &mut dyn ClientHandler) {
        handler.on_parameter_changed(payload);
    }
}

/// The selected voice changed
pub struct SingleSelection;

impl ControlToClient for SingleSelection {
    const ID: MessageId = s2c::SINGLE_SELECTION;
    const NAME: &'static str = "SingleSelection";
    type Payload = SelectionPayload;

    fn deliver(payload: SelectionPayload, handler: &mut dyn ClientHandler) {
        handler.on_single_selection(payload);
    }
}

pub struct CycleReport;

impl ControlToClient for CycleReport {
    const ID: MessageId = s2c::CYCLE_REPORT;
    const NAME: &'static str = "CycleReport";
    type Payload = CycleReportPayload;

    fn deliver(payload: CycleReportPayload, handler: &mut dyn ClientHandler) {
        handler.on_cycle_report(payload);
    }
}

/// A request was dropped; the connection stays open
pub struct ProtocolError;

impl ControlToClient for ProtocolError {
    const ID: MessageId = s2c::PROTOCOL_ERROR;
    const NAME: &'static str = "ProtocolError";
    type Payload = ProtocolErrorPayload;

    fn deliver(payload: ProtocolErrorPayload, handler: &mut dyn ClientHandler) {
        handler.on_protocol_error(payload);
    }
}
