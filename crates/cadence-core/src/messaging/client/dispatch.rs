//! Client-side decoding of control → client envelopes

use crate::messaging::envelope::{self, MessageId};
use crate::messaging::registry::{ClientToControl, MessageRegistry};
use crate::messaging::MessagingResult;

use super::events::{
    CycleReportPayload, EngineStatusPayload, ParameterPayload, PongPayload, ProtocolErrorPayload,
    SelectionPayload, VoiceStatePayload,
};

/// The capability surface a client exposes to control events
///
/// Every method defaults to doing nothing, so a client only implements
/// the events it cares about.
pub trait ClientHandler {
    fn on_pong(&mut self, _payload: PongPayload) {}
    fn on_engine_status(&mut self, _payload: EngineStatusPayload) {}
    fn on_voice_state_changed(&mut self, _payload: VoiceStatePayload) {}
    fn on_parameter_changed(&mut self, _payload: ParameterPayload) {}
    fn on_single_selection(&mut self, _payload: SelectionPayload) {}
    fn on_cycle_report(&mut self, _payload: CycleReportPayload) {}
    fn on_protocol_error(&mut self, _payload: ProtocolErrorPayload) {}
}

/// Decodes envelope text from the control thread and calls the handler
///
/// Typically fed from the closure passed to
/// [`MessageController::register_client`](crate::messaging::MessageController::register_client),
/// after hopping onto the client's own thread.
pub struct ClientDispatcher<H> {
    registry: MessageRegistry,
    handler: H,
}

impl<H: ClientHandler> ClientDispatcher<H> {
    /// Dispatcher for the built-in event catalogue
    pub fn new(handler: H) -> Self {
        Self::with_registry(MessageRegistry::with_builtin(), handler)
    }

    /// Dispatcher for a custom catalogue
    pub fn with_registry(registry: MessageRegistry, handler: H) -> Self {
        Self { registry, handler }
    }

    /// Decode one envelope and deliver it
    ///
    /// Returns the event identifier on success.
    pub fn dispatch(&mut self, text: &str) -> MessagingResult<MessageId> {
        let envelope = envelope::decode(text)?;
        let id = envelope.id;
        self.registry.deliver(envelope, &mut self.handler)?;
        Ok(id)
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }
}

/// Encode a typed request as envelope text
pub fn encode_request<M: ClientToControl>(payload: &M::Payload) -> MessagingResult<String> {
    envelope::encode(M::ID, M::NAME, payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::client::events::ProtocolErrorKind;
    use crate::messaging::client::ids::s2c;
    use crate::messaging::client::requests::{NoteOn, NoteOnPayload};
    use crate::messaging::MessagingError;
    use crate::types::VoiceId;

    #[derive(Default)]
    struct Recorder {
        voices: Vec<VoiceStatePayload>,
        errors: Vec<ProtocolErrorPayload>,
    }

    impl ClientHandler for Recorder {
        fn on_voice_state_changed(&mut self, payload: VoiceStatePayload) {
            self.voices.push(payload);
        }

        fn on_protocol_error(&mut self, payload: ProtocolErrorPayload) {
            self.errors.push(payload);
        }
    }

    #[test]
    fn test_dispatch_routes_by_identifier() {
        let mut dispatcher = ClientDispatcher::new(Recorder::default());

        let voice = r#"{"id":10,"payload":{"voice":2,"note":64,"active":true,"velocity":0.5,"frequency_hz":329.63}}"#;
        assert_eq!(dispatcher.dispatch(voice).unwrap(), s2c::VOICE_STATE_CHANGED);

        let error = r#"{"id":900,"payload":{"kind":"unknown_identifier","id":42,"message":"nope"}}"#;
        assert_eq!(dispatcher.dispatch(error).unwrap(), s2c::PROTOCOL_ERROR);

        // Events the handler ignores still decode
        assert!(dispatcher.dispatch(r#"{"id":1,"payload":{"token":3}}"#).is_ok());

        let recorder = dispatcher.into_handler();
        assert_eq!(recorder.voices.len(), 1);
        assert_eq!(recorder.voices[0].voice, VoiceId(2));
        assert_eq!(recorder.errors[0].kind, ProtocolErrorKind::UnknownIdentifier);
        assert_eq!(recorder.errors[0].id, Some(42));
    }

    #[test]
    fn test_dispatch_rejects_unknown_event() {
        let mut dispatcher = ClientDispatcher::new(Recorder::default());
        assert!(matches!(
            dispatcher.dispatch(r#"{"id":777,"payload":null}"#),
            Err(MessagingError::UnknownIdentifier(777))
        ));
        assert!(dispatcher.handler().voices.is_empty());
    }

    #[test]
    fn test_encode_request() {
        let text = encode_request::<NoteOn>(&NoteOnPayload { note: 60, velocity: 0.5 }).unwrap();
        assert_eq!(text, r#"{"id":10,"payload":{"note":60,"velocity":0.5}}"#);
    }
}
