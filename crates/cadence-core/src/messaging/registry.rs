//! Typed message registry for the client protocol
//!
//! Every client-to-control (request) and control-to-client (event) type is a
//! zero-sized marker implementing [`ClientToControl`] or [`ControlToClient`].
//! The trait carries a stable identifier, a serde payload type and the code
//! that handles it. A [`MessageRegistry`] maps identifiers to monomorphised
//! `fn` pointers, built in an explicit registration phase:
//!
//! ```ignore
//! let mut registry = MessageRegistry::with_builtin();
//! registry.register_request::<MyRequest>()?;
//! ```
//!
//! Requests and events have separate identifier namespaces. Registering a
//! second type under a taken identifier is an error, never a silent
//! override.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::client::{events, requests, ClientHandler};
use super::control_thread::ControlContext;
use super::envelope::{Envelope, MessageId};
use super::error::{MessagingError, MessagingResult};

/// A request sent by the client and executed on the control thread
pub trait ClientToControl: 'static {
    /// Stable identifier, never reused for a different schema
    const ID: MessageId;
    /// Human-readable name for logs and errors
    const NAME: &'static str;
    type Payload: Serialize + DeserializeOwned;

    /// Handle the decoded payload on the control thread
    ///
    /// Returning an error sends a `ProtocolError` event back to the client.
    fn execute(payload: Self::Payload, ctx: &mut ControlContext<'_>) -> MessagingResult<()>;
}

/// An event produced on the control thread and handled by the client
pub trait ControlToClient: 'static {
    const ID: MessageId;
    const NAME: &'static str;
    type Payload: Serialize + DeserializeOwned;

    /// Hand the decoded payload to the client's handler
    fn deliver(payload: Self::Payload, handler: &mut dyn ClientHandler);
}

type ExecuteFn = fn(Value, &mut ControlContext<'_>) -> MessagingResult<()>;
type DeliverFn = fn(Value, &mut dyn ClientHandler) -> MessagingResult<()>;

#[derive(Clone, Copy)]
struct RequestEntry {
    name: &'static str,
    execute: ExecuteFn,
}

#[derive(Clone, Copy)]
struct EventEntry {
    name: &'static str,
    deliver: DeliverFn,
}

fn decode_payload<P: DeserializeOwned>(
    id: MessageId,
    name: &'static str,
    payload: Value,
) -> MessagingResult<P> {
    serde_json::from_value(payload)
        .map_err(|source| MessagingError::Deserialization { id, name, source })
}

fn execute_request<M: ClientToControl>(
    payload: Value,
    ctx: &mut ControlContext<'_>,
) -> MessagingResult<()> {
    let payload = decode_payload::<M::Payload>(M::ID, M::NAME, payload)?;
    M::execute(payload, ctx)
}

fn deliver_event<M: ControlToClient>(
    payload: Value,
    handler: &mut dyn ClientHandler,
) -> MessagingResult<()> {
    let payload = decode_payload::<M::Payload>(M::ID, M::NAME, payload)?;
    M::deliver(payload, handler);
    Ok(())
}

/// Identifier → handler tables for both protocol directions
#[derive(Clone, Default)]
pub struct MessageRegistry {
    requests: HashMap<MessageId, RequestEntry>,
    events: HashMap<MessageId, EventEntry>,
}

impl MessageRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in request and event catalogue
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        let result = registry.register_builtin();
        debug_assert!(result.is_ok(), "built-in catalogue has duplicate ids");
        registry
    }

    fn register_builtin(&mut self) -> MessagingResult<()> {
        self.register_request::<requests::Ping>()?
            .register_request::<requests::RequestEngineStatus>()?
            .register_request::<requests::NoteOn>()?
            .register_request::<requests::NoteOff>()?
            .register_request::<requests::AllNotesOff>()?
            .register_request::<requests::SetParameter>()?
            .register_request::<requests::LoadParameterSnapshot>()?
            .register_request::<requests::SetTuning>()?
            .register_request::<requests::SelectVoice>()?;

        self.register_event::<events::Pong>()?
            .register_event::<events::EngineStatus>()?
            .register_event::<events::VoiceStateChanged>()?
            .register_event::<events::ParameterChanged>()?
            .register_event::<events::SingleSelection>()?
            .register_event::<events::CycleReport>()?
            .register_event::<events::ProtocolError>()?;
        Ok(())
    }

    /// Register a client-to-control request type
    pub fn register_request<M: ClientToControl>(&mut self) -> MessagingResult<&mut Self> {
        if let Some(existing) = self.requests.get(&M::ID) {
            return Err(MessagingError::DuplicateIdentifier {
                id: M::ID,
                existing: existing.name,
                attempted: M::NAME,
            });
        }
        self.requests.insert(
            M::ID,
            RequestEntry {
                name: M::NAME,
                execute: execute_request::<M>,
            },
        );
        Ok(self)
    }

    /// Register a control-to-client event type
    pub fn register_event<M: ControlToClient>(&mut self) -> MessagingResult<&mut Self> {
        if let Some(existing) = self.events.get(&M::ID) {
            return Err(MessagingError::DuplicateIdentifier {
                id: M::ID,
                existing: existing.name,
                attempted: M::NAME,
            });
        }
        self.events.insert(
            M::ID,
            EventEntry {
                name: M::NAME,
                deliver: deliver_event::<M>,
            },
        );
        Ok(self)
    }

    pub fn request_name(&self, id: MessageId) -> Option<&'static str> {
        self.requests.get(&id).map(|entry| entry.name)
    }

    pub fn event_name(&self, id: MessageId) -> Option<&'static str> {
        self.events.get(&id).map(|entry| entry.name)
    }

    /// Decode and execute a request envelope (control thread)
    pub fn execute(&self, envelope: Envelope, ctx: &mut ControlContext<'_>) -> MessagingResult<()> {
        let entry = self
            .requests
            .get(&envelope.id)
            .ok_or(MessagingError::UnknownIdentifier(envelope.id))?;
        (entry.execute)(envelope.payload, ctx)
    }

    /// Decode and deliver an event envelope (client side)
    pub fn deliver(
        &self,
        envelope: Envelope,
        handler: &mut dyn ClientHandler,
    ) -> MessagingResult<()> {
        let entry = self
            .events
            .get(&envelope.id)
            .ok_or(MessagingError::UnknownIdentifier(envelope.id))?;
        (entry.deliver)(envelope.payload, handler)
    }
}

impl std::fmt::Debug for MessageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut requests: Vec<_> = self.requests.iter().map(|(id, e)| (*id, e.name)).collect();
        let mut events: Vec<_> = self.events.iter().map(|(id, e)| (*id, e.name)).collect();
        requests.sort_unstable();
        events.sort_unstable();
        f.debug_struct("MessageRegistry")
            .field("requests", &requests)
            .field("events", &events)
            .finish()
    }
}
