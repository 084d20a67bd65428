//! Wire envelope for the client ↔ control channel
//!
//! Every message crossing the client boundary is one JSON document:
//!
//! ```json
//! {"id": 10, "payload": {"note": 60, "velocity": 0.8}}
//! ```
//!
//! The identifier selects the schema of `payload`; the envelope layer
//! treats the payload as opaque. A missing payload decodes as `null`,
//! which is what unit payloads (`()`) expect.

use serde::{Deserialize, Serialize};

use super::error::{MessagingError, MessagingResult};

/// Stable numeric identifier of a message type
///
/// Client-to-control and control-to-client identifiers are separate
/// namespaces. An identifier is never reused for a different schema.
pub type MessageId = u32;

/// A decoded envelope whose payload is not yet interpreted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: MessageId,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Serialize)]
struct EnvelopeRef<'a, P> {
    id: MessageId,
    payload: &'a P,
}

/// Encode `payload` under `id` without building an intermediate value tree
pub fn encode<P: Serialize>(
    id: MessageId,
    name: &'static str,
    payload: &P,
) -> MessagingResult<String> {
    serde_json::to_string(&EnvelopeRef { id, payload })
        .map_err(|source| MessagingError::Serialization { id, name, source })
}

/// Split envelope text into identifier and raw payload
pub fn decode(text: &str) -> MessagingResult<Envelope> {
    serde_json::from_str(text).map_err(MessagingError::MalformedEnvelope)
}
