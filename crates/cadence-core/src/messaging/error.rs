//! Messaging error types

use thiserror::Error;

use crate::config::ConfigError;

use super::audio::QueueDirection;
use super::envelope::MessageId;
use super::thread_check::ThreadRole;

/// Contract violations in the controller lifecycle
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleError {
    /// `start()` on a controller whose control thread is already up
    #[error("controller is already running")]
    AlreadyRunning,

    /// `start()` after `stop()`; controllers are single-use
    #[error("controller was stopped and cannot be restarted")]
    NotRestartable,

    /// `stop()` from the control thread would join itself
    #[error("stop() called from the control thread")]
    StopFromControlThread,

    /// `start()` from a thread that holds a restricted role
    #[error("start() called from the {0} thread")]
    StartFromRestrictedThread(ThreadRole),
}

/// Errors that can occur while moving messages between threads
#[derive(Error, Debug)]
pub enum MessagingError {
    /// A bounded queue rejected the message; it was dropped
    #[error("{0} queue is full, message dropped")]
    QueueFull(QueueDirection),

    /// The callback pool hit its hard ceiling
    #[error("callback pool exhausted: all {0} slots are in flight")]
    CallbackPoolExhausted(usize),

    /// No message type is registered under this identifier
    #[error("no message registered for identifier {0}")]
    UnknownIdentifier(MessageId),

    /// The text is not an `{id, payload}` envelope
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(#[source] serde_json::Error),

    /// The payload does not match the schema of its identifier
    #[error("payload of message {id} ({name}) does not match its schema: {source}")]
    Deserialization {
        id: MessageId,
        name: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// A payload could not be encoded
    #[error("failed to encode message {id} ({name}): {source}")]
    Serialization {
        id: MessageId,
        name: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// The payload decoded but carries values the handler refuses
    #[error("invalid {name} payload: {reason}")]
    InvalidPayload { name: &'static str, reason: String },

    /// Two message types claimed the same identifier
    #[error("identifier {id} is already registered to {existing}, cannot register {attempted}")]
    DuplicateIdentifier {
        id: MessageId,
        existing: &'static str,
        attempted: &'static str,
    },

    /// A thread-restricted entry point was called from a thread it must
    /// never run on
    #[error("{operation} must not be called from the {forbidden} thread")]
    ThreadDiscipline {
        operation: &'static str,
        forbidden: ThreadRole,
    },

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// The control thread is gone and no longer accepts client messages
    #[error("client channel is closed")]
    ChannelClosed,

    #[error("failed to spawn control thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("invalid messaging config: {0}")]
    Config(#[from] ConfigError),
}

impl MessagingError {
    /// Whether the error indicates a programming mistake rather than a
    /// transient runtime condition
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Self::ThreadDiscipline { .. } | Self::Lifecycle(_))
    }
}

/// Result type for messaging operations
pub type MessagingResult<T> = Result<T, MessagingError>;
