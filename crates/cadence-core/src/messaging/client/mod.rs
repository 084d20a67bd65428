//! Built-in client protocol
//!
//! - [`requests`]: client → control messages, executed on the control thread
//! - [`events`]: control → client messages, delivered to a [`ClientHandler`]
//! - [`ClientDispatcher`]: client-side decoder for outbound envelope text

pub mod events;
pub mod requests;

mod dispatch;

pub use dispatch::{encode_request, ClientDispatcher, ClientHandler};

/// Stable message identifiers, grouped by concern
///
/// Requests and events are separate namespaces. Retired identifiers are
/// never handed out again.
pub mod ids {
    /// Client → control
    pub mod c2s {
        use crate::messaging::MessageId;

        // Session
        pub const PING: MessageId = 1;
        pub const REQUEST_ENGINE_STATUS: MessageId = 2;

        // Notes
        pub const NOTE_ON: MessageId = 10;
        pub const NOTE_OFF: MessageId = 11;
        pub const ALL_NOTES_OFF: MessageId = 12;

        // Parameters
        pub const SET_PARAMETER: MessageId = 20;
        pub const LOAD_PARAMETER_SNAPSHOT: MessageId = 21;

        // Tuning
        pub const SET_TUNING: MessageId = 30;

        // Selection
        pub const SELECT_VOICE: MessageId = 40;
    }

    /// Control → client
    pub mod s2c {
        use crate::messaging::MessageId;

        pub const PONG: MessageId = 1;
        pub const ENGINE_STATUS: MessageId = 2;
        pub const VOICE_STATE_CHANGED: MessageId = 10;
        pub const PARAMETER_CHANGED: MessageId = 20;
        pub const SINGLE_SELECTION: MessageId = 40;
        pub const CYCLE_REPORT: MessageId = 50;
        pub const PROTOCOL_ERROR: MessageId = 900;
    }
}
