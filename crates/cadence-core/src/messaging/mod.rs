//! Real-time safe messaging between the audio thread, the control thread
//! and a client
//!
//! ```text
//!  Audio thread            Control thread                 Client thread(s)
//!  (never blocks,          (may block, allocate,          (UI, socket, host)
//!   never allocates)        (de)serialize)
//!
//!  Engine::process
//!    │  AudioToControl    ┌──────────────────┐  send_raw_from_client
//!    ├──── SPSC ─────────►│                  │◄──── crossbeam channel ────
//!    │                    │  control loop    │
//!    │◄──── SPSC ─────────┤  registry        │───── callback(&str) ──────►
//!    │  ControlToAudio    │  callback pool   │  (direct call, no queue)
//!    │  (RunCallback)     └──────────────────┘
//! ```
//!
//! - [`spsc`]: bounded lock-free queues for fixed messages
//! - [`audio`]: the closed audio ↔ control message set
//! - [`callbacks`]: closures scheduled onto the audio thread through pool slots
//! - [`registry`]: typed client protocol, identifier → handler
//! - [`client`]: the built-in request/event catalogue
//! - [`MessageController`]: lifecycle and client registration
//!
//! Engine state has a single writer, the audio thread. Control code reaches
//! it only through fixed messages or scheduled callbacks.

pub mod audio;
pub mod callbacks;
pub mod client;
pub mod spsc;
pub mod thread_check;

mod control_state;
mod control_thread;
mod controller;
mod endpoint;
mod envelope;
mod error;
mod registry;
mod stats;

pub use audio::{AudioToControl, ControlToAudio, QueueDirection, MAX_FIXED_MESSAGE_SIZE};
pub use callbacks::{AudioCallback, PoolStats, SlotIndex};
pub use control_state::{ControlState, VoiceMirror};
pub use control_thread::ControlContext;
pub use controller::{ClientCallback, ControllerState, MessageController, Waker};
pub use endpoint::AudioEndpoint;
pub use envelope::{decode as decode_envelope, encode as encode_envelope, Envelope, MessageId};
pub use error::{LifecycleError, MessagingError, MessagingResult};
pub use registry::{ClientToControl, ControlToClient, MessageRegistry};
pub use stats::ControllerStats;
pub use thread_check::{ThreadRole, ThreadRoles, ThreadToken};
