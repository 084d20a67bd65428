//! Cadence Core - real-time safe messaging for an audio engine
//!
//! Lets a hard real-time audio thread exchange state mutations and
//! notifications with a control thread, which in turn speaks a JSON
//! envelope protocol to a single external client (UI, socket, host).

pub mod config;
pub mod engine;
pub mod messaging;
pub mod types;

pub use types::*;
