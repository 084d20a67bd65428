//! Audio engine - the single writer of renderable state
//!
//! - [`Engine`]: owns the audio side of the messaging layer and the state,
//!   drains control messages once per cycle before rendering
//! - [`EngineState`]: voices, parameters and tuning; what scheduled
//!   callbacks receive
//! - [`EngineAtomics`]: lock-free mirror the control thread reads
//! - [`GarbageCollector`]: deferred drops for data swapped in on the audio thread

mod atomics;
mod engine;
mod gc;
mod tuning;

pub use atomics::EngineAtomics;
pub use engine::{Engine, EngineState, VoiceInfo, DEFAULT_MASTER_GAIN};
pub use gc::GarbageCollector;
pub use tuning::TuningTable;
