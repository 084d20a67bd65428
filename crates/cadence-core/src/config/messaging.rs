//! Messaging layer configuration
//!
//! Sizes every channel at construction time. Nothing here can change once
//! a [`MessageController`](crate::messaging::MessageController) exists,
//! since the audio-side queues must never reallocate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::messaging::spsc::{DEFAULT_QUEUE_CAPACITY, MAX_QUEUE_CAPACITY};

/// Longest allowed control-loop wait between audio queue polls
pub const MAX_WAKE_INTERVAL_MS: u64 = 1000;

/// Invalid configuration values
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A queue capacity is zero or above the backing-store limit
    #[error("{name} must be between 1 and {max}, got {value}")]
    QueueCapacity {
        name: &'static str,
        value: usize,
        max: usize,
    },

    /// The control loop wake interval is out of range
    #[error("wake_interval_ms must be between 1 and {max}, got {value}")]
    WakeInterval { value: u64, max: u64 },

    /// The control thread needs a name for diagnostics
    #[error("control_thread_name must not be empty")]
    EmptyThreadName,
}

/// Configuration of the audio/control/client channels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Entries in the audio → control queue
    /// Default: 128
    pub audio_to_control_capacity: usize,

    /// Entries in the control → audio queue
    /// Default: 128
    pub control_to_audio_capacity: usize,

    /// How long the control loop waits for client traffic before polling
    /// the audio queue anyway, in milliseconds.
    /// Default: 50
    pub wake_interval_ms: u64,

    /// Callback slots allocated up front. The pool grows on the control
    /// thread when these run out.
    /// Default: 32
    pub initial_callback_slots: usize,

    /// Name given to the control thread
    pub control_thread_name: String,

    /// Minimum time between dropped-message warnings, in milliseconds
    /// Default: 1000
    pub drop_report_interval_ms: u64,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            audio_to_control_capacity: DEFAULT_QUEUE_CAPACITY,
            control_to_audio_capacity: DEFAULT_QUEUE_CAPACITY,
            wake_interval_ms: 50,
            initial_callback_slots: 32,
            control_thread_name: "cadence-control".to_string(),
            drop_report_interval_ms: 1000,
        }
    }
}

impl MessagingConfig {
    /// Check every value is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_capacity("audio_to_control_capacity", self.audio_to_control_capacity)?;
        check_capacity("control_to_audio_capacity", self.control_to_audio_capacity)?;

        if self.wake_interval_ms == 0 || self.wake_interval_ms > MAX_WAKE_INTERVAL_MS {
            return Err(ConfigError::WakeInterval {
                value: self.wake_interval_ms,
                max: MAX_WAKE_INTERVAL_MS,
            });
        }
        if self.control_thread_name.trim().is_empty() {
            return Err(ConfigError::EmptyThreadName);
        }
        Ok(())
    }

    pub fn wake_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.wake_interval_ms)
    }

    pub fn drop_report_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.drop_report_interval_ms)
    }
}

fn check_capacity(name: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 || value > MAX_QUEUE_CAPACITY {
        return Err(ConfigError::QueueCapacity {
            name,
            value,
            max: MAX_QUEUE_CAPACITY,
        });
    }
    Ok(())
}
