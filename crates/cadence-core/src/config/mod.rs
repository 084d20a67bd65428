//! Configuration for the Cadence messaging layer
//!
//! - [`MessagingConfig`]: queue capacities, wake cadence and callback pool sizing
//! - Generic YAML config loading/saving
//! - Default config file location
//!
//! # Usage
//!
//! ```ignore
//! use cadence_core::config::{load_config, default_config_path, MessagingConfig};
//!
//! let config: MessagingConfig = load_config(&default_config_path("messaging.yaml"));
//! config.validate()?;
//! ```

mod io;
mod messaging;
mod paths;

pub use io::{load_config, save_config};
pub use messaging::{ConfigError, MessagingConfig};
pub use paths::{default_config_dir, default_config_path};
