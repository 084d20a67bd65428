//! Standard locations for Cadence configuration files

use std::path::PathBuf;

/// Directory holding Cadence configuration
///
/// Returns: `<platform config dir>/cadence`, falling back to `./cadence`
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cadence")
}

/// Path of a named config file inside [`default_config_dir`]
pub fn default_config_path(filename: &str) -> PathBuf {
    default_config_dir().join(filename)
}
