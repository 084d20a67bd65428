//! YAML configuration I/O
//!
//! Loading never fails: a missing or unreadable file yields the type's
//! default so the engine can always come up. Saving reports errors.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Load configuration from a YAML file
///
/// Returns `T::default()` when the file doesn't exist. An unreadable or
/// unparsable file is logged as a warning and also yields the default.
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        log::info!("No config at {:?}, using defaults", path);
        return T::default();
    }

    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            log::warn!("Could not read config {:?}: {}, using defaults", path, e);
            return T::default();
        }
    };

    match serde_yaml::from_str::<T>(&contents) {
        Ok(config) => {
            log::info!("Loaded config from {:?}", path);
            config
        }
        Err(e) => {
            log::warn!("Invalid config {:?}: {}, using defaults", path, e);
            T::default()
        }
    }
}

/// Save configuration to a YAML file, creating parent directories
pub fn save_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize config to YAML")?;
    std::fs::write(path, yaml).with_context(|| format!("Failed to write config file: {:?}", path))?;

    log::info!("Saved config to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MessagingConfig;

    #[test]
    fn test_missing_file_yields_default() {
        let config: MessagingConfig = load_config(Path::new("/nonexistent/cadence/messaging.yaml"));
        assert_eq!(config, MessagingConfig::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("messaging.yaml");

        let config = MessagingConfig {
            audio_to_control_capacity: 256,
            wake_interval_ms: 20,
            ..MessagingConfig::default()
        };

        save_config(&config, &path).unwrap();
        let loaded: MessagingConfig = load_config(&path);

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_garbage_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messaging.yaml");
        std::fs::write(&path, "wake_interval_ms: [not, a, number]").unwrap();

        let loaded: MessagingConfig = load_config(&path);
        assert_eq!(loaded, MessagingConfig::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messaging.yaml");
        std::fs::write(&path, "initial_callback_slots: 8\n").unwrap();

        let loaded: MessagingConfig = load_config(&path);
        assert_eq!(loaded.initial_callback_slots, 8);
        assert_eq!(loaded.wake_interval_ms, MessagingConfig::default().wake_interval_ms);
    }
}
