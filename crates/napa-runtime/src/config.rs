//! Configuration file (napa.toml)
//!
//! ```toml
//! [platform]
//! logging-provider = "console"
//! completion-threads = 2
//!
//! [container]
//! cores = 4
//! max-old-space-size = 128
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;
use crate::settings::{ContainerSettings, PlatformSettings};

/// Platform and container settings read from a TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NapaConfig {
    pub platform: PlatformSettings,
    pub container: ContainerSettings,
}

impl NapaConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, RuntimeError> {
        let config: NapaConfig =
            toml::from_str(content).map_err(|e| RuntimeError::Settings(e.to_string()))?;
        config.platform.validate().map_err(RuntimeError::Settings)?;
        config.container.validate().map_err(RuntimeError::Settings)?;
        Ok(config)
    }

    /// Read and parse a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RuntimeError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| RuntimeError::Settings(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::LoggingProvider;

    #[test]
    fn test_empty_config() {
        let config = NapaConfig::from_toml_str("").unwrap();
        assert_eq!(config, NapaConfig::default());
    }

    #[test]
    fn test_full_config() {
        let config = NapaConfig::from_toml_str(
            r#"
[platform]
logging-provider = "none"
log-level = "napa_runtime=debug"
completion-threads = 4
v8-flags = ["--expose-gc"]

[container]
cores = 3
max-old-space-size = 256
name = "scoring"
"#,
        )
        .unwrap();

        assert_eq!(config.platform.logging_provider, LoggingProvider::Disabled);
        assert_eq!(config.platform.log_level, "napa_runtime=debug");
        assert_eq!(config.platform.completion_threads, 4);
        assert_eq!(config.platform.v8_flags, vec!["--expose-gc".to_string()]);
        assert_eq!(config.container.cores, 3);
        assert_eq!(config.container.max_old_space_size, Some(256));
        assert_eq!(config.container.name, "scoring");
    }

    #[test]
    fn test_invalid_config() {
        let err = NapaConfig::from_toml_str("[container]\ncores = 0\n").unwrap_err();
        assert!(matches!(err, RuntimeError::Settings(_)));

        let err = NapaConfig::from_toml_str("[container]\ncores = \"many\"\n").unwrap_err();
        assert!(matches!(err, RuntimeError::Settings(_)));
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("napa.toml");
        std::fs::write(&path, "[container]\ncores = 2\n").unwrap();

        let config = NapaConfig::load(&path).unwrap();
        assert_eq!(config.container.cores, 2);
        assert_eq!(config.platform, PlatformSettings::default());

        assert!(NapaConfig::load(dir.path().join("missing.toml")).is_err());
    }
}
