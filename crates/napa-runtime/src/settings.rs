//! Platform and container settings.
//!
//! Settings are written the way napa users write them: a command-line style
//! string such as `"--cores 4 --max-old-space-size 128"`. They are parsed
//! with clap, and the same structures deserialize from TOML for config files.

use std::ffi::OsString;

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_COMPLETION_THREADS: usize = 2;
const DEFAULT_CORES: usize = 1;
const DEFAULT_CONTAINER_NAME: &str = "container";

/// Where runtime logs are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingProvider {
    /// Install a tracing fmt subscriber writing to stderr
    #[default]
    Console,
    /// Leave subscriber installation to the host application
    #[value(name = "none")]
    #[serde(rename = "none")]
    Disabled,
}

/// Process-wide settings, applied by `initialize`.
#[derive(Debug, Clone, PartialEq, Parser, Serialize, Deserialize)]
#[command(name = "napa", no_binary_name = true, disable_version_flag = true)]
#[serde(default, rename_all = "kebab-case")]
pub struct PlatformSettings {
    /// Logging provider
    #[arg(long, value_enum, default_value_t = LoggingProvider::Console)]
    pub logging_provider: LoggingProvider,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = DEFAULT_LOG_LEVEL)]
    pub log_level: String,

    /// Threads used to deliver asynchronous completions
    #[arg(long, default_value_t = DEFAULT_COMPLETION_THREADS)]
    pub completion_threads: usize,

    /// Flags forwarded to V8 (repeatable)
    #[arg(long = "v8-flags", value_name = "FLAG", allow_hyphen_values = true)]
    pub v8_flags: Vec<String>,
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            logging_provider: LoggingProvider::Console,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            completion_threads: DEFAULT_COMPLETION_THREADS,
            v8_flags: Vec::new(),
        }
    }
}

impl PlatformSettings {
    /// Parse a settings string.
    pub fn parse_settings(settings: &str) -> Result<Self, RuntimeError> {
        let parsed = Self::try_parse_from(settings.split_whitespace())
            .map_err(|e| RuntimeError::Settings(first_line(&e)))?;
        parsed.validate().map_err(RuntimeError::Settings)?;
        Ok(parsed)
    }

    /// Parse process arguments. The first argument is the program name.
    pub fn from_args<I, T>(args: I) -> Result<Self, RuntimeError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let parsed = Self::try_parse_from(args.into_iter().skip(1))
            .map_err(|e| RuntimeError::ProcessArgs(first_line(&e)))?;
        parsed.validate().map_err(RuntimeError::ProcessArgs)?;
        Ok(parsed)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.completion_threads == 0 {
            return Err("completion-threads must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Settings of a single container.
#[derive(Debug, Clone, PartialEq, Parser, Serialize, Deserialize)]
#[command(name = "container", no_binary_name = true, disable_version_flag = true)]
#[serde(default, rename_all = "kebab-case")]
pub struct ContainerSettings {
    /// Number of isolates, each on its own worker thread
    #[arg(long, default_value_t = DEFAULT_CORES)]
    pub cores: usize,

    /// Per-isolate heap limit in MiB
    #[arg(long)]
    pub max_old_space_size: Option<usize>,

    /// Name used for worker threads and logs
    #[arg(long, default_value = DEFAULT_CONTAINER_NAME)]
    pub name: String,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            cores: DEFAULT_CORES,
            max_old_space_size: None,
            name: DEFAULT_CONTAINER_NAME.to_string(),
        }
    }
}

impl ContainerSettings {
    /// Parse a settings string.
    pub fn parse_settings(settings: &str) -> Result<Self, RuntimeError> {
        let parsed = Self::try_parse_from(settings.split_whitespace())
            .map_err(|e| RuntimeError::Settings(first_line(&e)))?;
        parsed.validate().map_err(RuntimeError::Settings)?;
        Ok(parsed)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.cores == 0 {
            return Err("cores must be at least 1".to_string());
        }
        if self.max_old_space_size == Some(0) {
            return Err("max-old-space-size must be at least 1".to_string());
        }
        if self.name.is_empty() {
            return Err("name must not be empty".to_string());
        }
        Ok(())
    }

    /// Heap limit in bytes, if one is configured.
    pub fn heap_limit_bytes(&self) -> Option<usize> {
        self.max_old_space_size.map(|mb| mb * 1024 * 1024)
    }
}

fn first_line(err: &clap::Error) -> String {
    let rendered = err.to_string();
    rendered
        .lines()
        .next()
        .unwrap_or_default()
        .trim_start_matches("error: ")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_settings_are_defaults() {
        assert_eq!(PlatformSettings::parse_settings("").unwrap(), PlatformSettings::default());
        assert_eq!(ContainerSettings::parse_settings("  ").unwrap(), ContainerSettings::default());
    }

    #[test]
    fn test_parse_container_settings() {
        let settings =
            ContainerSettings::parse_settings("--cores 4 --max-old-space-size 64 --name workers")
                .unwrap();
        assert_eq!(settings.cores, 4);
        assert_eq!(settings.max_old_space_size, Some(64));
        assert_eq!(settings.heap_limit_bytes(), Some(64 * 1024 * 1024));
        assert_eq!(settings.name, "workers");
    }

    #[test]
    fn test_parse_platform_settings() {
        let settings = PlatformSettings::parse_settings(
            "--logging-provider none --log-level debug --completion-threads 3 --v8-flags --expose-gc",
        )
        .unwrap();
        assert_eq!(settings.logging_provider, LoggingProvider::Disabled);
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.completion_threads, 3);
        assert_eq!(settings.v8_flags, vec!["--expose-gc".to_string()]);
    }

    #[test]
    fn test_unknown_setting_is_rejected() {
        let err = ContainerSettings::parse_settings("--corez 2").unwrap_err();
        assert!(matches!(err, RuntimeError::Settings(_)));
        assert!(err.to_string().contains("--corez"));
    }

    #[test]
    fn test_zero_cores_is_rejected() {
        let err = ContainerSettings::parse_settings("--cores 0").unwrap_err();
        assert!(matches!(err, RuntimeError::Settings(msg) if msg.contains("cores")));
    }

    #[test]
    fn test_from_args_skips_program_name() {
        let settings =
            PlatformSettings::from_args(["my-app", "--completion-threads", "5"]).unwrap();
        assert_eq!(settings.completion_threads, 5);

        let err = PlatformSettings::from_args(["my-app", "--completion-threads", "zero"])
            .unwrap_err();
        assert!(matches!(err, RuntimeError::ProcessArgs(_)));
    }
}
