//! Configuration management for the migration engine
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (datafixers.toml)
//! - Environment variables (DATAFIXERS__*)
//!
//! ## Example config file (datafixers.toml):
//! ```toml
//! [migration]
//! max_depth = 512
//! require_lock = true
//! verify_output = false
//!
//! [logging]
//! filter = "datafixers=info"
//!
//! [output]
//! format = "pretty"
//! in_place = false
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::fixer::{FixOptions, DEFAULT_MAX_DEPTH};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixerConfig {
    /// Traversal and registry behavior
    #[serde(default)]
    pub migration: MigrationConfig,

    /// Log filter for binaries
    #[serde(default)]
    pub logging: LoggingConfig,

    /// How migrated records are written
    #[serde(default)]
    pub output: OutputConfig,
}

/// Migration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Deepest template nesting a fixer may walk
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Refuse to migrate until the registry is locked
    #[serde(default = "default_true")]
    pub require_lock: bool,

    /// Re-check every fixer's output against its output schema
    #[serde(default)]
    pub verify_output: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directives; `RUST_LOG` wins when set
    #[serde(default = "default_filter")]
    pub filter: String,
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_format")]
    pub format: OutputFormat,

    /// Overwrite input files instead of writing elsewhere
    #[serde(default)]
    pub in_place: bool,
}

/// Output format for JSON
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Pretty,
    Compact,
}

impl OutputFormat {
    pub fn render(&self, value: &serde_json::Value) -> serde_json::Result<String> {
        match self {
            Self::Pretty => serde_json::to_string_pretty(value),
            Self::Compact => serde_json::to_string(value),
        }
    }
}

// Default value functions
fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

fn default_true() -> bool {
    true
}

fn default_filter() -> String {
    "datafixers=info".to_string()
}

fn default_output_format() -> OutputFormat {
    OutputFormat::Pretty
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            require_lock: true,
            verify_output: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Pretty,
            in_place: false,
        }
    }
}

impl From<&MigrationConfig> for FixOptions {
    fn from(config: &MigrationConfig) -> Self {
        FixOptions {
            max_depth: config.max_depth,
            verify_output: config.verify_output,
        }
    }
}

impl FixerConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration, adding a required file on top of the defaults
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let config_locations = [
            "datafixers.toml",
            ".datafixers.toml",
            "config/datafixers.toml",
        ];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        if let Some(xdg_config) = Self::user_config_path() {
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path).required(true));
        }

        // DATAFIXERS__MIGRATION__MAX_DEPTH=64
        builder = builder.add_source(
            Environment::with_prefix("DATAFIXERS")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Per-user config file in the XDG config directory
    pub fn user_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "datafixers", "datafixers")
            .map(|dirs| dirs.config_dir().join("datafixers.toml"))
    }

    /// Save configuration to a file
    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Traversal options for fixer chains
    pub fn fix_options(&self) -> FixOptions {
        FixOptions::from(&self.migration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FixerConfig::default();
        assert!(config.migration.require_lock);
        assert!(!config.migration.verify_output);
        assert_eq!(config.migration.max_depth, DEFAULT_MAX_DEPTH);
        assert_eq!(config.output.format, OutputFormat::Pretty);
    }

    #[test]
    fn test_serialize_config() {
        let config = FixerConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[migration]"));
        assert!(toml_str.contains("[output]"));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: FixerConfig = toml::from_str("[migration]\nmax_depth = 64\n").unwrap();
        assert_eq!(config.migration.max_depth, 64);
        assert!(config.migration.require_lock);
        assert_eq!(config.logging.filter, "datafixers=info");
    }

    #[test]
    fn test_save_and_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        let mut config = FixerConfig::default();
        config.migration.verify_output = true;
        config.output.format = OutputFormat::Compact;
        config.save(&path).unwrap();

        let loaded = FixerConfig::load_from(Some(&path)).unwrap();
        assert!(loaded.migration.verify_output);
        assert_eq!(loaded.output.format, OutputFormat::Compact);
        assert!(loaded.fix_options().verify_output);
    }
}
