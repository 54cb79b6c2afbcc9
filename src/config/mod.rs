//! Configuration for the COPPER tool
//!
//! Loaded from a TOML file; every section is optional.
//!
//! # Example
//! ```ignore
//! let config = Config::load("copper.toml")?;
//! let reducer = Reducer::new(config.reducer_config());
//! ```

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

use crate::format::dump::WORDS_PER_LINE;
use crate::format::reducer::ReducerConfig;
use crate::generator::GeneratorSettings;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub reduce: ReduceSettings,
    #[serde(default)]
    pub dump: DumpSettings,
    #[serde(default)]
    pub generator: GeneratorSettings,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dump.words_per_line == 0 {
            return Err(ConfigError::Invalid(
                "dump.words_per_line must be positive".to_string(),
            ));
        }
        if !self.generator.channels.iter().any(|&enabled| enabled) {
            return Err(ConfigError::Invalid(
                "generator.channels must enable at least one FINESSE slot".to_string(),
            ));
        }
        if self.generator.mean_payload_words < 1.0 {
            return Err(ConfigError::Invalid(
                "generator.mean_payload_words must be at least 1".to_string(),
            ));
        }
        let sigma = self.generator.sigma_payload_words;
        if sigma.is_nan() || sigma < 0.0 {
            return Err(ConfigError::Invalid(
                "generator.sigma_payload_words must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    pub fn reducer_config(&self) -> ReducerConfig {
        ReducerConfig::from(&self.reduce)
    }
}

// =============================================================================
// Sections
// =============================================================================

/// `[reduce]` section
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReduceSettings {
    /// Verify each channel's CRC-16 before reduction
    #[serde(default)]
    pub verify_crc16: bool,

    /// Print source and reduced blocks
    #[serde(default)]
    pub dump_enabled: bool,
}

impl From<&ReduceSettings> for ReducerConfig {
    fn from(settings: &ReduceSettings) -> Self {
        Self {
            verify_crc16: settings.verify_crc16,
            dump_enabled: settings.dump_enabled,
        }
    }
}

/// `[dump]` section
#[derive(Debug, Clone, Deserialize)]
pub struct DumpSettings {
    #[serde(default = "default_words_per_line")]
    pub words_per_line: usize,

    /// Maximum words printed per block (0 = whole block)
    #[serde(default = "default_max_words")]
    pub max_words: usize,
}

impl DumpSettings {
    /// Word limit in the form taken by the dump renderers
    pub fn word_limit(&self) -> Option<usize> {
        (self.max_words > 0).then_some(self.max_words)
    }
}

impl Default for DumpSettings {
    fn default() -> Self {
        Self {
            words_per_line: default_words_per_line(),
            max_words: default_max_words(),
        }
    }
}

fn default_words_per_line() -> usize {
    WORDS_PER_LINE
}
fn default_max_words() -> usize {
    512
}

// =============================================================================
// Tests
// =============================================================================
