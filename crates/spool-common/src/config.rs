//! Configuration types for the spool write buffer
//!
//! A transfer is parameterised by a [`SpoolConfig`]. Tools load it from the
//! `[buffer]` table of a TOML file alongside a `[logging]` table.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration file layout
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Buffer pool configuration
    #[serde(default)]
    pub buffer: SpoolConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Parse a configuration from TOML text and validate it
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.buffer.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}

/// Per-transfer buffer pool configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpoolConfig {
    /// Fixed chunk size for the transfer; every slot holds at most this many bytes
    pub block_size: usize,
    /// Hard ceiling on slots while the pool is memory-resident
    pub max_memory_slots: usize,
    /// Hard ceiling on slots while the pool is file-backed
    pub max_file_slots: usize,
    /// Directory for the spill file (system temp dir when unset)
    pub temp_dir: Option<PathBuf>,
    /// Allow the pool to move to a memory-mapped temp file under pressure
    pub file_spill: bool,
    /// Shrink the pool once more than this many trailing slots sit idle
    pub idle_trim_slots: usize,
    /// File mode is kept while `buffer_count > max_memory_slots / hysteresis_divisor`
    pub hysteresis_divisor: usize,
}

impl Default for SpoolConfig {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
            max_memory_slots: default_max_memory_slots(),
            max_file_slots: default_max_file_slots(),
            temp_dir: None,
            file_spill: true,
            idle_trim_slots: default_idle_trim_slots(),
            hysteresis_divisor: default_hysteresis_divisor(),
        }
    }
}

fn default_block_size() -> usize {
    256 * 1024 // 256 KB
}

fn default_max_memory_slots() -> usize {
    64
}

fn default_max_file_slots() -> usize {
    1024
}

fn default_idle_trim_slots() -> usize {
    10
}

fn default_hysteresis_divisor() -> usize {
    2
}

impl SpoolConfig {
    /// Create a configuration with the given block size and ceilings
    pub fn new(block_size: usize, max_memory_slots: usize, max_file_slots: usize) -> Self {
        Self {
            block_size,
            max_memory_slots,
            max_file_slots,
            ..Self::default()
        }
    }

    /// Set the spill directory
    #[must_use]
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Enable or disable spilling to a file
    #[must_use]
    pub fn with_file_spill(mut self, enabled: bool) -> Self {
        self.file_spill = enabled;
        self
    }

    /// Directory the spill file is created in
    pub fn spill_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Bytes covered by the spill mapping
    pub fn spill_map_bytes(&self) -> Option<usize> {
        self.max_file_slots.checked_mul(self.block_size)
    }

    /// Check the configuration for values the pool cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(Error::invalid_argument("block_size must be non-zero"));
        }
        if self.max_memory_slots == 0 {
            return Err(Error::invalid_argument("max_memory_slots must be non-zero"));
        }
        if self.max_file_slots == 0 {
            return Err(Error::invalid_argument("max_file_slots must be non-zero"));
        }
        if self.hysteresis_divisor == 0 {
            return Err(Error::invalid_argument("hysteresis_divisor must be non-zero"));
        }
        // The spill file takes over a full memory pool
        if self.max_file_slots < self.max_memory_slots {
            return Err(Error::configuration(format!(
                "max_file_slots ({}) must be at least max_memory_slots ({})",
                self.max_file_slots, self.max_memory_slots
            )));
        }
        if self.spill_map_bytes().is_none() {
            return Err(Error::configuration(format!(
                "max_file_slots ({}) * block_size ({}) overflows",
                self.max_file_slots, self.block_size
            )));
        }
        if self
            .max_memory_slots
            .checked_mul(self.block_size)
            .is_none()
        {
            return Err(Error::configuration(format!(
                "max_memory_slots ({}) * block_size ({}) overflows",
                self.max_memory_slots, self.block_size
            )));
        }
        Ok(())
    }
}

/// Log output format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SpoolConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.idle_trim_slots, 10);
        assert_eq!(config.hysteresis_divisor, 2);
        assert!(config.file_spill);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        assert!(SpoolConfig::new(0, 4, 8).validate().is_err());
        assert!(SpoolConfig::new(4, 0, 8).validate().is_err());
        assert!(SpoolConfig::new(4, 4, 0).validate().is_err());

        let config = SpoolConfig {
            hysteresis_divisor: 0,
            ..SpoolConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_file_pool_smaller_than_memory_pool() {
        let err = SpoolConfig::new(4, 10, 3).validate().unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("max_file_slots (3)"));

        assert!(SpoolConfig::new(4, 10, 10).validate().is_ok());

        let err = Config::from_toml_str("[buffer]\nmax_memory_slots = 2048\n").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_validate_rejects_overflowing_mapping() {
        let config = SpoolConfig::new(usize::MAX / 2, 4, 4);
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_spill_dir_falls_back_to_system_temp() {
        let config = SpoolConfig::default();
        assert_eq!(config.spill_dir(), std::env::temp_dir());

        let config = config.with_temp_dir("/var/tmp/spool");
        assert_eq!(config.spill_dir(), PathBuf::from("/var/tmp/spool"));
    }

    #[test]
    fn test_parse_toml() {
        let config = Config::from_toml_str(
            r#"
            [buffer]
            block_size = 4096
            max_memory_slots = 8
            max_file_slots = 32
            temp_dir = "/scratch"
            idle_trim_slots = 4

            [logging]
            level = "debug"
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.buffer.block_size, 4096);
        assert_eq!(config.buffer.max_memory_slots, 8);
        assert_eq!(config.buffer.max_file_slots, 32);
        assert_eq!(config.buffer.temp_dir, Some(PathBuf::from("/scratch")));
        assert_eq!(config.buffer.idle_trim_slots, 4);
        // Unset keys keep their defaults
        assert_eq!(config.buffer.hysteresis_divisor, 2);
        assert!(config.buffer.file_spill);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_parse_toml_rejects_invalid_values() {
        let err = Config::from_toml_str("[buffer]\nblock_size = 0\n").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));

        let err = Config::from_toml_str("[buffer]\nblock_size = \"big\"\n").unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spool.toml");
        std::fs::write(&path, "[buffer]\nmax_memory_slots = 3\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.buffer.max_memory_slots, 3);
        assert_eq!(config.logging.level, "info");

        let missing = Config::load(dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(Error::Io { .. })));
    }
}
