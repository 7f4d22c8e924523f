//! # linkpack-config
//!
//! Configuration management for linkpack.
//!
//! Loads configuration from:
//! 1. `~/.linkpack/config.toml` (global)
//! 2. `.linkpack.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority below CLI flags)
//!
//! CLI flag overrides are applied by the caller on top of the loaded
//! config; this crate only knows about files and the environment.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scan: ScanConfig,
    pub link: LinkConfig,
    pub refs: RefsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scan: ScanConfig::default(),
            link: LinkConfig::default(),
            refs: RefsConfig::default(),
        }
    }
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        // 1. Load global config (~/.linkpack/config.toml)
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("loading global config from {:?}", global_path);
                config = Self::load_file(&global_path)?;
            }
        }

        // 2. Load project config (.linkpack.toml) - overrides global
        let project_path = Path::new(".linkpack.toml");
        if project_path.exists() {
            debug!("loading project config from {:?}", project_path);
            config = Self::load_file(project_path)?;
        }

        // 3. Apply environment variable overrides
        config.apply_env_overrides();

        Ok(config)
    }

    /// Load an explicit config file instead of the standard locations,
    /// still honoring environment overrides.
    pub fn load_path(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load and parse one config file
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Global config path: `~/.linkpack/config.toml`
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".linkpack/config.toml"))
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(n) = std::env::var("LINKPACK_CONCURRENCY") {
            if let Ok(n) = n.parse() {
                self.scan.concurrent_ops = n;
            }
        }
        if let Ok(n) = std::env::var("LINKPACK_TREE_DEPTH") {
            if let Ok(n) = n.parse() {
                self.scan.tree_depth = n;
            }
        }
        if let Ok(n) = std::env::var("LINKPACK_MIN_SIZE") {
            if let Ok(n) = n.parse() {
                self.link.min_file_size = n;
            }
        }
        if let Ok(path) = std::env::var("LINKPACK_REFS_FILE") {
            self.refs.file = PathBuf::from(path);
        }
    }

    /// Validate loaded values; returns every problem found, not just the first.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();
        if self.scan.concurrent_ops == 0 {
            problems.push("scan.concurrent_ops must be at least 1".to_string());
        }
        if self.link.ref_size == 0 {
            problems.push("link.ref_size must be at least 1".to_string());
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems.join("; ")))
        }
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Config::default()).unwrap()
    }
}

/// Scanner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Simultaneous in-flight filesystem operations per pipeline stage
    pub concurrent_ops: usize,
    /// Directory levels to descend below each root; 0 = unbounded
    pub tree_depth: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            concurrent_ops: 4,
            tree_depth: 0,
        }
    }
}

/// Link eligibility configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Smallest file worth hard-linking, in bytes
    pub min_file_size: u64,
    /// Fingerprints retained per package identity
    pub ref_size: usize,
    /// Skip mtime comparison when validating fingerprints and link
    /// candidates. Install tools on Windows do not preserve mtimes,
    /// so this defaults on there.
    pub ignore_mtime: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            min_file_size: 0,
            ref_size: 5,
            ignore_mtime: cfg!(windows),
        }
    }
}

/// Reference-store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefsConfig {
    /// Path of the persisted package-reference file
    pub file: PathBuf,
}

impl Default for RefsConfig {
    fn default() -> Self {
        Self {
            file: default_refs_file(),
        }
    }
}

/// Default refs file path: `~/.linkpack/refs.json`
pub fn default_refs_file() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".linkpack/refs.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.scan.concurrent_ops, 4);
        assert_eq!(config.scan.tree_depth, 0);
        assert_eq!(config.link.min_file_size, 0);
        assert_eq!(config.link.ref_size, 5);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
[scan]
concurrent_ops = 8

[link]
min_file_size = 1024
"#,
        )
        .unwrap();
        assert_eq!(config.scan.concurrent_ops, 8);
        assert_eq!(config.scan.tree_depth, 0);
        assert_eq!(config.link.min_file_size, 1024);
        assert_eq!(config.link.ref_size, 5);
    }

    #[test]
    fn zero_concurrency_rejected() {
        let config: Config = toml::from_str("[scan]\nconcurrent_ops = 0\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn default_toml_roundtrips() {
        let text = Config::default_toml();
        let config: Config = toml::from_str(&text).unwrap();
        config.validate().unwrap();
    }
}
