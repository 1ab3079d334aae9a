//! Configuration management for xstory
//!
//! Loaded from `.xstory/config.toml` in the project root. Values are copied
//! into explicit option structs per run; nothing here is global.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::keywords::KeywordExtractor;
use crate::scheduler::{SchedulerOptions, BASE_CAPACITY};
use crate::{Error, Result};

/// Project-level xstory configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XstoryConfig {
    /// Story database location
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Expansion target selection
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Commit reconciliation
    #[serde(default)]
    pub linker: LinkerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path relative to the project root
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Children a node may take before any complete
    #[serde(default = "default_base_capacity")]
    pub base_capacity: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkerConfig {
    /// Similarity at or above which a commit implements a story
    #[serde(default = "default_strong_threshold")]
    pub strong_threshold: f64,

    /// Similarity at or above which a commit is recorded as related
    #[serde(default = "default_potential_threshold")]
    pub potential_threshold: f64,

    /// Trailing window scanned when no usable checkpoint exists
    #[serde(default = "default_fallback_window_days")]
    pub fallback_window_days: i64,

    /// Project-specific words to ignore when matching
    #[serde(default)]
    pub extra_stopwords: Vec<String>,
}

// Default value providers
fn default_database_path() -> PathBuf {
    PathBuf::from(".claude/data/story-tree.db")
}

fn default_base_capacity() -> i64 {
    BASE_CAPACITY
}

fn default_strong_threshold() -> f64 {
    0.7
}

fn default_potential_threshold() -> f64 {
    0.4
}

fn default_fallback_window_days() -> i64 {
    30
}

impl XstoryConfig {
    /// Load configuration from `.xstory/config.toml` or use defaults
    pub fn load_or_default(project_root: &Path) -> Result<Self> {
        let config_path = project_root.join(".xstory/config.toml");

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            debug!("Loading config from {}", config_path.display());
            Self::from_toml(&content)
        } else {
            debug!("No config at {}, using defaults", config_path.display());
            Ok(Self::default())
        }
    }

    /// Parse and validate a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Write default configuration to `.xstory/config.toml`
    pub fn write_default(project_root: &Path) -> Result<()> {
        let config_dir = project_root.join(".xstory");
        std::fs::create_dir_all(&config_dir)?;

        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(config_dir.join("config.toml"), content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let linker = &self.linker;
        for (name, value) in [
            ("strong_threshold", linker.strong_threshold),
            ("potential_threshold", linker.potential_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(Error::Config(format!(
                    "linker.{} must be in (0, 1] (got {})",
                    name, value
                )));
            }
        }
        if linker.potential_threshold > linker.strong_threshold {
            return Err(Error::Config(
                "linker.potential_threshold must not exceed linker.strong_threshold".to_string(),
            ));
        }
        if linker.fallback_window_days < 1 {
            return Err(Error::Config(format!(
                "linker.fallback_window_days must be at least 1 (got {})",
                linker.fallback_window_days
            )));
        }
        if self.scheduler.base_capacity < 1 {
            return Err(Error::Config(format!(
                "scheduler.base_capacity must be at least 1 (got {})",
                self.scheduler.base_capacity
            )));
        }
        Ok(())
    }

    /// Absolute database path for a project
    pub fn database_path(&self, project_root: &Path) -> PathBuf {
        project_root.join(&self.database.path)
    }

    pub fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            base_capacity: self.scheduler.base_capacity,
        }
    }

    pub fn keyword_extractor(&self) -> KeywordExtractor {
        KeywordExtractor::new().with_extra_stopwords(&self.linker.extra_stopwords)
    }
}

impl Default for XstoryConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            scheduler: SchedulerConfig::default(),
            linker: LinkerConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            base_capacity: default_base_capacity(),
        }
    }
}

impl Default for LinkerConfig {
    fn default() -> Self {
        Self {
            strong_threshold: default_strong_threshold(),
            potential_threshold: default_potential_threshold(),
            fallback_window_days: default_fallback_window_days(),
            extra_stopwords: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = XstoryConfig::default();
        assert_eq!(config.scheduler.base_capacity, 3);
        assert_eq!(config.linker.strong_threshold, 0.7);
        assert_eq!(config.linker.potential_threshold, 0.4);
        assert_eq!(config.linker.fallback_window_days, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let config = XstoryConfig::load_or_default(temp.path())?;
        assert_eq!(config, XstoryConfig::default());
        Ok(())
    }

    #[test]
    fn test_write_then_load() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        XstoryConfig::write_default(temp.path())?;
        assert!(temp.path().join(".xstory/config.toml").exists());
        let config = XstoryConfig::load_or_default(temp.path())?;
        assert_eq!(config, XstoryConfig::default());
        Ok(())
    }

    #[test]
    fn test_partial_toml() {
        let config = XstoryConfig::from_toml(
            r#"
            [linker]
            strong_threshold = 0.8
            extra_stopwords = ["story"]
            "#,
        )
        .unwrap();
        assert_eq!(config.linker.strong_threshold, 0.8);
        assert_eq!(config.linker.potential_threshold, 0.4);
        assert_eq!(config.scheduler.base_capacity, 3);
        assert!(config.keyword_extractor().extract("login story").len() == 1);
    }

    #[test]
    fn test_invalid_thresholds_rejected() {
        let err = XstoryConfig::from_toml(
            r#"
            [linker]
            strong_threshold = 0.3
            potential_threshold = 0.5
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        assert!(XstoryConfig::from_toml("[scheduler]\nbase_capacity = 0\n").is_err());
        assert!(XstoryConfig::from_toml("[linker]\nfallback_window_days = 0\n").is_err());
    }
}
