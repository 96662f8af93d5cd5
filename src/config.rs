//! TOML-backed file configuration.
//!
//! The config file carries per-source credentials and a default output
//! template so they do not have to be repeated on the command line. Lookup
//! order for the file itself: `$BINDERY_CONFIG`, then
//! `$XDG_CONFIG_HOME/bindery/config.toml`, then
//! `~/.config/bindery/config.toml`. A missing file is an empty config, not
//! an error.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Credentials and options for one source, keyed by its lowercase name.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceConfig {
    /// Login username.
    pub username: Option<String>,
    /// Login password.
    pub password: Option<String>,
    /// Library or tenant parameter some services require at login.
    pub library: Option<String>,
}

/// Parsed configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    /// Default output path template.
    pub output: Option<String>,
    /// Per-source settings.
    #[serde(default)]
    pub sources: HashMap<String, SourceConfig>,
}

/// Errors loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("cannot read config file '{path}': {source}")]
    Io {
        /// Path that failed.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[error("cannot parse config file '{path}': {source}")]
    Parse {
        /// Path that failed.
        path: String,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },
}

impl FileConfig {
    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns the deserialization error when the TOML does not match the
    /// schema.
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Returns the settings for a source, looked up by lowercase name.
    #[must_use]
    pub fn source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.get(&name.to_lowercase())
    }
}

/// Default location of the config file, if one can be determined.
#[must_use]
pub fn config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("BINDERY_CONFIG") {
        return Some(PathBuf::from(path));
    }
    if let Ok(base) = std::env::var("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(base).join("bindery").join("config.toml"));
    }
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .ok()
        .map(|home| {
            PathBuf::from(home)
                .join(".config")
                .join("bindery")
                .join("config.toml")
        })
}

/// Loads the configuration file, treating a missing file as empty.
///
/// # Errors
///
/// Returns [`ConfigError`] when an existing file cannot be read or parsed.
pub fn load_config() -> Result<FileConfig, ConfigError> {
    let Some(path) = config_path() else {
        return Ok(FileConfig::default());
    };
    if !path.exists() {
        debug!(path = %path.display(), "no config file, using defaults");
        return Ok(FileConfig::default());
    }
    let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    FileConfig::from_toml_str(&text).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}
