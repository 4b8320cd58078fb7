//! Library settings.
//!
//! Settings are persisted to `settings.json` in the platform config directory
//! (for example `~/.config/postbox/settings.json`) and loaded once at startup.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Errors raised while loading or saving settings.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The settings file could not be read or written.
    #[error("settings I/O error at {}: {source}", .path.display())]
    Io {
        /// File that was being accessed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The settings file is not valid JSON for [`Settings`].
    #[error("invalid settings: {0}")]
    Json(#[from] serde_json::Error),
}

/// Top-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// SMTP host per provider identifier, merged over the built-in table.
    pub providers: BTreeMap<String, String>,
    /// Per-step network deadlines.
    pub timeouts: TimeoutSettings,
    /// Identity announced in `EHLO`.
    pub hello_name: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            providers: BTreeMap::new(),
            timeouts: TimeoutSettings::default(),
            hello_name: "localhost".to_string(),
        }
    }
}

impl Settings {
    /// Returns the platform default location of the settings file.
    ///
    /// Returns `None` when no home directory can be determined.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "postbox")
            .map(|dirs| dirs.config_dir().join("settings.json"))
    }

    /// Loads settings from `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = serde_json::from_str(&raw)?;
        tracing::debug!(path = %path.display(), "settings loaded");
        Ok(settings)
    }

    /// Loads settings from `path`, falling back to defaults if it does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no settings file, using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Writes settings to `path` as pretty-printed JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(io_err)
    }
}

/// Deadlines for each network step, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    /// TCP connect, greeting and `EHLO`.
    pub connect_secs: u64,
    /// `STARTTLS` and the TLS handshake.
    pub starttls_secs: u64,
    /// The `AUTH` exchange.
    pub authenticate_secs: u64,
    /// `MAIL FROM` through the end of `DATA`.
    pub submit_secs: u64,
    /// `QUIT`.
    pub quit_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            connect_secs: 30,
            starttls_secs: 30,
            authenticate_secs: 30,
            submit_secs: 120,
            quit_secs: 10,
        }
    }
}

impl TimeoutSettings {
    /// Connect deadline.
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    /// STARTTLS deadline.
    pub fn starttls(&self) -> Duration {
        Duration::from_secs(self.starttls_secs)
    }

    /// Authentication deadline.
    pub fn authenticate(&self) -> Duration {
        Duration::from_secs(self.authenticate_secs)
    }

    /// Submission deadline.
    pub fn submit(&self) -> Duration {
        Duration::from_secs(self.submit_secs)
    }

    /// Quit deadline.
    pub fn quit(&self) -> Duration {
        Duration::from_secs(self.quit_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid() {
        let settings = Settings::default();
        assert!(settings.providers.is_empty());
        assert_eq!(settings.hello_name, "localhost");
        assert_eq!(settings.timeouts.submit(), Duration::from_secs(120));
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"providers": {"fastmail": "smtp.fastmail.com"}}"#).unwrap();

        assert_eq!(settings.providers["fastmail"], "smtp.fastmail.com");
        assert_eq!(settings.timeouts, TimeoutSettings::default());
        assert_eq!(settings.hello_name, "localhost");
    }

    #[test]
    fn partial_timeouts() {
        let settings: Settings =
            serde_json::from_str(r#"{"timeouts": {"quit_secs": 2}}"#).unwrap();

        assert_eq!(settings.timeouts.quit(), Duration::from_secs(2));
        assert_eq!(settings.timeouts.connect_secs, 30);
    }

    #[test]
    fn settings_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut settings = Settings::default();
        settings
            .providers
            .insert("gmail".to_string(), "smtp.example.net".to_string());
        settings.hello_name = "client.example.com".to_string();
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn load_or_default_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_or_default(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(Settings::load(&path), Err(ConfigError::Json(_))));
        assert!(matches!(
            Settings::load_or_default(&path),
            Err(ConfigError::Json(_))
        ));
    }
}
