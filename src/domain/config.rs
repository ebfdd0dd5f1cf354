use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

/// Configuration for the tree builder and the command line.
///
/// This struct holds settings that control serialization, auto-save timing
/// and how the persistence API is reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Versions", into = "Versions")]
pub struct Config {
    /// The display locale.
    ///
    /// Picks the primary name of each person on export, and is assumed for
    /// names without a `LANG` tag on import.
    pub locale: String,

    /// Quiet period after the last edit before an auto-save fires.
    debounce_ms: u64,

    /// Largest GEDCOM payload that will be submitted.
    max_gedcom_bytes: usize,

    /// Root of the tree API, e.g. `https://example.org/api`.
    pub base_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            locale: default_locale(),
            debounce_ms: default_debounce_ms(),
            max_gedcom_bytes: default_max_gedcom_bytes(),
            base_url: None,
        }
    }
}

impl Config {
    /// Reads a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Describes the failure if the file is unreadable or not a valid
    /// configuration.
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {e}"))?;
        toml::from_str(&content).map_err(|e| format!("Failed to parse config file: {e}"))
    }

    /// Writes the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Describes the failure if serialization or the write fails.
    pub fn save(&self, path: &Path) -> Result<(), String> {
        let content =
            toml::to_string_pretty(self).map_err(|e| format!("Failed to serialize config: {e}"))?;
        std::fs::write(path, content).map_err(|e| format!("Failed to write config file: {e}"))
    }

    /// Returns the auto-save debounce window.
    #[must_use]
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Sets the auto-save debounce window.
    pub const fn set_debounce_ms(&mut self, ms: u64) {
        self.debounce_ms = ms;
    }

    /// Returns the largest GEDCOM payload that will be submitted.
    #[must_use]
    pub const fn max_gedcom_bytes(&self) -> usize {
        self.max_gedcom_bytes
    }

    /// Sets the submission size limit.
    pub const fn set_max_gedcom_bytes(&mut self, bytes: usize) {
        self.max_gedcom_bytes = bytes;
    }
}

fn default_locale() -> String {
    "en".to_string()
}

const fn default_debounce_ms() -> u64 {
    800
}

const fn default_max_gedcom_bytes() -> usize {
    50 * 1024 * 1024
}

/// On-disk layouts of [`Config`], tagged by `_version`. Older layouts stay
/// readable after the struct changes.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "_version")]
enum Versions {
    #[serde(rename = "1")]
    V1 {
        #[serde(default = "default_locale")]
        locale: String,

        #[serde(default = "default_debounce_ms")]
        debounce_ms: u64,

        #[serde(default = "default_max_gedcom_bytes")]
        max_gedcom_bytes: usize,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        base_url: Option<String>,
    },
}

impl From<Versions> for super::Config {
    fn from(versions: Versions) -> Self {
        match versions {
            Versions::V1 {
                locale,
                debounce_ms,
                max_gedcom_bytes,
                base_url,
            } => Self {
                locale,
                debounce_ms,
                max_gedcom_bytes,
                base_url,
            },
        }
    }
}

impl From<super::Config> for Versions {
    fn from(config: super::Config) -> Self {
        Self::V1 {
            locale: config.locale,
            debounce_ms: config.debounce_ms,
            max_gedcom_bytes: config.max_gedcom_bytes,
            base_url: config.base_url,
        }
    }
}
