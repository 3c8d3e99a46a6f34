//! Persisted Flags
//!
//! Small boolean flags the host remembers between launches, such as
//! whether the welcome message was already shown. Stored as a flat TOML
//! table:
//!
//! ```toml
//! welcome_message_shown = true
//! history_welcome_shown = false
//! ```

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Welcome message was inserted into the conversation
pub const WELCOME_MESSAGE_SHOWN: &str = "welcome_message_shown";
/// History screen introduction was shown
pub const HISTORY_WELCOME_SHOWN: &str = "history_welcome_shown";

/// Errors reading or writing the preferences file
#[derive(Debug, Error)]
pub enum PreferencesError {
    /// Failed to read the file
    #[error("Failed to read preferences at {path}: {source}")]
    Read {
        /// File location
        path: PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Failed to write the file
    #[error("Failed to write preferences at {path}: {source}")]
    Write {
        /// File location
        path: PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// The file is not a flat table of booleans
    #[error("Failed to parse preferences: {0}")]
    Parse(#[from] toml::de::Error),

    /// The flags could not be encoded
    #[error("Failed to encode preferences: {0}")]
    Encode(#[from] toml::ser::Error),
}

/// Named boolean flags
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Preferences {
    flags: BTreeMap<String, bool>,
}

impl Preferences {
    /// Read flags from `path`; a missing file yields no flags set
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be read or parsed.
    pub async fn load(path: &Path) -> Result<Self, PreferencesError> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(toml::from_str(&content)?),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No preferences file yet");
                Ok(Self::default())
            }
            Err(source) => Err(PreferencesError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Write flags to `path`, creating parent directories
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be written.
    pub async fn save(&self, path: &Path) -> Result<(), PreferencesError> {
        let write_err = |source| PreferencesError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
        let content = toml::to_string(self)?;
        tokio::fs::write(path, content).await.map_err(write_err)?;
        tracing::debug!(path = %path.display(), flags = self.flags.len(), "Saved preferences");
        Ok(())
    }

    /// Value of a flag; unset flags are `false`
    #[must_use]
    pub fn flag(&self, name: &str) -> bool {
        self.flags.get(name).copied().unwrap_or(false)
    }

    /// Set a flag
    pub fn set_flag(&mut self, name: &str, value: bool) {
        self.flags.insert(name.to_string(), value);
    }
}
