//! Configuration types for notesdb
//!
//! One [`StoreConfig`] describes an installation: where notesfiles live,
//! who the engine superuser is, and the defaults applied to new notesfiles.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Hard upper bound on any text blob; also the corruption threshold
pub const HARD_MAX_TEXT_LEN: i32 = 1024 * 1024;

/// Default configured maximum note length
pub const DEFAULT_MAX_NOTE_LEN: i32 = 65_000;

/// Installation-wide store configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Spool directory holding every notesfile
    pub root: PathBuf,
    /// Directory of per-reader sequencer files (default: `<root>/.sequencer`)
    pub sequencer_dir: Option<PathBuf>,
    /// Engine superuser; always holds every permission
    pub superuser: String,
    /// Author name substituted on anonymous posts
    pub anonymous_name: String,
    /// Local system name written into global ids (default: host name)
    pub system_name: Option<String>,
    /// Maximum note length given to new notesfiles
    pub default_max_note_len: i32,
    /// Expiration threshold (days) used when a notesfile says "default"
    pub default_expire_days: i32,
    /// Bump the per-notesfile read counter on every read
    pub record_read_stats: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/var/spool/notes"),
            sequencer_dir: None,
            superuser: "notes".to_string(),
            anonymous_name: "anonymous".to_string(),
            system_name: None,
            default_max_note_len: DEFAULT_MAX_NOTE_LEN,
            default_expire_days: 14,
            record_read_stats: true,
        }
    }
}

impl StoreConfig {
    /// Create config rooted at `root`
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    /// Directory holding sequencer files
    #[must_use]
    pub fn sequencer_dir(&self) -> PathBuf {
        self.sequencer_dir
            .clone()
            .unwrap_or_else(|| self.root.join(".sequencer"))
    }

    /// Local system name
    #[must_use]
    pub fn system_name(&self) -> String {
        self.system_name
            .clone()
            .unwrap_or_else(crate::types::local_system_name)
    }

    /// Check the configuration for values the engine cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.default_max_note_len <= 0 || self.default_max_note_len > HARD_MAX_TEXT_LEN {
            return Err(Error::Configuration(format!(
                "default_max_note_len must be in 1..={HARD_MAX_TEXT_LEN}, got {}",
                self.default_max_note_len
            )));
        }
        if self.superuser.is_empty() {
            return Err(Error::Configuration("superuser must not be empty".into()));
        }
        if self.anonymous_name.is_empty() {
            return Err(Error::Configuration(
                "anonymous_name must not be empty".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = StoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.superuser, "notes");
        assert_eq!(
            config.sequencer_dir(),
            PathBuf::from("/var/spool/notes/.sequencer")
        );
    }

    #[test]
    fn test_max_note_len_bounded() {
        let config = StoreConfig {
            default_max_note_len: HARD_MAX_TEXT_LEN + 1,
            ..StoreConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: StoreConfig = toml::from_str(
            r#"
            root = "/tmp/notes"
            system_name = "bravo"
            "#,
        )
        .unwrap();
        assert_eq!(config.root, PathBuf::from("/tmp/notes"));
        assert_eq!(config.system_name(), "bravo");
        assert_eq!(config.default_max_note_len, DEFAULT_MAX_NOTE_LEN);
    }
}
