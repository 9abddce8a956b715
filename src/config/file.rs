//! TOML configuration file loading
//!
//! Supports `~/.config/talkback/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct TalkbackConfigFile {
    /// Completion API configuration
    #[serde(default)]
    pub api: ApiFileConfig,

    /// Response streaming configuration
    #[serde(default)]
    pub chat: ChatFileConfig,

    /// Voice mode configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Storage configuration
    #[serde(default)]
    pub storage: StorageFileConfig,
}

/// Completion API configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiFileConfig {
    /// API key (prefer `talkback set-key` over storing it here)
    pub key: Option<String>,

    /// Endpoint base URL
    pub base_url: Option<String>,

    /// Model identifier
    pub model: Option<String>,

    /// Output token bound
    pub max_tokens: Option<u32>,
}

/// Chat configuration
#[derive(Debug, Default, Deserialize)]
pub struct ChatFileConfig {
    /// `"sentence"` or a positive delta count
    pub chunk_policy: Option<String>,

    /// System prompt sent with every request
    pub system_prompt: Option<String>,
}

/// Voice configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Recognition and synthesis locale (e.g. "en-US")
    pub locale: Option<String>,

    /// Speech rate multiplier
    pub rate: Option<f32>,

    /// Speech pitch multiplier
    pub pitch: Option<f32>,
}

/// Storage configuration
#[derive(Debug, Default, Deserialize)]
pub struct StorageFileConfig {
    /// Data directory
    pub data_dir: Option<String>,

    /// Database file path
    pub db_path: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `TalkbackConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> TalkbackConfigFile {
    config_file_path().map_or_else(TalkbackConfigFile::default, |path| load_from(&path))
}

/// Load a config file from an explicit path, falling back to defaults
pub fn load_from(path: &Path) -> TalkbackConfigFile {
    if !path.exists() {
        return TalkbackConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                TalkbackConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            TalkbackConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/talkback/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("talkback").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let fc = load_from(&dir.path().join("absent.toml"));
        assert!(fc.api.model.is_none());
    }

    #[test]
    fn parses_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[api]\nmodel = \"claude-3-haiku-20240307\"\n\n[voice]\nrate = 1.25\n",
        )
        .unwrap();

        let fc = load_from(&path);
        assert_eq!(fc.api.model.as_deref(), Some("claude-3-haiku-20240307"));
        assert_eq!(fc.voice.rate, Some(1.25));
        assert!(fc.chat.chunk_policy.is_none());
    }

    #[test]
    fn invalid_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[api\nmodel = ").unwrap();

        let fc = load_from(&path);
        assert!(fc.api.model.is_none());
    }
}
