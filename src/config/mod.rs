//! Configuration management for Talkback
//!
//! Priority: environment > `config.toml` > defaults.

pub mod file;

use std::path::PathBuf;
use std::str::FromStr;

use secrecy::SecretString;

use crate::chat::ChatSettings;
use crate::db::KeyStore;
use crate::stream::{ChunkPolicy, DEFAULT_BASE_URL, DEFAULT_MAX_TOKENS, DEFAULT_MODEL};
use crate::voice::SpeechOptions;
use crate::{Error, Result};

use file::TalkbackConfigFile;

/// Talkback configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// API key from env or config file; the key store is consulted when absent
    pub api_key: Option<SecretString>,

    /// Completion endpoint base URL
    pub base_url: String,

    /// Model identifier
    pub model: String,

    /// Output token bound
    pub max_tokens: u32,

    /// How streamed deltas are grouped into chunks
    pub chunk_policy: ChunkPolicy,

    /// System prompt sent with every request
    pub system_prompt: Option<String>,

    /// Voice mode configuration
    pub voice: VoiceConfig,

    /// Path to data directory
    pub data_dir: PathBuf,

    /// Path to the `SQLite` database
    pub db_path: PathBuf,
}

/// Voice mode configuration
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceConfig {
    /// Recognition and synthesis locale
    pub locale: String,

    /// Speech rate multiplier
    pub rate: f32,

    /// Speech pitch multiplier
    pub pitch: f32,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        let options = SpeechOptions::default();
        Self {
            locale: options.language,
            rate: options.rate,
            pitch: options.pitch,
        }
    }
}

impl VoiceConfig {
    /// Options for the speech player
    #[must_use]
    pub fn speech_options(&self) -> SpeechOptions {
        SpeechOptions {
            rate: self.rate,
            pitch: self.pitch,
            language: self.locale.clone(),
        }
    }
}

impl Config {
    /// Load configuration from the environment and the config file
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid
    pub fn load() -> Result<Self> {
        Self::from_sources(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid
    pub fn from_sources(
        fc: TalkbackConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let api_key = env("ANTHROPIC_API_KEY")
            .or(fc.api.key)
            .filter(|k| !k.trim().is_empty())
            .map(SecretString::from);

        let base_url = env("TALKBACK_BASE_URL")
            .or(fc.api.base_url)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let model = env("TALKBACK_MODEL")
            .or(fc.api.model)
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let max_tokens = match env("TALKBACK_MAX_TOKENS") {
            Some(v) => parse_value::<u32>("TALKBACK_MAX_TOKENS", &v)?,
            None => fc.api.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        };
        if max_tokens == 0 {
            return Err(Error::Config("max_tokens must be at least 1".to_string()));
        }

        let chunk_policy = env("TALKBACK_CHUNK_POLICY")
            .or(fc.chat.chunk_policy)
            .map(|v| ChunkPolicy::from_str(&v).map_err(Error::Config))
            .transpose()?
            .unwrap_or_default();

        let system_prompt = env("TALKBACK_SYSTEM_PROMPT")
            .or(fc.chat.system_prompt)
            .filter(|p| !p.trim().is_empty());

        let defaults = VoiceConfig::default();
        let voice = VoiceConfig {
            locale: env("TALKBACK_LOCALE")
                .or(fc.voice.locale)
                .unwrap_or(defaults.locale),
            rate: match env("TALKBACK_SPEECH_RATE") {
                Some(v) => parse_value("TALKBACK_SPEECH_RATE", &v)?,
                None => fc.voice.rate.unwrap_or(defaults.rate),
            },
            pitch: match env("TALKBACK_SPEECH_PITCH") {
                Some(v) => parse_value("TALKBACK_SPEECH_PITCH", &v)?,
                None => fc.voice.pitch.unwrap_or(defaults.pitch),
            },
        };

        // Data directory (~/.local/share/talkback on Linux)
        let data_dir = env("TALKBACK_DATA_DIR")
            .or(fc.storage.data_dir)
            .map_or_else(default_data_dir, PathBuf::from);

        let db_path = env("TALKBACK_DB_PATH")
            .or(fc.storage.db_path)
            .map_or_else(|| data_dir.join("talkback.db"), PathBuf::from);

        Ok(Self {
            api_key,
            base_url,
            model,
            max_tokens,
            chunk_policy,
            system_prompt,
            voice,
            data_dir,
            db_path,
        })
    }

    /// API key from config, falling back to the key store
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingApiKey`] if neither source has one
    pub fn resolve_api_key(&self, store: &KeyStore) -> Result<SecretString> {
        if let Some(key) = &self.api_key {
            return Ok(key.clone());
        }
        store.get()?.ok_or(Error::MissingApiKey)
    }

    /// Request parameters for the chat flow
    #[must_use]
    pub fn chat_settings(&self) -> ChatSettings {
        ChatSettings {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system_prompt: self.system_prompt.clone(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map_or_else(|| PathBuf::from("."), |d| d.data_dir().join("talkback"))
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("invalid value for {key}: '{value}'")))
}
