//! Application Configuration Module
//!
//! Loads the interview service settings from the environment and folds the
//! engine tunables it knows about into [`EngineSettings`].

use interview_core::media::INTRO_LANGS;
use interview_core::settings::EngineSettings;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::Level;

/// Holds all configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub question_bank_dir: PathBuf,
    pub audio_dir: PathBuf,
    pub openai_api_key: Option<String>,
    pub chat_model: String,
    pub elevenlabs_api_key: Option<String>,
    /// Speech voice per language, from `NOVA_VOICE_<LANG>`.
    pub voices: HashMap<String, String>,
    pub log_level: Level,
    pub settings: EngineSettings,
}

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid log level provided for RUST_LOG: {0}")]
    InvalidLogLevel(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    // *   `QUESTION_BANK_DIR`: (Optional) Directory of `*.json` bank files. Defaults to "data".
    // *   `AUDIO_DIR`: (Optional) Where synthesized clarifications are written. Defaults to "audio".
    // *   `MEDIA_BASE_URL`, `SILENCE_MS`, `SESSION_SECONDS`, `RNG_SEED`: engine overrides.
    // *   `OPENAI_API_KEY`: (Optional) Enables model-graded feedback.
    // *   `CHAT_MODEL`: (Optional) The model used for feedback. Defaults to "gpt-4o".
    // *   `ELEVENLABS_API_KEY`: (Optional) Enables speech synthesis.
    // *   `NOVA_VOICE_<LANG>`: (Optional) Voice id per language.
    // *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file. This is useful for local development and is ignored if not present.
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let log_level_str = non_empty("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidLogLevel(log_level_str))?;

        let mut settings = EngineSettings::default();
        if let Some(base) = non_empty("MEDIA_BASE_URL") {
            settings.media_base_url = base.trim_end_matches('/').to_string();
        }
        if let Some(ms) = parse_var(&non_empty, "SILENCE_MS")? {
            settings.silence_confirm_ms = ms;
        }
        if let Some(secs) = parse_var(&non_empty, "SESSION_SECONDS")? {
            settings.session_seconds = secs;
        }
        settings.rng_seed = parse_var(&non_empty, "RNG_SEED")?;

        let voices = INTRO_LANGS
            .iter()
            .filter_map(|lang| {
                non_empty(&format!("NOVA_VOICE_{}", lang.to_uppercase()))
                    .map(|voice| (lang.to_string(), voice))
            })
            .collect();

        Ok(Self {
            question_bank_dir: non_empty("QUESTION_BANK_DIR")
                .unwrap_or_else(|| "data".to_string())
                .into(),
            audio_dir: non_empty("AUDIO_DIR")
                .unwrap_or_else(|| "audio".to_string())
                .into(),
            openai_api_key: non_empty("OPENAI_API_KEY"),
            chat_model: non_empty("CHAT_MODEL").unwrap_or_else(|| "gpt-4o".to_string()),
            elevenlabs_api_key: non_empty("ELEVENLABS_API_KEY"),
            voices,
            log_level,
            settings,
        })
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string()))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_without_any_variable() {
        let config = Config::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config.question_bank_dir, PathBuf::from("data"));
        assert_eq!(config.chat_model, "gpt-4o");
        assert_eq!(config.log_level, Level::INFO);
        assert!(config.openai_api_key.is_none());
        assert_eq!(config.settings, EngineSettings::default());
    }

    #[test]
    fn engine_overrides_and_voices_are_read() {
        let config = Config::from_lookup(lookup(&[
            ("MEDIA_BASE_URL", "https://media.test/"),
            ("SILENCE_MS", "4000"),
            ("SESSION_SECONDS", "600"),
            ("RNG_SEED", "7"),
            ("NOVA_VOICE_FR", "voice-fr-1"),
            ("OPENAI_API_KEY", "  "),
        ]))
        .unwrap();

        assert_eq!(config.settings.media_base_url, "https://media.test");
        assert_eq!(config.settings.silence_confirm_ms, 4000);
        assert_eq!(config.settings.session_seconds, 600);
        assert_eq!(config.settings.rng_seed, Some(7));
        assert_eq!(config.voices.get("fr").map(String::as_str), Some("voice-fr-1"));
        assert!(config.openai_api_key.is_none(), "blank keys count as unset");
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = Config::from_lookup(lookup(&[("SILENCE_MS", "five")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(key, _) if key == "SILENCE_MS"));

        let err = Config::from_lookup(lookup(&[("RUST_LOG", "chatty")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidLogLevel(_)));
    }
}
