use anyhow::{Context, Result};
use async_trait::async_trait;
use interview_core::relance::SpeechSynthesizer;
use reqwest::Client;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const ELEVENLABS_URL: &str = "https://api.elevenlabs.io/v1/text-to-speech";
const MODEL_ID: &str = "eleven_multilingual_v2";

/// Synthesizes speech with an ElevenLabs-style API and publishes the audio
/// under a local directory served at `public_base`.
pub struct ElevenLabsClient {
    client: Client,
    api_key: String,
    voices: HashMap<String, String>,
    audio_dir: PathBuf,
    public_base: String,
    endpoint: String,
}

impl ElevenLabsClient {
    pub fn new(
        api_key: String,
        voices: HashMap<String, String>,
        audio_dir: PathBuf,
        public_base: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            api_key,
            voices,
            audio_dir,
            public_base: public_base.into().trim_end_matches('/').to_string(),
            endpoint: ELEVENLABS_URL.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Configured voice, or `nova_<lang>`.
    pub fn voice_for(&self, lang: &str) -> String {
        self.voices
            .get(lang)
            .cloned()
            .unwrap_or_else(|| format!("nova_{lang}"))
    }

    pub fn audio_path(&self, key: &str) -> PathBuf {
        audio_path(&self.audio_dir, key)
    }
}

fn audio_path(dir: &Path, key: &str) -> PathBuf {
    let mut path = dir.to_path_buf();
    path.extend(key.split('/').filter(|part| !part.is_empty() && *part != ".."));
    path.set_extension("mp3");
    path
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsClient {
    async fn synthesize(&self, text: &str, lang: &str, key: &str) -> Result<String> {
        let voice = self.voice_for(lang);
        let body = serde_json::json!({
            "text": text,
            "model_id": MODEL_ID,
        });

        let audio = self
            .client
            .post(format!("{}/{}", self.endpoint, voice))
            .header("xi-api-key", &self.api_key)
            .header("accept", "audio/mpeg")
            .json(&body)
            .send()
            .await
            .context("Speech synthesis request failed")?
            .error_for_status()?
            .bytes()
            .await?;

        let path = self.audio_path(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&path, &audio)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!("synthesized {} bytes of {} speech to {}", audio.len(), lang, path.display());

        Ok(format!("{}/{}.mp3", self.public_base, key.trim_start_matches('/')))
    }
}
