//! System clips and their resolution to playable references.

use crate::model::Prompt;
use crate::playlist::Clip;
use anyhow::Result;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use std::sync::Arc;

/// Languages with recorded intro clips.
pub const INTRO_LANGS: [&str; 7] = ["en", "fr", "es", "it", "de", "zh", "ko"];

const MISSING: &str = "question_missing";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemClip {
    Intro1,
    Intro2,
    IdleListen,
    IdleSmile,
    ListenIdle,
    ClarifyStart,
    ClarifyEnd,
    ClarifyEndAlt,
    EndInterview,
    QuestionMissing,
}

impl SystemClip {
    pub fn name(self, lang: &str) -> String {
        match self {
            SystemClip::Intro1 => format!("intro_{lang}_1"),
            SystemClip::Intro2 => format!("intro_{lang}_2"),
            SystemClip::IdleListen => "idle_listen".into(),
            SystemClip::IdleSmile => "idle_smile".into(),
            SystemClip::ListenIdle => "listen_idle_01".into(),
            SystemClip::ClarifyStart => "clarify_start".into(),
            SystemClip::ClarifyEnd => "clarify_end".into(),
            SystemClip::ClarifyEndAlt => "clarify_end_alt".into(),
            SystemClip::EndInterview => "nova_end_interview".into(),
            SystemClip::QuestionMissing => MISSING.into(),
        }
    }

    /// The microphone stays open only while idle filler plays.
    pub fn mic_open(self) -> bool {
        matches!(
            self,
            SystemClip::IdleListen | SystemClip::IdleSmile | SystemClip::ListenIdle
        )
    }

    fn is_static(self, lang: &str) -> bool {
        match self {
            SystemClip::Intro1 | SystemClip::Intro2 => INTRO_LANGS.contains(&lang),
            _ => true,
        }
    }
}

/// Maps a symbolic clip name and language to a playable URL.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MediaResolver: Send + Sync {
    async fn resolve(&self, name: &str, lang: &str) -> Result<Option<String>>;
}

/// Resolution order: static catalog, then the resolver, then
/// `question_missing`. Never fails.
#[derive(Clone)]
pub struct SystemMedia {
    base_url: String,
    resolver: Option<Arc<dyn MediaResolver>>,
}

impl SystemMedia {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            resolver: None,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn MediaResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    fn url(&self, name: &str) -> String {
        format!("{}/videos/system/{}.mp4", self.base_url, name)
    }

    pub fn missing(&self) -> Clip {
        Clip::system(self.url(MISSING), false)
    }

    pub async fn clip(&self, clip: SystemClip, lang: &str) -> Clip {
        let name = clip.name(lang);
        if clip.is_static(lang) {
            return Clip::system(self.url(&name), clip.mic_open());
        }
        if let Some(resolver) = &self.resolver {
            match resolver.resolve(&name, lang).await {
                Ok(Some(url)) => return Clip::system(url, clip.mic_open()),
                Ok(None) => tracing::debug!("no media for {} ({})", name, lang),
                Err(e) => tracing::warn!("media resolution failed for {}: {:#}", name, e),
            }
        }
        self.missing()
    }

    /// Idle filler: `listen_count` listening loops followed by one smile.
    pub async fn idle_sequence(&self, listen_count: usize, lang: &str) -> Vec<Clip> {
        let listen = self.clip(SystemClip::IdleListen, lang).await;
        let smile = self.clip(SystemClip::IdleSmile, lang).await;
        let mut clips = vec![listen; listen_count];
        clips.push(smile);
        clips
    }

    /// Question video for `lang`, or the missing-question clip.
    pub fn question_clip(&self, prompt: &Prompt, lang: &str) -> Clip {
        match prompt.video(lang) {
            Some(url) => Clip::question(url),
            None => {
                tracing::warn!("prompt {} has no video, using {}", prompt.question_id, MISSING);
                Clip {
                    is_question: true,
                    ..self.missing()
                }
            }
        }
    }
}
