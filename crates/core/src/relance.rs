//! Clarification utterances played after a first extended silence.

use crate::model::DEFAULT_LANG;
use crate::settings::EngineSettings;
use crate::store::{CachedRelance, RelanceCache};
use anyhow::Result;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use std::sync::{Arc, Mutex};

/// Text-to-speech collaborator. Returns a URL the player can fetch.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// `key` names the produced asset so repeated calls overwrite it.
    async fn synthesize(&self, text: &str, lang: &str, key: &str) -> Result<String>;
}

fn intros(lang: &str) -> &'static [&'static str] {
    match lang {
        "fr" => &[
            "Laissez-moi reformuler.",
            "Réfléchissons ensemble.",
            "Voici un autre angle.",
            "Essayez cette approche.",
        ],
        "es" => &[
            "Déjame reformularlo.",
            "Piénsalo conmigo.",
            "Prueba este enfoque.",
            "Aquí otra perspectiva.",
        ],
        "it" => &[
            "Lascia che riformuli.",
            "Pensiamoci insieme.",
            "Prova questo angolo.",
            "Ecco un'altra via.",
        ],
        "de" => &[
            "Lassen Sie mich das umformulieren.",
            "Denken wir darüber nach.",
            "Betrachten wir diesen Ansatz.",
            "Eine weitere Perspektive.",
        ],
        "zh" => &["让我换一种表达。", "我们一起想想。", "可以从这个角度试试。", "还有这种思路。"],
        "ko" => &[
            "다르게 표현해볼게요.",
            "같이 생각해봐요.",
            "이 관점을 시도해보세요.",
            "이렇게도 볼 수 있어요.",
        ],
        _ => &[
            "Let me reframe this.",
            "Think it through with me.",
            "Try this angle.",
            "Here's another way.",
        ],
    }
}

fn closing_sentence(lang: &str) -> &'static str {
    match lang {
        "fr" => "Laissez-moi vous le reformuler autrement.",
        "es" => "Déjame expresarlo de otra forma.",
        "it" => "Lascia che lo dica diversamente.",
        "de" => "Lassen Sie mich das anders formulieren.",
        "zh" => "让我换一种说法。",
        "ko" => "다른 방식으로 설명해볼게요.",
        _ => "Let me put it another way.",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Clarification {
    pub relance_text: String,
    /// `None` when synthesis failed; the clarification is then text only.
    pub audio_url: Option<String>,
    pub cached: bool,
}

pub struct RelanceService {
    cache: Arc<dyn RelanceCache>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    rng: Mutex<StdRng>,
}

impl RelanceService {
    pub fn new(
        cache: Arc<dyn RelanceCache>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        settings: &EngineSettings,
    ) -> Self {
        let rng = match settings.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            cache,
            synthesizer,
            rng: Mutex::new(rng),
        }
    }

    pub fn relance_text(&self, lang: &str, firstname: Option<&str>) -> String {
        addressed(firstname, &self.wording(&lang.to_lowercase()))
    }

    /// Intro plus closing sentence, without the candidate's name. This is
    /// what gets synthesized, so one cached clip suits every candidate.
    fn wording(&self, lang: &str) -> String {
        let intro = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            intros(lang).choose(&mut *rng).copied().unwrap_or_default()
        };
        format!("{intro} {}", closing_sentence(lang))
            .trim()
            .to_string()
    }

    /// Cache by `(question_id, lang)`, synthesize on a miss. Never fails.
    ///
    /// A cache hit reuses the cached wording, so the text shown always
    /// matches the audio played.
    pub async fn clarify(&self, question_id: &str, lang: &str, firstname: Option<&str>) -> Clarification {
        let lang = if lang.trim().is_empty() {
            DEFAULT_LANG.to_string()
        } else {
            lang.to_lowercase()
        };

        match self.cache.cached_relance(question_id, &lang).await {
            Ok(Some(cached)) => {
                tracing::debug!("relance cache hit for {} ({})", question_id, lang);
                return Clarification {
                    relance_text: addressed(firstname, &cached.text),
                    audio_url: Some(cached.audio_url),
                    cached: true,
                };
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("relance cache lookup failed: {}", e),
        }

        let wording = self.wording(&lang);
        let key = format!("relances/{question_id}_{lang}");
        let audio_url = match self.synthesizer.synthesize(&wording, &lang, &key).await {
            Ok(url) => {
                let entry = CachedRelance {
                    text: wording.clone(),
                    audio_url: url.clone(),
                };
                if let Err(e) = self.cache.store_relance(question_id, &lang, &entry).await {
                    tracing::warn!("could not cache relance audio: {}", e);
                }
                Some(url)
            }
            Err(e) => {
                tracing::error!("relance synthesis failed for {}: {:#}", question_id, e);
                None
            }
        };

        Clarification {
            relance_text: addressed(firstname, &wording),
            audio_url,
            cached: false,
        }
    }
}

fn addressed(firstname: Option<&str>, wording: &str) -> String {
    match firstname.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => format!("{name}, {wording}"),
        None => wording.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn service(synth: MockSpeechSynthesizer) -> (Arc<MemoryStore>, RelanceService) {
        let store = Arc::new(MemoryStore::new());
        let settings = EngineSettings {
            rng_seed: Some(11),
            ..Default::default()
        };
        let service = RelanceService::new(store.clone(), Arc::new(synth), &settings);
        (store, service)
    }

    #[test]
    fn text_uses_firstname_and_language() {
        let (_, service) = service(MockSpeechSynthesizer::new());

        let text = service.relance_text("FR", Some("Léa"));

        assert!(text.starts_with("Léa, "));
        assert!(text.ends_with("Laissez-moi vous le reformuler autrement."));
        assert!(intros("fr").iter().any(|i| text.contains(i)));
    }

    #[test]
    fn unknown_language_speaks_english() {
        let (_, service) = service(MockSpeechSynthesizer::new());
        let text = service.relance_text("pt", None);
        assert!(text.ends_with("Let me put it another way."));
        assert!(!text.contains(", "));
    }

    #[tokio::test]
    async fn miss_synthesizes_once_then_hits_cache() {
        // Arrange
        let mut synth = MockSpeechSynthesizer::new();
        synth
            .expect_synthesize()
            .withf(|text, lang, key| {
                lang == "en" && key == "relances/q_0007_en" && !text.contains("Sam")
            })
            .returning(|_, _, _| Ok("https://cdn.test/relances/q_0007_en.mp3".to_string()))
            .once();
        let (_, service) = service(synth);

        // Act
        let first = service.clarify("q_0007", "en", Some("Sam")).await;
        let second = service.clarify("q_0007", "en", None).await;

        // Assert
        assert!(!first.cached);
        assert_eq!(first.audio_url.as_deref(), Some("https://cdn.test/relances/q_0007_en.mp3"));
        assert!(second.cached);
        assert_eq!(second.audio_url, first.audio_url);
    }

    #[tokio::test]
    async fn cache_hit_shows_the_wording_that_was_spoken() {
        // Arrange
        let mut synth = MockSpeechSynthesizer::new();
        synth
            .expect_synthesize()
            .returning(|_, _, key| Ok(format!("https://cdn.test/{key}.mp3")))
            .once();
        let (store, service) = service(synth);

        // Act: the wording is drawn at random on every call, so many hits
        // would diverge if the text were not taken from the cache.
        let first = service.clarify("q_0009", "en", Some("Sam")).await;
        let mut hits = Vec::new();
        for _ in 0..8 {
            hits.push(service.clarify("q_0009", "en", Some("Kim")).await);
        }

        // Assert
        let cached = store.cached_relance("q_0009", "en").await.unwrap().unwrap();
        assert_eq!(first.relance_text, format!("Sam, {}", cached.text));
        for hit in hits {
            assert!(hit.cached);
            assert_eq!(hit.relance_text, format!("Kim, {}", cached.text));
        }
    }

    #[tokio::test]
    async fn synthesis_failure_is_text_only() {
        let mut synth = MockSpeechSynthesizer::new();
        synth
            .expect_synthesize()
            .returning(|_, _, _| Err(anyhow::anyhow!("quota exceeded")));
        let (store, service) = service(synth);

        let result = service.clarify("q_0008", "de", None).await;

        assert_eq!(result.audio_url, None);
        assert!(!result.relance_text.is_empty());
        assert_eq!(store.cached_relance("q_0008", "de").await.unwrap(), None);
    }
}
