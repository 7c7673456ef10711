use serde::Deserialize;
use std::time::Duration;

/// Every tunable of the engine. Services deserialize or override individual
/// fields from their own configuration; anything left out keeps its default.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// RMS level below which the input counts as quiet.
    pub silence_threshold: f32,
    pub silence_confirm_ms: u64,
    /// How long before confirmation the "pause suspected" signal fires.
    pub silence_prealert_ms: u64,
    pub sample_period_ms: u64,
    pub pause_min_ms: u64,
    pub idle_listen_clips: usize,
    pub audio_lock_ms: u64,
    pub session_seconds: u32,
    pub general_quotas: [usize; 3],
    pub domain_block_size: usize,
    pub domain_block_count: usize,
    pub max_general_prompts: usize,
    pub max_domain_prompts: usize,
    pub max_total_prompts: usize,
    pub case_candidate_limit: usize,
    pub media_base_url: String,
    pub rng_seed: Option<u64>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            silence_threshold: 0.03,
            silence_confirm_ms: 5_000,
            silence_prealert_ms: 1_000,
            sample_period_ms: 100,
            pause_min_ms: 500,
            idle_listen_clips: 5,
            audio_lock_ms: 2_000,
            session_seconds: 1_200,
            general_quotas: [3, 6, 6],
            domain_block_size: 15,
            domain_block_count: 3,
            max_general_prompts: 5,
            max_domain_prompts: 20,
            max_total_prompts: 25,
            case_candidate_limit: 50,
            media_base_url: "https://media.example.com".to_string(),
            rng_seed: None,
        }
    }
}

impl EngineSettings {
    pub fn general_target(&self) -> usize {
        self.general_quotas.iter().sum()
    }

    /// Never zero, so a misconfigured period cannot spin the sampler.
    pub fn sample_period(&self) -> Duration {
        Duration::from_millis(self.sample_period_ms.max(1))
    }

    pub fn audio_lock(&self) -> Duration {
        Duration::from_millis(self.audio_lock_ms)
    }

    pub fn session_length(&self) -> Duration {
        Duration::from_secs(u64::from(self.session_seconds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_remaining_defaults() {
        let settings: EngineSettings =
            serde_json::from_str(r#"{"silence_confirm_ms": 3000, "rng_seed": 7}"#).unwrap();
        assert_eq!(settings.silence_confirm_ms, 3000);
        assert_eq!(settings.rng_seed, Some(7));
        assert_eq!(settings.general_target(), 15);
        assert_eq!(settings.sample_period(), Duration::from_millis(100));
    }

    #[test]
    fn zero_sample_period_is_clamped() {
        let settings = EngineSettings {
            sample_period_ms: 0,
            ..Default::default()
        };
        assert_eq!(settings.sample_period(), Duration::from_millis(1));
    }
}
