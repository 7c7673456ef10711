//! Records shared by the builder, the case selector and the live flow.

use crate::feedback::{AnswerRubric, SessionEvaluation};
use crate::silence::SilenceMetrics;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_LANG: &str = "en";
pub const GENERAL_DOMAIN: &str = "general";
pub const OPENER_ID: &str = "q_0001";
pub const FALLBACK_PROMPT_ID: &str = "q_fallback_001";

/// Per-language text or media reference, keyed by language code.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Localized(BTreeMap<String, String>);

impl Localized {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, lang: &str, value: impl Into<String>) -> Self {
        self.0.insert(lang.to_string(), value.into());
        self
    }

    /// Exact language only, blank values count as missing.
    pub fn exact(&self, lang: &str) -> Option<&str> {
        self.0
            .get(lang)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// Requested language, then English, then whatever is present.
    pub fn get(&self, lang: &str) -> Option<&str> {
        self.exact(lang)
            .or_else(|| self.exact(DEFAULT_LANG))
            .or_else(|| self.0.values().map(String::as_str).find(|v| !v.trim().is_empty()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|v| v.trim().is_empty())
    }
}

fn default_true() -> bool {
    true
}

fn default_difficulty() -> u8 {
    1
}

/// A single interview question. Immutable reference data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub question_id: String,
    pub domain: String,
    #[serde(default)]
    pub sub_domain: Option<String>,
    #[serde(default = "default_difficulty")]
    pub difficulty: u8,
    #[serde(default)]
    pub career_target: Vec<String>,
    #[serde(default)]
    pub probability: f64,
    #[serde(default)]
    pub question: Localized,
    #[serde(default)]
    pub video_url: Localized,
    #[serde(default)]
    pub audio_prompt: Localized,
    #[serde(default)]
    pub expected_keywords: Vec<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl Prompt {
    pub fn new(question_id: impl Into<String>, domain: impl Into<String>, difficulty: u8) -> Self {
        Self {
            question_id: question_id.into(),
            domain: domain.into(),
            sub_domain: None,
            difficulty,
            career_target: Vec::new(),
            probability: 0.0,
            question: Localized::new(),
            video_url: Localized::new(),
            audio_prompt: Localized::new(),
            expected_keywords: Vec::new(),
            is_active: true,
        }
    }

    /// Minimal opener used when the canonical `q_0001` record is absent.
    pub fn builtin_opener(media_base: &str) -> Self {
        Self::builtin(OPENER_ID, media_base)
    }

    /// The never-empty fallback prompt.
    pub fn builtin_fallback(media_base: &str) -> Self {
        Self::builtin(FALLBACK_PROMPT_ID, media_base)
    }

    fn builtin(id: &str, media_base: &str) -> Self {
        let mut prompt = Self::new(id, GENERAL_DOMAIN, 1);
        prompt.question = Localized::new().with(DEFAULT_LANG, "Tell me about yourself.");
        prompt.video_url = Localized::new().with(
            DEFAULT_LANG,
            format!("{}/videos/system/intro_en_1.mp4", media_base.trim_end_matches('/')),
        );
        prompt
    }

    pub fn is_general(&self) -> bool {
        self.domain == GENERAL_DOMAIN
    }

    /// Difficulty clamped into the 1..=3 band.
    pub fn level(&self) -> u8 {
        self.difficulty.clamp(1, 3)
    }

    pub fn text(&self, lang: &str) -> &str {
        self.question.get(lang).unwrap_or_default()
    }

    /// Text read aloud in audio mode: a dedicated audio prompt wins over the
    /// displayed question.
    pub fn spoken_text(&self, lang: &str) -> &str {
        self.audio_prompt
            .exact(lang)
            .or_else(|| self.question.exact(lang))
            .or_else(|| self.question.get(lang))
            .unwrap_or_default()
    }

    pub fn video(&self, lang: &str) -> Option<&str> {
        self.video_url.get(lang)
    }

    pub fn is_eligible_for(&self, tiers: &[String]) -> bool {
        self.career_target.iter().any(|t| tiers.contains(t))
    }
}

/// Candidate attributes owned by the onboarding subsystem. Every field is
/// optional because the profile is joined loosely onto the session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateProfile {
    pub user_id: String,
    #[serde(default)]
    pub firstname: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub sub_domain: Option<String>,
    #[serde(default)]
    pub career_stage: Option<String>,
    #[serde(default)]
    pub segment: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub skills: Vec<String>,
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl CandidateProfile {
    pub fn firstname(&self) -> &str {
        non_blank(&self.firstname).unwrap_or("Candidate")
    }

    pub fn domain(&self) -> &str {
        non_blank(&self.domain).unwrap_or(GENERAL_DOMAIN)
    }

    pub fn sub_domain(&self) -> Option<&str> {
        non_blank(&self.sub_domain)
    }

    pub fn career_stage(&self) -> Option<&str> {
        non_blank(&self.career_stage)
    }

    pub fn segment(&self) -> crate::pyramid::Segment {
        crate::pyramid::Segment::parse(non_blank(&self.segment).unwrap_or("elite"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimulationMode {
    Video,
    Audio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterviewType {
    #[default]
    Standard,
    Trial,
    CaseStudy,
    StrategicCase,
}

impl InterviewType {
    pub fn is_case(self) -> bool {
        matches!(self, InterviewType::CaseStudy | InterviewType::StrategicCase)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Pending,
    Running,
    AwaitingFeedback,
    Completed,
}

impl SessionStatus {
    /// Statuses only move forward; re-asserting the current one is allowed.
    pub fn can_advance_to(self, next: SessionStatus) -> bool {
        next >= self
    }
}

/// One interview attempt as persisted by the session store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub simulation_mode: Option<SimulationMode>,
    #[serde(default)]
    pub interview_type: InterviewType,
    #[serde(default, rename = "questions")]
    pub prompts: Vec<Prompt>,
    #[serde(default, rename = "total_questions")]
    pub total_prompts: usize,
    #[serde(default, rename = "duration_target")]
    pub duration_target_secs: Option<u32>,
    #[serde(default)]
    pub status: SessionStatus,
    #[serde(default)]
    pub opener_sent: bool,
    #[serde(default)]
    pub pack_built: bool,
    #[serde(default)]
    pub case_id: Option<String>,
    #[serde(default)]
    pub evaluation: Option<SessionEvaluation>,
}

impl SessionRecord {
    pub fn new(id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    pub fn lang(&self) -> &str {
        non_blank(&self.lang).unwrap_or(DEFAULT_LANG)
    }

    /// English sessions default to video, every other language to audio.
    pub fn simulation_mode(&self) -> SimulationMode {
        self.simulation_mode.unwrap_or(if self.lang() == DEFAULT_LANG {
            SimulationMode::Video
        } else {
            SimulationMode::Audio
        })
    }
}

/// Case-study library entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub id: String,
    #[serde(default)]
    pub theme: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub role_targets: Vec<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub intro: Localized,
    #[serde(default)]
    pub intro_video: Localized,
    #[serde(default)]
    pub questions: Vec<Localized>,
    #[serde(default)]
    pub question_videos: Vec<Localized>,
    #[serde(default)]
    pub annexes: Vec<serde_json::Value>,
    #[serde(default)]
    pub data_block: Option<serde_json::Value>,
    #[serde(default)]
    pub expected_outcome: Option<String>,
}

pub const CASE_STEPS: usize = 5;

impl CaseRecord {
    pub fn intro_text(&self, lang: &str) -> &str {
        self.intro
            .get(lang)
            .unwrap_or("Let's begin with your case introduction.")
    }

    /// Question for a 1-based step, if the case defines one.
    pub fn step(&self, step: usize, lang: &str) -> Option<(&str, Option<&str>)> {
        if step == 0 || step > CASE_STEPS {
            return None;
        }
        let text = self.questions.get(step - 1)?.get(lang)?;
        let video = self.question_videos.get(step - 1).and_then(|v| v.get(lang));
        Some((text, video))
    }

    pub fn step_count(&self, lang: &str) -> usize {
        (1..=CASE_STEPS)
            .take_while(|s| self.step(*s, lang).is_some())
            .count()
    }

    /// Intro followed by each question, as a sequence the live flow can run.
    pub fn as_prompts(&self, lang: &str) -> Vec<Prompt> {
        let mut intro = Prompt::new(format!("{}_intro", self.id), "case", 1);
        intro.question = Localized::new().with(lang, self.intro_text(lang));
        intro.video_url = self.intro_video.clone();

        let mut prompts = vec![intro];
        for step in 1..=self.step_count(lang) {
            if let Some((text, video)) = self.step(step, lang) {
                let mut prompt = Prompt::new(format!("{}_q{}", self.id, step), "case", 2);
                prompt.question = Localized::new().with(lang, text);
                if let Some(video) = video {
                    prompt.video_url = Localized::new().with(lang, video);
                }
                prompts.push(prompt);
            }
        }
        prompts
    }
}

/// Persisted answer to one prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub session_id: String,
    pub user_id: String,
    pub question_id: String,
    pub answer: String,
    pub score_auto: Option<u32>,
    pub rubric: Option<AnswerRubric>,
    pub silence: SilenceMetrics,
}

/// Keeps only well-formed prompt ids (`q_` prefix, word characters), first
/// occurrence wins.
pub fn clean_asked_ids<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = std::collections::HashSet::new();
    raw.into_iter()
        .map(|id| id.as_ref().to_string())
        .filter(|id| {
            id.starts_with("q_") && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
        .filter(|id| seen.insert(id.clone()))
        .collect()
}
