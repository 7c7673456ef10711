//! Weighted choice of a case study for case-type sessions.

use crate::error::EngineError;
use crate::model::{CandidateProfile, CaseRecord, SessionStatus};
use crate::pyramid::pyramid_labels;
use crate::settings::EngineSettings;
use crate::store::{CaseLibrary, SessionStore, advance_status};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// Candidate-facing signals a case is scored against. Everything lowercase.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaseAffinity {
    pub domain: String,
    pub tiers: Vec<String>,
    pub tags: Vec<String>,
    pub skills: Vec<String>,
}

impl CaseAffinity {
    pub fn from_profile(profile: &CandidateProfile) -> Self {
        let segment = profile.segment();
        let tier = profile
            .career_stage()
            .map(str::to_lowercase)
            .unwrap_or_else(|| segment.default_tier().to_string());
        let lower = |v: &[String]| v.iter().map(|s| s.to_lowercase()).collect::<Vec<_>>();
        Self {
            domain: profile.domain().to_lowercase(),
            tiers: pyramid_labels(&tier, segment),
            tags: lower(&profile.tags),
            skills: lower(&profile.skills),
        }
    }

    /// Base 1, +1.2 exact domain, +0.8 eligible tier, +0.5 tag overlap,
    /// +0.3 skill overlap.
    pub fn weight(&self, case: &CaseRecord) -> f64 {
        let mut weight = 1.0;
        if case
            .theme
            .as_deref()
            .is_some_and(|t| t.to_lowercase() == self.domain)
        {
            weight += 1.2;
        }
        if case.role_targets.iter().any(|r| self.tiers.contains(r)) {
            weight += 0.8;
        }
        let overlaps = |pool: &[String]| case.tags.iter().any(|t| pool.contains(&t.to_lowercase()));
        if overlaps(&self.tags) {
            weight += 0.5;
        }
        if overlaps(&self.skills) {
            weight += 0.3;
        }
        weight
    }
}

/// Roulette-wheel draw: the first index whose running weight reaches a
/// uniform draw over the total.
pub fn roulette<R: Rng>(weights: &[f64], rng: &mut R) -> Option<usize> {
    let total: f64 = weights.iter().sum();
    if weights.is_empty() || total <= 0.0 {
        return None;
    }
    let draw = rng.gen_range(0.0..total);
    let mut acc = 0.0;
    weights
        .iter()
        .position(|w| {
            acc += w;
            acc >= draw
        })
        .or(Some(0))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action")]
pub enum CaseStep {
    #[serde(rename = "CASE_INTRO")]
    Intro {
        case_id: String,
        theme: Option<String>,
        question_text: String,
        video_url: Option<String>,
        annexes: Vec<Value>,
        data_block: Value,
    },
    #[serde(rename = "CASE_STEP")]
    Question {
        case_id: String,
        step_index: usize,
        theme: Option<String>,
        question_text: String,
        video_url: Option<String>,
        annexes: Vec<Value>,
        data_block: Value,
    },
    #[serde(rename = "COMPLETE")]
    Complete { message: String },
}

pub struct CaseSelector {
    cases: Arc<dyn CaseLibrary>,
    sessions: Arc<dyn SessionStore>,
    limit: usize,
    rng: Mutex<StdRng>,
}

impl CaseSelector {
    pub fn new(
        cases: Arc<dyn CaseLibrary>,
        sessions: Arc<dyn SessionStore>,
        settings: &EngineSettings,
    ) -> Self {
        let rng = match settings.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            cases,
            sessions,
            limit: settings.case_candidate_limit,
            rng: Mutex::new(rng),
        }
    }

    /// Returns the case pinned to the session, choosing and pinning one first
    /// if needed.
    pub async fn select(&self, session_id: &str) -> Result<CaseRecord, EngineError> {
        let session = self
            .sessions
            .load_session(session_id)
            .await?
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))?;

        if let Some(case_id) = session.case_id.as_deref() {
            if let Some(case) = self.cases.case_by_id(case_id).await? {
                return Ok(case);
            }
            tracing::warn!("pinned case {} no longer exists, choosing again", case_id);
        }

        let profile = self
            .sessions
            .load_profile(&session.user_id)
            .await?
            .unwrap_or_default();
        let affinity = CaseAffinity::from_profile(&profile);
        let candidates = self
            .cases
            .find_cases(&affinity.domain, &affinity.tiers, self.limit)
            .await?;

        let weights: Vec<f64> = candidates.iter().map(|c| affinity.weight(c)).collect();
        let chosen = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            roulette(&weights, &mut *rng)
        };
        let case = chosen
            .and_then(|idx| candidates.into_iter().nth(idx))
            .ok_or_else(|| EngineError::NoCaseAvailable(session_id.to_string()))?;

        tracing::info!("session {} pinned to case {}", session_id, case.id);
        self.sessions.pin_case(session_id, &case.id).await?;
        Ok(case)
    }

    /// Step 0 is the intro, steps 1..=5 the case questions; anything past the
    /// last question completes the case.
    pub async fn step(&self, session_id: &str, step: usize) -> Result<CaseStep, EngineError> {
        let case = self.select(session_id).await?;
        let session = self
            .sessions
            .load_session(session_id)
            .await?
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))?;
        let lang = session.lang();
        let data_block = case.data_block.clone().unwrap_or_else(|| Value::Object(Default::default()));

        if step == 0 {
            return Ok(CaseStep::Intro {
                case_id: case.id.clone(),
                theme: case.theme.clone(),
                question_text: case.intro_text(lang).to_string(),
                video_url: case.intro_video.get(lang).map(str::to_string),
                annexes: case.annexes.clone(),
                data_block,
            });
        }

        if let Some((text, video)) = case.step(step, lang) {
            return Ok(CaseStep::Question {
                case_id: case.id.clone(),
                step_index: step,
                theme: case.theme.clone(),
                question_text: text.to_string(),
                video_url: video.map(str::to_string),
                annexes: case.annexes.clone(),
                data_block,
            });
        }

        if session.status < SessionStatus::AwaitingFeedback {
            advance_status(self.sessions.as_ref(), session_id, SessionStatus::AwaitingFeedback).await?;
        }
        Ok(CaseStep::Complete {
            message: "Case study completed. Preparing your feedback...".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Localized, SessionRecord};
    use crate::store::MemoryStore;

    fn case(id: &str, theme: Option<&str>, roles: &[&str], tags: &[&str]) -> CaseRecord {
        CaseRecord {
            id: id.into(),
            theme: theme.map(str::to_string),
            role_targets: roles.iter().map(|r| r.to_string()).collect(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            is_active: true,
            intro: Localized::new().with("en", format!("Intro of {id}")),
            questions: vec![
                Localized::new().with("en", "How big is the market?"),
                Localized::new().with("en", "What would you recommend?"),
            ],
            ..Default::default()
        }
    }

    fn affinity() -> CaseAffinity {
        CaseAffinity {
            domain: "finance".into(),
            tiers: vec!["graduate".into(), "student".into()],
            tags: vec!["m&a".into()],
            skills: vec!["excel".into()],
        }
    }

    async fn fixture(cases: Vec<CaseRecord>, seed: u64) -> (Arc<MemoryStore>, CaseSelector) {
        let store = Arc::new(MemoryStore::with_bank(vec![], cases));
        store.insert_session(SessionRecord::new("s1", "u1")).await;
        store
            .insert_profile(CandidateProfile {
                user_id: "u1".into(),
                domain: Some("Finance".into()),
                career_stage: Some("graduate".into()),
                tags: vec!["M&A".into()],
                ..Default::default()
            })
            .await;
        let settings = EngineSettings {
            rng_seed: Some(seed),
            ..Default::default()
        };
        let selector = CaseSelector::new(store.clone(), store.clone(), &settings);
        (store, selector)
    }

    #[test]
    fn weights_add_up_per_signal() {
        let a = affinity();
        assert_eq!(a.weight(&case("c", None, &[], &[])), 1.0);
        let full = case("c", Some("Finance"), &["graduate"], &["M&A", "excel"]);
        assert!((a.weight(&full) - 3.8).abs() < 1e-9);
    }

    #[test]
    fn roulette_frequencies_follow_weights() {
        // Arrange
        let weights = [1.0, 2.0, 3.0, 4.0];
        let mut rng = StdRng::seed_from_u64(7);
        let mut hits = [0usize; 4];
        let draws = 40_000;

        // Act
        for _ in 0..draws {
            let idx = roulette(&weights, &mut rng).unwrap();
            hits[idx] += 1;
        }

        // Assert
        for (idx, w) in weights.iter().enumerate() {
            let expected = w / 10.0;
            let observed = hits[idx] as f64 / draws as f64;
            assert!(
                (observed - expected).abs() < 0.02,
                "candidate {idx}: observed {observed}, expected {expected}"
            );
        }
    }

    #[test]
    fn roulette_on_nothing_is_none() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(roulette(&[], &mut rng), None);
    }

    #[tokio::test]
    async fn chosen_case_is_pinned_and_reused() {
        let cases = vec![
            case("c1", Some("finance"), &["graduate"], &[]),
            case("c2", None, &[], &["m&a"]),
            case("c3", Some("finance"), &[], &[]),
        ];
        let (store, selector) = fixture(cases, 3).await;

        let first = selector.select("s1").await.unwrap();
        let pinned = store.load_session("s1").await.unwrap().unwrap().case_id;
        assert_eq!(pinned.as_deref(), Some(first.id.as_str()));

        for _ in 0..10 {
            assert_eq!(selector.select("s1").await.unwrap().id, first.id);
        }
    }

    #[tokio::test]
    async fn no_eligible_case_is_reported() {
        let (_, selector) = fixture(vec![case("c1", Some("marketing"), &[], &[])], 1).await;
        assert!(matches!(
            selector.select("s1").await,
            Err(EngineError::NoCaseAvailable(_))
        ));
    }

    #[tokio::test]
    async fn stepping_walks_intro_questions_then_completes() {
        let (store, selector) = fixture(vec![case("c1", Some("finance"), &[], &[])], 1).await;

        let intro = selector.step("s1", 0).await.unwrap();
        assert!(matches!(
            intro,
            CaseStep::Intro { ref question_text, .. } if question_text == "Intro of c1"
        ));

        let second = selector.step("s1", 2).await.unwrap();
        assert!(matches!(second, CaseStep::Question { step_index: 2, .. }));

        let done = selector.step("s1", 3).await.unwrap();
        assert!(matches!(done, CaseStep::Complete { .. }));
        let status = store.load_session("s1").await.unwrap().unwrap().status;
        assert_eq!(status, SessionStatus::AwaitingFeedback);

        let json = serde_json::to_value(&second).unwrap();
        assert_eq!(json["action"], "CASE_STEP");
        assert_eq!(json["data_block"], serde_json::json!({}));
    }
}
