//! Question pack builder.
//!
//! Builds the ordered prompt sequence of a session in one pass: forced opener,
//! a general block with per-difficulty quotas, then three domain blocks driven
//! by difficulty cascades. Retrieval faults never fail the build; they only
//! shrink a block, and an empty result falls back to a single built-in prompt.

use crate::error::EngineError;
use crate::fallback::{StepTrace, Strategy, fill};
use crate::model::{
    CandidateProfile, GENERAL_DOMAIN, InterviewType, OPENER_ID, Prompt, SessionRecord,
    SimulationMode, clean_asked_ids,
};
use crate::pyramid::{Segment, pyramid_labels};
use crate::settings::EngineSettings;
use crate::store::{PromptQuery, QuestionBank, SessionStore};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Difficulty order tried for a block whose primary difficulty is `level`.
pub fn difficulty_cascade(level: u8) -> [u8; 3] {
    match level {
        2 => [2, 1, 3],
        3 => [3, 2, 1],
        _ => [1, 2, 3],
    }
}

/// Domain used to top up a short domain block.
pub fn fallback_domain(_domain: &str) -> &'static str {
    // Every known domain, "general" included, degrades to the general pool.
    GENERAL_DOMAIN
}

fn difficulty_multiplier(level: u8) -> f64 {
    match level {
        1 => 1.3,
        2 => 1.0,
        _ => 0.8,
    }
}

/// Inputs of a single build.
#[derive(Debug, Clone, PartialEq)]
pub struct PackRequest {
    pub session_id: String,
    pub domain: String,
    pub sub_domain: Option<String>,
    pub tier: String,
    pub segment: Segment,
    pub lang: String,
    pub used_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PackOutcome {
    /// Only the opener; the full pack is built on the next call.
    Opener(Prompt),
    Sequence(Vec<Prompt>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PackAction {
    #[serde(rename = "INIT_Q1")]
    InitQ1,
    #[serde(rename = "INIT_SEQUENCE")]
    InitSequence,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrchestrateResponse {
    pub action: PackAction,
    pub session_id: String,
    pub user_id: String,
    pub firstname: String,
    pub lang: String,
    pub simulation_mode: SimulationMode,
    pub interview_type: InterviewType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<Prompt>,
    pub questions: Vec<Prompt>,
    pub total_questions: usize,
}

pub struct PackBuilder {
    bank: Arc<dyn QuestionBank>,
    sessions: Arc<dyn SessionStore>,
    settings: EngineSettings,
    rng: Mutex<StdRng>,
}

impl PackBuilder {
    pub fn new(
        bank: Arc<dyn QuestionBank>,
        sessions: Arc<dyn SessionStore>,
        settings: EngineSettings,
    ) -> Self {
        let rng = match settings.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            bank,
            sessions,
            settings,
            rng: Mutex::new(rng),
        }
    }

    /// Loads the session and its profile, derives defaults and builds.
    pub async fn orchestrate(&self, session_id: &str) -> Result<OrchestrateResponse, EngineError> {
        let session = self
            .sessions
            .load_session(session_id)
            .await?
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))?;
        let profile = self
            .sessions
            .load_profile(&session.user_id)
            .await?
            .unwrap_or_else(|| CandidateProfile {
                user_id: session.user_id.clone(),
                ..Default::default()
            });
        let segment = profile.segment();
        let tier = profile
            .career_stage()
            .map(str::to_string)
            .unwrap_or_else(|| segment.default_tier().to_string());
        let used_ids = clean_asked_ids(self.sessions.answered_prompt_ids(&session.user_id).await?);

        let request = PackRequest {
            session_id: session.id.clone(),
            domain: profile.domain().to_string(),
            sub_domain: profile.sub_domain().map(str::to_string),
            tier,
            segment,
            lang: session.lang().to_string(),
            used_ids,
        };
        tracing::info!(
            "orchestrating session {} (domain={}, tier={}, used={})",
            session.id,
            request.domain,
            request.tier,
            request.used_ids.len()
        );

        let outcome = self.build_for(&session, &request).await?;
        let (action, question, questions) = match outcome {
            PackOutcome::Opener(opener) => (PackAction::InitQ1, Some(opener.clone()), vec![opener]),
            PackOutcome::Sequence(prompts) => (PackAction::InitSequence, None, prompts),
        };

        Ok(OrchestrateResponse {
            action,
            session_id: session.id.clone(),
            user_id: session.user_id.clone(),
            firstname: profile.firstname().to_string(),
            lang: session.lang().to_string(),
            simulation_mode: session.simulation_mode(),
            interview_type: session.interview_type,
            question,
            total_questions: questions.len(),
            questions,
        })
    }

    pub async fn build(&self, request: &PackRequest) -> Result<PackOutcome, EngineError> {
        let session = self
            .sessions
            .load_session(&request.session_id)
            .await?
            .ok_or_else(|| EngineError::SessionNotFound(request.session_id.clone()))?;
        self.build_for(&session, request).await
    }

    async fn build_for(
        &self,
        session: &SessionRecord,
        request: &PackRequest,
    ) -> Result<PackOutcome, EngineError> {
        if request.used_ids.is_empty() && !session.opener_sent {
            let opener = self.opener().await.unwrap_or_else(|| {
                tracing::warn!("opener {} missing, using built-in prompt", OPENER_ID);
                Prompt::builtin_opener(&self.settings.media_base_url)
            });
            self.sessions.mark_opener_sent(&session.id, &opener).await?;
            return Ok(PackOutcome::Opener(opener));
        }

        if session.pack_built && !session.prompts.is_empty() {
            tracing::info!("session {} already has a pack, reusing it", session.id);
            return Ok(PackOutcome::Sequence(session.prompts.clone()));
        }

        let tiers = pyramid_labels(&request.tier, request.segment);
        let mut used: HashSet<String> = request.used_ids.iter().cloned().collect();
        used.insert(OPENER_ID.to_string());

        let (general, _) = self.general_block(&tiers, &mut used).await;
        let mut domain = Vec::new();
        for level in 1..=self.settings.domain_block_count.min(3) as u8 {
            let (block, _) = self
                .domain_block(
                    &request.domain,
                    request.sub_domain.as_deref(),
                    level,
                    &tiers,
                    &mut used,
                )
                .await;
            domain.extend(block);
        }
        let domain = self.soft_shuffle(domain);

        let mut prompts = Vec::with_capacity(1 + general.len() + domain.len());
        if !general.is_empty() || !domain.is_empty() {
            if let Some(opener) = self.opener().await {
                prompts.push(opener);
            }
        }
        tracing::info!(
            "pack for {}: general={}, domain={}",
            session.id,
            general.len(),
            domain.len()
        );
        prompts.extend(general);
        prompts.extend(domain);

        if prompts.is_empty() {
            tracing::error!("pack for {} is empty, using fallback prompt", session.id);
            prompts.push(Prompt::builtin_fallback(&self.settings.media_base_url));
        }

        self.sessions
            .save_pack(&session.id, &prompts, self.settings.session_seconds)
            .await?;
        Ok(PackOutcome::Sequence(prompts))
    }

    async fn opener(&self) -> Option<Prompt> {
        match self.bank.prompt_by_id(OPENER_ID).await {
            Ok(found) => found.filter(|p| p.is_active),
            Err(e) => {
                tracing::warn!("opener lookup failed: {}", e);
                None
            }
        }
    }

    /// Up to `general_target` general prompts, easiest first.
    pub async fn general_block(
        &self,
        tiers: &[String],
        used: &mut HashSet<String>,
    ) -> (Vec<Prompt>, Vec<StepTrace>) {
        let mut block = Vec::new();
        let mut trace = Vec::new();

        for (idx, quota) in self.settings.general_quotas.iter().enumerate() {
            let level = idx as u8 + 1;
            let strategy = Strategy::new(
                format!("general d{level}"),
                PromptQuery::new(GENERAL_DOMAIN, 0)
                    .difficulty(level)
                    .tiers(Some(tiers)),
            );
            let (picks, steps) = fill(self.bank.as_ref(), &[strategy], *quota, used).await;
            block.extend(picks);
            trace.extend(steps);
        }

        let target = self.settings.general_target();
        if block.len() < target {
            let top_up = Strategy::new(
                "general any",
                PromptQuery::new(GENERAL_DOMAIN, 0).tiers(Some(tiers)),
            );
            let (picks, steps) =
                fill(self.bank.as_ref(), &[top_up], target - block.len(), used).await;
            block.extend(picks);
            trace.extend(steps);
        }

        block.sort_by_key(Prompt::level);
        (block, trace)
    }

    /// One domain block of up to `domain_block_size` prompts whose primary
    /// difficulty is `level`.
    pub async fn domain_block(
        &self,
        domain: &str,
        sub_domain: Option<&str>,
        level: u8,
        tiers: &[String],
        used: &mut HashSet<String>,
    ) -> (Vec<Prompt>, Vec<StepTrace>) {
        let cascade = difficulty_cascade(level);
        let mut strategies = Vec::new();

        if let Some(sub) = sub_domain {
            for d in cascade {
                strategies.push(Strategy::new(
                    format!("{domain}/{sub} d{d}"),
                    PromptQuery::new(domain, 0)
                        .sub_domain(Some(sub))
                        .difficulty(d)
                        .tiers(Some(tiers)),
                ));
            }
        }
        for d in cascade {
            strategies.push(Strategy::new(
                format!("{domain} d{d}"),
                PromptQuery::new(domain, 0).difficulty(d).tiers(Some(tiers)),
            ));
        }
        let fallback = fallback_domain(domain);
        for d in cascade {
            strategies.push(Strategy::new(
                format!("fallback {fallback} d{d}"),
                PromptQuery::new(fallback, 0).difficulty(d).tiers(Some(tiers)),
            ));
        }

        fill(
            self.bank.as_ref(),
            &strategies,
            self.settings.domain_block_size,
            used,
        )
        .await
    }

    /// Softened weighted shuffle: weight times an easy-first multiplier times
    /// jitter in `[0.85, 1.15)`, highest score first.
    pub fn soft_shuffle(&self, prompts: Vec<Prompt>) -> Vec<Prompt> {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        let mut scored: Vec<(f64, Prompt)> = prompts
            .into_iter()
            .map(|p| {
                let weight = if p.probability > 0.0 { p.probability } else { 0.5 };
                let score =
                    weight * difficulty_multiplier(p.level()) * rng.gen_range(0.85..1.15);
                (score, p)
            })
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.into_iter().map(|(_, p)| p).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FALLBACK_PROMPT_ID, Localized};
    use crate::store::MemoryStore;

    fn prompts(domain: &str, difficulty: u8, count: usize, tiers: &[&str]) -> Vec<Prompt> {
        (0..count)
            .map(|i| {
                let mut p = Prompt::new(format!("q_{domain}_{difficulty}_{i:02}"), domain, difficulty);
                p.career_target = tiers.iter().map(|t| t.to_string()).collect();
                p.probability = 0.5 + (i % 5) as f64 / 10.0;
                p
            })
            .collect()
    }

    fn opener() -> Prompt {
        let mut p = Prompt::new(OPENER_ID, GENERAL_DOMAIN, 1);
        p.question = Localized::new().with("en", "Walk me through your background.");
        p
    }

    fn seeded() -> EngineSettings {
        EngineSettings {
            rng_seed: Some(42),
            ..Default::default()
        }
    }

    async fn fixture(bank: Vec<Prompt>, answered: &[&str]) -> (Arc<MemoryStore>, PackBuilder) {
        let store = Arc::new(MemoryStore::with_bank(bank, vec![]));
        let mut session = SessionRecord::new("s1", "u1");
        session.lang = Some("en".into());
        store.insert_session(session).await;
        store
            .insert_profile(CandidateProfile {
                user_id: "u1".into(),
                firstname: Some("Ada".into()),
                domain: Some("finance".into()),
                career_stage: Some("graduate".into()),
                segment: Some("elite".into()),
                ..Default::default()
            })
            .await;
        for id in answered {
            store
                .save_answer(&crate::model::AnswerRecord {
                    session_id: "old".into(),
                    user_id: "u1".into(),
                    question_id: id.to_string(),
                    answer: "...".into(),
                    score_auto: None,
                    rubric: None,
                    silence: Default::default(),
                })
                .await
                .unwrap();
        }
        let builder = PackBuilder::new(store.clone(), store.clone(), seeded());
        (store, builder)
    }

    fn full_bank() -> Vec<Prompt> {
        let mut bank = vec![opener()];
        for d in 1..=3 {
            bank.extend(prompts("general", d, 8, &["graduate"]));
            bank.extend(prompts("finance", d, 20, &["graduate", "student"]));
        }
        bank
    }

    #[tokio::test]
    async fn empty_history_returns_only_the_opener() {
        // Arrange
        let (store, builder) = fixture(full_bank(), &[]).await;

        // Act
        let response = builder.orchestrate("s1").await.unwrap();

        // Assert
        assert_eq!(response.action, PackAction::InitQ1);
        assert_eq!(response.total_questions, 1);
        assert_eq!(response.question.as_ref().unwrap().question_id, OPENER_ID);
        assert_eq!(response.firstname, "Ada");
        let session = store.load_session("s1").await.unwrap().unwrap();
        assert!(session.opener_sent);
        assert!(!session.pack_built);
        assert_eq!(session.prompts.len(), 1);
        assert_eq!(session.prompts[0].question_id, OPENER_ID);
        assert_eq!(session.total_prompts, 1);
    }

    #[tokio::test]
    async fn missing_opener_record_uses_builtin() {
        let (_, builder) = fixture(prompts("general", 1, 3, &["graduate"]), &[]).await;

        let response = builder.orchestrate("s1").await.unwrap();

        let question = response.question.unwrap();
        assert_eq!(question.question_id, OPENER_ID);
        assert_eq!(question.text("en"), "Tell me about yourself.");
    }

    #[tokio::test]
    async fn full_pack_has_opener_general_and_three_domain_blocks() {
        // Arrange
        let (store, builder) = fixture(full_bank(), &["q_old_1"]).await;

        // Act
        let response = builder.orchestrate("s1").await.unwrap();

        // Assert
        assert_eq!(response.action, PackAction::InitSequence);
        assert_eq!(response.total_questions, 1 + 15 + 45);
        assert_eq!(response.questions[0].question_id, OPENER_ID);

        let general = &response.questions[1..16];
        assert!(general.iter().all(Prompt::is_general));
        assert!(general.windows(2).all(|w| w[0].difficulty <= w[1].difficulty));
        let histogram: Vec<usize> = (1..=3)
            .map(|d| general.iter().filter(|p| p.difficulty == d).count())
            .collect();
        assert_eq!(histogram, vec![3, 6, 6]);

        let ids: HashSet<_> = response.questions.iter().map(|p| &p.question_id).collect();
        assert_eq!(ids.len(), response.questions.len(), "no duplicates");

        let session = store.load_session("s1").await.unwrap().unwrap();
        assert_eq!(session.total_prompts, 61);
        assert_eq!(session.duration_target_secs, Some(1200));
    }

    #[tokio::test]
    async fn second_build_returns_persisted_pack() {
        let (store, builder) = fixture(full_bank(), &["q_old_1"]).await;
        let first = builder.orchestrate("s1").await.unwrap();

        store.insert_prompts(prompts("finance", 1, 30, &["graduate"]).into_iter().map(|mut p| {
            p.question_id = format!("{}_new", p.question_id);
            p.probability = 10.0;
            p
        })).await;
        let second = builder.orchestrate("s1").await.unwrap();

        assert_eq!(first.questions, second.questions);
    }

    #[tokio::test]
    async fn short_domain_is_filled_from_fallback_domain() {
        // Only 4 finance prompts per difficulty, plenty of general ones.
        let mut bank = vec![opener()];
        for d in 1..=3 {
            bank.extend(prompts("finance", d, 4, &["graduate"]));
            bank.extend(prompts("general", d, 30, &["graduate"]));
        }
        let (_, builder) = fixture(bank, &[]).await;
        let tiers = pyramid_labels("graduate", Segment::Elite);
        let mut used = HashSet::new();

        let (block, trace) = builder
            .domain_block("finance", None, 1, &tiers, &mut used)
            .await;

        assert_eq!(block.len(), 15);
        assert_eq!(block.iter().filter(|p| p.domain == "finance").count(), 12);
        assert_eq!(trace[3].label, "fallback general d1");
        assert_eq!(trace[3].found, 3);
    }

    #[tokio::test]
    async fn sub_domain_prompts_come_first() {
        let mut bank = prompts("finance", 1, 10, &["graduate"]);
        for p in bank.iter_mut().take(2) {
            p.sub_domain = Some("audit".into());
            p.probability = 0.01;
        }
        let (_, builder) = fixture(bank, &[]).await;
        let tiers = pyramid_labels("graduate", Segment::Elite);
        let mut used = HashSet::new();

        let (block, _) = builder
            .domain_block("finance", Some("audit"), 1, &tiers, &mut used)
            .await;

        assert_eq!(block.len(), 10);
        assert_eq!(block[0].sub_domain.as_deref(), Some("audit"));
        assert_eq!(block[1].sub_domain.as_deref(), Some("audit"));
    }

    #[tokio::test]
    async fn general_shortage_is_topped_up_then_sorted() {
        // Difficulty 1 is rich, difficulties 2 and 3 are scarce.
        let mut bank = prompts("general", 1, 12, &["graduate"]);
        bank.extend(prompts("general", 3, 2, &["graduate"]));
        let (_, builder) = fixture(bank, &[]).await;
        let tiers = pyramid_labels("graduate", Segment::Elite);
        let mut used = HashSet::new();

        let (block, trace) = builder.general_block(&tiers, &mut used).await;

        assert_eq!(block.len(), 14);
        assert!(block.windows(2).all(|w| w[0].difficulty <= w[1].difficulty));
        assert_eq!(trace.last().unwrap().label, "general any");
        assert_eq!(trace.last().unwrap().found, 9);
    }

    #[tokio::test]
    async fn tier_filter_fault_retries_untiered() {
        let (store, builder) = fixture(prompts("general", 1, 5, &["exec"]), &[]).await;
        store.fail_tiered_queries(true);
        let tiers = pyramid_labels("graduate", Segment::Elite);
        let mut used = HashSet::new();

        let (block, _) = builder.general_block(&tiers, &mut used).await;

        assert_eq!(block.len(), 5);
    }

    #[tokio::test]
    async fn nothing_retrievable_yields_the_fallback_prompt() {
        let (store, builder) = fixture(full_bank(), &["q_old_1"]).await;
        store.fail_all_queries(true);

        let response = builder.orchestrate("s1").await.unwrap();

        assert_eq!(response.total_questions, 1);
        assert_eq!(response.questions[0].question_id, FALLBACK_PROMPT_ID);
    }

    #[tokio::test]
    async fn unknown_session_is_an_error() {
        let (_, builder) = fixture(vec![], &[]).await;
        assert!(matches!(
            builder.orchestrate("nope").await,
            Err(EngineError::SessionNotFound(_))
        ));
    }

    #[test]
    fn soft_shuffle_favours_easy_prompts() {
        let store = Arc::new(MemoryStore::new());
        let builder = PackBuilder::new(store.clone(), store, seeded());
        let mut input = prompts("finance", 3, 50, &[]);
        input.extend(prompts("finance", 1, 50, &[]));
        for p in input.iter_mut() {
            p.probability = 1.0;
        }

        let shuffled = builder.soft_shuffle(input);

        // 1.3 * 0.85 > 0.8 * 1.15, so every easy prompt outranks every hard one.
        assert!(shuffled[..50].iter().all(|p| p.difficulty == 1));
    }
}
