//! Persistence seams and the in-memory store used by the services and tests.

use crate::error::{EngineError, StoreError};
use crate::feedback::SessionEvaluation;
use crate::model::{AnswerRecord, CandidateProfile, CaseRecord, Prompt, SessionRecord, SessionStatus};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// Filter over the question bank. Results come back ordered by descending
/// selection weight.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromptQuery {
    pub domain: String,
    pub sub_domain: Option<String>,
    /// `None` accepts any difficulty.
    pub difficulties: Option<Vec<u8>>,
    /// `None` disables the eligibility filter.
    pub tiers: Option<Vec<String>>,
    pub exclude: HashSet<String>,
    pub limit: usize,
}

impl PromptQuery {
    pub fn new(domain: impl Into<String>, limit: usize) -> Self {
        Self {
            domain: domain.into(),
            limit,
            ..Default::default()
        }
    }

    pub fn difficulty(mut self, level: u8) -> Self {
        self.difficulties = Some(vec![level]);
        self
    }

    pub fn sub_domain(mut self, sub_domain: Option<&str>) -> Self {
        self.sub_domain = sub_domain.map(str::to_string);
        self
    }

    pub fn tiers(mut self, tiers: Option<&[String]>) -> Self {
        self.tiers = tiers.map(<[String]>::to_vec);
        self
    }

    pub fn excluding(mut self, used: &HashSet<String>) -> Self {
        self.exclude = used.clone();
        self
    }

    pub fn without_tiers(&self) -> Self {
        Self {
            tiers: None,
            ..self.clone()
        }
    }

    pub fn is_tiered(&self) -> bool {
        self.tiers.is_some()
    }

    pub fn matches(&self, prompt: &Prompt) -> bool {
        prompt.is_active
            && prompt.domain == self.domain
            && self
                .sub_domain
                .as_deref()
                .is_none_or(|s| prompt.sub_domain.as_deref() == Some(s))
            && self
                .difficulties
                .as_ref()
                .is_none_or(|d| d.contains(&prompt.difficulty))
            && self
                .tiers
                .as_ref()
                .is_none_or(|t| prompt.is_eligible_for(t))
            && !self.exclude.contains(&prompt.question_id)
    }
}

#[async_trait]
pub trait QuestionBank: Send + Sync {
    async fn find_prompts(&self, query: &PromptQuery) -> Result<Vec<Prompt>, StoreError>;

    async fn prompt_by_id(&self, question_id: &str) -> Result<Option<Prompt>, StoreError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load_session(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError>;

    async fn load_profile(&self, user_id: &str) -> Result<Option<CandidateProfile>, StoreError>;

    /// Prompt ids the candidate already answered in earlier attempts.
    async fn answered_prompt_ids(&self, user_id: &str) -> Result<Vec<String>, StoreError>;

    /// Records that the opener went out and stores it as the session's only
    /// prompt. The pack stays unbuilt.
    async fn mark_opener_sent(&self, session_id: &str, opener: &Prompt) -> Result<(), StoreError>;

    /// Writes the built sequence, its length and the target duration, once.
    async fn save_pack(
        &self,
        session_id: &str,
        prompts: &[Prompt],
        duration_secs: u32,
    ) -> Result<(), StoreError>;

    async fn pin_case(&self, session_id: &str, case_id: &str) -> Result<(), StoreError>;

    async fn update_status(&self, session_id: &str, status: SessionStatus) -> Result<(), StoreError>;

    async fn save_answer(&self, answer: &AnswerRecord) -> Result<(), StoreError>;

    async fn save_evaluation(
        &self,
        session_id: &str,
        evaluation: &SessionEvaluation,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait CaseLibrary: Send + Sync {
    /// Active cases whose theme is `domain` or unset and whose role targets
    /// overlap `tiers` or are unset.
    async fn find_cases(
        &self,
        domain: &str,
        tiers: &[String],
        limit: usize,
    ) -> Result<Vec<CaseRecord>, StoreError>;

    async fn case_by_id(&self, case_id: &str) -> Result<Option<CaseRecord>, StoreError>;
}

/// Clarification audio keyed by `(question_id, lang)`.
#[async_trait]
pub trait RelanceCache: Send + Sync {
    async fn cached_relance(
        &self,
        question_id: &str,
        lang: &str,
    ) -> Result<Option<CachedRelance>, StoreError>;

    async fn store_relance(
        &self,
        question_id: &str,
        lang: &str,
        relance: &CachedRelance,
    ) -> Result<(), StoreError>;
}

/// A synthesized clarification together with the exact wording it speaks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedRelance {
    pub text: String,
    pub audio_url: String,
}

/// Moves a session forward in its lifecycle, refusing backward moves.
pub async fn advance_status(
    store: &dyn SessionStore,
    session_id: &str,
    next: SessionStatus,
) -> Result<(), EngineError> {
    let session = store
        .load_session(session_id)
        .await?
        .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))?;
    if !session.status.can_advance_to(next) {
        return Err(EngineError::InvalidTransition {
            from: session.status,
            to: next,
        });
    }
    store.update_status(session_id, next).await?;
    Ok(())
}

#[derive(Default)]
struct Tables {
    prompts: Vec<Prompt>,
    cases: Vec<CaseRecord>,
    sessions: HashMap<String, SessionRecord>,
    profiles: HashMap<String, CandidateProfile>,
    answers: Vec<AnswerRecord>,
    relance: HashMap<(String, String), CachedRelance>,
}

/// Single-process store implementing every persistence seam.
///
/// Query faults can be injected to exercise the retrieval fallbacks.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    fail_tiered: AtomicBool,
    fail_all: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bank(prompts: Vec<Prompt>, cases: Vec<CaseRecord>) -> Self {
        Self {
            tables: RwLock::new(Tables {
                prompts,
                cases,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub async fn insert_session(&self, session: SessionRecord) {
        self.tables
            .write()
            .await
            .sessions
            .insert(session.id.clone(), session);
    }

    pub async fn insert_profile(&self, profile: CandidateProfile) {
        self.tables
            .write()
            .await
            .profiles
            .insert(profile.user_id.clone(), profile);
    }

    pub async fn insert_prompts(&self, prompts: impl IntoIterator<Item = Prompt>) {
        self.tables.write().await.prompts.extend(prompts);
    }

    pub async fn answers(&self) -> Vec<AnswerRecord> {
        self.tables.read().await.answers.clone()
    }

    /// Queries carrying an eligibility filter fail until reset.
    pub fn fail_tiered_queries(&self, fail: bool) {
        self.fail_tiered.store(fail, Ordering::SeqCst);
    }

    /// Every bank query fails until reset.
    pub fn fail_all_queries(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    async fn with_session<F>(&self, session_id: &str, update: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut SessionRecord),
    {
        let mut tables = self.tables.write().await;
        let session = tables
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| StoreError::NotFound(format!("session {session_id}")))?;
        update(session);
        Ok(())
    }
}

#[async_trait]
impl QuestionBank for MemoryStore {
    async fn find_prompts(&self, query: &PromptQuery) -> Result<Vec<Prompt>, StoreError> {
        if self.fail_all.load(Ordering::SeqCst)
            || (query.is_tiered() && self.fail_tiered.load(Ordering::SeqCst))
        {
            return Err(StoreError::Query(format!(
                "injected failure for domain {}",
                query.domain
            )));
        }
        let tables = self.tables.read().await;
        let mut found: Vec<Prompt> = tables
            .prompts
            .iter()
            .filter(|p| query.matches(p))
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            b.probability
                .total_cmp(&a.probability)
                .then_with(|| a.question_id.cmp(&b.question_id))
        });
        found.truncate(query.limit);
        Ok(found)
    }

    async fn prompt_by_id(&self, question_id: &str) -> Result<Option<Prompt>, StoreError> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(StoreError::Query(format!("injected failure for {question_id}")));
        }
        let tables = self.tables.read().await;
        Ok(tables
            .prompts
            .iter()
            .find(|p| p.question_id == question_id)
            .cloned())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn load_session(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self.tables.read().await.sessions.get(session_id).cloned())
    }

    async fn load_profile(&self, user_id: &str) -> Result<Option<CandidateProfile>, StoreError> {
        Ok(self.tables.read().await.profiles.get(user_id).cloned())
    }

    async fn answered_prompt_ids(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .answers
            .iter()
            .filter(|a| a.user_id == user_id)
            .map(|a| a.question_id.clone())
            .collect())
    }

    async fn mark_opener_sent(&self, session_id: &str, opener: &Prompt) -> Result<(), StoreError> {
        self.with_session(session_id, |s| {
            s.opener_sent = true;
            s.prompts = vec![opener.clone()];
            s.total_prompts = 1;
        })
        .await
    }

    async fn save_pack(
        &self,
        session_id: &str,
        prompts: &[Prompt],
        duration_secs: u32,
    ) -> Result<(), StoreError> {
        self.with_session(session_id, |s| {
            s.prompts = prompts.to_vec();
            s.total_prompts = prompts.len();
            s.duration_target_secs = Some(duration_secs);
            s.pack_built = true;
        })
        .await
    }

    async fn pin_case(&self, session_id: &str, case_id: &str) -> Result<(), StoreError> {
        self.with_session(session_id, |s| s.case_id = Some(case_id.to_string()))
            .await
    }

    async fn update_status(&self, session_id: &str, status: SessionStatus) -> Result<(), StoreError> {
        self.with_session(session_id, |s| s.status = status).await
    }

    async fn save_answer(&self, answer: &AnswerRecord) -> Result<(), StoreError> {
        self.tables.write().await.answers.push(answer.clone());
        Ok(())
    }

    async fn save_evaluation(
        &self,
        session_id: &str,
        evaluation: &SessionEvaluation,
    ) -> Result<(), StoreError> {
        self.with_session(session_id, |s| s.evaluation = Some(evaluation.clone()))
            .await
    }
}

#[async_trait]
impl CaseLibrary for MemoryStore {
    async fn find_cases(
        &self,
        domain: &str,
        tiers: &[String],
        limit: usize,
    ) -> Result<Vec<CaseRecord>, StoreError> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(StoreError::Query("injected failure for cases".into()));
        }
        let tables = self.tables.read().await;
        Ok(tables
            .cases
            .iter()
            .filter(|c| c.is_active)
            .filter(|c| {
                c.theme
                    .as_deref()
                    .is_none_or(|t| t.eq_ignore_ascii_case(domain))
            })
            .filter(|c| c.role_targets.is_empty() || c.role_targets.iter().any(|r| tiers.contains(r)))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn case_by_id(&self, case_id: &str) -> Result<Option<CaseRecord>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.cases.iter().find(|c| c.id == case_id).cloned())
    }
}

#[async_trait]
impl RelanceCache for MemoryStore {
    async fn cached_relance(
        &self,
        question_id: &str,
        lang: &str,
    ) -> Result<Option<CachedRelance>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .relance
            .get(&(question_id.to_string(), lang.to_string()))
            .cloned())
    }

    async fn store_relance(
        &self,
        question_id: &str,
        lang: &str,
        relance: &CachedRelance,
    ) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .relance
            .insert((question_id.to_string(), lang.to_string()), relance.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt(id: &str, domain: &str, difficulty: u8, probability: f64, tiers: &[&str]) -> Prompt {
        let mut p = Prompt::new(id, domain, difficulty);
        p.probability = probability;
        p.career_target = tiers.iter().map(|t| t.to_string()).collect();
        p
    }

    #[tokio::test]
    async fn queries_filter_and_order_by_weight() {
        let store = MemoryStore::with_bank(
            vec![
                prompt("q_1", "finance", 1, 0.2, &["student"]),
                prompt("q_2", "finance", 1, 0.9, &["student"]),
                prompt("q_3", "finance", 2, 0.5, &["student"]),
                prompt("q_4", "finance", 1, 0.7, &["exec"]),
                prompt("q_5", "general", 1, 1.0, &["student"]),
            ],
            vec![],
        );
        let tiers = vec!["student".to_string()];
        let query = PromptQuery::new("finance", 10)
            .difficulty(1)
            .tiers(Some(&tiers));

        let found = store.find_prompts(&query).await.unwrap();
        let ids: Vec<_> = found.iter().map(|p| p.question_id.as_str()).collect();
        assert_eq!(ids, vec!["q_2", "q_1"]);

        let untiered = store.find_prompts(&query.without_tiers()).await.unwrap();
        assert_eq!(untiered.len(), 3);
        assert_eq!(untiered[0].question_id, "q_2");
    }

    #[tokio::test]
    async fn injected_failures_only_hit_tiered_queries() {
        let store = MemoryStore::with_bank(vec![prompt("q_1", "general", 1, 0.5, &[])], vec![]);
        store.fail_tiered_queries(true);
        let tiers = vec!["student".to_string()];
        let query = PromptQuery::new("general", 5).tiers(Some(&tiers));
        assert!(store.find_prompts(&query).await.is_err());
        assert_eq!(store.find_prompts(&query.without_tiers()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn status_cannot_move_backwards() {
        let store = MemoryStore::new();
        store.insert_session(SessionRecord::new("s1", "u1")).await;

        advance_status(&store, "s1", SessionStatus::AwaitingFeedback)
            .await
            .unwrap();
        let err = advance_status(&store, "s1", SessionStatus::Running)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidTransition {
                from: SessionStatus::AwaitingFeedback,
                to: SessionStatus::Running
            }
        ));
        assert!(matches!(
            advance_status(&store, "missing", SessionStatus::Running).await,
            Err(EngineError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn case_filter_accepts_untagged_records() {
        let store = MemoryStore::with_bank(
            vec![],
            vec![
                CaseRecord {
                    id: "c_finance".into(),
                    theme: Some("finance".into()),
                    role_targets: vec!["graduate".into()],
                    is_active: true,
                    ..Default::default()
                },
                CaseRecord {
                    id: "c_open".into(),
                    is_active: true,
                    ..Default::default()
                },
                CaseRecord {
                    id: "c_marketing".into(),
                    theme: Some("marketing".into()),
                    is_active: true,
                    ..Default::default()
                },
                CaseRecord {
                    id: "c_retired".into(),
                    is_active: false,
                    ..Default::default()
                },
            ],
        );
        let tiers = vec!["graduate".to_string(), "student".to_string()];
        let cases = store.find_cases("finance", &tiers, 50).await.unwrap();
        let ids: Vec<_> = cases.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c_finance", "c_open"]);
    }
}
