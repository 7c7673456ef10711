//! Answer scoring and end-of-session evaluation.

use crate::model::Prompt;
use anyhow::Result;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};

/// Model-graded rubric for one answer, each axis 0..=100.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRubric {
    pub clarity: u32,
    pub structure: u32,
    pub relevance: u32,
    pub comment: String,
}

impl AnswerRubric {
    pub fn neutral() -> Self {
        Self {
            clarity: 60,
            structure: 60,
            relevance: 60,
            comment: "A decent answer but can be improved.".to_string(),
        }
    }

    /// Parses a completion that may be wrapped in a markdown code fence.
    pub fn parse(raw: &str) -> Option<Self> {
        let rubric: AnswerRubric = serde_json::from_str(strip_fences(raw)).ok()?;
        Some(Self {
            clarity: rubric.clarity.min(100),
            structure: rubric.structure.min(100),
            relevance: rubric.relevance.min(100),
            comment: rubric.comment,
        })
    }
}

pub(crate) fn strip_fences(raw: &str) -> &str {
    raw.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

/// Percentage of expected keywords present in the answer.
pub fn lexical_score(answer: &str, keywords: &[String]) -> u32 {
    if keywords.is_empty() {
        return 0;
    }
    let answer = answer.to_lowercase();
    let matched = keywords
        .iter()
        .filter(|k| answer.contains(&k.to_lowercase()))
        .count();
    ((matched as f64 / keywords.len() as f64) * 100.0).round() as u32
}

/// `0.3·lexical + 0.3·clarity + 0.2·structure + 0.2·relevance`, rounded.
pub fn score_auto(lexical: u32, rubric: &AnswerRubric) -> u32 {
    (0.3 * f64::from(lexical)
        + 0.3 * f64::from(rubric.clarity)
        + 0.2 * f64::from(rubric.structure)
        + 0.2 * f64::from(rubric.relevance))
    .round() as u32
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImprovementAxis {
    pub axis: String,
    pub score: u32,
    pub comment: String,
    pub recommendation: String,
    #[serde(default)]
    pub resource: Option<String>,
}

fn neutral_tone() -> String {
    "neutral".to_string()
}

/// Final structured evaluation of a whole session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvaluation {
    pub score_global: u32,
    #[serde(default)]
    pub summary: EvaluationSummary,
    #[serde(default)]
    pub axes_improvement: Vec<ImprovementAxis>,
    #[serde(default = "neutral_tone")]
    pub tone: String,
}

impl SessionEvaluation {
    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_str(strip_fences(raw)).ok()
    }

    /// Used when the evaluation service is unreachable: the mean of the
    /// per-answer scores (70 without any), with a generic summary.
    pub fn fallback(scores: &[u32]) -> Self {
        let score_global = if scores.is_empty() {
            70
        } else {
            (scores.iter().map(|s| f64::from(*s)).sum::<f64>() / scores.len() as f64).round() as u32
        };
        Self {
            score_global,
            summary: EvaluationSummary {
                strengths: vec!["Clear and structured answers".into()],
                weaknesses: vec!["Needs more specific metrics".into()],
                recommendations: vec!["Use STAR consistently with concrete KPIs".into()],
            },
            axes_improvement: Vec::new(),
            tone: neutral_tone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnsweredPrompt {
    pub question_id: String,
    pub answer: String,
    pub score_auto: Option<u32>,
}

/// Everything the evaluation service sees at the end of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionDigest {
    pub session_id: String,
    pub lang: String,
    pub answers: Vec<AnsweredPrompt>,
    pub pauses_count: u32,
    pub relances: u32,
}

impl SessionDigest {
    pub fn scores(&self) -> Vec<u32> {
        self.answers.iter().filter_map(|a| a.score_auto).collect()
    }
}

/// Language-model feedback collaborator.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FeedbackService: Send + Sync {
    async fn evaluate_answer(&self, question: &str, answer: &str, lang: &str) -> Result<AnswerRubric>;

    async fn finalize_session(&self, digest: &SessionDigest) -> Result<SessionEvaluation>;
}

/// Grades one answer, falling back to the neutral rubric on any fault.
pub async fn grade_answer(
    service: &dyn FeedbackService,
    prompt: &Prompt,
    answer: &str,
    lang: &str,
) -> (AnswerRubric, u32) {
    let rubric = match service.evaluate_answer(prompt.text(lang), answer, lang).await {
        Ok(rubric) => rubric,
        Err(e) => {
            tracing::warn!("answer evaluation failed for {}: {:#}", prompt.question_id, e);
            AnswerRubric::neutral()
        }
    };
    let score = score_auto(lexical_score(answer, &prompt.expected_keywords), &rubric);
    (rubric, score)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexical_score_counts_case_insensitive_hits() {
        let keywords = vec!["EBITDA".to_string(), "margin".to_string(), "churn".to_string()];
        assert_eq!(lexical_score("Our ebitda margin grew", &keywords), 67);
        assert_eq!(lexical_score("anything", &[]), 0);
    }

    #[test]
    fn composite_score_weights_axes() {
        let rubric = AnswerRubric {
            clarity: 80,
            structure: 70,
            relevance: 90,
            comment: String::new(),
        };
        // 0.3*50 + 0.3*80 + 0.2*70 + 0.2*90 = 71
        assert_eq!(score_auto(50, &rubric), 71);
        assert_eq!(score_auto(0, &AnswerRubric::neutral()), 42);
    }

    #[test]
    fn rubric_parses_fenced_json_and_clamps() {
        let raw = "```json\n{\"clarity\": 120, \"structure\": 50, \"relevance\": 40, \"comment\": \"ok\"}\n```";
        let rubric = AnswerRubric::parse(raw).unwrap();
        assert_eq!(rubric.clarity, 100);
        assert_eq!(rubric.comment, "ok");
        assert_eq!(AnswerRubric::parse("not json"), None);
    }

    #[test]
    fn evaluation_fallback_averages_scores() {
        assert_eq!(SessionEvaluation::fallback(&[60, 71]).score_global, 66);
        assert_eq!(SessionEvaluation::fallback(&[]).score_global, 70);
    }

    #[tokio::test]
    async fn grading_survives_service_failure() {
        let mut service = MockFeedbackService::new();
        service
            .expect_evaluate_answer()
            .returning(|_, _, _| Err(anyhow::anyhow!("timeout")));
        let mut prompt = Prompt::new("q_0100", "finance", 2);
        prompt.expected_keywords = vec!["cash".into(), "flow".into()];

        let (rubric, score) = grade_answer(&service, &prompt, "Free cash flow matters", "en").await;

        assert_eq!(rubric, AnswerRubric::neutral());
        // 0.3*100 + 0.3*60 + 0.2*60 + 0.2*60
        assert_eq!(score, 72);
    }
}
