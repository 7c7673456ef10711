use anyhow::{Context, Result};
use async_trait::async_trait;
use interview_core::feedback::{AnswerRubric, FeedbackService, SessionDigest, SessionEvaluation};
use reqwest::Client;
use serde::Deserialize;

const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";

const SESSION_FEEDBACK_PROMPT: &str = r#"You are Nova, a senior interview coach.
You receive the digest of a finished mock interview as JSON: the language, every answered
question with its transcript and automatic score, the number of long pauses and the number of
clarifications the candidate needed.
Return ONLY valid JSON, written in the session language:
{
  "score_global": <0-100>,
  "summary": {"strengths": [..], "weaknesses": [..], "recommendations": [..]},
  "axes_improvement": [
    {"axis": "<name>", "score": <0-100>, "comment": "..", "recommendation": "..", "resource": null}
  ],
  "tone": "<encouraging|neutral|demanding>"
}"#;

#[derive(Debug, Deserialize)]
pub struct LlmResponse {
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: Message,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub content: String,
}

impl LlmResponse {
    pub fn content(&self) -> Result<&str> {
        self.choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| anyhow::anyhow!("No response from LLM"))
    }
}

pub fn answer_prompt(question: &str, answer: &str, lang: &str) -> String {
    format!(
        r#"You are Nova, a senior interview coach speaking in {lang}.
Return ONLY valid JSON.

Question: "{question}"
User answer: "{answer}"

JSON:
{{
  "clarity": <0-100>,
  "structure": <0-100>,
  "relevance": <0-100>,
  "comment": "feedback in {lang}"
}}"#
    )
}

/// Grades answers and sessions through an OpenAI-style chat completion API.
pub struct OpenAiFeedback {
    client: Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl OpenAiFeedback {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
            endpoint: OPENAI_URL.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn complete(&self, system: &str, user: String, temperature: f32) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": temperature,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user }
            ]
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("Chat completion request failed")?
            .error_for_status()?
            .json::<LlmResponse>()
            .await
            .context("Unexpected chat completion payload")?;

        Ok(resp.content()?.to_string())
    }
}

#[async_trait]
impl FeedbackService for OpenAiFeedback {
    async fn evaluate_answer(&self, question: &str, answer: &str, lang: &str) -> Result<AnswerRubric> {
        let raw = self
            .complete("Return pure JSON only.", answer_prompt(question, answer, lang), 0.2)
            .await?;
        AnswerRubric::parse(&raw).ok_or_else(|| anyhow::anyhow!("Unparseable rubric: {raw}"))
    }

    async fn finalize_session(&self, digest: &SessionDigest) -> Result<SessionEvaluation> {
        let user = serde_json::to_string(digest)?;
        let raw = self.complete(SESSION_FEEDBACK_PROMPT, user, 0.3).await?;
        SessionEvaluation::parse(&raw).ok_or_else(|| anyhow::anyhow!("Unparseable evaluation: {raw}"))
    }
}

/// Used when no API key is configured: neutral rubrics and the score-mean
/// evaluation.
pub struct OfflineFeedback;

#[async_trait]
impl FeedbackService for OfflineFeedback {
    async fn evaluate_answer(&self, _question: &str, _answer: &str, _lang: &str) -> Result<AnswerRubric> {
        Ok(AnswerRubric::neutral())
    }

    async fn finalize_session(&self, digest: &SessionDigest) -> Result<SessionEvaluation> {
        Ok(SessionEvaluation::fallback(&digest.scores()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use interview_core::feedback::AnsweredPrompt;

    #[test]
    fn completion_content_is_the_first_choice() {
        let resp: LlmResponse = serde_json::from_str(
            r#"{"choices": [{"message": {"role": "assistant", "content": "{\"clarity\": 80}"}}]}"#,
        )
        .unwrap();
        assert_eq!(resp.content().unwrap(), "{\"clarity\": 80}");

        let empty: LlmResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(empty.content().is_err());
    }

    #[test]
    fn answer_prompt_carries_question_answer_and_language() {
        let prompt = answer_prompt("Why us?", "Because of the culture.", "fr");
        assert!(prompt.contains("speaking in fr"));
        assert!(prompt.contains("Question: \"Why us?\""));
        assert!(prompt.contains("User answer: \"Because of the culture.\""));
        assert!(prompt.contains("\"clarity\": <0-100>"));
    }

    #[tokio::test]
    async fn offline_feedback_is_neutral() {
        let digest = SessionDigest {
            session_id: "s1".into(),
            lang: "en".into(),
            answers: vec![AnsweredPrompt {
                question_id: "q_0002".into(),
                answer: "An answer".into(),
                score_auto: Some(80),
            }],
            pauses_count: 0,
            relances: 0,
        };

        let rubric = OfflineFeedback.evaluate_answer("q", "a", "en").await.unwrap();
        let evaluation = OfflineFeedback.finalize_session(&digest).await.unwrap();

        assert_eq!(rubric, AnswerRubric::neutral());
        assert_eq!(evaluation.score_global, 80);
    }

    async fn serve(router: axum::Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        format!("http://{addr}")
    }

    /// Chat endpoint that only answers the right bearer token, with `content`
    /// as the assistant message.
    fn chat_endpoint(content: &'static str) -> axum::Router {
        axum::Router::new().route(
            "/chat",
            axum::routing::post(move |headers: axum::http::HeaderMap| async move {
                let authorized = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    == Some("Bearer sk-test");
                if !authorized {
                    return Err(axum::http::StatusCode::UNAUTHORIZED);
                }
                Ok(axum::Json(serde_json::json!({
                    "choices": [{"message": {"role": "assistant", "content": content}}]
                })))
            }),
        )
    }

    #[tokio::test]
    async fn answer_rubric_comes_from_the_completion() {
        // Arrange
        let base = serve(chat_endpoint(
            "```json\n{\"clarity\": 140, \"structure\": 70, \"relevance\": 65, \"comment\": \"Solid\"}\n```",
        ))
        .await;
        let feedback = OpenAiFeedback::new("sk-test".into(), "gpt-4o-mini".into()).with_endpoint(format!("{base}/chat"));

        // Act
        let rubric = feedback.evaluate_answer("Why us?", "The culture.", "en").await.unwrap();

        // Assert
        assert_eq!(rubric.clarity, 100);
        assert_eq!(rubric.structure, 70);
        assert_eq!(rubric.relevance, 65);
        assert_eq!(rubric.comment, "Solid");
    }

    #[tokio::test]
    async fn refused_or_unparseable_completions_are_errors() {
        let base = serve(chat_endpoint("not json at all")).await;

        let wrong_key = OpenAiFeedback::new("sk-other".into(), "gpt-4o-mini".into()).with_endpoint(format!("{base}/chat"));
        let garbled = OpenAiFeedback::new("sk-test".into(), "gpt-4o-mini".into()).with_endpoint(format!("{base}/chat"));

        assert!(wrong_key.evaluate_answer("q", "a", "en").await.is_err());
        assert!(garbled.evaluate_answer("q", "a", "en").await.is_err());
    }
}
