use crate::AppState;
use crate::error::ApiError;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use interview_core::case_selector::CaseStep;
use interview_core::model::{CandidateProfile, Prompt, SessionRecord};
use interview_core::pack::OrchestrateResponse;
use interview_core::relance::Clarification;
use interview_core::store::SessionStore;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

fn required(value: Option<String>, name: &str) -> Result<String, ApiError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("Missing {name}")))
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub session: SessionRecord,
    #[serde(default)]
    pub profile: Option<CandidateProfile>,
}

/// Seeds the in-memory store with a session (and optionally its profile).
pub async fn create_session(
    State(state): State<AppState>,
    Json(mut req): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let session_id = required(Some(req.session.id.clone()), "session.id")?;
    req.session.id = session_id.clone();
    req.session.user_id = required(Some(req.session.user_id.clone()), "session.user_id")?;
    if let Some(mut profile) = req.profile {
        profile.user_id = profile.user_id.trim().to_string();
        if profile.user_id != req.session.user_id {
            return Err(ApiError::BadRequest(
                "profile.user_id does not match session.user_id".into(),
            ));
        }
        state.store.insert_profile(profile).await;
    }
    state.store.insert_session(req.session).await;
    tracing::info!("session {} created", session_id);
    Ok((
        StatusCode::CREATED,
        Json(json!({ "ok": true, "session_id": session_id })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct OrchestrateRequest {
    pub session_id: Option<String>,
}

pub async fn orchestrate(
    State(state): State<AppState>,
    Json(req): Json<OrchestrateRequest>,
) -> Result<Json<OrchestrateResponse>, ApiError> {
    let session_id = required(req.session_id, "session_id")?;
    Ok(Json(state.packs.orchestrate(&session_id).await?))
}

#[derive(Debug, Serialize)]
pub struct QuestionsResponse {
    pub session_id: String,
    pub questions: Vec<Prompt>,
    pub total_questions: usize,
    pub duration_target: Option<u32>,
}

pub async fn questions(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<QuestionsResponse>, ApiError> {
    let session = state
        .store
        .load_session(&session_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("session not found: {session_id}")))?;
    if session.prompts.is_empty() {
        return Err(ApiError::Conflict(format!(
            "session {session_id} has no questions yet"
        )));
    }
    Ok(Json(QuestionsResponse {
        session_id: session.id,
        total_questions: session.prompts.len(),
        questions: session.prompts,
        duration_target: session.duration_target_secs,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CaseStudyRequest {
    pub session_id: Option<String>,
    #[serde(default)]
    pub current_step: usize,
}

pub async fn case_study(
    State(state): State<AppState>,
    Json(req): Json<CaseStudyRequest>,
) -> Result<Json<CaseStep>, ApiError> {
    let session_id = required(req.session_id, "session_id")?;
    Ok(Json(state.cases.step(&session_id, req.current_step).await?))
}

#[derive(Debug, Deserialize)]
pub struct RelanceRequest {
    /// Only logged: the clarification is cached per question and language.
    #[serde(default)]
    pub session_id: Option<String>,
    pub question_id: Option<String>,
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub firstname: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RelanceResponse {
    pub ok: bool,
    #[serde(flatten)]
    pub clarification: Clarification,
}

pub async fn relance(
    State(state): State<AppState>,
    Json(req): Json<RelanceRequest>,
) -> Result<Json<RelanceResponse>, ApiError> {
    let question_id = required(req.question_id, "question_id")?;
    let lang = req.lang.unwrap_or_default();
    match req.session_id.as_deref().map(str::trim) {
        Some(session_id) if !session_id.is_empty() => {
            tracing::info!("relance for {} in session {}", question_id, session_id)
        }
        _ => tracing::info!("relance for {}", question_id),
    }

    let clarification = state
        .relance
        .clarify(&question_id, &lang, req.firstname.as_deref())
        .await;
    Ok(Json(RelanceResponse {
        ok: true,
        clarification,
    }))
}
