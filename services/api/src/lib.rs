//! HTTP surface of the interview engine.

use axum::Router;
use axum::routing::{get, post};
use interview_core::case_selector::CaseSelector;
use interview_core::pack::PackBuilder;
use interview_core::relance::{RelanceService, SpeechSynthesizer};
use interview_core::settings::EngineSettings;
use interview_core::store::MemoryStore;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod config;
pub mod error;
pub mod handlers;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<MemoryStore>,
    pub packs: Arc<PackBuilder>,
    pub cases: Arc<CaseSelector>,
    pub relance: Arc<RelanceService>,
}

impl AppState {
    pub fn new(
        store: Arc<MemoryStore>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            packs: Arc::new(PackBuilder::new(store.clone(), store.clone(), settings.clone())),
            cases: Arc::new(CaseSelector::new(store.clone(), store.clone(), &settings)),
            relance: Arc::new(RelanceService::new(store.clone(), synthesizer, &settings)),
            store,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    // Permissive CORS so a separate frontend can call the API.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/sessions", post(handlers::create_session))
        .route("/api/engine/orchestrate", post(handlers::orchestrate))
        .route("/api/engine/questions/{session_id}", get(handlers::questions))
        .route("/api/engine/case-study", post(handlers::case_study))
        .route("/api/engine/relance", post(handlers::relance))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
