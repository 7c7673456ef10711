use anyhow::Context;
use interview_api::config::Config;
use interview_api::{AppState, build_router};
use interview_core::relance::SpeechSynthesizer;
use interview_core::store::MemoryStore;
use interview_service::bank_loader;
use interview_service::runtime::ConsoleVoice;
use interview_service::tts_client::ElevenLabsClient;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::fmt::time::ChronoLocal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load application configuration")?;
    let service = &config.service;

    tracing_subscriber::fmt()
        .with_max_level(service.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    let bank = bank_loader::load_bank(&service.question_bank_dir)
        .context("Failed to load the question bank")?;
    info!(
        "Loaded {} prompts and {} cases",
        bank.prompts.len(),
        bank.cases.len()
    );
    let store = Arc::new(MemoryStore::with_bank(bank.prompts, bank.cases));

    let synthesizer: Arc<dyn SpeechSynthesizer> = match &service.elevenlabs_api_key {
        Some(key) => Arc::new(ElevenLabsClient::new(
            key.clone(),
            service.voices.clone(),
            service.audio_dir.clone(),
            format!("{}/audio", service.settings.media_base_url),
        )),
        None => {
            tracing::warn!("ELEVENLABS_API_KEY not set, clarifications carry placeholder audio");
            Arc::new(ConsoleVoice)
        }
    };

    let app = build_router(AppState::new(store, synthesizer, service.settings.clone()));

    info!("Starting interview API, listening on {}", config.bind_address);
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
