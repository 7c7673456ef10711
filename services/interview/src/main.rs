use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use interview_core::case_selector::CaseSelector;
use interview_core::context::SessionContext;
use interview_core::feedback::FeedbackService;
use interview_core::flow::{FlowController, FlowDeps, FlowEvent};
use interview_core::media::SystemMedia;
use interview_core::model::{CandidateProfile, InterviewType, SessionRecord, SimulationMode};
use interview_core::pack::{PackAction, PackBuilder};
use interview_core::relance::{RelanceService, SpeechSynthesizer};
use interview_core::sequence::PromptCursor;
use interview_core::settings::EngineSettings;
use interview_core::store::{MemoryStore, SessionStore};
use interview_service::bank_loader;
use interview_service::config::Config;
use interview_service::feedback_client::{OfflineFeedback, OpenAiFeedback};
use interview_service::runtime::{ConsoleRuntime, ConsoleTimings, ConsoleVoice};
use interview_service::tts_client::ElevenLabsClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::fmt::time::ChronoLocal;

#[derive(Parser)]
#[command(version, about = "Mock interview engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build (or resume) the question pack of a fresh session and print it as JSON
    BuildPack(CandidateArgs),
    /// Run a whole session against the console runtime
    Simulate {
        #[command(flatten)]
        candidate: CandidateArgs,
        #[arg(long, value_enum, default_value_t = Mode::Video)]
        mode: Mode,
        /// Run a case study instead of a question pack
        #[arg(long)]
        case: bool,
        /// Cap on the number of prompts asked
        #[arg(long)]
        max_prompts: Option<usize>,
        /// Seconds the scripted candidate talks after each prompt
        #[arg(long, default_value_t = 3.0)]
        answer_secs: f64,
    },
}

#[derive(clap::Args)]
struct CandidateArgs {
    #[arg(long, default_value = "session-1")]
    session: String,
    #[arg(long, default_value = "user-1")]
    user: String,
    #[arg(long, default_value = "Candidate")]
    firstname: String,
    #[arg(long, default_value = "general")]
    domain: String,
    #[arg(long)]
    sub_domain: Option<String>,
    #[arg(long)]
    career_stage: Option<String>,
    #[arg(long)]
    segment: Option<String>,
    #[arg(long, default_value = "en")]
    lang: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Video,
    Audio,
}

impl From<Mode> for SimulationMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Video => SimulationMode::Video,
            Mode::Audio => SimulationMode::Audio,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load application configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    // --- 3. Parse Command-Line Arguments ---
    let cli = Cli::parse();

    // --- 4. Load the Question Bank ---
    let bank = bank_loader::load_bank(&config.question_bank_dir)
        .context("Failed to load the question bank")?;
    tracing::info!(
        "Loaded {} prompts and {} cases from {}",
        bank.prompts.len(),
        bank.cases.len(),
        config.question_bank_dir.display()
    );
    let store = Arc::new(MemoryStore::with_bank(bank.prompts, bank.cases));

    match cli.command {
        Commands::BuildPack(candidate) => {
            seed_session(&store, &candidate, None, false).await;
            let builder = PackBuilder::new(store.clone(), store.clone(), config.settings.clone());
            let response = builder.orchestrate(&candidate.session).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Simulate {
            candidate,
            mode,
            case,
            max_prompts,
            answer_secs,
        } => {
            let mut settings = config.settings.clone();
            if let Some(max) = max_prompts {
                settings.max_total_prompts = max;
            }
            seed_session(&store, &candidate, Some(mode.into()), case).await;
            let timings = ConsoleTimings {
                answer: Duration::from_secs_f64(answer_secs.max(0.0)),
                ..Default::default()
            };
            simulate(&config, settings, store, &candidate, case, timings).await?;
        }
    }

    Ok(())
}

async fn seed_session(store: &MemoryStore, candidate: &CandidateArgs, mode: Option<SimulationMode>, case: bool) {
    let mut session = SessionRecord::new(&candidate.session, &candidate.user);
    session.lang = Some(candidate.lang.clone());
    session.simulation_mode = mode;
    if case {
        session.interview_type = InterviewType::CaseStudy;
    }
    store.insert_session(session).await;
    store
        .insert_profile(CandidateProfile {
            user_id: candidate.user.clone(),
            firstname: Some(candidate.firstname.clone()),
            domain: Some(candidate.domain.clone()),
            sub_domain: candidate.sub_domain.clone(),
            career_stage: candidate.career_stage.clone(),
            segment: candidate.segment.clone(),
            ..Default::default()
        })
        .await;
}

async fn simulate(
    config: &Config,
    settings: EngineSettings,
    store: Arc<MemoryStore>,
    candidate: &CandidateArgs,
    case: bool,
    timings: ConsoleTimings,
) -> Result<()> {
    // --- 5. Prepare the Prompt Sequence ---
    let cursor = if case {
        let selector = CaseSelector::new(store.clone(), store.clone(), &settings);
        let chosen = selector.select(&candidate.session).await?;
        tracing::info!("Running case {}", chosen.id);
        PromptCursor::sequential(chosen.as_prompts(&candidate.lang))
    } else {
        let builder = PackBuilder::new(store.clone(), store.clone(), settings.clone());
        let mut response = builder.orchestrate(&candidate.session).await?;
        if response.action == PackAction::InitQ1 {
            // The opener went out; the next call builds the full pack.
            response = builder.orchestrate(&candidate.session).await?;
        }
        tracing::info!("Pack of {} prompts ready", response.total_questions);
        PromptCursor::adaptive(response.questions, &settings)
    };

    // --- 6. Initialize API Clients ---
    let feedback: Arc<dyn FeedbackService> = match &config.openai_api_key {
        Some(key) => Arc::new(OpenAiFeedback::new(key.clone(), config.chat_model.clone())),
        None => {
            tracing::warn!("OPENAI_API_KEY not set, answers get the neutral rubric");
            Arc::new(OfflineFeedback)
        }
    };
    let synthesizer: Arc<dyn SpeechSynthesizer> = match &config.elevenlabs_api_key {
        Some(key) => Arc::new(ElevenLabsClient::new(
            key.clone(),
            config.voices.clone(),
            config.audio_dir.clone(),
            format!("{}/audio", settings.media_base_url),
        )),
        None => Arc::new(ConsoleVoice),
    };
    let relance = Arc::new(RelanceService::new(store.clone(), synthesizer, &settings));
    let deps = FlowDeps {
        sessions: store.clone(),
        feedback,
        relance,
        media: SystemMedia::new(settings.media_base_url.clone()),
    };

    // --- 7. Wire the Controller to the Console Runtime ---
    let session = store
        .load_session(&candidate.session)
        .await?
        .context("Session vanished from the store")?;
    let ctx = SessionContext::new(&session, Some(candidate.firstname.clone()));
    let (level_tx, level_rx) = watch::channel(0.0f32);
    let (command_tx, command_rx) = mpsc::unbounded_channel::<interview_core::Command>();
    let (event_tx, event_rx) = mpsc::channel::<FlowEvent>(128);

    let flow = FlowController::new(ctx, cursor, level_rx, deps, settings, command_tx, event_tx.clone());
    event_tx
        .send(FlowEvent::Start)
        .await
        .context("Failed to start the session")?;
    let runtime = ConsoleRuntime::new(timings, event_tx, level_tx);

    let flow_handle = tokio::spawn(flow.run(event_rx));
    let evaluation = tokio::select! {
        evaluation = runtime.run(command_rx) => evaluation,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl-C, shutting down...");
            flow_handle.abort();
            return Ok(());
        }
    };

    let ctx = flow_handle.await.context("Flow controller task failed")?;
    tracing::info!(
        "{} answers, {} clarifications, {} long pauses",
        ctx.answers.len(),
        ctx.total_relances,
        ctx.pauses_total
    );
    match evaluation {
        Some(evaluation) => println!("{}", serde_json::to_string_pretty(&evaluation)?),
        None => tracing::warn!("Session ended without an evaluation"),
    }
    Ok(())
}
