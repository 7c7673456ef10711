//! Console runtime for simulated sessions.
//!
//! Executes the engine's [`Command`]s without any media device: clips and
//! utterances "finish" after a fixed delay, and a scripted candidate speaks
//! for a while every time the microphone opens, then falls silent.

use anyhow::Result;
use async_trait::async_trait;
use interview_core::Command;
use interview_core::feedback::SessionEvaluation;
use interview_core::flow::FlowEvent;
use interview_core::relance::SpeechSynthesizer;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, sleep_until};

/// Input level the scripted candidate produces while speaking.
const SPEAKING_LEVEL: f32 = 0.2;

/// Stands in for speech synthesis: nothing is rendered, the runtime logs
/// the text when it is played.
pub struct ConsoleVoice;

#[async_trait]
impl SpeechSynthesizer for ConsoleVoice {
    async fn synthesize(&self, _text: &str, _lang: &str, key: &str) -> Result<String> {
        Ok(format!("console://{key}"))
    }
}

#[derive(Debug, Clone)]
pub struct ConsoleTimings {
    /// Length of clips that keep the microphone closed.
    pub clip: Duration,
    /// Length of idle filler clips.
    pub filler: Duration,
    pub speech: Duration,
    /// How long the candidate talks after the microphone opens.
    pub answer: Duration,
}

impl Default for ConsoleTimings {
    fn default() -> Self {
        Self {
            clip: Duration::from_millis(1_500),
            filler: Duration::from_millis(2_750),
            speech: Duration::from_millis(1_200),
            answer: Duration::from_millis(3_000),
        }
    }
}

pub struct ConsoleRuntime {
    timings: ConsoleTimings,
    events: mpsc::Sender<FlowEvent>,
    level: watch::Sender<f32>,
    answers_given: usize,
}

impl ConsoleRuntime {
    pub fn new(timings: ConsoleTimings, events: mpsc::Sender<FlowEvent>, level: watch::Sender<f32>) -> Self {
        Self {
            timings,
            events,
            level,
            answers_given: 0,
        }
    }

    async fn emit(&self, event: FlowEvent) {
        if self.events.send(event).await.is_err() {
            tracing::warn!("flow controller is gone");
        }
    }

    fn set_level(&self, level: f32) {
        // No receiver just means no listening window is open.
        self.level.send_replace(level);
    }

    /// Executes commands until the session completes, returning the final
    /// evaluation (`None` if the controller went away first).
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) -> Option<SessionEvaluation> {
        let mut clip_ends: Option<Instant> = None;
        let mut speech_ends: Option<(Instant, u64)> = None;
        let mut answer_ends: Option<Instant> = None;
        let far = Instant::now() + Duration::from_secs(86_400 * 365);

        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else {
                        return None;
                    };
                    match command {
                        Command::PlayClip(clip) => {
                            tracing::info!("PLAY {}", clip.reference);
                            let length = if clip.mic_open { self.timings.filler } else { self.timings.clip };
                            clip_ends = Some(Instant::now() + length);
                        }
                        Command::ClearPlayback => clip_ends = None,
                        Command::SpeakText { text, lang, utterance } => {
                            tracing::info!("NOVA ({}): {}", lang, text);
                            speech_ends = Some((Instant::now() + self.timings.speech, utterance));
                        }
                        Command::PlayAudio { url, utterance } => {
                            tracing::info!("AUDIO {}", url);
                            speech_ends = Some((Instant::now() + self.timings.speech, utterance));
                        }
                        Command::ShowPrompt(text) => tracing::info!("SCREEN: {}", text),
                        Command::ShowStatus(text) => tracing::warn!("STATUS: {}", text),
                        Command::OpenMicrophone => {
                            tracing::info!("MIC open");
                            self.set_level(SPEAKING_LEVEL);
                            answer_ends = Some(Instant::now() + self.timings.answer);
                        }
                        Command::CloseMicrophone => {
                            tracing::info!("MIC closed");
                            self.set_level(0.0);
                            answer_ends = None;
                        }
                        Command::StartTranscription => tracing::debug!("transcription started"),
                        Command::StopTranscription => tracing::debug!("transcription stopped"),
                        Command::SessionComplete(evaluation) => {
                            tracing::info!("session complete, score {}", evaluation.score_global);
                            return Some(evaluation);
                        }
                    }
                }
                _ = sleep_until(clip_ends.unwrap_or(far)), if clip_ends.is_some() => {
                    clip_ends = None;
                    self.emit(FlowEvent::ClipEnded).await;
                }
                _ = sleep_until(speech_ends.map_or(far, |(at, _)| at)), if speech_ends.is_some() => {
                    if let Some((_, utterance)) = speech_ends.take() {
                        self.emit(FlowEvent::SpeechDone(utterance)).await;
                    }
                }
                _ = sleep_until(answer_ends.unwrap_or(far)), if answer_ends.is_some() => {
                    answer_ends = None;
                    self.set_level(0.0);
                    self.answers_given += 1;
                    let line = format!("Scripted answer number {}.", self.answers_given);
                    tracing::info!("CANDIDATE: {}", line);
                    self.emit(FlowEvent::Transcript(line)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback_client::OfflineFeedback;
    use interview_core::context::SessionContext;
    use interview_core::flow::{FlowController, FlowDeps};
    use interview_core::media::SystemMedia;
    use interview_core::model::{Localized, Prompt, SessionRecord, SessionStatus, SimulationMode};
    use interview_core::relance::RelanceService;
    use interview_core::sequence::PromptCursor;
    use interview_core::settings::EngineSettings;
    use interview_core::store::{MemoryStore, SessionStore};
    use std::sync::Arc;

    fn prompt(id: &str) -> Prompt {
        let mut p = Prompt::new(id, "general", 1);
        p.question = Localized::new().with("en", format!("Question {id}?"));
        p
    }

    async fn simulate(mode: SimulationMode) -> (Option<SessionEvaluation>, SessionContext, Arc<MemoryStore>) {
        let settings = EngineSettings {
            rng_seed: Some(3),
            ..Default::default()
        };
        let store = Arc::new(MemoryStore::new());
        let mut session = SessionRecord::new("s1", "u1");
        session.simulation_mode = Some(mode);
        store.insert_session(session.clone()).await;

        let relance = Arc::new(RelanceService::new(store.clone(), Arc::new(ConsoleVoice), &settings));
        let deps = FlowDeps {
            sessions: store.clone(),
            feedback: Arc::new(OfflineFeedback),
            relance,
            media: SystemMedia::new(settings.media_base_url.clone()),
        };
        let (level_tx, level_rx) = watch::channel(0.0f32);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(64);
        let cursor = PromptCursor::sequential(vec![prompt("q_0001"), prompt("q_0002")]);
        let ctx = SessionContext::new(&session, Some("Ada".into()));
        let flow = FlowController::new(ctx, cursor, level_rx, deps, settings, command_tx, event_tx.clone());

        event_tx.send(FlowEvent::Start).await.unwrap();
        let runtime = ConsoleRuntime::new(ConsoleTimings::default(), event_tx, level_tx);
        let (ctx, evaluation) = tokio::join!(flow.run(event_rx), runtime.run(command_rx));
        (evaluation, ctx, store)
    }

    #[tokio::test(start_paused = true)]
    async fn video_session_runs_to_completion() {
        // Act
        let (evaluation, ctx, store) = simulate(SimulationMode::Video).await;

        // Assert: every prompt was answered and relanced once.
        let evaluation = evaluation.expect("session should complete");
        assert_eq!(ctx.answers.len(), 2);
        assert_eq!(ctx.total_relances, 2);
        // Offline rubric 60/60/60 without keywords.
        assert_eq!(evaluation.score_global, 42);
        let session = store.load_session("s1").await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(store.answers().await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn audio_session_runs_to_completion() {
        let (evaluation, ctx, _store) = simulate(SimulationMode::Audio).await;

        assert!(evaluation.is_some());
        assert_eq!(ctx.answers.len(), 2);
        assert!(ctx.answers.iter().all(|a| a.answer.starts_with("Scripted answer")));
    }
}
