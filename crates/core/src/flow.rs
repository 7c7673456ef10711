//! Live session state machine.
//!
//! The controller is the only writer of the [`SessionContext`]. Every input
//! (player completion, transcription, silence signals, timers) arrives as a
//! [`FlowEvent`] and is handled to completion before the next one is read.
//! Side effects leave as [`Command`]s for the runtime to execute.

use crate::Command;
use crate::context::SessionContext;
use crate::feedback::{AnsweredPrompt, FeedbackService, SessionEvaluation, grade_answer};
use crate::idle::IdleManager;
use crate::intent::RepeatIntent;
use crate::media::{SystemClip, SystemMedia};
use crate::model::{AnswerRecord, Prompt, SessionStatus};
use crate::playlist::{Clip, Playlist};
use crate::relance::RelanceService;
use crate::sequence::PromptCursor;
use crate::settings::EngineSettings;
use crate::silence::{AudioLevelSource, SilenceMetrics, SilenceSignal};
use crate::store::{SessionStore, advance_status};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    Intro1,
    Intro2,
    /// Delivering the n-th prompt (1-based).
    Question(usize),
    Listening,
    Relance,
    NextQuestion,
    Closing,
    Complete,
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowState::Idle => f.write_str("IDLE"),
            FlowState::Intro1 => f.write_str("INTRO_1"),
            FlowState::Intro2 => f.write_str("INTRO_2"),
            FlowState::Question(n) => write!(f, "Q{n}"),
            FlowState::Listening => f.write_str("LISTENING"),
            FlowState::Relance => f.write_str("RELANCE"),
            FlowState::NextQuestion => f.write_str("NEXT_QUESTION"),
            FlowState::Closing => f.write_str("CLOSING"),
            FlowState::Complete => f.write_str("COMPLETE"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlowEvent {
    Start,
    /// The player finished the clip it was showing.
    ClipEnded,
    /// The utterance with this number (prompt or clarification) finished.
    SpeechDone(u64),
    Transcript(String),
    Speaking,
    SilenceStart,
    SilenceConfirmed(SilenceMetrics),
    RepeatRequested,
    DeviceError(String),
    HardStop,
}

impl From<SilenceSignal> for FlowEvent {
    fn from(signal: SilenceSignal) -> Self {
        match signal {
            SilenceSignal::Speaking => FlowEvent::Speaking,
            SilenceSignal::SilenceStart => FlowEvent::SilenceStart,
            SilenceSignal::SilenceConfirmed(m) => FlowEvent::SilenceConfirmed(m),
        }
    }
}

/// External collaborators of a live session.
#[derive(Clone)]
pub struct FlowDeps {
    pub sessions: Arc<dyn SessionStore>,
    pub feedback: Arc<dyn FeedbackService>,
    pub relance: Arc<RelanceService>,
    pub media: SystemMedia,
}

pub struct FlowController<S: AudioLevelSource> {
    ctx: SessionContext,
    state: FlowState,
    playlist: Playlist,
    cursor: PromptCursor,
    idle: IdleManager<S>,
    intent: RepeatIntent,
    media: SystemMedia,
    sessions: Arc<dyn SessionStore>,
    feedback: Arc<dyn FeedbackService>,
    settings: EngineSettings,
    commands: mpsc::UnboundedSender<Command>,
    events: mpsc::Sender<FlowEvent>,
    audio_locked_until: Option<Instant>,
    /// Number of the utterance whose `SpeechDone` is awaited. Older ones
    /// are stale.
    utterance: u64,
    hard_timer: Option<JoinHandle<()>>,
}

impl<S: AudioLevelSource> FlowController<S> {
    pub fn new(
        ctx: SessionContext,
        cursor: PromptCursor,
        level_source: S,
        deps: FlowDeps,
        settings: EngineSettings,
        commands: mpsc::UnboundedSender<Command>,
        events: mpsc::Sender<FlowEvent>,
    ) -> Self {
        let mut playlist = Playlist::new();
        let forward = commands.clone();
        playlist.subscribe(Box::new(move |clip: Option<&Clip>| {
            let command = match clip {
                Some(clip) => Command::PlayClip(clip.clone()),
                None => Command::ClearPlayback,
            };
            if forward.send(command).is_err() {
                tracing::warn!("runtime is gone, player command dropped");
            }
        }));

        Self {
            idle: IdleManager::new(level_source, deps.relance, deps.media.clone(), &settings),
            ctx,
            state: FlowState::Idle,
            playlist,
            cursor,
            intent: RepeatIntent::new(),
            media: deps.media,
            sessions: deps.sessions,
            feedback: deps.feedback,
            settings,
            commands,
            events,
            audio_locked_until: None,
            utterance: 0,
            hard_timer: None,
        }
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    pub fn playlist(&self) -> &Playlist {
        &self.playlist
    }

    /// Consumes events until the session completes, then hands back the
    /// final context.
    pub async fn run(mut self, mut events: mpsc::Receiver<FlowEvent>) -> SessionContext {
        while let Some(event) = events.recv().await {
            self.handle(event).await;
            if self.state == FlowState::Complete {
                break;
            }
        }
        self.ctx
    }

    pub async fn handle(&mut self, event: FlowEvent) {
        tracing::debug!("{} <- {:?}", self.state, event);
        match (self.state, event) {
            (FlowState::Complete, _) => {}
            (_, FlowEvent::HardStop) => self.finalize(true).await,
            (_, FlowEvent::DeviceError(message)) => self.device_error(message).await,
            (FlowState::Idle, FlowEvent::Start) => self.start().await,
            (FlowState::Intro1, FlowEvent::ClipEnded) => {
                self.play_intro(SystemClip::Intro2, FlowState::Intro2).await
            }
            (FlowState::Intro2, FlowEvent::ClipEnded) => self.next_question().await,
            (FlowState::Question(_), FlowEvent::ClipEnded) if self.ctx.is_video() => {
                self.enter_listening().await
            }
            (FlowState::Question(_), FlowEvent::SpeechDone(id))
                if !self.ctx.is_video() && id == self.utterance =>
            {
                self.enter_listening().await
            }
            (FlowState::Listening, FlowEvent::ClipEnded) => self.advance_filler().await,
            (FlowState::Listening, FlowEvent::Speaking) => {
                tracing::debug!("candidate speaking on Q{}", self.ctx.question_number);
                self.idle.speech_resumed(&self.ctx, &mut self.playlist).await;
            }
            (FlowState::Listening, FlowEvent::SilenceStart) => {
                self.idle.suspect_pause(&self.ctx, &mut self.playlist).await;
                self.sync_mic().await;
            }
            (FlowState::Listening, FlowEvent::SilenceConfirmed(metrics)) => {
                self.silence_confirmed(metrics).await
            }
            (FlowState::Relance, FlowEvent::SpeechDone(id)) if id == self.utterance => {
                self.end_relance().await
            }
            (FlowState::Relance, FlowEvent::ClipEnded) => {
                self.playlist.next();
            }
            (FlowState::Closing, FlowEvent::ClipEnded) => self.finalize(false).await,
            (_, FlowEvent::Transcript(text)) => self.transcript(text).await,
            (_, FlowEvent::RepeatRequested) => self.repeat().await,
            (state, event) => tracing::debug!("ignoring {:?} in {}", event, state),
        }
    }

    fn transition(&mut self, to: FlowState) {
        tracing::info!("STATE: {} -> {}", self.state, to);
        self.state = to;
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::warn!("runtime is gone, command dropped");
        }
    }

    fn next_utterance(&mut self) -> u64 {
        self.utterance += 1;
        self.utterance
    }

    /// Suppresses a second synthesis start within the lock window.
    fn try_lock_audio(&mut self) -> bool {
        let now = Instant::now();
        if self.audio_locked_until.is_some_and(|until| until > now) {
            tracing::debug!("audio locked, skipping utterance");
            return false;
        }
        self.audio_locked_until = Some(now + self.settings.audio_lock());
        true
    }

    /// The microphone is open only while listening and while the current clip
    /// (if any) allows it.
    async fn sync_mic(&mut self) {
        let wanted = self.state == FlowState::Listening
            && self.playlist.current().is_none_or(|clip| clip.mic_open);
        if wanted != self.ctx.mic_open {
            self.ctx.mic_open = wanted;
            let command = if wanted {
                Command::OpenMicrophone
            } else {
                Command::CloseMicrophone
            };
            self.send(command);
        }
    }

    async fn start(&mut self) {
        if let Err(e) = advance_status(self.sessions.as_ref(), &self.ctx.session_id, SessionStatus::Running).await {
            tracing::warn!("could not mark session running: {}", e);
        }
        self.playlist.reset();

        let events = self.events.clone();
        let length = self.settings.session_length();
        self.hard_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(length).await;
            if events.send(FlowEvent::HardStop).await.is_err() {
                tracing::debug!("session ended before the hard stop");
            }
        }));

        self.play_intro(SystemClip::Intro1, FlowState::Intro1).await;
    }

    async fn play_intro(&mut self, clip: SystemClip, state: FlowState) {
        self.transition(state);
        let clip = self.media.clip(clip, &self.ctx.lang).await;
        self.playlist.reset();
        self.playlist.add([clip]);
        self.sync_mic().await;
    }

    async fn next_question(&mut self) {
        self.transition(FlowState::NextQuestion);
        self.finish_prompt().await;
        match self.cursor.next_prompt() {
            Some(prompt) => {
                self.ctx.begin_prompt(prompt);
                self.transition(FlowState::Question(self.ctx.question_number));
                if !self.deliver_current().await {
                    // Nothing will report completion; listen straight away.
                    self.enter_listening().await;
                }
            }
            None => self.closing().await,
        }
    }

    /// Queues the current prompt's clip or utterance. Returns false when
    /// nothing was started.
    async fn deliver_current(&mut self) -> bool {
        let Some(prompt) = self.ctx.current.clone() else {
            return false;
        };
        self.playlist.reset();
        self.send(Command::ShowPrompt(prompt.text(&self.ctx.lang).to_string()));

        let started = if self.ctx.is_video() {
            let clip = self.media.question_clip(&prompt, &self.ctx.lang);
            self.playlist.add([clip]);
            true
        } else if self.try_lock_audio() {
            let utterance = self.next_utterance();
            self.send(Command::SpeakText {
                text: prompt.spoken_text(&self.ctx.lang).to_string(),
                lang: self.ctx.lang.clone(),
                utterance,
            });
            true
        } else {
            false
        };
        self.sync_mic().await;
        started
    }

    async fn enter_listening(&mut self) {
        self.enter_listening_after(None).await
    }

    /// Like `enter_listening`, but `bridge` plays (microphone closed) before
    /// the filler starts.
    async fn enter_listening_after(&mut self, bridge: Option<Clip>) {
        self.transition(FlowState::Listening);
        if !self.ctx.transcribing {
            self.ctx.transcribing = true;
            self.send(Command::StartTranscription);
        }
        // Question and clarification clips make way for the filler.
        if self.playlist.current().is_some_and(|clip| !clip.mic_open) {
            self.playlist.reset();
        }
        if let Some(clip) = bridge {
            self.playlist.add([clip]);
        }
        let started = self
            .idle
            .enter_listening(&self.ctx, &mut self.playlist, self.events.clone())
            .await;
        if !started {
            tracing::debug!("silence loop already running");
        }
        self.sync_mic().await;
    }

    async fn advance_filler(&mut self) {
        if self.playlist.next().is_none() {
            self.idle.refill(&self.ctx, &mut self.playlist).await;
        }
        self.sync_mic().await;
    }

    async fn silence_confirmed(&mut self, metrics: SilenceMetrics) {
        tracing::info!(
            "silence confirmed on Q{} after {} ms (relances: {})",
            self.ctx.question_number,
            metrics.silence_ms,
            self.ctx.relance_count
        );
        if self.ctx.relance_count == 0 {
            self.relance().await;
        } else {
            self.next_question().await;
        }
    }

    async fn relance(&mut self) {
        self.transition(FlowState::Relance);
        let window = self.idle.leave_listening();
        self.absorb(window);
        self.ctx.relance_count += 1;
        self.ctx.total_relances += 1;

        self.playlist.reset();
        if self.ctx.is_video() {
            let clip = self.media.clip(SystemClip::ClarifyStart, &self.ctx.lang).await;
            self.playlist.add([clip]);
        }
        self.sync_mic().await;

        let Some(clarification) = self.idle.clarify(&self.ctx).await else {
            self.enter_listening().await;
            return;
        };
        self.send(Command::ShowPrompt(clarification.relance_text.clone()));
        match clarification.audio_url {
            Some(url) if self.try_lock_audio() => {
                let utterance = self.next_utterance();
                self.send(Command::PlayAudio { url, utterance });
            }
            _ => {
                // Text only; nothing to wait for.
                self.enter_listening().await;
            }
        }
    }

    /// The clarification audio finished. Video sessions close it with an
    /// end clip, alternating between the two takes.
    async fn end_relance(&mut self) {
        let bridge = if self.ctx.is_video() {
            let take = if self.ctx.total_relances % 2 == 0 {
                SystemClip::ClarifyEndAlt
            } else {
                SystemClip::ClarifyEnd
            };
            Some(self.media.clip(take, &self.ctx.lang).await)
        } else {
            None
        };
        self.enter_listening_after(bridge).await;
    }

    async fn transcript(&mut self, text: String) {
        if self.ctx.current.is_none() {
            return;
        }
        if self.intent.detect(&text) {
            tracing::info!("repeat requested: {:?}", text);
            self.repeat().await;
            return;
        }
        self.ctx.push_transcript(&text);
    }

    /// Replays the current prompt without consuming a slot; the transcript
    /// and relance count are kept.
    async fn repeat(&mut self) {
        let repeatable = matches!(
            self.state,
            FlowState::Question(_) | FlowState::Listening | FlowState::Relance
        );
        if !repeatable || self.ctx.current.is_none() {
            return;
        }
        let window = self.idle.leave_listening();
        self.absorb(window);
        // Whatever is still being spoken no longer ends this step.
        self.utterance += 1;
        self.transition(FlowState::Question(self.ctx.question_number));
        if !self.deliver_current().await {
            self.enter_listening().await;
        }
    }

    fn absorb(&mut self, window: SilenceMetrics) {
        let metrics = &mut self.ctx.metrics;
        metrics.duration_ms += window.duration_ms;
        metrics.silence_ms = window.silence_ms;
        metrics.pauses_count += window.pauses_count;
        metrics.pauses.extend(window.pauses);
    }

    /// Closes the answer window of the current prompt and submits it.
    async fn finish_prompt(&mut self) {
        if self.idle.is_listening() {
            let window = self.idle.leave_listening();
            self.absorb(window);
        }
        if let Some((prompt, answer, metrics)) = self.ctx.take_answer() {
            self.submit_answer(prompt, answer, metrics).await;
        }
    }

    async fn submit_answer(&mut self, prompt: Prompt, answer: String, metrics: SilenceMetrics) {
        let (rubric, score) =
            grade_answer(self.feedback.as_ref(), &prompt, &answer, &self.ctx.lang).await;
        tracing::info!("answer to {} scored {}", prompt.question_id, score);

        let record = AnswerRecord {
            session_id: self.ctx.session_id.clone(),
            user_id: self.ctx.user_id.clone(),
            question_id: prompt.question_id.clone(),
            answer: answer.clone(),
            score_auto: Some(score),
            rubric: Some(rubric),
            silence: metrics,
        };
        if let Err(e) = self.sessions.save_answer(&record).await {
            tracing::error!("could not save answer to {}: {}", prompt.question_id, e);
        }
        self.cursor.record_score(&prompt, score);
        self.ctx.answers.push(AnsweredPrompt {
            question_id: prompt.question_id,
            answer,
            score_auto: Some(score),
        });
    }

    async fn closing(&mut self) {
        self.transition(FlowState::Closing);
        self.stop_capture().await;
        self.playlist.reset();
        if self.ctx.is_video() {
            let clip = self.media.clip(SystemClip::EndInterview, &self.ctx.lang).await;
            self.playlist.add([clip]);
        } else {
            self.finalize(false).await;
        }
    }

    async fn stop_capture(&mut self) {
        if self.idle.is_listening() {
            let window = self.idle.leave_listening();
            self.absorb(window);
        }
        if self.ctx.transcribing {
            self.ctx.transcribing = false;
            self.send(Command::StopTranscription);
        }
        if self.ctx.mic_open {
            self.ctx.mic_open = false;
            self.send(Command::CloseMicrophone);
        }
    }

    async fn finalize(&mut self, hard_stop: bool) {
        if hard_stop {
            tracing::warn!("hard stop reached in {}", self.state);
            self.stop_capture().await;
            // Force the microphone shut whatever we believe its state is.
            self.send(Command::CloseMicrophone);
            self.playlist.reset();
        } else {
            self.stop_capture().await;
        }
        if let Some(timer) = self.hard_timer.take() {
            timer.abort();
        }
        if let Some((prompt, answer, metrics)) = self.ctx.take_answer() {
            self.submit_answer(prompt, answer, metrics).await;
        }

        let session_id = self.ctx.session_id.clone();
        if let Err(e) = advance_status(self.sessions.as_ref(), &session_id, SessionStatus::AwaitingFeedback).await {
            tracing::warn!("could not mark session awaiting feedback: {}", e);
        }

        let digest = self.ctx.digest();
        let evaluation = match self.feedback.finalize_session(&digest).await {
            Ok(evaluation) => evaluation,
            Err(e) => {
                tracing::error!("session evaluation failed: {:#}", e);
                SessionEvaluation::fallback(&digest.scores())
            }
        };
        match self.sessions.save_evaluation(&session_id, &evaluation).await {
            Ok(()) => {
                if let Err(e) = advance_status(self.sessions.as_ref(), &session_id, SessionStatus::Completed).await {
                    tracing::warn!("could not mark session completed: {}", e);
                }
            }
            Err(e) => tracing::error!("could not save evaluation: {}", e),
        }

        self.transition(FlowState::Complete);
        self.send(Command::SessionComplete(evaluation));
    }

    async fn device_error(&mut self, message: String) {
        tracing::warn!("device error in {}: {}", self.state, message);
        self.ctx.degraded = true;
        self.send(Command::ShowStatus(message));
    }
}
