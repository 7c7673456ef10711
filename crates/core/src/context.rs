use crate::feedback::{AnsweredPrompt, SessionDigest};
use crate::model::{Prompt, SessionRecord, SimulationMode};
use crate::silence::SilenceMetrics;

/// Per-session state shared by the live components. Built once when the
/// session starts; only the flow controller mutates it.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionContext {
    pub session_id: String,
    pub user_id: String,
    pub lang: String,
    pub mode: SimulationMode,
    pub firstname: Option<String>,
    pub current: Option<Prompt>,
    pub question_number: usize,
    /// Transcript accumulated for the current prompt.
    pub transcript: String,
    /// Clarifications played for the current prompt.
    pub relance_count: u32,
    pub total_relances: u32,
    pub metrics: SilenceMetrics,
    pub pauses_total: u32,
    pub answers: Vec<AnsweredPrompt>,
    pub mic_open: bool,
    pub transcribing: bool,
    /// Set after a device failure; the session carries on visual-only.
    pub degraded: bool,
}

impl SessionContext {
    pub fn new(session: &SessionRecord, firstname: Option<String>) -> Self {
        Self {
            session_id: session.id.clone(),
            user_id: session.user_id.clone(),
            lang: session.lang().to_string(),
            mode: session.simulation_mode(),
            firstname,
            current: None,
            question_number: 0,
            transcript: String::new(),
            relance_count: 0,
            total_relances: 0,
            metrics: SilenceMetrics::default(),
            pauses_total: 0,
            answers: Vec::new(),
            mic_open: false,
            transcribing: false,
            degraded: false,
        }
    }

    pub fn is_video(&self) -> bool {
        self.mode == SimulationMode::Video
    }

    pub fn begin_prompt(&mut self, prompt: Prompt) {
        self.current = Some(prompt);
        self.question_number += 1;
        self.transcript.clear();
        self.relance_count = 0;
        self.metrics = SilenceMetrics::default();
    }

    pub fn push_transcript(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if !self.transcript.is_empty() {
            self.transcript.push(' ');
        }
        self.transcript.push_str(text);
    }

    /// Takes the current prompt and its transcript, if anything was said.
    /// The prompt is released either way.
    pub fn take_answer(&mut self) -> Option<(Prompt, String, SilenceMetrics)> {
        let prompt = self.current.take()?;
        self.pauses_total += self.metrics.pauses_count;
        let metrics = std::mem::take(&mut self.metrics);
        let transcript = std::mem::take(&mut self.transcript);
        if transcript.is_empty() {
            return None;
        }
        Some((prompt, transcript, metrics))
    }

    pub fn digest(&self) -> SessionDigest {
        SessionDigest {
            session_id: self.session_id.clone(),
            lang: self.lang.clone(),
            answers: self.answers.clone(),
            pauses_count: self.pauses_total,
            relances: self.total_relances,
        }
    }
}
