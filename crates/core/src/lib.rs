pub mod case_selector;
pub mod context;
pub mod error;
pub mod fallback;
pub mod feedback;
pub mod flow;
pub mod idle;
pub mod intent;
pub mod media;
pub mod model;
pub mod pack;
pub mod playlist;
pub mod pyramid;
pub mod relance;
pub mod sequence;
pub mod settings;
pub mod silence;
pub mod store;

use crate::feedback::SessionEvaluation;
use crate::playlist::Clip;

/// Represents commands that the session logic (`FlowController`) issues to the runtime.
///
/// This enum is the primary API for decoupling the interview's decision-making
/// from the runtime's execution of side effects (playing media, driving the
/// microphone, speaking text).
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Show this clip now, replacing whatever was on screen.
    PlayClip(Clip),
    /// Nothing is queued; stop showing the previous clip.
    ClearPlayback,
    /// Synthesize and speak the text. The runtime answers with
    /// `SpeechDone(utterance)`; a newer utterance supersedes this one.
    SpeakText {
        text: String,
        lang: String,
        utterance: u64,
    },
    /// Play pre-synthesized audio. Answered like `SpeakText`.
    PlayAudio { url: String, utterance: u64 },
    /// Display prompt or clarification text to the candidate.
    ShowPrompt(String),
    /// Non-blocking status line, e.g. a device failure.
    ShowStatus(String),
    OpenMicrophone,
    CloseMicrophone,
    StartTranscription,
    StopTranscription,
    /// The session is over; carries the final evaluation.
    SessionComplete(SessionEvaluation),
}
