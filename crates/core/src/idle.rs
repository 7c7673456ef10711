//! Idle / silence manager: filler media while waiting for the candidate, the
//! sampling loop, and the clarification fetch.

use crate::context::SessionContext;
use crate::media::{SystemClip, SystemMedia};
use crate::playlist::Playlist;
use crate::relance::{Clarification, RelanceService};
use crate::settings::EngineSettings;
use crate::silence::{AudioLevelSource, SilenceLoop, SilenceMetrics, SilenceSignal};
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct IdleManager<S: AudioLevelSource> {
    silence: SilenceLoop<S>,
    relance: Arc<RelanceService>,
    media: SystemMedia,
    listen_clips: usize,
    /// A smile clip was slipped in front of the filler for a suspected pause.
    pause_clip_queued: bool,
}

impl<S: AudioLevelSource> IdleManager<S> {
    pub fn new(
        source: S,
        relance: Arc<RelanceService>,
        media: SystemMedia,
        settings: &EngineSettings,
    ) -> Self {
        Self {
            silence: SilenceLoop::new(source, settings),
            relance,
            media,
            listen_clips: settings.idle_listen_clips,
            pause_clip_queued: false,
        }
    }

    pub fn is_listening(&self) -> bool {
        self.silence.is_active()
    }

    /// Queues filler (video sessions) and starts sampling. Re-entering while
    /// the loop runs does not schedule a second one.
    pub async fn enter_listening<E>(
        &mut self,
        ctx: &SessionContext,
        playlist: &mut Playlist,
        events: mpsc::Sender<E>,
    ) -> bool
    where
        E: From<SilenceSignal> + Send + 'static,
    {
        if ctx.is_video() && playlist.pending() == 0 {
            self.refill(ctx, playlist).await;
        }
        self.silence.start(events)
    }

    /// Queues another round of filler once the previous one drained.
    pub async fn refill(&self, ctx: &SessionContext, playlist: &mut Playlist) {
        if ctx.is_video() {
            let clips = self.media.idle_sequence(self.listen_clips, &ctx.lang).await;
            playlist.add(clips);
        }
    }

    /// Stops sampling and returns the measurements of the window.
    pub fn leave_listening(&mut self) -> SilenceMetrics {
        self.pause_clip_queued = false;
        let metrics = self.silence.metrics();
        self.silence.stop();
        metrics
    }

    /// A pause is suspected: switch the filler to the smile clip next.
    pub async fn suspect_pause(&mut self, ctx: &SessionContext, playlist: &mut Playlist) {
        if ctx.is_video() && !self.pause_clip_queued {
            let smile = self.media.clip(SystemClip::IdleSmile, &ctx.lang).await;
            playlist.add_next(smile);
            self.pause_clip_queued = true;
        }
    }

    /// The candidate talks again: take back the smile clip if it has not
    /// started yet.
    pub async fn speech_resumed(&mut self, ctx: &SessionContext, playlist: &mut Playlist) {
        if !std::mem::take(&mut self.pause_clip_queued) || !ctx.is_video() {
            return;
        }
        let smile = self.media.clip(SystemClip::IdleSmile, &ctx.lang).await;
        if playlist.withdraw_next(&smile.reference) {
            tracing::debug!("pause clip withdrawn");
        }
    }

    /// Fetches (or synthesizes) the clarification for the current prompt.
    pub async fn clarify(&self, ctx: &SessionContext) -> Option<Clarification> {
        let prompt = ctx.current.as_ref()?;
        Some(
            self.relance
                .clarify(&prompt.question_id, &ctx.lang, ctx.firstname.as_deref())
                .await,
        )
    }
}
