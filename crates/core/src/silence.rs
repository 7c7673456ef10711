//! Speech / silence classification of the live input level.
//!
//! [`SilenceDetector`] is a pure tick-driven state machine; [`SilenceLoop`]
//! drives it from a scheduled sampling task while the listening phase is
//! active and forwards its signals to the flow controller.

use crate::settings::EngineSettings;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

/// Root-mean-square energy of a block of samples.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseSpan {
    pub start_ms: u64,
    pub end_ms: u64,
}

/// Measurements for the current answer window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SilenceMetrics {
    pub duration_ms: u64,
    /// Silence accumulated since the last speech.
    pub silence_ms: u64,
    pub pauses_count: u32,
    pub pauses: Vec<PauseSpan>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SilenceSignal {
    Speaking,
    /// A pause is suspected; confirmation follows unless speech resumes.
    SilenceStart,
    SilenceConfirmed(SilenceMetrics),
}

#[derive(Debug, Clone)]
pub struct SilenceDetector {
    speech_level: f32,
    period_ms: u64,
    confirm_ms: u64,
    prealert_ms: u64,
    pause_min_ms: u64,
    elapsed_ms: u64,
    silence_ms: u64,
    speaking: bool,
    prealerted: bool,
    pauses: Vec<PauseSpan>,
}

impl SilenceDetector {
    pub fn new(settings: &EngineSettings) -> Self {
        Self {
            speech_level: settings.silence_threshold * 2.0,
            period_ms: settings.sample_period_ms.max(1),
            confirm_ms: settings.silence_confirm_ms,
            prealert_ms: settings.silence_prealert_ms.min(settings.silence_confirm_ms),
            pause_min_ms: settings.pause_min_ms,
            elapsed_ms: 0,
            silence_ms: 0,
            speaking: false,
            prealerted: false,
            pauses: Vec::new(),
        }
    }

    /// Clears every measurement. Called when a new prompt begins.
    pub fn reset(&mut self) {
        self.elapsed_ms = 0;
        self.silence_ms = 0;
        self.speaking = false;
        self.prealerted = false;
        self.pauses.clear();
    }

    pub fn metrics(&self) -> SilenceMetrics {
        SilenceMetrics {
            duration_ms: self.elapsed_ms,
            silence_ms: self.silence_ms,
            pauses_count: self.pauses.len() as u32,
            pauses: self.pauses.clone(),
        }
    }

    /// Feeds one sample period worth of input level.
    pub fn tick(&mut self, level: f32) -> Option<SilenceSignal> {
        self.elapsed_ms += self.period_ms;

        if level > self.speech_level {
            if self.silence_ms >= self.pause_min_ms && self.elapsed_ms > self.silence_ms {
                let end_ms = self.elapsed_ms - self.period_ms;
                self.pauses.push(PauseSpan {
                    start_ms: end_ms.saturating_sub(self.silence_ms),
                    end_ms,
                });
            }
            // Any speech cancels a pending confirmation.
            self.silence_ms = 0;
            self.prealerted = false;
            if !self.speaking {
                self.speaking = true;
                return Some(SilenceSignal::Speaking);
            }
            return None;
        }

        self.speaking = false;
        self.silence_ms += self.period_ms;

        if self.silence_ms >= self.confirm_ms {
            let metrics = self.metrics();
            self.silence_ms = 0;
            self.prealerted = false;
            return Some(SilenceSignal::SilenceConfirmed(metrics));
        }
        if !self.prealerted && self.silence_ms >= self.confirm_ms - self.prealert_ms {
            self.prealerted = true;
            return Some(SilenceSignal::SilenceStart);
        }
        None
    }
}

/// Live input level as seen by the sampling loop.
pub trait AudioLevelSource: Clone + Send + 'static {
    fn level(&mut self) -> f32;
}

impl AudioLevelSource for watch::Receiver<f32> {
    fn level(&mut self) -> f32 {
        *self.borrow_and_update()
    }
}

/// Scheduled sampling task. Start and stop are idempotent; only one task is
/// ever alive, and it is aborted when the loop is stopped or dropped.
pub struct SilenceLoop<S: AudioLevelSource> {
    source: S,
    settings: EngineSettings,
    handle: Option<JoinHandle<()>>,
    metrics: Arc<Mutex<SilenceMetrics>>,
}

impl<S: AudioLevelSource> SilenceLoop<S> {
    pub fn new(source: S, settings: &EngineSettings) -> Self {
        Self {
            source,
            settings: settings.clone(),
            handle: None,
            metrics: Arc::new(Mutex::new(SilenceMetrics::default())),
        }
    }

    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Spawns the sampling task with fresh measurements. Returns false if a
    /// task was already running.
    pub fn start<E>(&mut self, events: mpsc::Sender<E>) -> bool
    where
        E: From<SilenceSignal> + Send + 'static,
    {
        if self.is_active() {
            return false;
        }
        let mut source = self.source.clone();
        let mut detector = SilenceDetector::new(&self.settings);
        let period = self.settings.sample_period();
        let metrics = self.metrics.clone();
        if let Ok(mut m) = metrics.lock() {
            *m = SilenceMetrics::default();
        }

        self.handle = Some(tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let signal = detector.tick(source.level());
                if let Ok(mut m) = metrics.lock() {
                    *m = detector.metrics();
                }
                if let Some(signal) = signal {
                    if events.send(E::from(signal)).await.is_err() {
                        tracing::debug!("silence loop receiver gone, stopping");
                        break;
                    }
                }
            }
        }));
        tracing::debug!("silence loop started");
        true
    }

    /// Aborts the sampling task. Returns false if none was running.
    pub fn stop(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                handle.abort();
                tracing::debug!("silence loop stopped");
                true
            }
            None => false,
        }
    }

    /// Measurements of the current (or last) listening window.
    pub fn metrics(&self) -> SilenceMetrics {
        self.metrics
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }
}

impl<S: AudioLevelSource> Drop for SilenceLoop<S> {
    fn drop(&mut self) {
        self.stop();
    }
}
