//! Frame pacing policy.
//!
//! A capture may fire only when the session is active, no audio is playing,
//! and at least `min_interval` has passed since the last capture. Disallowed
//! captures are dropped, never queued.

use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

/// Default minimum spacing between two captures.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(2300);

/// Why a pacer tick did not produce a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    SessionInactive,
    AudioBusy,
    TooSoon,
    /// On-demand capture with nobody waiting for a frame.
    NotRequested,
}

#[derive(Debug, Clone)]
pub struct PacingState {
    last_capture_at: Option<Instant>,
    min_interval: Duration,
    audio_busy: bool,
}

impl PacingState {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            last_capture_at: None,
            min_interval,
            audio_busy: false,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn audio_busy(&self) -> bool {
        self.audio_busy
    }

    pub fn last_capture_at(&self) -> Option<Instant> {
        self.last_capture_at
    }

    /// Decides whether a capture may fire at `now`.
    pub fn check(&self, now: Instant, session_active: bool) -> Result<(), SkipReason> {
        if !session_active {
            return Err(SkipReason::SessionInactive);
        }
        if self.audio_busy {
            return Err(SkipReason::AudioBusy);
        }
        match self.last_capture_at {
            Some(last) if now.saturating_duration_since(last) < self.min_interval => {
                Err(SkipReason::TooSoon)
            }
            _ => Ok(()),
        }
    }

    pub fn record_capture(&mut self, at: Instant) {
        self.last_capture_at = Some(at);
    }

    /// Playback started: suppress captures and restart the clock so nothing
    /// fires mid-utterance.
    pub fn on_audio_started(&mut self, now: Instant) {
        self.audio_busy = true;
        self.last_capture_at = Some(now);
    }

    /// Playback ended or failed: the next tick may capture immediately.
    pub fn on_audio_finished(&mut self) {
        self.audio_busy = false;
        self.last_capture_at = None;
    }

    /// Clears the clock so the next permitted tick captures immediately.
    pub fn reset_clock(&mut self) {
        self.last_capture_at = None;
    }

    pub fn reset(&mut self) {
        self.last_capture_at = None;
        self.audio_busy = false;
    }
}

impl Default for PacingState {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_INTERVAL)
    }
}
