//! Agent speech playback.
//!
//! `AudioPlaybackCoordinator` is the single owner of the session's audio
//! output. At most one clip plays at a time; payloads arriving meanwhile are
//! staged in arrival order and start as soon as the current clip ends.
//! Completion is reported asynchronously through a [`PlaybackDone`] channel
//! so the owning event loop never waits on playback.

use crate::audio_utils::AudioFormat;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::FutureExt;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Staged clips beyond this drop the oldest waiting one.
pub const MAX_STAGED_CLIPS: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub id: u64,
    pub data: Bytes,
    pub format: AudioFormat,
}

/// Something that can render a clip. `play` resolves when playback ends.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    async fn play(&self, clip: &AudioClip) -> anyhow::Result<()>;
}

/// Headless output: holds the clip for as long as it would take to play.
pub struct TimedPlayback;

#[async_trait]
impl AudioOutput for TimedPlayback {
    async fn play(&self, clip: &AudioClip) -> anyhow::Result<()> {
        let duration = clip.format.clip_duration(clip.data.len());
        debug!(clip_id = clip.id, ms = duration.as_millis() as u64, "Playing clip");
        tokio::time::sleep(duration).await;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackDone {
    pub clip_id: u64,
    pub result: Result<(), String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Started { clip_id: u64 },
    Staged { queued: usize },
}

/// A staged clip that has just started playing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextClip {
    pub clip_id: u64,
    pub bytes: usize,
}

/// Outcome of a finished clip.
#[derive(Debug, Clone, PartialEq)]
pub struct Finished {
    pub clip_id: u64,
    pub error: Option<String>,
    /// The staged clip that started in its place, if any.
    pub next: Option<NextClip>,
}

struct Playing {
    clip_id: u64,
    task: JoinHandle<()>,
}

pub struct AudioPlaybackCoordinator {
    output: Arc<dyn AudioOutput>,
    done_tx: mpsc::UnboundedSender<PlaybackDone>,
    current: Option<Playing>,
    staged: VecDeque<Bytes>,
    next_id: u64,
    format: AudioFormat,
}

impl AudioPlaybackCoordinator {
    pub fn new(output: Arc<dyn AudioOutput>, done_tx: mpsc::UnboundedSender<PlaybackDone>) -> Self {
        Self {
            output,
            done_tx,
            current: None,
            staged: VecDeque::new(),
            next_id: 0,
            format: AudioFormat::default(),
        }
    }

    pub fn set_format(&mut self, format: AudioFormat) {
        info!(%format, "Audio output format set");
        self.format = format;
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn is_busy(&self) -> bool {
        self.current.is_some()
    }

    pub fn staged(&self) -> usize {
        self.staged.len()
    }

    /// Plays `data` now if the output is free, otherwise stages it.
    pub fn enqueue(&mut self, data: Bytes) -> Enqueued {
        if self.current.is_some() {
            if self.staged.len() >= MAX_STAGED_CLIPS {
                let dropped = self.staged.pop_front().map_or(0, |clip| clip.len());
                warn!(dropped_bytes = dropped, "Audio backlog full, dropping oldest staged clip");
            }
            self.staged.push_back(data);
            debug!(queued = self.staged.len(), "Audio staged behind current clip");
            return Enqueued::Staged {
                queued: self.staged.len(),
            };
        }
        Enqueued::Started {
            clip_id: self.start(data),
        }
    }

    fn start(&mut self, data: Bytes) -> u64 {
        self.next_id += 1;
        let clip = AudioClip {
            id: self.next_id,
            data,
            format: self.format,
        };
        let output = Arc::clone(&self.output);
        let done_tx = self.done_tx.clone();
        let clip_id = clip.id;

        let task = tokio::spawn(async move {
            let result = match AssertUnwindSafe(output.play(&clip)).catch_unwind().await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(format!("{e:#}")),
                Err(_) => Err("audio output panicked".to_string()),
            };
            let _ = done_tx.send(PlaybackDone { clip_id, result });
        });
        self.current = Some(Playing { clip_id, task });
        clip_id
    }

    /// Applies a completion report. Returns `None` for a report that does
    /// not belong to the current clip.
    pub fn finish(&mut self, done: PlaybackDone) -> Option<Finished> {
        match &self.current {
            Some(playing) if playing.clip_id == done.clip_id => {}
            _ => {
                debug!(clip_id = done.clip_id, "Ignoring completion of a released clip");
                return None;
            }
        }
        self.current = None;
        let error = done.result.err();
        if let Some(e) = &error {
            warn!(clip_id = done.clip_id, error = %e, "Playback failed");
        }
        let next = self.staged.pop_front().map(|data| NextClip {
            bytes: data.len(),
            clip_id: self.start(data),
        });
        Some(Finished {
            clip_id: done.clip_id,
            error,
            next,
        })
    }

    /// Stops playback and discards staged audio.
    pub fn release(&mut self) {
        if let Some(playing) = self.current.take() {
            playing.task.abort();
            info!(clip_id = playing.clip_id, "Playback stopped");
        }
        self.staged.clear();
    }
}

impl Drop for AudioPlaybackCoordinator {
    fn drop(&mut self) {
        self.release();
    }
}
