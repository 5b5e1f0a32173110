//! Camera access and frame pacing.
//!
//! The camera is a singly-owned capability acquired when the session starts
//! and released when it stops. `FramePacer` owns it together with the pacing
//! state and a fixed-cadence timer that only runs while the session is
//! active. Each timer tick asks [`PacingState`] for permission; a permitted
//! tick captures one frame, encodes it as JPEG, hands it to any tool handler
//! waiting for a snapshot and, in stream mode, marks it for transmission.
//! Disallowed ticks are dropped.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::RgbImage;
use repcoach_core::pacing::{PacingState, SkipReason};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// Capability errors. Terminal for the current attempt and shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CameraError {
    #[error("Camera access was denied. Please allow camera access and try again.")]
    PermissionDenied,
    #[error("No camera device was found. Please connect a camera and try again.")]
    NotFound,
    #[error("Could not access the camera. It might be in use by another application.")]
    InUse,
    #[error("Error accessing camera: {0}")]
    Other(String),
}

impl From<io::Error> for CameraError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::PermissionDenied => CameraError::PermissionDenied,
            io::ErrorKind::NotFound => CameraError::NotFound,
            io::ErrorKind::ResourceBusy => CameraError::InUse,
            _ => CameraError::Other(e.to_string()),
        }
    }
}

/// A single frame could not be produced.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("no camera acquired")]
    NoCamera,
    #[error("failed to read frame {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to encode frame: {0}")]
    Encode(#[from] image::ImageError),
}

/// Why a tool handler did not get its snapshot.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SnapshotError {
    #[error("session is not active")]
    Inactive,
    #[error("capture failed: {0}")]
    Capture(String),
    #[error("snapshot source closed")]
    Closed,
}

/// An open camera stream.
pub trait Camera: Send {
    fn capture(&mut self) -> Result<RgbImage, CaptureError>;
}

/// Grants access to a camera.
pub trait CameraSource: Send + Sync {
    fn acquire(&self) -> Result<Box<dyn Camera>, CameraError>;
}

const FRAME_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Camera backed by a directory of still images, replayed in name order.
pub struct ImageDirSource {
    dir: PathBuf,
    width: u32,
    height: u32,
}

impl ImageDirSource {
    pub fn new(dir: impl Into<PathBuf>, width: u32, height: u32) -> Self {
        Self {
            dir: dir.into(),
            width,
            height,
        }
    }
}

fn is_frame_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

impl CameraSource for ImageDirSource {
    fn acquire(&self) -> Result<Box<dyn Camera>, CameraError> {
        let mut frames = std::fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_frame_file(path))
            .collect::<Vec<_>>();
        if frames.is_empty() {
            return Err(CameraError::NotFound);
        }
        frames.sort();
        info!(dir = %self.dir.display(), frames = frames.len(), "Camera acquired");
        Ok(Box::new(ImageDirCamera {
            frames,
            next: 0,
            width: self.width,
            height: self.height,
        }))
    }
}

pub struct ImageDirCamera {
    frames: Vec<PathBuf>,
    next: usize,
    width: u32,
    height: u32,
}

impl Camera for ImageDirCamera {
    fn capture(&mut self) -> Result<RgbImage, CaptureError> {
        let path = &self.frames[self.next % self.frames.len()];
        self.next = (self.next + 1) % self.frames.len();
        let frame = image::open(path).map_err(|source| CaptureError::Read {
            path: path.clone(),
            source,
        })?;
        Ok(frame
            .resize_exact(self.width, self.height, FilterType::Triangle)
            .to_rgb8())
    }
}

pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> Result<Bytes, CaptureError> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality).encode_image(frame)?;
    Ok(Bytes::from(buf))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub jpeg: Bytes,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureMode {
    /// Every permitted capture is transmitted as a binary frame.
    #[default]
    Stream,
    /// Frames are only captured to answer a tool handler's request.
    OnDemand,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown capture mode '{0}', expected 'stream' or 'on_demand'")]
pub struct UnknownCaptureMode(pub String);

impl FromStr for CaptureMode {
    type Err = UnknownCaptureMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stream" => Ok(CaptureMode::Stream),
            "on_demand" | "on-demand" | "ondemand" => Ok(CaptureMode::OnDemand),
            _ => Err(UnknownCaptureMode(s.to_string())),
        }
    }
}

impl fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureMode::Stream => write!(f, "stream"),
            CaptureMode::OnDemand => write!(f, "on_demand"),
        }
    }
}

pub type SnapshotReply = oneshot::Sender<Result<Snapshot, SnapshotError>>;

/// Receiving end of [`SnapshotRequester`], drained by the session loop.
pub type SnapshotRequests = mpsc::UnboundedReceiver<SnapshotReply>;

/// Handle tool handlers use to obtain a fresh snapshot.
#[derive(Clone)]
pub struct SnapshotRequester {
    tx: mpsc::UnboundedSender<SnapshotReply>,
}

impl SnapshotRequester {
    pub fn channel() -> (Self, SnapshotRequests) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Waits for the next permitted capture.
    pub async fn next_snapshot(&self) -> Result<Snapshot, SnapshotError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(reply).map_err(|_| SnapshotError::Closed)?;
        rx.await.map_err(|_| SnapshotError::Closed)?
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacerSettings {
    pub min_interval: Duration,
    pub tick: Duration,
    pub mode: CaptureMode,
    pub jpeg_quality: u8,
}

impl Default for PacerSettings {
    fn default() -> Self {
        Self {
            min_interval: repcoach_core::pacing::DEFAULT_MIN_INTERVAL,
            tick: Duration::from_millis(100),
            mode: CaptureMode::Stream,
            jpeg_quality: 80,
        }
    }
}

/// What one timer tick did.
#[derive(Debug)]
pub enum TickOutcome {
    /// `first` is set only for the first tick of a run with the same reason.
    Skipped { reason: SkipReason, first: bool },
    Captured { jpeg: Bytes, send: bool, served: usize },
    Failed(CaptureError),
}

pub struct FramePacer {
    pacing: PacingState,
    settings: PacerSettings,
    camera: Option<Box<dyn Camera>>,
    timer: Option<Interval>,
    waiters: Vec<SnapshotReply>,
    last_skip: Option<SkipReason>,
}

impl FramePacer {
    pub fn new(settings: PacerSettings) -> Self {
        Self {
            pacing: PacingState::new(settings.min_interval),
            settings,
            camera: None,
            timer: None,
            waiters: Vec::new(),
            last_skip: None,
        }
    }

    pub fn mode(&self) -> CaptureMode {
        self.settings.mode
    }

    pub fn pacing(&self) -> &PacingState {
        &self.pacing
    }

    pub fn install_camera(&mut self, camera: Box<dyn Camera>) {
        self.camera = Some(camera);
    }

    pub fn has_camera(&self) -> bool {
        self.camera.is_some()
    }

    pub fn release_camera(&mut self) {
        if self.camera.take().is_some() {
            info!("Camera released");
        }
    }

    pub fn on_audio_started(&mut self, now: Instant) {
        self.pacing.on_audio_started(now);
    }

    pub fn on_audio_finished(&mut self) {
        self.pacing.on_audio_finished();
    }

    /// Starts the capture timer. The first permitted tick captures at once.
    pub fn arm(&mut self) {
        let mut timer = tokio::time::interval(self.settings.tick);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.timer = Some(timer);
        self.pacing.reset_clock();
        self.last_skip = None;
        debug!(tick_ms = self.settings.tick.as_millis() as u64, "Frame pacer armed");
    }

    /// Cancels the capture timer and fails any pending snapshot requests.
    pub fn disarm(&mut self) {
        if self.timer.take().is_some() {
            debug!("Frame pacer disarmed");
        }
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(SnapshotError::Inactive));
        }
    }

    pub fn is_armed(&self) -> bool {
        self.timer.is_some()
    }

    pub fn pending_requests(&self) -> usize {
        self.waiters.len()
    }

    /// Resolves on the next timer tick. Never resolves while disarmed.
    pub async fn tick(&mut self) -> Instant {
        match self.timer.as_mut() {
            Some(timer) => timer.tick().await,
            None => std::future::pending().await,
        }
    }

    /// Queues a snapshot request, or rejects it when no capture can come.
    pub fn request_snapshot(&mut self, reply: SnapshotReply, session_active: bool) {
        if !session_active || !self.is_armed() {
            let _ = reply.send(Err(SnapshotError::Inactive));
            return;
        }
        self.waiters.push(reply);
    }

    /// Handles one tick at `now`. `gate_open` is true while the session is
    /// active and connected.
    pub fn on_tick(&mut self, now: Instant, gate_open: bool) -> TickOutcome {
        self.waiters.retain(|w| !w.is_closed());

        let permitted = self.pacing.check(now, gate_open).and_then(|()| {
            if self.settings.mode == CaptureMode::OnDemand && self.waiters.is_empty() {
                Err(SkipReason::NotRequested)
            } else {
                Ok(())
            }
        });
        if let Err(reason) = permitted {
            let first = self.last_skip != Some(reason);
            self.last_skip = Some(reason);
            trace!(?reason, "Capture skipped");
            return TickOutcome::Skipped { reason, first };
        }
        self.last_skip = None;

        // A failed attempt still counts against the interval.
        self.pacing.record_capture(now);
        match self.capture() {
            Ok(snapshot) => {
                let served = self.waiters.len();
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.send(Ok(snapshot.clone()));
                }
                debug!(bytes = snapshot.jpeg.len(), served, "Frame captured");
                TickOutcome::Captured {
                    jpeg: snapshot.jpeg,
                    send: self.settings.mode == CaptureMode::Stream,
                    served,
                }
            }
            Err(e) => {
                warn!(error = %e, "Frame capture failed");
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.send(Err(SnapshotError::Capture(e.to_string())));
                }
                TickOutcome::Failed(e)
            }
        }
    }

    fn capture(&mut self) -> Result<Snapshot, CaptureError> {
        let camera = self.camera.as_mut().ok_or(CaptureError::NoCamera)?;
        let frame = camera.capture()?;
        let jpeg = encode_jpeg(&frame, self.settings.jpeg_quality)?;
        Ok(Snapshot {
            jpeg,
            width: frame.width(),
            height: frame.height(),
            captured_at: Utc::now(),
        })
    }
}
