//! The workout session actor.
//!
//! One task owns the session state machine, the connection manager, the
//! playback coordinator, the frame pacer and the tool bridge, and reacts to
//! everything that can happen to them inside a single `tokio::select!` loop:
//! user commands, connection events, timer ticks, playback completions, tool
//! results and snapshot requests. Nothing else holds a reference to those
//! components; the outside world talks to the loop through a
//! [`SessionHandle`].

use crate::audio::{AudioOutput, AudioPlaybackCoordinator, Enqueued, NextClip, PlaybackDone};
use crate::audio_utils::AudioFormat;
use crate::capture::{
    CameraError, CameraSource, FramePacer, PacerSettings, SnapshotRequester, SnapshotRequests,
    TickOutcome,
};
use crate::signed_url::SignedUrlIssuer;
use crate::ws::connection::{
    CloseReason, ConnectionEvent, ConnectionManager, ConnectionSettings,
};
use crate::ws::transport::Connector;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use repcoach_core::dispatch::{Effect, Inbound, dispatch};
use repcoach_core::events::{EventLog, SessionEvent};
use repcoach_core::pacing::SkipReason;
use repcoach_core::protocol::{ClientEnvelope, OutgoingFrame};
use repcoach_core::session::{CountdownStep, Session, SessionState, Transition, TransitionError};
use repcoach_core::summary::{DiscardRecorder, SessionRecorder, SessionSummary};
use repcoach_core::tools::{ToolCallBridge, ToolCallRequest, ToolCallResult, ToolHandler};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{Instant, Interval};
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error("session has ended")]
    Ended,
}

/// What a UI layer can observe about a running session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub state: SessionState,
    pub connected: bool,
    pub audio_busy: bool,
    pub conversation_id: Option<String>,
    pub camera_error: Option<String>,
    pub reconnect_attempt: u32,
    pub frames_sent: u64,
}

impl SessionStatus {
    fn initial() -> Self {
        Self {
            state: SessionState::Idle,
            connected: false,
            audio_busy: false,
            conversation_id: None,
            camera_error: None,
            reconnect_attempt: 0,
            frames_sent: 0,
        }
    }
}

#[derive(Clone)]
pub struct SessionSettings {
    pub countdown_ticks: u8,
    pub countdown_tick: Duration,
    pub pacer: PacerSettings,
    pub tool_timeout: Duration,
    pub connection: ConnectionSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Start,
    CancelCountdown,
    Pause,
    Resume,
    Stop,
}

struct CommandRequest {
    command: Command,
    reply: oneshot::Sender<Result<(), SessionError>>,
}

/// A transition waiting for the connection to come back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Deferred {
    Activate,
    Pause,
    Resume,
}

/// Assembles a session from its collaborators.
pub struct SessionBuilder {
    settings: SessionSettings,
    issuer: Arc<dyn SignedUrlIssuer>,
    connector: Arc<dyn Connector>,
    camera: Arc<dyn CameraSource>,
    audio: Arc<dyn AudioOutput>,
    recorder: Arc<dyn SessionRecorder>,
    events: EventLog,
    bridge: ToolCallBridge,
    snapshots: SnapshotRequester,
    snapshot_rx: SnapshotRequests,
}

impl SessionBuilder {
    pub fn new(
        settings: SessionSettings,
        issuer: Arc<dyn SignedUrlIssuer>,
        connector: Arc<dyn Connector>,
        camera: Arc<dyn CameraSource>,
        audio: Arc<dyn AudioOutput>,
    ) -> Self {
        let (snapshots, snapshot_rx) = SnapshotRequester::channel();
        let bridge = ToolCallBridge::new(settings.tool_timeout);
        Self {
            settings,
            issuer,
            connector,
            camera,
            audio,
            recorder: Arc::new(DiscardRecorder),
            events: EventLog::new(),
            bridge,
            snapshots,
            snapshot_rx,
        }
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn SessionRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn with_event_log(mut self, events: EventLog) -> Self {
        self.events = events;
        self
    }

    /// Handle for tools that answer with a fresh camera frame.
    pub fn snapshots(&self) -> SnapshotRequester {
        self.snapshots.clone()
    }

    pub fn events(&self) -> EventLog {
        self.events.clone()
    }

    pub fn register_tool(
        mut self,
        tool_name: impl Into<String>,
        handler: impl ToolHandler + 'static,
    ) -> Self {
        self.bridge.register_handler(tool_name, handler);
        self
    }

    pub fn spawn(self) -> SessionHandle {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(SessionStatus::initial());
        let (conn_tx, conn_events) = mpsc::unbounded_channel();
        let (done_tx, playback_done) = mpsc::unbounded_channel();
        let (tool_results_tx, tool_results) = mpsc::unbounded_channel();

        let session = WorkoutSession {
            session: Session::new(self.settings.countdown_ticks),
            countdown_tick: self.settings.countdown_tick,
            countdown: None,
            deferred: None,
            connection: ConnectionManager::new(
                self.issuer,
                self.connector,
                self.settings.connection,
                conn_tx,
            ),
            conn_events,
            audio: AudioPlaybackCoordinator::new(self.audio, done_tx),
            playback_done,
            pacer: FramePacer::new(self.settings.pacer),
            camera: self.camera,
            snapshot_rx: self.snapshot_rx,
            bridge: self.bridge,
            tool_tasks: HashMap::new(),
            tool_results_tx,
            tool_results,
            commands,
            status_tx,
            events: self.events.clone(),
            recorder: self.recorder,
            conversation_id: None,
            camera_error: None,
            frames_sent: 0,
            tool_calls_answered: 0,
        };

        SessionHandle {
            commands: commands_tx,
            status,
            events: self.events,
            task: tokio::spawn(session.run()),
        }
    }
}

/// Control surface of a spawned session. Dropping it stops the session.
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<CommandRequest>,
    status: watch::Receiver<SessionStatus>,
    events: EventLog,
    task: JoinHandle<SessionSummary>,
}

impl SessionHandle {
    async fn request(&self, command: Command) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(CommandRequest { command, reply })
            .map_err(|_| SessionError::Ended)?;
        rx.await.map_err(|_| SessionError::Ended)?
    }

    /// Acquires the camera, starts the countdown and opens the connection.
    pub async fn start(&self) -> Result<(), SessionError> {
        self.request(Command::Start).await
    }

    pub async fn cancel_countdown(&self) -> Result<(), SessionError> {
        self.request(Command::CancelCountdown).await
    }

    /// Pauses the session, reconnecting first if needed.
    pub async fn pause(&self) -> Result<(), SessionError> {
        self.request(Command::Pause).await
    }

    /// Resumes the session, reconnecting first if needed.
    pub async fn resume(&self) -> Result<(), SessionError> {
        self.request(Command::Resume).await
    }

    pub async fn stop(&self) -> Result<(), SessionError> {
        self.request(Command::Stop).await
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Ends the session if it is still running and returns its summary.
    ///
    /// To wait for the agent to end the conversation instead, watch
    /// [`SessionHandle::subscribe`] for `Stopped` before joining.
    pub async fn join(self) -> anyhow::Result<SessionSummary> {
        let SessionHandle { commands, task, .. } = self;
        drop(commands);
        Ok(task.await?)
    }
}

struct WorkoutSession {
    session: Session,
    countdown_tick: Duration,
    countdown: Option<Interval>,
    deferred: Option<Deferred>,
    connection: ConnectionManager,
    conn_events: mpsc::UnboundedReceiver<ConnectionEvent>,
    audio: AudioPlaybackCoordinator,
    playback_done: mpsc::UnboundedReceiver<PlaybackDone>,
    pacer: FramePacer,
    camera: Arc<dyn CameraSource>,
    snapshot_rx: SnapshotRequests,
    bridge: ToolCallBridge,
    tool_tasks: HashMap<String, AbortHandle>,
    tool_results_tx: mpsc::UnboundedSender<ToolCallResult>,
    tool_results: mpsc::UnboundedReceiver<ToolCallResult>,
    commands: mpsc::UnboundedReceiver<CommandRequest>,
    status_tx: watch::Sender<SessionStatus>,
    events: EventLog,
    recorder: Arc<dyn SessionRecorder>,
    conversation_id: Option<String>,
    camera_error: Option<String>,
    frames_sent: u64,
    tool_calls_answered: u64,
}

async fn next_tick(timer: &mut Option<Interval>) -> Instant {
    match timer.as_mut() {
        Some(timer) => timer.tick().await,
        None => std::future::pending().await,
    }
}

impl WorkoutSession {
    #[instrument(name = "workout_session", skip_all, fields(session_id = %self.session.id()))]
    async fn run(mut self) -> SessionSummary {
        info!("Session ready");
        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(CommandRequest { command, reply }) => {
                        let result = self.handle_command(command);
                        if let Err(e) = &result {
                            warn!(?command, error = %e, "Command rejected");
                        }
                        let _ = reply.send(result);
                    }
                    None => {
                        info!("All session handles dropped");
                        if self.session.state() != SessionState::Stopped {
                            let _ = self.stop();
                        }
                    }
                },
                Some(event) = self.conn_events.recv() => self.on_connection_event(event),
                Some(done) = self.playback_done.recv() => self.on_playback_done(done),
                Some(result) = self.tool_results.recv() => self.on_tool_result(result),
                Some(reply) = self.snapshot_rx.recv() => {
                    self.pacer.request_snapshot(reply, self.session.frame_gate_open());
                }
                _ = next_tick(&mut self.countdown) => self.on_countdown_tick(),
                _ = self.connection.reconnect_due() => {
                    info!(attempt = self.connection.reconnect_attempt(), "Reconnecting");
                    self.connection.open();
                }
                now = self.pacer.tick() => self.on_pacer_tick(now),
            }

            self.publish_status();
            if self.session.state() == SessionState::Stopped {
                break;
            }
        }

        let summary = self.summary();
        if let Err(e) = self.recorder.record(&summary).await {
            error!(error = %format!("{e:#}"), "Failed to record session summary");
        }
        info!(
            frames_sent = summary.frames_sent,
            tool_calls = summary.tool_calls_answered,
            reconnects = summary.reconnects,
            "Session finished"
        );
        summary
    }

    fn handle_command(&mut self, command: Command) -> Result<(), SessionError> {
        match command {
            Command::Start => self.start(),
            Command::CancelCountdown => {
                let transition = self.session.cancel_countdown()?;
                self.countdown = None;
                self.deferred = None;
                self.transitioned(transition);
                Ok(())
            }
            Command::Pause => {
                match (self.session.state(), self.deferred) {
                    (SessionState::Paused, Some(Deferred::Resume)) => {
                        self.deferred = None;
                        return Ok(());
                    }
                    (SessionState::Active, _) if !self.connection.is_open() => {
                        self.defer(Deferred::Pause);
                        return Ok(());
                    }
                    _ => {}
                }
                self.pause_now()
            }
            Command::Resume => {
                match (self.session.state(), self.deferred) {
                    (SessionState::Active, Some(Deferred::Pause)) => {
                        self.deferred = None;
                        return Ok(());
                    }
                    (SessionState::Paused, _) if !self.connection.is_open() => {
                        self.defer(Deferred::Resume);
                        return Ok(());
                    }
                    _ => {}
                }
                self.resume_now()
            }
            Command::Stop => self.stop(),
        }
    }

    fn start(&mut self) -> Result<(), SessionError> {
        if self.session.state() == SessionState::Idle && !self.pacer.has_camera() {
            match self.camera.acquire() {
                Ok(camera) => {
                    self.camera_error = None;
                    self.pacer.install_camera(camera);
                }
                Err(e) => {
                    warn!(error = %e, "Camera unavailable");
                    self.camera_error = Some(e.to_string());
                    self.events.record(SessionEvent::CameraUnavailable {
                        message: e.to_string(),
                    });
                    return Err(e.into());
                }
            }
        }

        let transition = self.session.begin_countdown()?;
        self.transitioned(transition);
        self.countdown = Some(tokio::time::interval_at(
            Instant::now() + self.countdown_tick,
            self.countdown_tick,
        ));
        self.ensure_connecting();
        Ok(())
    }

    fn on_countdown_tick(&mut self) {
        match self.session.countdown_tick() {
            Ok(CountdownStep::Remaining(remaining)) => {
                debug!(remaining, "Countdown");
                self.events.record(SessionEvent::CountdownTick { remaining });
            }
            Ok(CountdownStep::Expired) => {
                self.countdown = None;
                self.events.record(SessionEvent::CountdownTick { remaining: 0 });
                if self.connection.is_open() {
                    self.activate_now();
                } else {
                    info!("Countdown finished while disconnected, activating after reconnect");
                    self.defer(Deferred::Activate);
                }
            }
            Err(e) => {
                warn!(error = %e, "Countdown timer outlived the countdown");
                self.countdown = None;
            }
        }
    }

    fn defer(&mut self, action: Deferred) {
        debug!(?action, "Deferring transition until connected");
        self.deferred = Some(action);
        self.ensure_connecting();
    }

    fn ensure_connecting(&mut self) {
        if !self.connection.is_open() && !self.connection.is_connecting() {
            self.connection.open();
        }
    }

    fn activate_now(&mut self) {
        match self.session.activate() {
            Ok(transition) => {
                self.transitioned(transition);
                self.connection
                    .send(ClientEnvelope::StartSession { active: true }.into());
                self.pacer.arm();
            }
            Err(e) => warn!(error = %e, "Activation skipped"),
        }
    }

    fn pause_now(&mut self) -> Result<(), SessionError> {
        let transition = self.session.pause()?;
        self.transitioned(transition);
        self.pacer.disarm();
        self.connection
            .send(ClientEnvelope::PauseSession { active: false }.into());
        Ok(())
    }

    fn resume_now(&mut self) -> Result<(), SessionError> {
        let transition = self.session.resume()?;
        self.transitioned(transition);
        self.connection
            .send(ClientEnvelope::ResumeSession { active: true }.into());
        self.pacer.arm();
        Ok(())
    }

    fn run_deferred(&mut self) {
        let Some(action) = self.deferred.take() else {
            return;
        };
        info!(?action, "Running deferred transition");
        let result = match action {
            Deferred::Activate => {
                self.activate_now();
                Ok(())
            }
            Deferred::Pause => self.pause_now(),
            Deferred::Resume => self.resume_now(),
        };
        if let Err(e) = result {
            warn!(?action, error = %e, "Deferred transition no longer applies");
        }
    }

    /// Tears everything down in order: timers, camera, audio, tool calls,
    /// then the connection.
    fn stop(&mut self) -> Result<(), SessionError> {
        let transition = self.session.stop()?;
        self.connection
            .send(ClientEnvelope::StopSession { active: false }.into());

        self.countdown = None;
        self.deferred = None;
        self.pacer.disarm();
        self.pacer.release_camera();
        self.audio.release();
        self.pacer.on_audio_finished();

        self.bridge.cancel_all();
        for (_, task) in self.tool_tasks.drain() {
            task.abort();
        }

        self.connection.close(true);
        self.events
            .record(SessionEvent::ConnectionClosed { intentional: true });
        self.transitioned(transition);
        Ok(())
    }

    fn on_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Opened {
                generation,
                outbound,
                connected_at,
            } => {
                if !self.connection.on_opened(generation, outbound, connected_at) {
                    return;
                }
                self.events.record(SessionEvent::Connected { generation });
                if self.session.state() == SessionState::Active {
                    // The peer forgets the session state with the old connection.
                    self.connection
                        .send(ClientEnvelope::ResumeSession { active: true }.into());
                    self.pacer.arm();
                }
                self.run_deferred();
            }
            ConnectionEvent::Frame {
                generation,
                inbound,
            } => {
                if !self.connection.accepts(generation) {
                    debug!(generation, "Dropping frame from a replaced connection");
                    return;
                }
                self.on_inbound(inbound);
            }
            ConnectionEvent::Closed {
                generation,
                reason,
                detail,
            } => {
                let state = self.session.state();
                let may_reconnect = state != SessionState::Stopped;
                if !self.connection.accepts(generation) {
                    return;
                }
                let scheduled = self
                    .connection
                    .on_closed(generation, reason, &detail, may_reconnect);
                match reason {
                    CloseReason::Intentional => {
                        self.events
                            .record(SessionEvent::ConnectionClosed { intentional: true });
                        if state.is_running() {
                            info!("Agent ended the conversation, stopping session");
                            let _ = self.stop();
                        }
                    }
                    CloseReason::Lost => {
                        self.events.record(SessionEvent::ConnectionLost { detail });
                        if let Some((attempt, delay)) = scheduled {
                            self.events.record(SessionEvent::ReconnectScheduled {
                                attempt,
                                delay_ms: delay.as_millis() as u64,
                            });
                        }
                    }
                }
            }
        }
    }

    fn on_inbound(&mut self, inbound: Inbound) {
        for effect in dispatch(self.session.state(), inbound) {
            match effect {
                Effect::Send(frame) => {
                    self.connection.send(frame);
                }
                Effect::PlayAudio(audio) => self.play(audio),
                Effect::InvokeTool(request) => self.invoke_tool(request),
                Effect::ConversationStarted {
                    conversation_id,
                    output_format,
                } => {
                    info!(%conversation_id, ?output_format, "Conversation started");
                    if let Some(name) = &output_format {
                        match name.parse::<AudioFormat>() {
                            Ok(format) => self.audio.set_format(format),
                            Err(e) => warn!(error = %e, "Keeping current audio format"),
                        }
                    }
                    self.conversation_id = Some(conversation_id.clone());
                    self.events.record(SessionEvent::ConversationStarted {
                        conversation_id,
                        output_format,
                    });
                }
                Effect::Record(event) => self.events.record(event),
            }
        }
    }

    fn play(&mut self, audio: Bytes) {
        let bytes = audio.len();
        match self.audio.enqueue(audio) {
            Enqueued::Started { clip_id } => {
                self.pacer.on_audio_started(Instant::now());
                self.events
                    .record(SessionEvent::AudioStarted { clip_id, bytes });
            }
            Enqueued::Staged { .. } => {
                self.events.record(SessionEvent::AudioStaged { bytes });
            }
        }
    }

    fn on_playback_done(&mut self, done: PlaybackDone) {
        let Some(finished) = self.audio.finish(done) else {
            return;
        };
        self.events.record(SessionEvent::AudioFinished {
            clip_id: finished.clip_id,
            error: finished.error,
        });
        match finished.next {
            Some(NextClip { clip_id, bytes }) => {
                self.pacer.on_audio_started(Instant::now());
                self.events
                    .record(SessionEvent::AudioStarted { clip_id, bytes });
            }
            None => self.pacer.on_audio_finished(),
        }
    }

    fn invoke_tool(&mut self, request: ToolCallRequest) {
        let Some(pending) = self.bridge.accept(request) else {
            return;
        };
        let call_id = pending.tool_call_id.clone();
        let results = self.tool_results_tx.clone();
        let task = tokio::spawn(async move {
            let _ = results.send(pending.run().await);
        });
        self.tool_tasks.insert(call_id, task.abort_handle());
    }

    fn on_tool_result(&mut self, result: ToolCallResult) {
        self.tool_tasks.remove(&result.tool_call_id);
        if !self.bridge.complete(&result.tool_call_id) {
            debug!(call_id = %result.tool_call_id, "Dropping result of an abandoned tool call");
            return;
        }
        info!(
            call_id = %result.tool_call_id,
            is_error = result.is_error,
            "Tool call answered"
        );
        self.tool_calls_answered += 1;
        self.events.record(SessionEvent::ToolCallCompleted {
            tool_call_id: result.tool_call_id.clone(),
            is_error: result.is_error,
        });
        self.connection.send(ClientEnvelope::from(result).into());
    }

    fn on_pacer_tick(&mut self, now: Instant) {
        let gate_open = self.session.frame_gate_open() && self.connection.is_open();
        match self.pacer.on_tick(now, gate_open) {
            TickOutcome::Captured { jpeg, send, .. } => {
                let bytes = jpeg.len();
                let sent = send && self.connection.send(OutgoingFrame::Snapshot(jpeg));
                if sent {
                    self.frames_sent += 1;
                }
                self.events
                    .record(SessionEvent::FrameCaptured { bytes, sent });
            }
            TickOutcome::Skipped {
                reason,
                first: true,
            } if reason != SkipReason::TooSoon => {
                self.events.record(SessionEvent::FrameSkipped { reason });
            }
            TickOutcome::Skipped { .. } => {}
            TickOutcome::Failed(e) => {
                self.events.record(SessionEvent::CaptureFailed {
                    detail: e.to_string(),
                });
            }
        }
    }

    fn transitioned(&mut self, transition: Transition) {
        info!(from = %transition.from, to = %transition.to, "Session state changed");
        self.events.record(SessionEvent::StateChanged {
            from: transition.from,
            to: transition.to,
        });
    }

    fn publish_status(&self) {
        let status = SessionStatus {
            state: self.session.state(),
            connected: self.connection.is_open(),
            audio_busy: self.audio.is_busy(),
            conversation_id: self.conversation_id.clone(),
            camera_error: self.camera_error.clone(),
            reconnect_attempt: self.connection.reconnect_attempt(),
            frames_sent: self.frames_sent,
        };
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    fn summary(&self) -> SessionSummary {
        let started_at = self.session.started_at();
        let ended_at: DateTime<Utc> = self.session.ended_at().unwrap_or_else(Utc::now);
        SessionSummary {
            session_id: self.session.id(),
            conversation_id: self.conversation_id.clone(),
            started_at,
            ended_at,
            active_seconds: self.session.active_duration().num_milliseconds() as f64 / 1000.0,
            frames_sent: self.frames_sent,
            tool_calls_answered: self.tool_calls_answered,
            reconnects: self.connection.reconnects(),
            outcome: SessionSummary::outcome_for(started_at),
        }
    }
}
