//! Structured session event sink.
//!
//! An append-only log of typed, timestamped events. Any number of observers
//! (a UI, a test harness, a file writer) can read the backlog with
//! [`EventLog::snapshot`] or follow new events with [`EventLog::subscribe`].
//! The backlog keeps the most recent [`DEFAULT_RETENTION`] events; older ones
//! remain visible only to subscribers that were following at the time.

use crate::pacing::SkipReason;
use crate::session::SessionState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::debug;

const BROADCAST_CAPACITY: usize = 256;
pub const DEFAULT_RETENTION: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    CountdownTick {
        remaining: u8,
    },
    Connected {
        generation: u64,
    },
    ConnectionLost {
        detail: String,
    },
    ConnectionClosed {
        intentional: bool,
    },
    ReconnectScheduled {
        attempt: u32,
        delay_ms: u64,
    },
    ConversationStarted {
        conversation_id: String,
        output_format: Option<String>,
    },
    PingAnswered {
        event_id: u64,
    },
    FrameCaptured {
        bytes: usize,
        sent: bool,
    },
    FrameSkipped {
        reason: SkipReason,
    },
    CaptureFailed {
        detail: String,
    },
    AudioStarted {
        clip_id: u64,
        bytes: usize,
    },
    AudioStaged {
        bytes: usize,
    },
    AudioFinished {
        clip_id: u64,
        error: Option<String>,
    },
    ToolCallReceived {
        tool_name: String,
        tool_call_id: String,
    },
    ToolCallCompleted {
        tool_call_id: String,
        is_error: bool,
    },
    UserTranscript {
        text: String,
    },
    AgentResponse {
        text: String,
    },
    CameraUnavailable {
        message: String,
    },
    ProtocolError {
        detail: String,
    },
    AgentError {
        detail: String,
    },
    Ignored {
        tag: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRecord {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: SessionEvent,
}

/// Shared handle to the append-only event log. Cloning shares the log.
#[derive(Clone)]
pub struct EventLog {
    records: Arc<Mutex<VecDeque<EventRecord>>>,
    retention: usize,
    tx: broadcast::Sender<EventRecord>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }

    /// A log whose backlog holds at most `retention` events (at least one).
    pub fn with_retention(retention: usize) -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            records: Arc::new(Mutex::new(VecDeque::new())),
            retention: retention.max(1),
            tx,
        }
    }

    pub fn record(&self, event: SessionEvent) {
        debug!(?event, "session event");
        let record = EventRecord {
            at: Utc::now(),
            event,
        };
        {
            let mut records = self
                .records
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if records.len() >= self.retention {
                records.pop_front();
            }
            records.push_back(record.clone());
        }
        // No subscribers is fine.
        let _ = self.tx.send(record);
    }

    /// Receives every event recorded after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> Vec<EventRecord> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog").field("len", &self.len()).finish()
    }
}
