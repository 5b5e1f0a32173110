//! Workout Session State Machine
//!
//! A session moves through `Idle → CountingDown → Active ⇄ Paused → Stopped`.
//! The `Session` struct is the single source of truth for that lifecycle: all
//! mutation happens through the transition methods below, each of which
//! rejects moves that are not legal from the current state. A stopped session
//! is never revived; a new workout gets a fresh `Session`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Number of countdown ticks between the user's start action and activation.
pub const DEFAULT_COUNTDOWN_TICKS: u8 = 3;

/// The externally visible lifecycle state of a workout session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    /// Initial state. Nothing is being captured.
    Idle,
    /// The pre-start countdown is running. `remaining == 0` means the
    /// countdown has expired and activation is waiting on the connection.
    CountingDown { remaining: u8 },
    /// Frames are being captured and the remote agent is coaching.
    Active,
    /// The user paused the workout.
    Paused,
    /// Terminal.
    Stopped,
}

impl SessionState {
    /// True for the states in which the session holds live resources.
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            SessionState::CountingDown { .. } | SessionState::Active | SessionState::Paused
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::CountingDown { remaining } => write!(f, "counting down ({remaining})"),
            SessionState::Active => write!(f, "active"),
            SessionState::Paused => write!(f, "paused"),
            SessionState::Stopped => write!(f, "stopped"),
        }
    }
}

/// A completed state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: SessionState,
    pub to: SessionState,
}

/// Outcome of a single countdown tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownStep {
    Remaining(u8),
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("cannot {action} a session that is {from}")]
    Invalid {
        from: SessionState,
        action: &'static str,
    },
}

/// The authoritative session record.
#[derive(Debug, Clone)]
pub struct Session {
    id: Uuid,
    state: SessionState,
    countdown_ticks: u8,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    active_since: Option<DateTime<Utc>>,
    active_time: chrono::Duration,
}

impl Session {
    /// Creates an idle session whose countdown lasts `countdown_ticks` ticks.
    pub fn new(countdown_ticks: u8) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Idle,
            countdown_ticks,
            started_at: None,
            ended_at: None,
            active_since: None,
            active_time: chrono::Duration::zero(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Set when the session first enters `Active`.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Derived gate: frames may only be captured while the session is active.
    pub fn frame_gate_open(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Total time spent in `Active`, including the currently running stretch.
    pub fn active_duration(&self) -> chrono::Duration {
        match self.active_since {
            Some(since) => self.active_time + (Utc::now() - since),
            None => self.active_time,
        }
    }

    /// `Idle → CountingDown`, on the user's start action.
    pub fn begin_countdown(&mut self) -> Result<Transition, TransitionError> {
        match self.state {
            SessionState::Idle => Ok(self.move_to(SessionState::CountingDown {
                remaining: self.countdown_ticks,
            })),
            from => Err(TransitionError::Invalid {
                from,
                action: "start",
            }),
        }
    }

    /// Advances the countdown by one tick.
    ///
    /// Returns `Expired` once the last tick has elapsed; the session then
    /// stays in `CountingDown { remaining: 0 }` until [`Session::activate`].
    pub fn countdown_tick(&mut self) -> Result<CountdownStep, TransitionError> {
        match self.state {
            SessionState::CountingDown { remaining } if remaining > 1 => {
                self.state = SessionState::CountingDown {
                    remaining: remaining - 1,
                };
                Ok(CountdownStep::Remaining(remaining - 1))
            }
            SessionState::CountingDown { .. } => {
                self.state = SessionState::CountingDown { remaining: 0 };
                Ok(CountdownStep::Expired)
            }
            from => Err(TransitionError::Invalid {
                from,
                action: "tick the countdown of",
            }),
        }
    }

    /// `CountingDown → Idle`, when the user cancels before activation.
    pub fn cancel_countdown(&mut self) -> Result<Transition, TransitionError> {
        match self.state {
            SessionState::CountingDown { .. } => Ok(self.move_to(SessionState::Idle)),
            from => Err(TransitionError::Invalid {
                from,
                action: "cancel the countdown of",
            }),
        }
    }

    /// `CountingDown(0) → Active`, once the countdown has expired.
    pub fn activate(&mut self) -> Result<Transition, TransitionError> {
        match self.state {
            SessionState::CountingDown { remaining: 0 } => {
                let now = Utc::now();
                self.started_at.get_or_insert(now);
                self.active_since = Some(now);
                Ok(self.move_to(SessionState::Active))
            }
            from => Err(TransitionError::Invalid {
                from,
                action: "activate",
            }),
        }
    }

    /// `Active → Paused`.
    pub fn pause(&mut self) -> Result<Transition, TransitionError> {
        match self.state {
            SessionState::Active => {
                self.close_active_stretch();
                Ok(self.move_to(SessionState::Paused))
            }
            from => Err(TransitionError::Invalid {
                from,
                action: "pause",
            }),
        }
    }

    /// `Paused → Active`.
    pub fn resume(&mut self) -> Result<Transition, TransitionError> {
        match self.state {
            SessionState::Paused => {
                self.active_since = Some(Utc::now());
                Ok(self.move_to(SessionState::Active))
            }
            from => Err(TransitionError::Invalid {
                from,
                action: "resume",
            }),
        }
    }

    /// Any state except `Stopped` → `Stopped`.
    pub fn stop(&mut self) -> Result<Transition, TransitionError> {
        match self.state {
            SessionState::Stopped => Err(TransitionError::Invalid {
                from: SessionState::Stopped,
                action: "stop",
            }),
            _ => {
                self.close_active_stretch();
                self.ended_at = Some(Utc::now());
                Ok(self.move_to(SessionState::Stopped))
            }
        }
    }

    fn close_active_stretch(&mut self) {
        if let Some(since) = self.active_since.take() {
            self.active_time += Utc::now() - since;
        }
    }

    fn move_to(&mut self, to: SessionState) -> Transition {
        let from = std::mem::replace(&mut self.state, to);
        Transition { from, to }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(DEFAULT_COUNTDOWN_TICKS)
    }
}
