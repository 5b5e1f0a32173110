//! What is kept about a session once it stops.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    /// The session reached `Active` at least once.
    Completed,
    /// Stopped before the countdown ever finished.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub conversation_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: DateTime<Utc>,
    pub active_seconds: f64,
    pub frames_sent: u64,
    pub tool_calls_answered: u64,
    pub reconnects: u32,
    pub outcome: SessionOutcome,
}

impl SessionSummary {
    pub fn outcome_for(started_at: Option<DateTime<Utc>>) -> SessionOutcome {
        if started_at.is_some() {
            SessionOutcome::Completed
        } else {
            SessionOutcome::Cancelled
        }
    }
}

/// Persists session summaries. Implementations live outside the core.
#[async_trait]
pub trait SessionRecorder: Send + Sync {
    async fn record(&self, summary: &SessionSummary) -> anyhow::Result<()>;
}

/// Recorder that keeps nothing.
pub struct DiscardRecorder;

#[async_trait]
impl SessionRecorder for DiscardRecorder {
    async fn record(&self, _summary: &SessionSummary) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(started_at: Option<DateTime<Utc>>) -> SessionSummary {
        SessionSummary {
            session_id: Uuid::new_v4(),
            conversation_id: Some("conv_1".into()),
            started_at,
            ended_at: Utc::now(),
            active_seconds: 12.5,
            frames_sent: 4,
            tool_calls_answered: 1,
            reconnects: 0,
            outcome: SessionSummary::outcome_for(started_at),
        }
    }

    #[test]
    fn test_outcome_follows_activation() {
        assert_eq!(summary(Some(Utc::now())).outcome, SessionOutcome::Completed);
        assert_eq!(summary(None).outcome, SessionOutcome::Cancelled);
    }

    #[test]
    fn test_summary_serialization() {
        let value = serde_json::to_value(summary(None)).unwrap();
        assert_eq!(value["outcome"], "cancelled");
        assert!(value["started_at"].is_null());
        assert_eq!(value["conversation_id"], "conv_1");
    }
}
