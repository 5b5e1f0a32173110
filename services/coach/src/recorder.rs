use anyhow::Context;
use async_trait::async_trait;
use repcoach_core::summary::{SessionRecorder, SessionSummary};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::info;

/// Appends one JSON object per finished session to a file.
pub struct JsonlRecorder {
    path: PathBuf,
}

impl JsonlRecorder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SessionRecorder for JsonlRecorder {
    async fn record(&self, summary: &SessionSummary) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(summary).context("Failed to serialize summary")?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        file.flush().await?;

        info!(
            session_id = %summary.session_id,
            path = %self.path.display(),
            "Session summary recorded"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use repcoach_core::summary::SessionOutcome;
    use uuid::Uuid;

    fn summary(frames_sent: u64) -> SessionSummary {
        SessionSummary {
            session_id: Uuid::new_v4(),
            conversation_id: None,
            started_at: Some(Utc::now()),
            ended_at: Utc::now(),
            active_seconds: 30.0,
            frames_sent,
            tool_calls_answered: 0,
            reconnects: 1,
            outcome: SessionOutcome::Completed,
        }
    }

    #[tokio::test]
    async fn test_appends_one_line_per_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.jsonl");
        let recorder = JsonlRecorder::new(&path);

        recorder.record(&summary(3)).await.unwrap();
        recorder.record(&summary(5)).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<SessionSummary> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].frames_sent, 3);
        assert_eq!(lines[1].frames_sent, 5);
        assert_eq!(lines[1].reconnects, 1);
    }

    #[tokio::test]
    async fn test_unwritable_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = JsonlRecorder::new(dir.path().join("missing").join("s.jsonl"));
        assert!(recorder.record(&summary(0)).await.is_err());
    }
}
