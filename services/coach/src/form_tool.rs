//! The `get_form` tool: answers the agent with the user's current posture.

use crate::capture::SnapshotRequester;
use anyhow::Context;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use repcoach_core::tools::{ToolHandler, ToolParameters};
use tracing::debug;

pub const GET_FORM_TOOL: &str = "get_form";

/// Replies with the next permitted capture as a JPEG data URL.
pub struct FormSnapshotTool {
    snapshots: SnapshotRequester,
}

impl FormSnapshotTool {
    pub fn new(snapshots: SnapshotRequester) -> Self {
        Self { snapshots }
    }
}

#[async_trait]
impl ToolHandler for FormSnapshotTool {
    async fn call(&self, _parameters: ToolParameters) -> anyhow::Result<String> {
        let snapshot = self
            .snapshots
            .next_snapshot()
            .await
            .context("No frame available")?;
        debug!(bytes = snapshot.jpeg.len(), "Answering get_form with snapshot");
        Ok(format!(
            "data:image/jpeg;base64,{}",
            STANDARD.encode(&snapshot.jpeg)
        ))
    }
}
