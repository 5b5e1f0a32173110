//! The transport seam: how a signed URL becomes a pair of message halves.

use anyhow::Context;
use async_trait::async_trait;
use futures_util::{Sink, Stream, StreamExt};
use repcoach_core::protocol::OutgoingFrame;
use std::pin::Pin;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::info;

pub type WsError = tokio_tungstenite::tungstenite::Error;
pub type FrameSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Message, WsError>> + Send>>;

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> anyhow::Result<(FrameSink, FrameStream)>;
}

/// Connects over real WebSockets.
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> anyhow::Result<(FrameSink, FrameStream)> {
        let (ws_stream, response) = connect_async(url)
            .await
            .context("Failed to connect to conversational agent WebSocket")?;
        info!(status = %response.status(), "WebSocket handshake complete");
        let (sink, stream) = ws_stream.split();
        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

/// Control envelopes travel as JSON text, snapshots as binary.
pub fn encode(frame: OutgoingFrame) -> anyhow::Result<Message> {
    match frame {
        OutgoingFrame::Control(envelope) => Ok(Message::Text(
            serde_json::to_string(&envelope)
                .context("Failed to serialize control envelope")?
                .into(),
        )),
        OutgoingFrame::Snapshot(jpeg) => Ok(Message::Binary(jpeg)),
    }
}
