//! Inbound message dispatcher.
//!
//! Every inbound frame is mapped, given the current session state, to an
//! ordered list of [`Effect`]s. The function is pure; the runtime applies the
//! effects in order, so a `pong` produced here always leaves before anything a
//! later inbound frame causes.

use crate::events::SessionEvent;
use crate::protocol::{ClientEnvelope, InboundEnvelope, OutgoingFrame, decode_text};
use crate::session::SessionState;
use crate::tools::ToolCallRequest;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;

/// One frame received on the connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Text(String),
    /// Binary frames carry agent audio.
    Binary(Bytes),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Send(OutgoingFrame),
    PlayAudio(Bytes),
    InvokeTool(ToolCallRequest),
    ConversationStarted {
        conversation_id: String,
        output_format: Option<String>,
    },
    Record(SessionEvent),
}

pub fn dispatch(state: SessionState, inbound: Inbound) -> Vec<Effect> {
    if state == SessionState::Stopped {
        return Vec::new();
    }

    match inbound {
        Inbound::Binary(audio) if audio.is_empty() => Vec::new(),
        Inbound::Binary(audio) => vec![Effect::PlayAudio(audio)],
        Inbound::Text(text) => match decode_text(&text) {
            Ok(envelope) => dispatch_envelope(envelope, &text),
            Err(e) => vec![Effect::Record(SessionEvent::ProtocolError {
                detail: format!("undecodable text frame: {e}"),
            })],
        },
    }
}

/// The raw `type` of an envelope the decoder did not recognize.
fn envelope_tag(text: &str) -> String {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|value| value.get("type")?.as_str().map(str::to_owned))
        .unwrap_or_else(|| "untagged".to_string())
}

fn dispatch_envelope(envelope: InboundEnvelope, text: &str) -> Vec<Effect> {
    match envelope {
        InboundEnvelope::Ping { ping_event } => vec![
            Effect::Send(
                ClientEnvelope::Pong {
                    event_id: ping_event.event_id,
                }
                .into(),
            ),
            Effect::Record(SessionEvent::PingAnswered {
                event_id: ping_event.event_id,
            }),
        ],
        InboundEnvelope::ConversationInitiationMetadata {
            conversation_initiation_metadata_event: meta,
        } => vec![Effect::ConversationStarted {
            conversation_id: meta.conversation_id,
            output_format: meta.agent_output_audio_format,
        }],
        InboundEnvelope::ClientToolCall { client_tool_call } => vec![
            Effect::Record(SessionEvent::ToolCallReceived {
                tool_name: client_tool_call.tool_name.clone(),
                tool_call_id: client_tool_call.tool_call_id.clone(),
            }),
            Effect::InvokeTool(client_tool_call),
        ],
        InboundEnvelope::Audio { audio_event } => match STANDARD.decode(&audio_event.audio_base_64)
        {
            Ok(audio) if audio.is_empty() => Vec::new(),
            Ok(audio) => vec![Effect::PlayAudio(Bytes::from(audio))],
            Err(e) => vec![Effect::Record(SessionEvent::ProtocolError {
                detail: format!("invalid base64 audio: {e}"),
            })],
        },
        InboundEnvelope::UserTranscript {
            user_transcription_event,
        } => vec![Effect::Record(SessionEvent::UserTranscript {
            text: user_transcription_event.user_transcript,
        })],
        InboundEnvelope::AgentResponse {
            agent_response_event,
        } => vec![Effect::Record(SessionEvent::AgentResponse {
            text: agent_response_event.agent_response,
        })],
        InboundEnvelope::Error { data } => {
            let detail = match data {
                serde_json::Value::String(message) => message,
                serde_json::Value::Null => "unspecified error".to_string(),
                other => other.to_string(),
            };
            vec![Effect::Record(SessionEvent::AgentError { detail })]
        }
        InboundEnvelope::Other => vec![Effect::Record(SessionEvent::Ignored {
            tag: envelope_tag(text),
        })],
    }
}
