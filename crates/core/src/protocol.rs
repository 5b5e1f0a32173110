//! Defines the envelope protocol spoken with the remote conversational agent.
//!
//! Text frames carry JSON envelopes tagged by `type`. Binary frames carry raw
//! payloads: audio from the agent, JPEG snapshots from the client.

use crate::tools::{ToolCallRequest, ToolCallResult};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Envelopes received from the agent.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEnvelope {
    /// First message of a conversation, carrying its identifier.
    ConversationInitiationMetadata {
        conversation_initiation_metadata_event: InitiationMetadata,
    },
    /// Keep-alive that must be answered with a matching `pong`.
    Ping { ping_event: PingEvent },
    /// A request for the client to run a local tool.
    ClientToolCall { client_tool_call: ToolCallRequest },
    /// Agent speech delivered inline as base64 instead of a binary frame.
    Audio { audio_event: AudioEvent },
    /// What the agent heard the user say.
    UserTranscript {
        user_transcription_event: UserTranscription,
    },
    /// The text of the agent's reply.
    AgentResponse { agent_response_event: AgentReply },
    /// A failure reported by the agent service.
    Error {
        #[serde(default)]
        data: serde_json::Value,
    },
    /// Any tag this client does not act on.
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct InitiationMetadata {
    pub conversation_id: String,
    #[serde(default)]
    pub agent_output_audio_format: Option<String>,
    #[serde(default)]
    pub user_input_audio_format: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingEvent {
    pub event_id: u64,
    #[serde(default)]
    pub ping_ms: Option<u64>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct AudioEvent {
    pub audio_base_64: String,
    #[serde(default)]
    pub event_id: Option<u64>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct UserTranscription {
    pub user_transcript: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct AgentReply {
    pub agent_response: String,
}

/// Envelopes sent to the agent.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEnvelope {
    /// Session configuration, sent once right after the connection opens.
    ConversationInitiationClientData {
        conversation_config_override: ConfigOverride,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        custom_llm_extra_body: Option<LlmExtraBody>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dynamic_variables: Option<HashMap<String, String>>,
    },
    /// Answer to a `ping` with the same `event_id`.
    Pong { event_id: u64 },
    /// The single answer to a `client_tool_call`.
    ClientToolResult {
        tool_call_id: String,
        result: String,
        is_error: bool,
    },
    StartSession { active: bool },
    StopSession { active: bool },
    PauseSession { active: bool },
    ResumeSession { active: bool },
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ConfigOverride {
    pub agent: AgentOverride,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tts: Option<TtsOverride>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct AgentOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<PromptOverride>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PromptOverride {
    pub prompt: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TtsOverride {
    pub voice_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct LlmExtraBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Per-conversation overrides carried by the initiation envelope.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationConfig {
    pub prompt: Option<String>,
    pub first_message: Option<String>,
    pub language: Option<String>,
    pub voice_id: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub dynamic_variables: HashMap<String, String>,
}

impl ConversationConfig {
    /// Builds the `conversation_initiation_client_data` envelope.
    pub fn initiation_envelope(&self) -> ClientEnvelope {
        let custom_llm_extra_body = if self.temperature.is_some() || self.max_tokens.is_some() {
            Some(LlmExtraBody {
                temperature: self.temperature,
                max_tokens: self.max_tokens,
            })
        } else {
            None
        };
        ClientEnvelope::ConversationInitiationClientData {
            conversation_config_override: ConfigOverride {
                agent: AgentOverride {
                    prompt: self.prompt.clone().map(|prompt| PromptOverride { prompt }),
                    first_message: self.first_message.clone(),
                    language: self.language.clone(),
                },
                tts: self
                    .voice_id
                    .clone()
                    .map(|voice_id| TtsOverride { voice_id }),
            },
            custom_llm_extra_body,
            dynamic_variables: (!self.dynamic_variables.is_empty())
                .then(|| self.dynamic_variables.clone()),
        }
    }
}

impl From<ToolCallResult> for ClientEnvelope {
    fn from(result: ToolCallResult) -> Self {
        ClientEnvelope::ClientToolResult {
            tool_call_id: result.tool_call_id,
            result: result.result,
            is_error: result.is_error,
        }
    }
}

/// A unit of outbound traffic: a control envelope or a raw snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum OutgoingFrame {
    Control(ClientEnvelope),
    Snapshot(Bytes),
}

impl OutgoingFrame {
    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            OutgoingFrame::Control(envelope) => envelope.tag(),
            OutgoingFrame::Snapshot(_) => "snapshot",
        }
    }
}

impl From<ClientEnvelope> for OutgoingFrame {
    fn from(envelope: ClientEnvelope) -> Self {
        OutgoingFrame::Control(envelope)
    }
}

impl ClientEnvelope {
    /// The wire `type` tag of this envelope.
    pub fn tag(&self) -> &'static str {
        match self {
            ClientEnvelope::ConversationInitiationClientData { .. } => {
                "conversation_initiation_client_data"
            }
            ClientEnvelope::Pong { .. } => "pong",
            ClientEnvelope::ClientToolResult { .. } => "client_tool_result",
            ClientEnvelope::StartSession { .. } => "start_session",
            ClientEnvelope::StopSession { .. } => "stop_session",
            ClientEnvelope::PauseSession { .. } => "pause_session",
            ClientEnvelope::ResumeSession { .. } => "resume_session",
        }
    }
}

/// Parses a JSON text frame.
pub fn decode_text(text: &str) -> Result<InboundEnvelope, serde_json::Error> {
    serde_json::from_str(text)
}
