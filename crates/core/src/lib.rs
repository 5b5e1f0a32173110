pub mod dispatch;
pub mod events;
pub mod pacing;
pub mod protocol;
pub mod session;
pub mod summary;
pub mod tools;

pub use dispatch::{Effect, Inbound, dispatch};
pub use events::{EventLog, EventRecord, SessionEvent};
pub use pacing::{PacingState, SkipReason};
pub use protocol::{ClientEnvelope, ConversationConfig, InboundEnvelope, OutgoingFrame};
pub use session::{Session, SessionState, TransitionError};
pub use summary::{SessionOutcome, SessionRecorder, SessionSummary};
pub use tools::{PendingToolCall, ToolCallBridge, ToolCallRequest, ToolCallResult, ToolHandler};
