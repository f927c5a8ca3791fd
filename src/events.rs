//! Typed stream events.
//!
//! The event router turns raw SSE frames into this tagged union. Each variant
//! carries only the fields relevant to it; the turn assembler is the sole
//! consumer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Route metadata announced at the start of a turn.
///
/// Carries the identifiers the backend assigned to this turn. The backend may
/// issue an immediate `conversation_id` correction here, which the session
/// controller applies to subsequent turns.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RouteInfo {
    #[serde(default)]
    pub turn_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

/// Agent selection announced by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AgentInfo {
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub llm_index: Option<i64>,
}

/// A single evidence/citation reference attached to a finished answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRef {
    #[serde(default)]
    pub doc_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
}

/// Metadata delivered with the `done` event.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DoneInfo {
    #[serde(default)]
    pub response_evidence: Option<Vec<EvidenceRef>>,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub quality_decision: Option<String>,
    #[serde(default)]
    pub risk_level: Option<String>,
}

/// Backend-reported error payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
    /// Whether the caller may usefully retry. Defaults to `true` when the
    /// backend omits it.
    #[serde(default = "default_recoverable")]
    pub recoverable: bool,
}

fn default_recoverable() -> bool {
    true
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
            recoverable,
        }
    }
}

/// A typed event produced by the router and consumed by the turn assembler.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedEvent {
    /// Turn/session/conversation identifiers for this turn.
    Route(RouteInfo),
    /// Agent name and model index.
    Agent(AgentInfo),
    /// Visible answer text increment.
    ContentDelta(String),
    /// Reasoning/thinking text increment, kept apart from content.
    ReasoningDelta(String),
    /// Instantaneous routing-stage status (overwrites, never accumulates).
    RouteStatus(String),
    /// Instantaneous execution-stage status (overwrites, never accumulates).
    ExecuteStatus(String),
    /// Partial observability snapshot to be merged into the turn.
    Observability(crate::observability::ObservabilitySnapshot),
    /// Structured thinking trace, surfaced as-is (not part of content).
    ThinkingTrace(Value),
    /// V3 pipeline status notification.
    Status(String),
    /// Evidence references streamed ahead of completion.
    Evidence(Vec<EvidenceRef>),
    /// Logical end of the turn.
    Done(DoneInfo),
    /// Backend-reported error; terminates the turn.
    Error(ErrorInfo),
    /// Unrecognized frame; dropped silently by the assembler.
    Unknown,
}

impl TypedEvent {
    /// Event kind name, used for trace logging.
    pub fn kind(&self) -> &'static str {
        match self {
            TypedEvent::Route(_) => "route",
            TypedEvent::Agent(_) => "agent",
            TypedEvent::ContentDelta(_) => "content_delta",
            TypedEvent::ReasoningDelta(_) => "reasoning_delta",
            TypedEvent::RouteStatus(_) => "route_status",
            TypedEvent::ExecuteStatus(_) => "execute_status",
            TypedEvent::Observability(_) => "observability",
            TypedEvent::ThinkingTrace(_) => "thinking_trace",
            TypedEvent::Status(_) => "status",
            TypedEvent::Evidence(_) => "evidence",
            TypedEvent::Done(_) => "done",
            TypedEvent::Error(_) => "error",
            TypedEvent::Unknown => "unknown",
        }
    }
}
